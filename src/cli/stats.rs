//! Stats command implementation

use super::VenueLink;
use crate::config::Config;
use crate::protocol::requests;
use crate::signal::{DigitStats, TickSample, TickWindow};
use clap::Args;
use rust_decimal::prelude::ToPrimitive;

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Symbol to analyse; defaults to the session symbol
    #[arg(long)]
    pub symbol: Option<String>,

    /// Number of recent ticks
    #[arg(long, default_value_t = 1000)]
    pub count: usize,
}

impl StatsArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let symbol = self
            .symbol
            .clone()
            .unwrap_or_else(|| config.session.symbol.clone());
        let link = VenueLink::open(&config).await?;

        let response = link
            .connector
            .request(requests::ticks_history(&symbol, self.count))
            .await?;
        let ticks = TickSample::from_history(&response, &symbol)?;
        link.close().await;

        let mut window = TickWindow::new(self.count.max(1));
        window.extend(ticks);
        print_stats(&symbol, &window, config.strategy.split);
        Ok(())
    }
}

fn print_stats(symbol: &str, window: &TickWindow, split: u8) {
    let stats: DigitStats = window.digit_stats();
    println!("{symbol}: last digits of {} ticks", stats.total);
    for digit in 0..10u8 {
        let bar = "#".repeat(stats.percentage(digit).round().to_usize().unwrap_or(0));
        println!(
            "  {digit}  {:>5}  {:>8}%  {bar}",
            stats.counts[digit as usize],
            stats.percentage(digit).round_dp(2)
        );
    }
    println!("  most frequent:  {}", stats.most_frequent);
    println!("  least frequent: {}", stats.least_frequent);
    println!("  entropy:        {:.4} bits", stats.entropy);
    println!(
        "  even / odd:     {}% / {}%",
        window.share(|d| d % 2 == 0).round_dp(2),
        window.share(|d| d % 2 == 1).round_dp(2)
    );
    println!(
        "  under {split} / over {}: {}% / {}%",
        split.saturating_sub(1),
        window.share(|d| d < split).round_dp(2),
        window.share(|d| d >= split).round_dp(2)
    );
}
