//! Run command implementation

use super::VenueLink;
use crate::config::{Config, ExecutionMode, SessionMode};
use crate::execution::TradeExecutor;
use crate::market::VenueCatalog;
use crate::risk::RiskManager;
use crate::session::{BotSession, SessionEvent, SessionReport};
use crate::signal::{build_strategy, StrategyId};
use clap::{Args, ValueEnum};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Serialized,
    Ultra,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Execution loop variant
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Trade against the in-process paper venue
    #[arg(long)]
    pub paper: bool,

    /// Symbol to trade
    #[arg(long)]
    pub symbol: Option<String>,

    /// Strategy kind (even_odd, over_under, differs, or an *_advanced variant)
    #[arg(long)]
    pub strategy: Option<StrategyId>,
}

impl RunArgs {
    /// Fold command-line overrides into the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.session.mode = match mode {
                ModeArg::Serialized => SessionMode::Serialized,
                ModeArg::Ultra => SessionMode::Ultra,
            };
        }
        if self.paper {
            config.execution.mode = ExecutionMode::Paper;
        }
        if let Some(symbol) = &self.symbol {
            config.session.symbol = symbol.clone();
        }
        if let Some(kind) = self.strategy {
            config.strategy.kind = kind;
        }
    }

    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        self.apply(&mut config);
        config.validate()?;

        let link = VenueLink::open(&config).await?;
        let connector = link.connector.clone();
        let engine = Arc::new(TradeExecutor::new(
            connector.clone(),
            config.session.request_timeout(),
            config.session.monitor_timeout(),
        ));
        let (session, handle) = BotSession::new(
            config.session.clone(),
            connector.clone(),
            engine,
            build_strategy(&config.strategy),
            RiskManager::new(&config.risk),
        );
        let session = session.with_catalog(Arc::new(VenueCatalog::new(connector)));

        let trade_log = tokio::spawn(log_events(handle.events()));
        let stopper = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping session");
                stopper.stop();
            }
        });

        let report = tokio::spawn(session.run()).await??;
        trade_log.abort();
        print_report(&report);
        link.close().await;
        Ok(())
    }
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::TradeSettled { trade }) => tracing::info!(
                contract_id = trade.contract_id,
                contract_type = %trade.contract_type,
                barrier = ?trade.barrier,
                stake = %trade.stake,
                profit = %trade.profit,
                level = trade.martingale_level,
                "Trade"
            ),
            Ok(SessionEvent::TradeFailed { reason }) => {
                tracing::warn!(%reason, "Trade attempt failed")
            }
            Ok(SessionEvent::Stopped { .. }) | Err(broadcast::error::RecvError::Closed) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event log lagging");
            }
        }
    }
}

fn print_report(report: &SessionReport) {
    let risk = &report.risk;
    println!("Session stopped: {}", report.stop_reason);
    println!("  Trades:      {} ({} won, {} lost)", risk.trades(), risk.wins, risk.losses);
    println!("  Win rate:    {}%", risk.win_rate().round_dp(1));
    println!("  Profit:      {}", risk.cumulative_profit);
    println!("  Staked:      {}", risk.total_staked);
    println!("  Balance:     {}", risk.balance);
    println!(
        "  Skipped:     {} cycles, {} overlapping ticks, {} abandoned",
        report.stats.skipped_cycles, report.stats.skipped_overlap, report.stats.abandoned
    );
}
