//! Symbols command implementation

use super::VenueLink;
use crate::config::Config;
use crate::market::{Catalog, VenueCatalog};
use clap::Args;

#[derive(Args, Debug)]
pub struct SymbolsArgs {
    /// Also list the digit contracts offered on each symbol
    #[arg(long)]
    pub contracts: bool,
}

impl SymbolsArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let link = VenueLink::open(&config).await?;
        let catalog = VenueCatalog::new(link.connector.clone());

        let symbols = catalog.symbols().await?;
        println!("{} symbols", symbols.len());
        for symbol in &symbols {
            let status = if symbol.is_open { "open" } else { "closed" };
            println!(
                "  {:<12} {:<32} {:<20} {}",
                symbol.symbol, symbol.display_name, symbol.market, status
            );
            if self.contracts {
                match catalog.contract_types(&symbol.symbol).await {
                    Ok(types) => {
                        let codes: Vec<&str> = types.iter().map(|t| t.code()).collect();
                        println!("  {:<12} {}", "", codes.join(" "));
                    }
                    Err(e) => tracing::warn!(symbol = %symbol.symbol, error = %e, "No contract listing"),
                }
            }
        }

        link.close().await;
        Ok(())
    }
}
