use clap::Parser;
use tickbot::cli::{print_config, Cli, Commands};
use tickbot::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            toml::from_str(include_str!("../config.toml.example"))?
        }
    };

    let _telemetry = tickbot::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!(symbol = %config.session.symbol, "Starting session");
            args.execute(config).await?;
        }
        Commands::Symbols(args) => args.execute(config).await?,
        Commands::Stats(args) => args.execute(config).await?,
        Commands::Config => {
            println!("# Effective configuration ({})", cli.config);
            print_config(&config)?;
        }
    }

    Ok(())
}
