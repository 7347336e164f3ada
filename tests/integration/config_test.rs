//! Configuration loading from disk

use std::io::Write;
use tickbot::config::{Config, ExecutionMode, SessionMode};
use tickbot::signal::StrategyId;

#[test]
fn test_example_config_loads() {
    let example = include_str!("../../config.toml.example");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(example.as_bytes()).unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.session.symbol, "R_100");
    assert_eq!(config.session.mode, SessionMode::Serialized);
    assert_eq!(config.strategy.kind, StrategyId::EvenOdd);
    assert_eq!(config.execution.mode, ExecutionMode::Paper);
    assert!(config.connection.api_token.is_none());
}

#[test]
fn test_invalid_config_is_rejected_on_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"
        [session]
        symbol = "R_100"
        contract_duration_ticks = 0

        [risk]
        base_stake = 1.0
        martingale_multiplier = 0.5
        "#,
    )
    .unwrap();

    let err = Config::load(file.path()).unwrap_err().to_string();
    assert!(err.contains("contract_duration_ticks"));
    assert!(err.contains("martingale_multiplier"));
}
