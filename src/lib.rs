//! tickbot: automated digit-contract trading over one multiplexed WebSocket
//!
//! This library provides the core components for:
//! - A venue connector correlating requests and routing push subscriptions
//! - Tick windows, digit statistics and pluggable strategies
//! - Martingale stake sizing with take-profit / stop-loss gating
//! - Quote → purchase → monitor contract execution
//! - Serialized and latency-bounded trading sessions
//! - An in-process paper venue speaking the same protocol
//! - Structured logging and Prometheus metrics

pub mod cli;
pub mod config;
pub mod execution;
pub mod market;
pub mod protocol;
pub mod risk;
pub mod session;
pub mod signal;
pub mod telemetry;
pub mod ws;
