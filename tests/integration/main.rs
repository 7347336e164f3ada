//! Integration tests against a local WebSocket paper venue

mod common;
mod config_test;
mod connector_test;
mod session_test;
