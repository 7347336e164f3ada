//! Prometheus metrics

use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Quote + purchase round trip
    OpenContract,
    /// Purchase to settlement
    Settlement,
    /// Strategy evaluation
    SignalEvaluation,
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Ticks folded into a session window
    Ticks,
    /// Reconnect attempts scheduled
    Reconnects,
    /// Inbound messages nobody was waiting for
    DroppedMessages,
    /// Settled trades
    Trades,
    /// Winning trades
    Wins,
    /// Losing trades
    Losses,
    /// Cycles skipped by rate limiting or recoverable errors
    SkippedCycles,
    /// Ticks dropped by the ultra re-entrancy guard
    SkippedOverlap,
    /// Attempts abandoned on the latency budget
    AbandonedAttempts,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Account balance
    Balance,
    /// Cumulative session profit
    CumulativeProfit,
    /// Current martingale level
    MartingaleLevel,
    /// Requests awaiting a response
    PendingRequests,
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    let metric_name = match metric {
        LatencyMetric::OpenContract => "tickbot_open_contract_latency_ms",
        LatencyMetric::Settlement => "tickbot_settlement_latency_ms",
        LatencyMetric::SignalEvaluation => "tickbot_signal_evaluation_latency_ms",
    };

    ::metrics::histogram!(metric_name).record(duration.as_secs_f64() * 1_000.0);
}

/// Record a completed request round trip by message kind
pub fn record_request(kind: &str, duration: Duration) {
    ::metrics::histogram!("tickbot_request_latency_ms", "kind" => kind.to_string())
        .record(duration.as_secs_f64() * 1_000.0);
}

/// Increment a counter by one
pub fn incr_counter(metric: CounterMetric) {
    let metric_name = match metric {
        CounterMetric::Ticks => "tickbot_ticks_total",
        CounterMetric::Reconnects => "tickbot_reconnects_total",
        CounterMetric::DroppedMessages => "tickbot_dropped_messages_total",
        CounterMetric::Trades => "tickbot_trades_total",
        CounterMetric::Wins => "tickbot_wins_total",
        CounterMetric::Losses => "tickbot_losses_total",
        CounterMetric::SkippedCycles => "tickbot_skipped_cycles_total",
        CounterMetric::SkippedOverlap => "tickbot_skipped_overlap_total",
        CounterMetric::AbandonedAttempts => "tickbot_abandoned_attempts_total",
    };

    ::metrics::counter!(metric_name).increment(1);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let metric_name = match metric {
        GaugeMetric::Balance => "tickbot_balance",
        GaugeMetric::CumulativeProfit => "tickbot_cumulative_profit",
        GaugeMetric::MartingaleLevel => "tickbot_martingale_level",
        GaugeMetric::PendingRequests => "tickbot_pending_requests",
    };

    ::metrics::gauge!(metric_name).set(value);
}
