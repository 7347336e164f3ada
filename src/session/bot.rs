//! Trading session loop
//!
//! A session owns its window, strategy and risk manager and drives them from
//! the tick subscription. Serialized mode awaits each trade to settlement and
//! applies a cooldown; ultra mode reacts per tick, bounds quote + purchase by
//! a latency budget, and drops ticks that arrive while an attempt is in
//! flight. Attempt results always come back to the loop, which is the only
//! writer of the risk state.

use super::types::{
    AttemptOutcome, SessionError, SessionEvent, SessionReport, SessionSnapshot, SessionState,
    SessionStats, TradeRecord,
};
use crate::config::{SessionConfig, SessionMode};
use crate::execution::{ContractRequest, ExecutionEngine, ExecutionError};
use crate::market::Catalog;
use crate::protocol::{self, keys, requests, BalanceBody};
use crate::risk::{RiskManager, StopReason};
use crate::signal::{Decision, Signal, Strategy, TickSample, TickWindow};
use crate::telemetry::{self, CounterMetric, GaugeMetric, LatencyMetric};
use crate::ws::{
    ConnectionEvent, ConnectionStatus, Connector, ConnectorError, SubscriptionRegistry,
    SubscriptionStream,
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

const RESUBSCRIBE_RETRY: Duration = Duration::from_secs(1);

/// Control surface of a session, usable from any task
#[derive(Clone)]
pub struct SessionHandle {
    stop: Arc<watch::Sender<bool>>,
    snapshots: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Request a manual stop; an in-flight contract is still monitored
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Holds the ultra re-entrancy flag; clears it on drop
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct AttemptReport {
    outcome: AttemptOutcome,
    level: u32,
    slot: Option<InFlight>,
}

/// One trading session over one symbol
pub struct BotSession {
    config: SessionConfig,
    connector: Connector,
    engine: Arc<dyn ExecutionEngine>,
    catalog: Option<Arc<dyn Catalog>>,
    strategy: Box<dyn Strategy>,
    risk: RiskManager,
    window: TickWindow,
    registry: SubscriptionRegistry,
    state: SessionState,
    stats: SessionStats,
    last_signal: Option<Signal>,
    trades: Vec<TradeRecord>,
    in_flight: Arc<AtomicBool>,
    stop: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    snapshots: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl BotSession {
    pub fn new(
        config: SessionConfig,
        connector: Connector,
        engine: Arc<dyn ExecutionEngine>,
        strategy: Box<dyn Strategy>,
        risk: RiskManager,
    ) -> (Self, SessionHandle) {
        let (stop, stop_rx) = watch::channel(false);
        let stop = Arc::new(stop);
        let (events, _) = broadcast::channel(256);
        let (snapshots, snapshot_rx) = watch::channel(SessionSnapshot {
            symbol: config.symbol.clone(),
            strategy: strategy.id(),
            state: SessionState::Idle,
            risk: risk.state().clone(),
            stats: SessionStats::default(),
            last_signal: None,
            latest_tick: None,
            window_len: 0,
            updated_at: Utc::now(),
        });

        let handle = SessionHandle {
            stop: Arc::clone(&stop),
            snapshots: snapshot_rx,
            events: events.clone(),
        };
        let session = Self {
            window: TickWindow::new(config.window_capacity),
            registry: SubscriptionRegistry::new(connector.clone()),
            config,
            connector,
            engine,
            catalog: None,
            strategy,
            risk,
            state: SessionState::Idle,
            stats: SessionStats::default(),
            last_signal: None,
            trades: Vec::new(),
            in_flight: Arc::new(AtomicBool::new(false)),
            stop,
            stop_rx,
            snapshots,
            events,
        };
        (session, handle)
    }

    /// Check the symbol's offered contract types before starting
    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            stop: Arc::clone(&self.stop),
            snapshots: self.snapshots.subscribe(),
            events: self.events.clone(),
        }
    }

    /// Run until a stop condition holds
    ///
    /// Errors only when the session cannot start; every stop after that,
    /// including a lost connection, ends in a report.
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        tracing::info!(
            symbol = %self.config.symbol,
            mode = ?self.config.mode,
            strategy = %self.strategy.id(),
            "Session starting"
        );

        let outcome = self.start_and_drive().await;
        self.registry.release_all().await;
        let reason = outcome?;

        self.set_state(SessionState::Stopped(reason));
        let _ = self.events.send(SessionEvent::Stopped { reason });
        let risk = self.risk.snapshot(Instant::now());
        tracing::info!(
            %reason,
            trades = self.stats.trades,
            profit = %risk.cumulative_profit,
            balance = %risk.balance,
            "Session stopped"
        );

        Ok(SessionReport {
            stop_reason: reason,
            risk,
            stats: self.stats.clone(),
            trades: std::mem::take(&mut self.trades),
        })
    }

    async fn start_and_drive(&mut self) -> Result<StopReason, SessionError> {
        self.preflight().await?;
        if let Some(account) = self.connector.account() {
            self.risk.sync_balance(account.balance);
        }
        self.warmup().await;
        let balance = self.open_balance().await;
        let ticks = self.open_ticks().await?;
        self.set_state(SessionState::Analyzing);
        Ok(self.drive(ticks, balance).await)
    }

    async fn preflight(&mut self) -> Result<(), SessionError> {
        let Some(catalog) = self.catalog.clone() else {
            return Ok(());
        };
        let offered = catalog.contract_types(&self.config.symbol).await?;
        if offered.is_empty() {
            tracing::debug!(symbol = %self.config.symbol, "Catalog lists no contract types");
            return Ok(());
        }

        let missing: Vec<&str> = self
            .strategy
            .contract_types()
            .into_iter()
            .filter(|t| !offered.contains(t))
            .map(|t| t.code())
            .collect();
        if !missing.is_empty() {
            return Err(SessionError::Preflight(format!(
                "{} does not offer {}",
                self.config.symbol,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Pre-fill the window from recent history
    async fn warmup(&mut self) {
        let count = self.config.warmup_ticks.min(self.window.capacity());
        if count == 0 {
            return;
        }
        let symbol = self.config.symbol.clone();
        let history = self
            .connector
            .request(requests::ticks_history(&symbol, count))
            .await
            .and_then(|response| TickSample::from_history(&response, &symbol));

        match history {
            Ok(samples) => {
                let loaded = samples.len();
                self.window.extend(samples);
                tracing::info!(%symbol, ticks = loaded, "Window warmed up");
                self.publish();
            }
            Err(e) => tracing::warn!(%symbol, error = %e, "Warmup history unavailable"),
        }
    }

    async fn open_ticks(&self) -> Result<SubscriptionStream, ConnectorError> {
        let symbol = &self.config.symbol;
        self.registry
            .ensure(&keys::ticks(symbol), requests::ticks(symbol))
            .await
    }

    /// Balance updates, when the connection is authorized
    async fn open_balance(&self) -> Option<SubscriptionStream> {
        self.connector.account()?;
        match self
            .registry
            .ensure(keys::BALANCE, requests::balance())
            .await
        {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(error = %e, "Balance subscription unavailable");
                None
            }
        }
    }

    async fn drive(
        &mut self,
        mut ticks: SubscriptionStream,
        mut balance: Option<SubscriptionStream>,
    ) -> StopReason {
        let mut stop = self.stop_rx.clone();
        let mut link_events = self.connector.events();
        let (results_tx, mut results) = mpsc::unbounded_channel::<AttemptReport>();
        let mut ticks_open = true;

        let reason = loop {
            if let Some(reason) = self.stop_condition() {
                break reason;
            }
            if !ticks_open {
                match self.reopen_ticks().await {
                    Ok(stream) => {
                        ticks = stream;
                        ticks_open = true;
                    }
                    Err(reason) => break reason,
                }
                continue;
            }

            tokio::select! {
                _ = stop.changed() => {}

                message = ticks.next() => match message {
                    Some(message) => {
                        if self.fold(&message) {
                            if let Some(reason) = self.on_tick(&mut ticks, &mut ticks_open, &results_tx).await {
                                break reason;
                            }
                        }
                    }
                    None => {
                        tracing::warn!(symbol = %self.config.symbol, "Tick stream ended");
                        ticks_open = false;
                    }
                },

                update = next_update(&mut balance) => match update {
                    Some(message) => self.apply_balance(&message),
                    None => balance = None,
                },

                Some(report) = results.recv() => {
                    if let Some(reason) = self.apply_report(report) {
                        break reason;
                    }
                }

                event = link_events.recv() => match event {
                    Ok(ConnectionEvent::Reconnected { .. }) => {
                        balance = self.open_balance().await;
                    }
                    Ok(ConnectionEvent::Fatal { .. }) | Err(broadcast::error::RecvError::Closed) => {
                        break StopReason::FatalConnection;
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                },
            }
        };

        drop(results_tx);
        if self.in_flight.load(Ordering::Acquire) {
            tracing::info!("Waiting for in-flight attempt before stopping");
        }
        while let Some(report) = results.recv().await {
            self.apply_report(report);
        }
        reason
    }

    fn stop_condition(&self) -> Option<StopReason> {
        if *self.stop_rx.borrow() {
            return Some(StopReason::Manual);
        }
        self.risk.stop_reason()
    }

    /// Wait for a usable link and subscribe to ticks again
    async fn reopen_ticks(&mut self) -> Result<SubscriptionStream, StopReason> {
        let mut stop = self.stop_rx.clone();
        let mut events = self.connector.events();
        loop {
            if *stop.borrow() {
                return Err(StopReason::Manual);
            }
            match self.connector.status() {
                ConnectionStatus::Connected => match self.open_ticks().await {
                    Ok(stream) => {
                        self.stats.resubscriptions += 1;
                        tracing::info!(symbol = %self.config.symbol, "Tick subscription restored");
                        self.publish();
                        return Ok(stream);
                    }
                    Err(e) if e.is_fatal() => return Err(StopReason::FatalConnection),
                    Err(e) => tracing::warn!(error = %e, "Tick resubscription failed"),
                },
                ConnectionStatus::Fatal | ConnectionStatus::Disconnected => {
                    return Err(StopReason::FatalConnection)
                }
                ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {}
            }

            tokio::select! {
                _ = stop.changed() => {}
                _ = tokio::time::sleep(RESUBSCRIBE_RETRY) => {}
                event = events.recv() => {
                    if let Err(broadcast::error::RecvError::Closed) = event {
                        return Err(StopReason::FatalConnection);
                    }
                }
            }
        }
    }

    /// Fold a tick message into the window; false when it is not a new tick
    fn fold(&mut self, message: &Value) -> bool {
        let sample = match TickSample::from_message(message) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring non-tick message");
                return false;
            }
        };
        if sample.symbol != self.config.symbol {
            return false;
        }
        if self
            .window
            .latest()
            .is_some_and(|latest| sample.epoch <= latest.epoch)
        {
            return false;
        }

        self.window.push(sample);
        self.stats.ticks += 1;
        telemetry::incr_counter(CounterMetric::Ticks);
        self.publish();
        true
    }

    async fn on_tick(
        &mut self,
        ticks: &mut SubscriptionStream,
        ticks_open: &mut bool,
        results: &mpsc::UnboundedSender<AttemptReport>,
    ) -> Option<StopReason> {
        // A stop raced with this tick in the select
        if let Some(reason) = self.stop_condition() {
            return Some(reason);
        }
        if self.in_flight.load(Ordering::Acquire) {
            self.stats.skipped_overlap += 1;
            telemetry::incr_counter(CounterMetric::SkippedOverlap);
            return None;
        }

        let now = Instant::now();
        if let Err(e) = self.risk.check_can_open(now) {
            if let Some(reason) = e.stop_reason() {
                return Some(reason);
            }
            tracing::debug!(error = %e, "Cycle skipped");
            self.skip_cycle();
            return None;
        }

        let signal = self.evaluate();
        if !signal.is_enter() {
            return None;
        }

        let level = self.risk.state().martingale_level;
        let stake = match self.risk.next_stake() {
            Ok(stake) => stake,
            Err(e) => {
                tracing::warn!(error = %e, "No stake fits the balance");
                return Some(StopReason::BalanceExhausted);
            }
        };
        let request = ContractRequest::from_signal(
            &signal,
            &self.config.symbol,
            stake,
            &self.config.currency,
            self.config.contract_duration_ticks,
        )?;

        let slot = match self.config.mode {
            SessionMode::Serialized => None,
            SessionMode::Ultra => Some(InFlight::acquire(&self.in_flight)?),
        };
        self.risk.trade_opened(stake, now);
        self.set_state(SessionState::Trading);
        tracing::info!(
            contract_type = %request.contract_type,
            barrier = ?request.barrier,
            %stake,
            level,
            "Opening contract"
        );

        let engine = Arc::clone(&self.engine);
        let monitor_timeout = self.config.monitor_timeout();
        match self.config.mode {
            SessionMode::Serialized => {
                let outcome = self
                    .fold_during(attempt(engine, request, None, monitor_timeout), ticks, ticks_open)
                    .await;
                let reason = self.apply_report(AttemptReport {
                    outcome,
                    level,
                    slot: None,
                });
                if reason.is_none() {
                    self.cooldown(ticks, ticks_open).await;
                }
                reason
            }
            SessionMode::Ultra => {
                let budget = Some(self.config.latency_budget());
                let results = results.clone();
                tokio::spawn(async move {
                    let outcome = attempt(engine, request, budget, monitor_timeout).await;
                    let _ = results.send(AttemptReport {
                        outcome,
                        level,
                        slot,
                    });
                });
                None
            }
        }
    }

    fn evaluate(&mut self) -> Signal {
        let started = Instant::now();
        let signal = self.strategy.evaluate(&self.window);
        telemetry::record_latency(LatencyMetric::SignalEvaluation, started.elapsed());

        if signal.decision != Decision::None {
            if signal.is_enter() {
                self.stats.signals += 1;
            }
            tracing::debug!(
                decision = ?signal.decision,
                tier = ?signal.tier,
                contract_type = ?signal.contract_type,
                note = %signal.note,
                "Signal"
            );
            let _ = self.events.send(SessionEvent::SignalRaised {
                signal: signal.clone(),
            });
        }
        self.last_signal = Some(signal.clone());
        signal
    }

    /// Await `future` while folding arriving ticks without evaluating them
    async fn fold_during<F: Future>(
        &mut self,
        future: F,
        ticks: &mut SubscriptionStream,
        ticks_open: &mut bool,
    ) -> F::Output {
        tokio::pin!(future);
        loop {
            tokio::select! {
                output = &mut future => return output,
                message = ticks.next(), if *ticks_open => match message {
                    Some(message) => {
                        self.fold(&message);
                    }
                    None => *ticks_open = false,
                },
            }
        }
    }

    async fn cooldown(&mut self, ticks: &mut SubscriptionStream, ticks_open: &mut bool) {
        let cooldown = self.config.cooldown();
        if cooldown.is_zero() {
            return;
        }
        let mut stop = self.stop_rx.clone();
        let wait = async move {
            tokio::select! {
                _ = tokio::time::sleep(cooldown) => {}
                _ = stop.changed() => {}
            }
        };
        self.fold_during(wait, ticks, ticks_open).await;
    }

    /// Fold an attempt's outcome into risk and stats
    fn apply_report(&mut self, report: AttemptReport) -> Option<StopReason> {
        let AttemptReport {
            outcome,
            level,
            slot,
        } = report;

        let reason = match outcome {
            AttemptOutcome::Settled {
                mut contract,
                settlement,
            } => {
                contract.settle(&settlement);
                let reason = self.risk.record_result(contract.stake(), settlement.profit);
                let record = TradeRecord::new(self.strategy.id(), &contract, &settlement, level);

                self.stats.trades += 1;
                telemetry::incr_counter(CounterMetric::Trades);
                if settlement.profit > Decimal::ZERO {
                    telemetry::incr_counter(CounterMetric::Wins);
                } else if settlement.profit < Decimal::ZERO {
                    telemetry::incr_counter(CounterMetric::Losses);
                }
                tracing::info!(
                    contract_id = record.contract_id,
                    won = record.won,
                    stake = %record.stake,
                    profit = %record.profit,
                    cumulative = %self.risk.state().cumulative_profit,
                    "Trade settled"
                );
                self.trades.push(record.clone());
                let _ = self.events.send(SessionEvent::TradeSettled { trade: record });
                reason
            }
            AttemptOutcome::NotOpened(error) => {
                self.risk.trade_aborted();
                tracing::warn!(error = %error, "Trade attempt failed");
                self.report_failure(error.to_string());
                if error.is_fatal() {
                    Some(StopReason::FatalConnection)
                } else {
                    self.skip_cycle();
                    None
                }
            }
            AttemptOutcome::Abandoned => {
                self.risk.trade_aborted();
                self.stats.abandoned += 1;
                telemetry::incr_counter(CounterMetric::AbandonedAttempts);
                tracing::warn!(
                    budget_ms = self.config.latency_budget_ms,
                    "Attempt abandoned on latency budget"
                );
                self.report_failure("latency budget exceeded".into());
                None
            }
            AttemptOutcome::Unsettled { contract, error } => {
                // Counted as a loss of the stake
                let stake = contract.stake();
                let reason = self.risk.record_result(stake, -stake);
                self.stats.unsettled += 1;
                tracing::warn!(contract_id = ?contract.id, error = %error, "Settlement not observed");
                self.report_failure(error.to_string());
                if error.is_fatal() {
                    Some(StopReason::FatalConnection)
                } else {
                    reason
                }
            }
        };

        drop(slot);
        self.update_gauges();
        self.set_state(SessionState::Analyzing);
        reason
    }

    fn apply_balance(&mut self, message: &Value) {
        match protocol::body::<BalanceBody>(message, "balance") {
            Ok(body) => {
                tracing::debug!(balance = %body.balance, currency = %body.currency, "Balance update");
                self.risk.sync_balance(body.balance);
                telemetry::set_gauge(
                    GaugeMetric::Balance,
                    body.balance.to_f64().unwrap_or_default(),
                );
                self.publish();
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring malformed balance update"),
        }
    }

    fn skip_cycle(&mut self) {
        self.stats.skipped_cycles += 1;
        telemetry::incr_counter(CounterMetric::SkippedCycles);
    }

    fn report_failure(&self, reason: String) {
        let _ = self.events.send(SessionEvent::TradeFailed { reason });
    }

    fn update_gauges(&self) {
        let state = self.risk.state();
        telemetry::set_gauge(GaugeMetric::Balance, state.balance.to_f64().unwrap_or_default());
        telemetry::set_gauge(
            GaugeMetric::CumulativeProfit,
            state.cumulative_profit.to_f64().unwrap_or_default(),
        );
        telemetry::set_gauge(GaugeMetric::MartingaleLevel, f64::from(state.martingale_level));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "Session state");
            self.state = state;
            let _ = self.events.send(SessionEvent::StateChanged { state });
        }
        self.publish();
    }

    fn publish(&mut self) {
        let snapshot = SessionSnapshot {
            symbol: self.config.symbol.clone(),
            strategy: self.strategy.id(),
            state: self.state,
            risk: self.risk.snapshot(Instant::now()),
            stats: self.stats.clone(),
            last_signal: self.last_signal.clone(),
            latest_tick: self.window.latest().cloned(),
            window_len: self.window.len(),
            updated_at: Utc::now(),
        };
        self.snapshots.send_replace(snapshot);
    }
}

async fn next_update(stream: &mut Option<SubscriptionStream>) -> Option<Value> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Quote, purchase and monitor one contract
///
/// With a `budget`, quote + purchase must finish within it or the attempt is
/// abandoned; monitoring is bounded by `monitor_timeout` either way.
async fn attempt(
    engine: Arc<dyn ExecutionEngine>,
    request: ContractRequest,
    budget: Option<Duration>,
    monitor_timeout: Duration,
) -> AttemptOutcome {
    let started = Instant::now();
    let opened = match budget {
        Some(budget) => match tokio::time::timeout(budget, engine.open_contract(&request)).await {
            Ok(opened) => opened,
            Err(_) => return AttemptOutcome::Abandoned,
        },
        None => engine.open_contract(&request).await,
    };
    let contract = match opened {
        Ok(contract) => contract,
        Err(error) => return AttemptOutcome::NotOpened(error),
    };
    telemetry::record_latency(LatencyMetric::OpenContract, started.elapsed());

    let Some(contract_id) = contract.id else {
        return AttemptOutcome::Unsettled {
            contract,
            error: ExecutionError::Validation("opened contract has no id".into()),
        };
    };
    match engine.monitor(contract_id, monitor_timeout).await {
        Ok(settlement) => AttemptOutcome::Settled {
            contract,
            settlement,
        },
        Err(error) => AttemptOutcome::Unsettled { contract, error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PaperConfig, RiskConfig};
    use crate::execution::{PaperVenue, PurchasedContract, Quote, Settlement, TradeExecutor};
    use crate::market::MarketSymbol;
    use crate::signal::{ContractType, StrategyId, Tier};
    use crate::ws::ConnectorConfig;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    /// Enters the same contract on every evaluation once `after` samples are in
    struct Scripted {
        decision: Decision,
        contract_type: ContractType,
        after: usize,
    }

    impl Scripted {
        fn enter(contract_type: ContractType) -> Box<dyn Strategy> {
            Box::new(Self {
                decision: Decision::Enter,
                contract_type,
                after: 0,
            })
        }

        fn waiting() -> Box<dyn Strategy> {
            Box::new(Self {
                decision: Decision::Wait,
                contract_type: ContractType::DigitEven,
                after: 0,
            })
        }
    }

    impl Strategy for Scripted {
        fn id(&self) -> StrategyId {
            StrategyId::EvenOdd
        }

        fn evaluate(&mut self, window: &TickWindow) -> Signal {
            if window.len() < self.after {
                return Signal::none(self.id(), "warming up");
            }
            Signal::new(self.id(), self.decision, Tier::Ready).with_contract(self.contract_type, None)
        }

        fn contract_types(&self) -> Vec<ContractType> {
            vec![self.contract_type]
        }
    }

    /// Quotes slower than any latency budget
    struct SlowEngine;

    #[async_trait]
    impl ExecutionEngine for SlowEngine {
        fn monitor_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn request_quote(&self, _request: &ContractRequest) -> Result<Quote, ExecutionError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(ExecutionError::Validation("too slow".into()))
        }

        async fn purchase(&self, _id: &str, _ask: Decimal) -> Result<PurchasedContract, ExecutionError> {
            Err(ExecutionError::Validation("unreachable".into()))
        }

        async fn monitor(&self, _id: u64, _timeout: Duration) -> Result<Settlement, ExecutionError> {
            Err(ExecutionError::Validation("unreachable".into()))
        }
    }

    struct FixedCatalog(Vec<ContractType>);

    #[async_trait]
    impl Catalog for FixedCatalog {
        async fn symbols(&self) -> Result<Vec<MarketSymbol>, ConnectorError> {
            Ok(Vec::new())
        }

        async fn contract_types(&self, _symbol: &str) -> Result<Vec<ContractType>, ConnectorError> {
            Ok(self.0.clone())
        }
    }

    fn venue() -> PaperVenue {
        PaperVenue::new(PaperConfig {
            tick_interval_ms: 0,
            seed: Some(7),
            ..Default::default()
        })
    }

    async fn connect(venue: &PaperVenue, max_reconnects: u32) -> Connector {
        let config = ConnectorConfig::new("paper://")
            .api_token("paper-token")
            .request_timeout(Duration::from_secs(1))
            .initial_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(20))
            .jitter(Duration::from_millis(5))
            .max_reconnects(max_reconnects)
            .ping_interval(Duration::from_secs(3600))
            .silence_window(Duration::from_secs(3600));
        let connector = Connector::with_dialer(config, Arc::new(venue.clone()));
        connector.connect().await.unwrap();
        connector
    }

    fn session_config(mode: SessionMode) -> SessionConfig {
        SessionConfig {
            mode,
            warmup_ticks: 0,
            cooldown_ms: 0,
            window_capacity: 20,
            monitor_timeout_secs: 2,
            latency_budget_ms: 50,
            ..SessionConfig::new("R_100")
        }
    }

    fn risk(base_stake: Decimal) -> RiskManager {
        RiskManager::new(&RiskConfig {
            max_trades_per_minute: 0,
            ..RiskConfig::with_base_stake(base_stake)
        })
    }

    async fn wait_until(handle: &SessionHandle, check: impl Fn(&SessionSnapshot) -> bool) {
        let mut snapshots = handle.snapshots();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check(&snapshots.borrow_and_update()) {
                if snapshots.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .expect("session never reached the expected state");
    }

    /// Push `digit` until one more trade settles; every tick either opens or settles
    async fn settle_round(venue: &PaperVenue, handle: &SessionHandle, digit: u8) {
        let before = handle.snapshot().stats.trades;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = handle.snapshot();
                if snapshot.stats.trades > before || snapshot.state.is_stopped() {
                    return;
                }
                venue.push_digit("R_100", digit);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("trade never settled");
    }

    #[tokio::test]
    async fn test_take_profit_stops_after_winning_trade() {
        let venue = venue();
        let connector = connect(&venue, 3).await;
        let engine = Arc::new(TradeExecutor::new(
            connector.clone(),
            Duration::from_secs(1),
            Duration::from_secs(2),
        ));
        let risk = RiskManager::new(&RiskConfig {
            take_profit: Some(dec!(0.90)),
            max_trades_per_minute: 0,
            ..RiskConfig::with_base_stake(dec!(1))
        });
        let (session, handle) = BotSession::new(
            session_config(SessionMode::Serialized),
            connector.clone(),
            engine,
            Scripted::enter(ContractType::DigitEven),
            risk,
        );
        let running = tokio::spawn(session.run());

        settle_round(&venue, &handle, 4).await;
        let report = running.await.unwrap().unwrap();

        assert_eq!(report.stop_reason, StopReason::TakeProfit);
        assert_eq!(report.trades.len(), 1);
        assert!(report.trades[0].won);
        assert_eq!(report.risk.cumulative_profit, dec!(0.90));
        assert_eq!(handle.snapshot().stop_reason(), Some(StopReason::TakeProfit));
        // Session-owned subscriptions are released on stop
        assert_eq!(connector.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_martingale_sequence_then_manual_stop() {
        let venue = venue();
        let connector = connect(&venue, 3).await;
        let engine = Arc::new(TradeExecutor::new(
            connector.clone(),
            Duration::from_secs(1),
            Duration::from_secs(2),
        ));
        let (session, handle) = BotSession::new(
            session_config(SessionMode::Serialized),
            connector,
            engine,
            Scripted::enter(ContractType::DigitEven),
            risk(dec!(0.35)),
        );
        let mut events = handle.events();
        let running = tokio::spawn(session.run());

        for digit in [1, 3, 5, 4] {
            settle_round(&venue, &handle, digit).await;
        }
        handle.stop();
        let report = running.await.unwrap().unwrap();

        assert_eq!(report.stop_reason, StopReason::Manual);
        let stakes: Vec<Decimal> = report.trades.iter().take(4).map(|t| t.stake).collect();
        assert_eq!(stakes, vec![dec!(0.35), dec!(0.70), dec!(1.40), dec!(2.80)]);
        let levels: Vec<u32> = report.trades.iter().take(4).map(|t| t.martingale_level).collect();
        assert_eq!(levels, vec![0, 1, 2, 3]);
        assert!(report.trades[3].won);
        assert_eq!(report.risk.martingale_level, 0);
        assert_eq!(report.risk.current_stake, dec!(0.35));

        let mut settled = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::TradeSettled { .. }) {
                settled += 1;
            }
        }
        assert_eq!(settled, report.trades.len());
    }

    #[tokio::test]
    async fn test_ultra_abandons_slow_attempts_and_skips_overlap() {
        let venue = venue();
        let connector = connect(&venue, 3).await;
        let (session, handle) = BotSession::new(
            session_config(SessionMode::Ultra),
            connector,
            Arc::new(SlowEngine),
            Scripted::enter(ContractType::DigitOdd),
            risk(dec!(1)),
        );
        let running = tokio::spawn(session.run());
        wait_until(&handle, |s| s.state != SessionState::Idle).await;

        for digit in 0..15u8 {
            venue.push_digit("R_100", digit % 10);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        wait_until(&handle, |s| s.stats.abandoned >= 1).await;
        handle.stop();
        let report = running.await.unwrap().unwrap();

        assert_eq!(report.stop_reason, StopReason::Manual);
        assert!(report.stats.abandoned >= 1);
        assert!(report.stats.skipped_overlap >= 1);
        assert!(report.trades.is_empty());
        assert_eq!(report.risk.open_trades, 0);
        assert_eq!(report.risk.martingale_level, 0);
    }

    /// Start a session that enters DIGITEVEN and wait for its first purchase
    async fn stopped_mid_monitor(mode: SessionMode) -> (PaperVenue, Connector, SessionReport) {
        let venue = venue();
        let connector = connect(&venue, 3).await;
        let engine = Arc::new(TradeExecutor::new(
            connector.clone(),
            Duration::from_secs(1),
            Duration::from_secs(3),
        ));
        let (session, handle) = BotSession::new(
            SessionConfig {
                latency_budget_ms: 1_000,
                monitor_timeout_secs: 3,
                ..session_config(mode)
            },
            connector.clone(),
            engine,
            Scripted::enter(ContractType::DigitEven),
            risk(dec!(1)),
        );
        let running = tokio::spawn(session.run());

        // The opening tick triggers the first attempt
        tokio::time::timeout(Duration::from_secs(5), async {
            while venue.open_contracts() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no contract was bought");

        handle.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!running.is_finished(), "session stopped before settlement");
        assert_eq!(handle.snapshot().risk.open_trades, 1);
        assert!(connector.subscription_count() >= 1);

        venue.push_digit("R_100", 4);
        let report = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("session never stopped")
            .unwrap()
            .unwrap();
        (venue, connector, report)
    }

    #[tokio::test]
    async fn test_serialized_stop_waits_for_settlement() {
        let (venue, connector, report) = stopped_mid_monitor(SessionMode::Serialized).await;

        assert_eq!(report.stop_reason, StopReason::Manual);
        assert_eq!(report.trades.len(), 1);
        assert!(report.trades[0].won);
        assert_eq!(report.risk.open_trades, 0);
        assert_eq!(venue.open_contracts(), 0);
        assert_eq!(connector.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_ultra_stop_drains_in_flight_attempt() {
        let (venue, connector, report) = stopped_mid_monitor(SessionMode::Ultra).await;

        assert_eq!(report.stop_reason, StopReason::Manual);
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].profit, dec!(0.90));
        assert_eq!(report.risk.open_trades, 0);
        assert_eq!(venue.open_contracts(), 0);
        assert_eq!(connector.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_warmup_fills_window_without_counting_ticks() {
        let venue = venue();
        for digit in [1, 2, 3, 4] {
            venue.push_digit("R_100", digit);
        }
        let connector = connect(&venue, 3).await;
        let engine = Arc::new(TradeExecutor::new(
            connector.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let (session, handle) = BotSession::new(
            SessionConfig {
                warmup_ticks: 3,
                ..session_config(SessionMode::Serialized)
            },
            connector,
            engine,
            Scripted::waiting(),
            risk(dec!(1)),
        );
        let running = tokio::spawn(session.run());
        wait_until(&handle, |s| s.state == SessionState::Analyzing).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        let report = running.await.unwrap().unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.window_len, 3);
        assert_eq!(snapshot.latest_tick.unwrap().digit, 4);
        // The opening tick repeats the last history tick
        assert_eq!(report.stats.ticks, 0);
        // Venue balance adopted on start
        assert_eq!(report.risk.balance, dec!(1000));
    }

    #[tokio::test]
    async fn test_resubscribes_after_reconnect() {
        let venue = venue();
        let connector = connect(&venue, 3).await;
        let engine = Arc::new(TradeExecutor::new(
            connector.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let (session, handle) = BotSession::new(
            session_config(SessionMode::Serialized),
            connector,
            engine,
            Scripted::waiting(),
            risk(dec!(1)),
        );
        let running = tokio::spawn(session.run());
        wait_until(&handle, |s| s.state == SessionState::Analyzing).await;

        venue.drop_connections();
        wait_until(&handle, |s| s.stats.resubscriptions == 1).await;
        let ticks = handle.snapshot().stats.ticks;
        venue.push_digit("R_100", 6);
        wait_until(&handle, |s| s.stats.ticks > ticks).await;

        handle.stop();
        let report = running.await.unwrap().unwrap();
        assert_eq!(report.stop_reason, StopReason::Manual);
    }

    #[tokio::test]
    async fn test_fatal_connection_stops_session() {
        let venue = venue();
        let connector = connect(&venue, 1).await;
        let engine = Arc::new(TradeExecutor::new(
            connector.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let (session, handle) = BotSession::new(
            session_config(SessionMode::Serialized),
            connector,
            engine,
            Scripted::waiting(),
            risk(dec!(1)),
        );
        let running = tokio::spawn(session.run());
        wait_until(&handle, |s| s.state == SessionState::Analyzing).await;

        venue.set_refusing(true);
        venue.drop_connections();
        let report = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::FatalConnection);
    }

    #[tokio::test]
    async fn test_preflight_rejects_unoffered_contract() {
        let venue = venue();
        let connector = connect(&venue, 3).await;
        let engine = Arc::new(TradeExecutor::new(
            connector.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let (session, _handle) = BotSession::new(
            session_config(SessionMode::Serialized),
            connector.clone(),
            engine,
            Scripted::enter(ContractType::DigitDiff),
            risk(dec!(1)),
        );
        let session = session.with_catalog(Arc::new(FixedCatalog(vec![ContractType::DigitEven])));

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, SessionError::Preflight(ref m) if m.contains("DIGITDIFF")));
        assert_eq!(connector.subscription_count(), 0);
    }
}
