//! Full trading sessions over a real socket

use crate::common::LocalVenue;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tickbot::config::{RiskConfig, SessionConfig};
use tickbot::execution::TradeExecutor;
use tickbot::market::VenueCatalog;
use tickbot::risk::{RiskManager, StopReason};
use tickbot::session::{BotSession, SessionEvent, SessionHandle};
use tickbot::signal::{ContractType, Decision, Signal, Strategy, StrategyId, Tier, TickWindow};

/// Bets even on every tick
struct AlwaysEven;

impl Strategy for AlwaysEven {
    fn id(&self) -> StrategyId {
        StrategyId::EvenOdd
    }

    fn evaluate(&mut self, _window: &TickWindow) -> Signal {
        Signal::new(self.id(), Decision::Enter, Tier::Strong)
            .with_contract(ContractType::DigitEven, None)
    }

    fn contract_types(&self) -> Vec<ContractType> {
        vec![ContractType::DigitEven]
    }
}

fn session_config() -> SessionConfig {
    SessionConfig {
        warmup_ticks: 30,
        window_capacity: 50,
        cooldown_ms: 0,
        monitor_timeout_secs: 3,
        ..SessionConfig::new("R_100")
    }
}

/// Keep pushing `digit` until the session stops
async fn drive_until_stopped(local: &LocalVenue, handle: &SessionHandle, digit: u8) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !handle.snapshot().state.is_stopped() {
            local.venue.push_digit("R_100", digit);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("session never stopped");
}

async fn start_session(
    local: &LocalVenue,
    risk: RiskConfig,
) -> (
    tokio::task::JoinHandle<Result<tickbot::session::SessionReport, tickbot::session::SessionError>>,
    SessionHandle,
    tickbot::ws::Connector,
) {
    let connector = local.connect().await;
    let engine = Arc::new(TradeExecutor::new(
        connector.clone(),
        Duration::from_secs(2),
        Duration::from_secs(3),
    ));
    let (session, handle) = BotSession::new(
        session_config(),
        connector.clone(),
        engine,
        Box::new(AlwaysEven),
        RiskManager::new(&risk),
    );
    let session = session.with_catalog(Arc::new(VenueCatalog::new(connector.clone())));
    (tokio::spawn(session.run()), handle, connector)
}

#[tokio::test]
async fn test_session_reaches_take_profit() {
    let local = LocalVenue::start().await;
    let risk = RiskConfig {
        take_profit: Some(dec!(0.90)),
        max_trades_per_minute: 0,
        ..RiskConfig::with_base_stake(dec!(1))
    };
    let (running, handle, connector) = start_session(&local, risk).await;
    let mut events = handle.events();

    drive_until_stopped(&local, &handle, 2).await;
    let report = running.await.unwrap().unwrap();

    assert_eq!(report.stop_reason, StopReason::TakeProfit);
    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].payout, dec!(1.90));
    assert_eq!(local.venue.balance(), dec!(1000.90));
    assert_eq!(connector.subscription_count(), 0);

    let mut settled = false;
    while let Ok(event) = events.try_recv() {
        settled |= matches!(event, SessionEvent::TradeSettled { .. });
    }
    assert!(settled);
}

#[tokio::test]
async fn test_session_reaches_stop_loss_through_martingale() {
    let local = LocalVenue::start().await;
    let risk = RiskConfig {
        stop_loss: Some(dec!(2.5)),
        max_trades_per_minute: 0,
        ..RiskConfig::with_base_stake(dec!(1))
    };
    let (running, handle, _connector) = start_session(&local, risk).await;

    drive_until_stopped(&local, &handle, 3).await;
    let report = running.await.unwrap().unwrap();

    assert_eq!(report.stop_reason, StopReason::StopLoss);
    let stakes: Vec<_> = report.trades.iter().map(|t| t.stake).collect();
    assert_eq!(stakes, vec![dec!(1), dec!(2)]);
    assert_eq!(report.risk.cumulative_profit, dec!(-3));
    assert!(report.trades.iter().all(|t| !t.won));
}

#[tokio::test]
async fn test_session_warms_up_from_history_and_stops_on_request() {
    let local = LocalVenue::start().await;
    let risk = RiskConfig {
        max_trades_per_minute: 0,
        ..RiskConfig::with_base_stake(dec!(0.35))
    };
    for _ in 0..40 {
        local.venue.step("R_100");
    }
    let (running, handle, _connector) = start_session(&local, risk).await;

    let mut snapshots = handle.snapshots();
    tokio::time::timeout(Duration::from_secs(5), async {
        while snapshots.borrow_and_update().window_len < 30 {
            snapshots.changed().await.unwrap();
        }
    })
    .await
    .expect("warmup never filled the window");

    handle.stop();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.stop_reason, StopReason::Manual);
    assert!(report.trades.is_empty());
}
