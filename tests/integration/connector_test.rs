//! Connector behaviour over a real socket

use crate::common::{eventually, LocalVenue};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::time::Duration;
use tickbot::protocol::requests;
use tickbot::signal::TickSample;
use tickbot::ws::{ConnectionEvent, ConnectionStatus, Connector, ConnectorError};

#[tokio::test]
async fn test_connect_authorizes_account() {
    let local = LocalVenue::start().await;
    let connector = local.connect().await;

    assert_eq!(connector.status(), ConnectionStatus::Connected);
    let account = connector.account().expect("authorized account");
    assert_eq!(account.login_id, "VRTC0000001");
    assert_eq!(account.balance, dec!(1000));
    assert!(account.is_virtual);

    connector.disconnect().await;
    assert_eq!(connector.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    let local = LocalVenue::start().await;
    let connector = local.connect().await;
    for _ in 0..40 {
        local.venue.step("R_50");
    }

    let (history, symbols, ping) = tokio::join!(
        connector.request(requests::ticks_history("R_50", 25)),
        connector.request(requests::active_symbols()),
        connector.request(requests::ping()),
    );

    let history = history.unwrap();
    assert_eq!(history["msg_type"], "history");
    let ticks = TickSample::from_history(&history, "R_50").unwrap();
    assert_eq!(ticks.len(), 25);
    assert!(ticks.windows(2).all(|pair| pair[0].epoch < pair[1].epoch));

    let symbols = symbols.unwrap();
    assert_eq!(symbols["msg_type"], "active_symbols");
    assert_eq!(ping.unwrap()["ping"], "pong");
    assert_eq!(connector.pending_count(), 0);
}

#[tokio::test]
async fn test_venue_error_surfaces_code() {
    let local = LocalVenue::start().await;
    let connector = local.connect().await;

    let err = connector
        .request(requests::ticks_history("NOPE", 10))
        .await
        .unwrap_err();
    match err {
        ConnectorError::Protocol { code, .. } => assert_eq!(code, "InvalidSymbol"),
        other => panic!("unexpected error: {other:?}"),
    }

    local.venue.fail_next("ping", "RateLimit", "slow down");
    let err = connector.request(requests::ping()).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Protocol { ref code, .. } if code == "RateLimit"));
}

#[tokio::test]
async fn test_tick_subscription_streams_and_is_shared() {
    let local = LocalVenue::start().await;
    let connector = local.connect().await;

    let mut first = connector
        .subscribe("ticks:R_100", requests::ticks("R_100"))
        .await
        .unwrap();
    assert!(first.provider_id().is_some());
    let opening = first.next().await.unwrap();
    assert_eq!(opening["msg_type"], "tick");

    let mut second = connector
        .subscribe("ticks:R_100", requests::ticks("R_100"))
        .await
        .unwrap();
    assert_eq!(connector.subscription_count(), 1);
    assert_eq!(connector.active_subscriptions()[0].listeners, 2);

    let pushed = local.venue.push_tick("R_100", dec!(1234.57)).unwrap();
    for stream in [&mut first, &mut second] {
        let message: Value = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        let sample = TickSample::from_message(&message).unwrap();
        assert_eq!(sample.quote, pushed.quote);
        assert_eq!(sample.digit, 7);
    }

    assert!(connector.unsubscribe("ticks:R_100").await);
    assert_eq!(connector.subscription_count(), 0);
    assert!(first.next().await.is_none());
}

#[tokio::test]
async fn test_subscribe_rejects_non_object_payload() {
    let local = LocalVenue::start().await;
    let connector = local.connect().await;

    let err = connector
        .subscribe("ticks:R_100", json!(["ticks", "R_100"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Validation(_)));
    assert_eq!(connector.subscription_count(), 0);
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let local = LocalVenue::start().await;
    let connector = local.connect().await;
    let mut events = connector.events();

    let mut ticks = connector
        .subscribe("ticks:R_10", requests::ticks("R_10"))
        .await
        .unwrap();
    ticks.next().await.unwrap();

    local.venue.drop_connections();

    // Subscriptions end with the link; owners renew them
    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        while ticks.next().await.is_some() {}
    })
    .await;
    assert!(ended.is_ok());

    let reconnected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ConnectionEvent::Reconnected { attempt }) = events.recv().await {
                return attempt;
            }
        }
    })
    .await
    .expect("no reconnect");
    assert!(reconnected >= 1);
    assert_eq!(connector.status(), ConnectionStatus::Connected);
    assert!(connector.account().is_some());
    assert_eq!(connector.subscription_count(), 0);

    let pong = connector.request(requests::ping()).await.unwrap();
    assert_eq!(pong["ping"], "pong");
}

#[tokio::test]
async fn test_unreachable_venue_fails_to_connect() {
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let connector = Connector::new(
        tickbot::ws::ConnectorConfig::new(format!("ws://127.0.0.1:{port}"))
            .request_timeout(Duration::from_millis(500)),
    );

    let err = connector.connect().await.unwrap_err();
    assert!(err.is_transport());
    eventually(|| connector.status() != ConnectionStatus::Connected).await;
}
