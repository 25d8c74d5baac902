//! Quote session behaviour against the in-memory data service.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tvfeed::codec::{self, Envelope};
use tvfeed::{RetryPolicy, TvError};

use common::{FakeConnector, WhenDrained, client, packet, qsd, quote_completed, session_of};

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Answers every added symbol with two partial updates and a completion
/// marker, except for symbols listed in `silent`.
fn quote_service(
    silent: &'static [&'static str],
) -> impl Fn(usize, &Envelope) -> Vec<String> + Send + Sync + 'static {
    move |_conn: usize, envelope: &Envelope| -> Vec<String> {
        if envelope.m != "quote_add_symbols" {
            return Vec::new();
        }
        let session = session_of(envelope);
        let symbol = envelope.p[1].as_str().unwrap();
        if silent.contains(&symbol) {
            return Vec::new();
        }
        vec![
            qsd(&session, symbol, json!({"lp": 10.0, "volume": 500})),
            qsd(&session, symbol, json!({"ch": -1.0, "chp": -9.1, "lp_time": 1_700_000_000})),
            quote_completed(&session, symbol),
        ]
    }
}

#[tokio::test]
async fn test_quotes_merge_partial_updates_per_symbol() {
    let tv = client(FakeConnector::new(WhenDrained::Hang, quote_service(&[])));

    let quotes = tv
        .quotes(&symbols(&["NASDAQ:MSFT", "NYSE:IBM"]), &[])
        .await
        .expect("quotes should complete");

    assert_eq!(quotes.len(), 2);
    for snapshot in quotes.values() {
        assert_eq!(snapshot.price(), Some(10.0));
        assert_eq!(snapshot.change(), Some(-1.0));
        assert_eq!(snapshot.change_pct(), Some(-9.1));
        assert_eq!(snapshot.volume(), Some(500.0));
        assert_eq!(snapshot.timestamp_ts(), Some(1_700_000_000));
    }
}

#[tokio::test]
async fn test_quote_command_sequence() {
    let connector = FakeConnector::new(WhenDrained::Hang, quote_service(&[]));
    let sent = connector.sent.clone();
    let tv = client(connector).with_data_quality(Some("high".into()));

    tv.quotes(&symbols(&["NASDAQ:MSFT", "NYSE:IBM"]), &symbols(&["lp", "ch"]))
        .await
        .expect("quotes should complete");

    let names: Vec<String> = sent.commands().into_iter().map(|(_, e)| e.m).collect();
    assert_eq!(
        names,
        vec![
            "set_auth_token",
            "set_data_quality",
            "quote_create_session",
            "quote_set_fields",
            "quote_add_symbols",
            "quote_add_symbols",
            "quote_delete_session",
        ]
    );

    let auth = &sent.named("set_auth_token")[0];
    assert_eq!(auth.p, vec![json!("unauthorized_user_token")]);

    let create = &sent.named("quote_create_session")[0];
    assert!(create.p[0].as_str().unwrap().starts_with("cs_"));

    let fields = &sent.named("quote_set_fields")[0];
    assert_eq!(fields.p[1..], [json!("lp"), json!("ch")]);
}

#[tokio::test]
async fn test_single_quote() {
    let tv = client(FakeConnector::new(WhenDrained::Hang, quote_service(&[])));
    let snapshot = tv.quote("NASDAQ:MSFT", &[]).await.expect("quote");
    assert_eq!(snapshot.price(), Some(10.0));
}

#[tokio::test(start_paused = true)]
async fn test_missing_completion_times_out_after_three_seconds_per_symbol() {
    let tv = client(FakeConnector::new(
        WhenDrained::Hang,
        quote_service(&["NYSE:IBM"]),
    ));

    let started = Instant::now();
    let err = tv
        .quotes(&symbols(&["NASDAQ:MSFT", "NYSE:IBM", "NASDAQ:AAPL"]), &[])
        .await
        .expect_err("one symbol never completes");
    let elapsed = started.elapsed();

    match err {
        TvError::Timeout { what, limit } => {
            assert_eq!(limit, Duration::from_secs(9));
            assert!(what.contains("NYSE:IBM"), "pending symbol named: {what}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_secs(9), "timed out early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "timed out late: {elapsed:?}");
}

#[tokio::test]
async fn test_error_message_fails_the_request() {
    let tv = client(FakeConnector::new(WhenDrained::Hang, |_, envelope: &Envelope| {
        if envelope.m == "quote_add_symbols" {
            vec![packet(
                "protocol_error",
                json!(["wrong data", session_of(envelope)]),
            )]
        } else {
            Vec::new()
        }
    }));

    let err = tv
        .quotes(&symbols(&["NASDAQ:MSFT"]), &[])
        .await
        .expect_err("protocol error");
    assert!(matches!(err, TvError::Protocol { ref message, .. } if message == "protocol_error"));
}

#[tokio::test]
async fn test_closed_socket_fails_the_request() {
    let tv = client(FakeConnector::new(WhenDrained::Close, quote_service(&["NASDAQ:MSFT"])));
    let err = tv
        .quotes(&symbols(&["NASDAQ:MSFT"]), &[])
        .await
        .expect_err("socket closes before completion");
    assert!(matches!(err, TvError::ConnectionClosed));
}

#[tokio::test]
async fn test_keepalive_probe_is_echoed_verbatim() {
    let connector = FakeConnector::new(WhenDrained::Hang, |_, envelope: &Envelope| {
        if envelope.m != "quote_add_symbols" {
            return Vec::new();
        }
        let session = session_of(envelope);
        let symbol = envelope.p[1].as_str().unwrap();
        vec![
            codec::frame("~h~42"),
            format!(
                "{}{}",
                qsd(&session, symbol, json!({"lp": 1.0})),
                quote_completed(&session, symbol)
            ),
        ]
    });
    let sent = connector.sent.clone();
    let tv = client(connector);

    tv.quotes(&symbols(&["NASDAQ:MSFT"]), &[])
        .await
        .expect("quotes should complete");

    assert!(sent.raw().contains(&"~m~5~m~~h~42".to_string()));
}

#[tokio::test]
async fn test_non_ok_status_and_other_sessions_are_ignored() {
    let tv = client(FakeConnector::new(WhenDrained::Hang, |_, envelope: &Envelope| {
        if envelope.m != "quote_add_symbols" {
            return Vec::new();
        }
        let session = session_of(envelope);
        vec![
            packet(
                "qsd",
                json!([session, {"n": "NASDAQ:MSFT", "s": "error", "v": {"lp": 99.0}}]),
            ),
            qsd("cs_notmysession", "NASDAQ:MSFT", json!({"lp": 77.0})),
            qsd(&session, "NASDAQ:MSFT", json!({"lp": 1.0})),
            quote_completed("cs_notmysession", "NASDAQ:MSFT"),
            quote_completed(&session, "NASDAQ:MSFT"),
        ]
    }));

    let snapshot = tv.quote("NASDAQ:MSFT", &[]).await.expect("quote");
    assert_eq!(snapshot.price(), Some(1.0));
}

#[tokio::test]
async fn test_empty_symbol_list_is_rejected_before_connecting() {
    let connector = FakeConnector::new(WhenDrained::Hang, quote_service(&[]));
    let tv = client(connector);
    let err = tv.quotes(&[], &[]).await.expect_err("validation");
    assert!(matches!(err, TvError::Validation(_)));
    assert_eq!(tv.connector().opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stream_forwards_merged_updates_and_reconnects() {
    let connector = FakeConnector::new(WhenDrained::Close, |conn, envelope: &Envelope| {
        if envelope.m != "quote_add_symbols" || conn > 1 {
            return Vec::new();
        }
        let session = session_of(envelope);
        let symbol = envelope.p[1].as_str().unwrap();
        vec![
            qsd(&session, symbol, json!({"lp": 10.0})),
            qsd(&session, symbol, json!({"ch": 0.5})),
        ]
    });
    let sent = connector.sent.clone();
    let tv = client(connector).with_retry_policy(RetryPolicy {
        backoff: Duration::from_secs(30),
        max_attempts: Some(2),
    });

    let updates = Arc::new(Mutex::new(Vec::new()));
    let seen = updates.clone();
    let started = Instant::now();

    let err = tv
        .stream_quotes(&symbols(&["BINANCE:BTCUSDT"]), &[], move |update| {
            seen.lock().unwrap().push(update.clone());
        })
        .await
        .expect_err("gives up after the retry budget");

    assert!(matches!(err, TvError::ConnectionClosed));

    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].changed.len(), 1);
    assert_eq!(updates[1].snapshot.price(), Some(10.0));
    assert_eq!(updates[1].snapshot.change(), Some(0.5));

    // The first connection delivered data, so its loss counts as attempt one.
    let sessions = sent.named("quote_create_session");
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|e| e.p[0].as_str().unwrap().starts_with("qs_")));
    assert!(started.elapsed() >= Duration::from_secs(30));

    let fields = &sent.named("quote_set_fields")[0];
    assert_eq!(
        fields.p[1..],
        [json!("lp"), json!("ch"), json!("lp_time"), json!("chp"), json!("volume")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stream_backs_off_between_attempts() {
    let connector = FakeConnector::new(WhenDrained::Close, |_, _: &Envelope| Vec::new());
    let tv = client(connector).with_retry_policy(RetryPolicy {
        backoff: Duration::from_secs(30),
        max_attempts: Some(3),
    });

    let err = tv
        .stream_quotes(&symbols(&["BINANCE:BTCUSDT"]), &[], |_| {})
        .await
        .expect_err("retry budget exhausted");
    assert!(err.is_retryable());

    let opened_at = tv.connector().opened_at.lock().unwrap().clone();
    assert_eq!(opened_at.len(), 3);
    for pair in opened_at.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(30));
    }
}
