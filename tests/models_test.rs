//! Decoding tests for recorded data service packets.

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use tvfeed::TvError;
use tvfeed::codec::{self, Frame};
use tvfeed::models::series::{Adjustment, SeriesKind};
use tvfeed::models::study::Study;
use tvfeed::models::{Command, ServerMessage};
use tvfeed::session::SessionId;

const QSD_JSON: &str = include_str!("fixtures/qsd.json");
const TIMESCALE_UPDATE_JSON: &str = include_str!("fixtures/timescale_update.json");
const DU_JSON: &str = include_str!("fixtures/du.json");
const SYMBOL_RESOLVED_JSON: &str = include_str!("fixtures/symbol_resolved.json");
const CRITICAL_ERROR_JSON: &str = include_str!("fixtures/critical_error.json");
const HELLO_JSON: &str = include_str!("fixtures/hello.json");

fn decode_one(fixture: &str) -> ServerMessage {
    let frames = codec::decode(&codec::frame(fixture.trim())).expect("Failed to decode packet");
    assert_eq!(frames.len(), 1);
    match frames.into_iter().next() {
        Some(Frame::Message(message)) => message,
        other => panic!("expected a message, got {other:?}"),
    }
}

#[test]
fn test_qsd_decodes() {
    let ServerMessage::QuoteData(data) = decode_one(QSD_JSON) else {
        panic!("expected quote data");
    };

    assert!(data.is_ok());
    assert_eq!(data.session, "qs_snbhkxpqwlzd");
    assert_eq!(data.symbol, "NASDAQ:MSFT");
    assert_eq!(data.values["lp"], json!(417.32));
    assert_eq!(data.values["lp_time"], json!(1_715_371_199));
    assert_eq!(data.values.len(), 8);
}

#[test]
fn test_timescale_update_decodes() {
    let message = decode_one(TIMESCALE_UPDATE_JSON);
    assert_eq!(message.session(), Some("cs_pzqmfhrtkcoa"));

    let ServerMessage::SeriesData { updates, .. } = message else {
        panic!("expected series data");
    };
    assert_eq!(updates.len(), 1);

    let bars = &updates[0];
    assert_eq!(bars.series_id, "s_ohlcv");
    assert_eq!(bars.kind, SeriesKind::Bars);
    assert_eq!(bars.points.len(), 3);

    // The placeholder at index 0 has no volume cell.
    assert_eq!(bars.points[0].index, 0);
    assert_eq!(bars.points[0].values.len(), 5);

    assert_eq!(bars.points[1].timestamp(), Some(1_715_040_000));
    assert_eq!(bars.points[1].values[4], Some(410.54));
    assert_eq!(bars.points[1].values[5], Some(16_340_900.0));
}

#[test]
fn test_du_decodes_study_points() {
    let ServerMessage::SeriesData { updates, .. } = decode_one(DU_JSON) else {
        panic!("expected series data");
    };

    let bands = &updates[0];
    assert_eq!(bands.series_id, "s_bbands20");
    assert_eq!(bands.kind, SeriesKind::Study);
    assert_eq!(bands.points.len(), 2);
    assert_eq!(bands.points[1].values[1..], [Some(412.88), Some(420.1), Some(405.66)]);
}

#[test]
fn test_symbol_resolved_decodes() {
    match decode_one(SYMBOL_RESOLVED_JSON) {
        ServerMessage::SymbolResolved {
            session,
            symbol_ref,
            info,
        } => {
            assert_eq!(session, "cs_pzqmfhrtkcoa");
            assert_eq!(symbol_ref, "sds_sym_1");
            assert_eq!(info["pro_name"], json!("NASDAQ:MSFT"));
            assert_eq!(info["timezone"], json!("America/New_York"));
        }
        other => panic!("expected symbol_resolved, got {other:?}"),
    }
}

#[test]
fn test_critical_error_is_a_protocol_error() {
    let err = assert_err!(codec::decode(&codec::frame(CRITICAL_ERROR_JSON.trim())));

    match err {
        TvError::Protocol { message, payload } => {
            assert_eq!(message, "critical_error");
            assert_eq!(payload[1], json!("invalid_parameters"));
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[test]
fn test_hello_is_discarded() {
    let frames = assert_ok!(codec::decode(&codec::frame(HELLO_JSON.trim())));
    assert!(frames.is_empty());
}

#[test]
fn test_batched_packet_keeps_frame_order() {
    let packet = [
        codec::frame(SYMBOL_RESOLVED_JSON.trim()),
        codec::frame("~h~17"),
        codec::frame(TIMESCALE_UPDATE_JSON.trim()),
        codec::frame(r#"{"m":"series_completed","p":["cs_pzqmfhrtkcoa","s_ohlcv","streaming","s1"]}"#),
    ]
    .concat();

    let frames = codec::decode(&packet).expect("Failed to decode packet");
    assert_eq!(frames.len(), 4);
    assert!(matches!(frames[0], Frame::Message(ServerMessage::SymbolResolved { .. })));
    assert_eq!(frames[1], Frame::Heartbeat("~h~17".to_string()));
    assert!(matches!(frames[2], Frame::Message(ServerMessage::SeriesData { .. })));
    assert!(matches!(
        &frames[3],
        Frame::Message(ServerMessage::SeriesCompleted { series_id, .. }) if series_id == "s_ohlcv"
    ));
}

#[test]
fn test_unknown_message_is_kept_verbatim() {
    let message = decode_one(r#"{"m":"quote_list_fields","p":["qs_snbhkxpqwlzd",["lp","ch"]]}"#);
    assert_eq!(
        message,
        ServerMessage::Other {
            name: "quote_list_fields".to_string(),
            params: vec![json!("qs_snbhkxpqwlzd"), json!(["lp", "ch"])],
        }
    );
    assert_eq!(message.session(), Some("qs_snbhkxpqwlzd"));
}

#[test]
fn test_command_frames() {
    let session = SessionId::from("qs_snbhkxpqwlzd");

    let add = Command::QuoteAddSymbols {
        session: session.clone(),
        symbol: "NASDAQ:MSFT".to_string(),
    };
    let payload = r#"{"m":"quote_add_symbols","p":["qs_snbhkxpqwlzd","NASDAQ:MSFT"]}"#;
    assert_eq!(
        add.to_frame().expect("Failed to encode"),
        format!("~m~{}~m~{payload}", payload.len())
    );

    let fields = Command::QuoteSetFields {
        session,
        fields: vec!["lp".to_string(), "volume".to_string()],
    };
    assert_eq!(
        fields.params().expect("Failed to build params"),
        vec![json!("qs_snbhkxpqwlzd"), json!("lp"), json!("volume")]
    );
}

#[test]
fn test_chart_commands_carry_session_first() {
    let session = SessionId::from("cs_pzqmfhrtkcoa");
    let ema = Study::builtin("ema50").expect("builtin study");

    let commands = [
        Command::ChartCreateSession {
            session: session.clone(),
        },
        Command::ResolveSymbol {
            session: session.clone(),
            symbol_ref: "sds_sym_1".to_string(),
            symbol: "NYSE:IBM".to_string(),
            adjustment: Adjustment::Splits,
            currency: "EUR".to_string(),
        },
        Command::CreateSeries {
            session: session.clone(),
            series_id: "s_ohlcv".to_string(),
            series_number: "s1".to_string(),
            symbol_ref: "sds_sym_1".to_string(),
            interval: "1W".to_string(),
            bars: 53,
        },
        Command::CreateStudy {
            session: session.clone(),
            study_id: ema.series_id(),
            study_number: "st1".to_string(),
            parent_series: "s_ohlcv".to_string(),
            study: ema.clone(),
        },
        Command::ChartDeleteSession {
            session: session.clone(),
        },
    ];

    for command in &commands {
        let params = command.params().expect("Failed to build params");
        assert_eq!(params[0], json!("cs_pzqmfhrtkcoa"), "{}", command.name());
    }

    let create = commands[0].params().expect("params");
    assert_eq!(create, vec![json!("cs_pzqmfhrtkcoa"), json!("")]);

    let series = commands[2].params().expect("params");
    assert_eq!(series[4..], [json!("1W"), json!(53), json!("")]);

    let study = commands[3].params().expect("params");
    assert_eq!(study[1], json!("s_ema50"));
    assert_eq!(study[5], ema.settings);
}

#[test]
fn test_command_survives_loopback() {
    let command = Command::QuoteSetFields {
        session: SessionId::from("qs_snbhkxpqwlzd"),
        fields: vec!["lp".to_string(), "ch".to_string(), "lp_time".to_string()],
    };
    let echoed = command.to_frame().expect("Failed to encode");

    let frames = assert_ok!(codec::decode(&echoed));
    match &frames[..] {
        [Frame::Message(ServerMessage::Other { name, params })] => {
            assert_eq!(name, command.name());
            assert_eq!(params, &command.params().expect("params"));
        }
        other => panic!("expected one verbatim message, got {other:?}"),
    }
}
