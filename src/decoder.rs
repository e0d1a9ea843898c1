// =============================================================================
// Frame Decoder — opaque transport frames to structured Messages
// =============================================================================
//
// The interception layer upstream hands us base64 text captured off the wire.
// Decoded text may carry a leading numeric multiplexing code, optionally
// followed by a two-element `[event_name, payload]` JSON array which we
// re-wrap as `{event, data}` before classification. If top-level parsing
// fails but the text is wrapped in one extra layer of brackets, we retry with
// that layer stripped.
//
// Classification is purely structural: one function maps the parsed JSON to a
// tagged `Message`, and every consumer matches the union exhaustively. A
// frame we cannot make sense of yields `DecodeError::Malformed`; the caller
// counts it and moves on.
// =============================================================================

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use crate::error::DecodeError;
use crate::types::{Candle, RawFrame};

// =============================================================================
// Message union
// =============================================================================

/// Everything the decoder can produce from one frame. Produced once, routed
/// once, then discarded.
#[derive(Debug, Clone)]
pub enum Message {
    SessionInfo(SessionInfoData),
    FavoritesUpdate(Vec<String>),
    ChartSettings(ChartSettingsData),
    HistoricalSnapshot(SnapshotData),
    PriceUpdate(PriceUpdateData),
    /// Classified but not actionable. Still routed to the session tracker so
    /// its text can feed the authentication heuristic.
    Unknown(Value),
}

/// Session-control payload: connection ids and authentication hints.
#[derive(Debug, Clone)]
pub struct SessionInfoData {
    /// The full (re-wrapped) JSON, kept for the auth text heuristic.
    pub raw: Value,
    pub sid: Option<String>,
    pub user_id: Option<String>,
    /// Explicit success flag, when the payload carries one.
    pub success: Option<bool>,
}

/// Chart-settings payload: the period code and/or instrument the UI switched
/// to. Both fields are echoes of UI state and may each be absent.
#[derive(Debug, Clone)]
pub struct ChartSettingsData {
    pub raw: Value,
    /// Raw period code as it appeared on the wire ("M5", 15, ...). The
    /// session tracker owns the code-to-minutes lookup.
    pub period: Option<Value>,
    pub instrument: Option<String>,
}

/// A historical snapshot: finished candles and/or raw (timestamp, price)
/// history pairs for one instrument.
#[derive(Debug, Clone)]
pub struct SnapshotData {
    pub instrument: Option<String>,
    /// Snapshot timeframe in seconds, when the payload names one.
    pub period: Option<i64>,
    pub candles: Vec<Candle>,
    pub history: Vec<(i64, f64)>,
}

/// A single price observation. Instrument and timestamp are optional on the
/// wire; routing falls back to the focused instrument and the frame's arrival
/// time.
#[derive(Debug, Clone)]
pub struct PriceUpdateData {
    pub instrument: Option<String>,
    pub timestamp: Option<i64>,
    pub price: f64,
}

// =============================================================================
// Decode pipeline
// =============================================================================

/// Decode one transport frame into a `Message`.
pub fn decode(frame: &RawFrame) -> Result<Message, DecodeError> {
    let bytes = BASE64
        .decode(frame.payload.trim())
        .map_err(|e| DecodeError::Malformed(format!("invalid base64: {e}")))?;

    let text = String::from_utf8(bytes)
        .map_err(|e| DecodeError::Malformed(format!("invalid UTF-8: {e}")))?;

    decode_text(text.trim())
}

/// Decode already-unwrapped frame text. Split out so tests can exercise the
/// JSON pipeline without re-encoding.
pub fn decode_text(text: &str) -> Result<Message, DecodeError> {
    if text.is_empty() {
        return Err(DecodeError::Malformed("empty frame".to_string()));
    }

    let (body, had_mux_prefix) = strip_mux_prefix(text);

    let value = match serde_json::from_str::<Value>(body) {
        Ok(v) => v,
        Err(first_err) => {
            // One extra layer of brackets around an otherwise decodable body
            // is a known transport quirk (a whole multiplexed frame stuffed
            // inside `[...]`). Retry the full pipeline with it stripped.
            let inner = body
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .map(str::trim);
            match inner {
                Some(inner) if !inner.is_empty() => {
                    return decode_text(inner).map_err(|_| {
                        DecodeError::Malformed(format!("invalid JSON: {first_err}"))
                    })
                }
                _ => {
                    return Err(DecodeError::Malformed(format!(
                        "invalid JSON: {first_err}"
                    )))
                }
            }
        }
    };

    // `[event_name, payload]` pairs become `{event, data}` objects. Only
    // prefixed frames carry event pairs; without that guard a two-string
    // favorites list would be mistaken for one.
    let value = match value.as_array() {
        Some(arr) if had_mux_prefix && arr.len() == 2 && arr[0].is_string() => {
            json!({ "event": arr[0], "data": arr[1] })
        }
        _ => value,
    };

    Ok(classify(value))
}

/// Strip a leading numeric multiplexing code, but only when an actual JSON
/// body follows it. A frame that is nothing but digits is a bare price.
/// Returns the body and whether a prefix was stripped.
fn strip_mux_prefix(text: &str) -> (&str, bool) {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    match text.as_bytes().get(digits) {
        Some(b'[') | Some(b'{') if digits > 0 => (&text[digits..], true),
        _ => (text, false),
    }
}

// =============================================================================
// Structural classification
// =============================================================================

/// Map parsed JSON to a `Message` by structural inspection. Infallible: what
/// we cannot place lands in `Unknown`.
fn classify(value: Value) -> Message {
    // `{event, data}` wrappers are classified by their payload; the wrapper
    // text is kept on control variants for the auth heuristic.
    let data = match (value.get("event"), value.get("data")) {
        (Some(_), Some(data)) => data.clone(),
        _ => value.clone(),
    };

    match &data {
        Value::Object(map) => {
            if map.contains_key("history") || map.contains_key("candles") {
                return Message::HistoricalSnapshot(parse_snapshot(&data));
            }

            if map.contains_key("sid")
                || map.contains_key("id")
                || map.contains_key("user_id")
            {
                return Message::SessionInfo(SessionInfoData {
                    sid: string_field(&data, &["sid"]),
                    user_id: string_field(&data, &["user_id", "id"]),
                    success: data.get("success").and_then(Value::as_bool),
                    raw: value,
                });
            }

            if map.contains_key("period")
                || map.contains_key("chart_period")
                || map.contains_key("timeframe")
                || map.contains_key("interval")
                || map.contains_key("chart")
            {
                return Message::ChartSettings(ChartSettingsData {
                    period: data
                        .get("period")
                        .or_else(|| data.get("chart_period"))
                        .or_else(|| data.get("timeframe"))
                        .or_else(|| data.get("interval"))
                        .cloned(),
                    instrument: string_field(&data, &["asset", "symbol", "instrument"]),
                    raw: value,
                });
            }

            let instrument = string_field(&data, &["asset", "symbol"]);
            let price = data
                .get("quote")
                .or_else(|| data.get("price"))
                .or_else(|| data.get("value"))
                .and_then(Value::as_f64);
            if let (Some(_), Some(price)) = (&instrument, price) {
                return Message::PriceUpdate(PriceUpdateData {
                    instrument,
                    timestamp: timestamp_field(&data),
                    price,
                });
            }

            Message::Unknown(value)
        }

        Value::Array(arr) => {
            if !arr.is_empty() && arr.iter().all(Value::is_string) {
                let favorites = arr
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                return Message::FavoritesUpdate(favorites);
            }

            if arr.len() >= 3 {
                if let Some(update) = positional_price_update(arr) {
                    return Message::PriceUpdate(update);
                }
            }

            Message::Unknown(value)
        }

        Value::Number(n) => match n.as_f64() {
            Some(price) => Message::PriceUpdate(PriceUpdateData {
                instrument: None,
                timestamp: None,
                price,
            }),
            None => Message::Unknown(value),
        },

        _ => Message::Unknown(value),
    }
}

/// Read a positional price update like `["EURUSD", 1700000000, 1.0823]`.
/// The first string is the instrument; among the numbers, anything that looks
/// like an epoch (>= 1e8) is the timestamp and the first remaining number is
/// the price.
fn positional_price_update(arr: &[Value]) -> Option<PriceUpdateData> {
    let instrument = arr.iter().find_map(Value::as_str).map(str::to_string);

    let mut timestamp = None;
    let mut price = None;
    for v in arr {
        let Some(n) = v.as_f64() else { continue };
        if n >= 1e8 && timestamp.is_none() && n.fract() == 0.0 {
            timestamp = Some(n as i64);
        } else if price.is_none() {
            price = Some(n);
        }
    }

    price.map(|price| PriceUpdateData {
        instrument,
        timestamp,
        price,
    })
}

// =============================================================================
// Snapshot parsing
// =============================================================================

/// Parse a snapshot body. Entries that do not fit either accepted shape are
/// skipped rather than failing the whole snapshot.
fn parse_snapshot(data: &Value) -> SnapshotData {
    let candles = data
        .get("candles")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_candle_entry).collect())
        .unwrap_or_default();

    let history = data
        .get("history")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_history_pair).collect())
        .unwrap_or_default();

    SnapshotData {
        instrument: string_field(data, &["asset", "symbol", "instrument"]),
        period: data.get("period").and_then(Value::as_i64),
        candles,
        history,
    }
}

/// Accepts `{time|timestamp, open, high, low, close}` objects or
/// `[time, open, high, low, close]` arrays.
fn parse_candle_entry(v: &Value) -> Option<Candle> {
    match v {
        Value::Object(_) => Some(Candle {
            bucket_start: timestamp_field(v)?,
            open: v.get("open")?.as_f64()?,
            high: v.get("high")?.as_f64()?,
            low: v.get("low")?.as_f64()?,
            close: v.get("close")?.as_f64()?,
        }),
        Value::Array(arr) if arr.len() >= 5 => Some(Candle {
            bucket_start: arr[0].as_f64()? as i64,
            open: arr[1].as_f64()?,
            high: arr[2].as_f64()?,
            low: arr[3].as_f64()?,
            close: arr[4].as_f64()?,
        }),
        _ => None,
    }
}

/// Accepts `[timestamp, price]` arrays or `{time|timestamp, price}` objects.
fn parse_history_pair(v: &Value) -> Option<(i64, f64)> {
    match v {
        Value::Array(arr) if arr.len() >= 2 => {
            Some((arr[0].as_f64()? as i64, arr[1].as_f64()?))
        }
        Value::Object(_) => Some((
            timestamp_field(v)?,
            v.get("price").or_else(|| v.get("value"))?.as_f64()?,
        )),
        _ => None,
    }
}

// =============================================================================
// Field helpers
// =============================================================================

fn string_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| v.get(k))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn timestamp_field(v: &Value) -> Option<i64> {
    v.get("timestamp")
        .or_else(|| v.get("time"))
        .or_else(|| v.get("ts"))
        .and_then(Value::as_f64)
        .map(|t| t as i64)
}
