// =============================================================================
// Session State Tracker — control-message driven session bookkeeping
// =============================================================================
//
// `apply` is a pure mutation over `SessionState`: no I/O, never fails, absent
// fields are skipped. One instance of the state exists per running pipeline;
// only this module mutates it, the aggregator and routing read it.
//
// Authentication detection is deliberately heuristic: a message either
// carries an explicit success flag or its serialized text contains both
// "auth" and "success" (case-insensitive). Once set, the flag never reverts,
// even on messages that would read as auth failures. That mirrors the
// transport's observed behaviour; do not tighten it without wire evidence.
// =============================================================================

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::decoder::Message;

// =============================================================================
// SessionState
// =============================================================================

/// Everything we know about the upstream session. Created with unknown
/// defaults at start; never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub authenticated: bool,

    /// Ordered, unique instrument ids the UI has marked as favorites.
    pub favorites: Vec<String>,

    /// Active chart period in seconds, once learned from the transport.
    pub active_period: Option<i64>,
    /// When set, chart-settings messages may not change the period.
    pub period_locked: bool,

    pub focused_instrument: Option<String>,
    /// When set, instrument echoes from the transport are ignored entirely
    /// and ticks for other instruments are discarded.
    pub focus_locked: bool,
}

impl SessionState {
    /// Seed operator-controlled fields from configuration. Everything learned
    /// from the wire starts unknown.
    pub fn from_config(
        focus_instrument: Option<String>,
        focus_locked: bool,
        period_locked: bool,
    ) -> Self {
        Self {
            focused_instrument: focus_instrument,
            focus_locked,
            period_locked,
            ..Self::default()
        }
    }

    /// Whether a tick for `instrument` may enter the pipeline. With focus
    /// locked, only the focused instrument passes.
    pub fn accepts(&self, instrument: &str) -> bool {
        if !self.focus_locked {
            return true;
        }
        self.focused_instrument.as_deref() == Some(instrument)
    }

    /// The candle period currently in effect, in seconds.
    pub fn effective_period(&self, default_secs: i64) -> i64 {
        match self.active_period {
            Some(p) if p > 0 => p,
            _ => default_secs.max(1),
        }
    }
}

// =============================================================================
// apply
// =============================================================================

/// Fold one control-bearing message into the session state.
pub fn apply(msg: &Message, state: &mut SessionState) {
    if !state.authenticated && detects_auth(msg) {
        info!("session authenticated");
        state.authenticated = true;
    }

    match msg {
        Message::SessionInfo(info) => {
            if let Some(sid) = &info.sid {
                state.session_id = Some(sid.clone());
            }
            if let Some(uid) = &info.user_id {
                state.user_id = Some(uid.clone());
            }
        }

        Message::FavoritesUpdate(list) => {
            // Wholesale replacement, order preserved, duplicates removed.
            let mut favorites: Vec<String> = Vec::with_capacity(list.len());
            for id in list {
                if !favorites.contains(id) {
                    favorites.push(id.clone());
                }
            }
            debug!(count = favorites.len(), "favorites replaced");
            state.favorites = favorites;
        }

        Message::ChartSettings(cs) => {
            if !state.period_locked {
                if let Some(minutes) = cs.period.as_ref().and_then(period_code_to_minutes) {
                    let secs = minutes * 60;
                    if state.active_period != Some(secs) {
                        info!(period_secs = secs, "active period changed");
                    }
                    state.active_period = Some(secs);
                }
            }

            // A locked focus beats asynchronous instrument echoes wholesale.
            if !state.focus_locked {
                if let Some(instrument) = &cs.instrument {
                    if state.focused_instrument.as_deref() != Some(instrument) {
                        info!(instrument = %instrument, "focused instrument changed");
                    }
                    state.focused_instrument = Some(instrument.clone());
                }
            }
        }

        // Price-bearing messages are routed to the aggregator, not here; if
        // one shows up anyway it carries no session-control fields.
        Message::HistoricalSnapshot(_) | Message::PriceUpdate(_) => {}

        Message::Unknown(_) => {}
    }
}

/// The authentication heuristic: an explicit success flag, or "auth" and
/// "success" both present in the serialized message text.
fn detects_auth(msg: &Message) -> bool {
    if let Message::SessionInfo(info) = msg {
        if info.success == Some(true) {
            return true;
        }
    }

    let text = match msg {
        Message::SessionInfo(info) => info.raw.to_string(),
        Message::ChartSettings(cs) => cs.raw.to_string(),
        Message::Unknown(v) => v.to_string(),
        Message::FavoritesUpdate(list) => format!("{list:?}"),
        Message::HistoricalSnapshot(_) | Message::PriceUpdate(_) => return false,
    };

    let lower = text.to_lowercase();
    lower.contains("auth") && lower.contains("success")
}

// =============================================================================
// Period code lookup
// =============================================================================

/// Fixed lookup of known chart period codes to minutes. Unknown codes are
/// skipped by the caller.
fn period_code_to_minutes(code: &Value) -> Option<i64> {
    match code {
        Value::String(s) => match s.to_uppercase().as_str() {
            "M1" => Some(1),
            "M5" => Some(5),
            "M15" => Some(15),
            "M30" => Some(30),
            "H1" => Some(60),
            "H4" => Some(240),
            "D1" => Some(1440),
            "W1" => Some(10080),
            other => match other.parse::<i64>() {
                Ok(n) => numeric_period_minutes(n),
                Err(_) => None,
            },
        },
        Value::Number(n) => n.as_i64().and_then(numeric_period_minutes),
        _ => None,
    }
}

/// Numeric codes are accepted only from the known chart-period set.
fn numeric_period_minutes(n: i64) -> Option<i64> {
    const KNOWN_MINUTES: [i64; 8] = [1, 5, 15, 30, 60, 240, 1440, 10080];
    KNOWN_MINUTES.contains(&n).then_some(n)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_text;

    fn apply_text(text: &str, state: &mut SessionState) {
        let msg = decode_text(text).expect("test frame must decode");
        apply(&msg, state);
    }

    #[test]
    fn sid_sets_session_id_only() {
        let mut state = SessionState::default();
        apply_text(r#"0{"sid":"abc123","pingInterval":25000}"#, &mut state);
        assert_eq!(state.session_id.as_deref(), Some("abc123"));
        assert!(!state.authenticated);
        assert!(state.favorites.is_empty());
        assert!(state.active_period.is_none());
    }

    #[test]
    fn explicit_success_flag_authenticates() {
        let mut state = SessionState::default();
        apply_text(r#"{"user_id":"u-1","success":true}"#, &mut state);
        assert!(state.authenticated);
        assert_eq!(state.user_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn auth_substring_heuristic_authenticates() {
        let mut state = SessionState::default();
        apply_text(r#"42["successauth",{"profile":"demo"}]"#, &mut state);
        assert!(state.authenticated);
    }

    #[test]
    fn authentication_never_reverts() {
        let mut state = SessionState::default();
        apply_text(r#"{"id":"u-1","success":true}"#, &mut state);
        assert!(state.authenticated);

        // A later message that reads like a failure must not clear the flag.
        apply_text(r#"{"id":"u-1","success":false}"#, &mut state);
        assert!(state.authenticated);
    }

    #[test]
    fn favorites_replaced_wholesale_and_deduped() {
        let mut state = SessionState::default();
        apply_text(r#"["EURUSD","GBPUSD"]"#, &mut state);
        assert_eq!(state.favorites, vec!["EURUSD", "GBPUSD"]);

        apply_text(r#"["USDJPY","EURUSD","USDJPY"]"#, &mut state);
        assert_eq!(state.favorites, vec!["USDJPY", "EURUSD"]);
    }

    #[test]
    fn chart_settings_update_period_and_instrument() {
        let mut state = SessionState::default();
        apply_text(r#"42["changeSymbol",{"asset":"GBPUSD","period":5}]"#, &mut state);
        assert_eq!(state.active_period, Some(300));
        assert_eq!(state.focused_instrument.as_deref(), Some("GBPUSD"));
    }

    #[test]
    fn string_period_codes_resolve() {
        let mut state = SessionState::default();
        apply_text(r#"{"period":"M15"}"#, &mut state);
        assert_eq!(state.active_period, Some(900));

        // Unknown codes are skipped, not zeroed.
        apply_text(r#"{"period":"M7"}"#, &mut state);
        assert_eq!(state.active_period, Some(900));
    }

    #[test]
    fn period_locked_ignores_period_changes() {
        let mut state = SessionState::from_config(None, false, true);
        apply_text(r#"{"period":60}"#, &mut state);
        assert!(state.active_period.is_none());
    }

    #[test]
    fn focus_locked_ignores_instrument_echoes() {
        let mut state = SessionState::from_config(Some("EURUSD".into()), true, false);
        apply_text(r#"42["changeSymbol",{"asset":"GBPUSD","period":1}]"#, &mut state);
        assert_eq!(state.focused_instrument.as_deref(), Some("EURUSD"));
        // The period half of the message still applies.
        assert_eq!(state.active_period, Some(60));
    }

    #[test]
    fn accepts_respects_focus_lock() {
        let unlocked = SessionState::default();
        assert!(unlocked.accepts("ANYTHING"));

        let locked = SessionState::from_config(Some("EURUSD".into()), true, false);
        assert!(locked.accepts("EURUSD"));
        assert!(!locked.accepts("GBPUSD"));
    }

    #[test]
    fn effective_period_falls_back_to_default() {
        let mut state = SessionState::default();
        assert_eq!(state.effective_period(60), 60);
        state.active_period = Some(300);
        assert_eq!(state.effective_period(60), 300);
    }
}
