//! Normalized game events consumed by the round state machine.
//!
//! The upstream publishes `{"push":{"channel":..,"pub":{"data":<event>}}}`
//! documents whose `data.type` selects the event kind. Field placement varies
//! between message variants, so every known variant is listed explicitly
//! here and nothing downstream probes raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque round identifier assigned by the upstream feed.
///
/// The feed sends both numeric and string ids; both are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub String);

impl RoundId {
    /// Reads an id from a JSON string or number. Empty strings are rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoundId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Round lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    #[default]
    Unknown,
    Collecting,
    Settling,
}

impl RoundStatus {
    /// Maps an upstream status code. Codes other than 1 and 2 carry no
    /// meaning for aggregation and map to `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => RoundStatus::Collecting,
            2 => RoundStatus::Settling,
            _ => RoundStatus::Unknown,
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStatus::Unknown => "unknown",
            RoundStatus::Collecting => "collecting",
            RoundStatus::Settling => "settling",
        };
        write!(f, "{}", name)
    }
}

/// A single wager as announced by the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Wager {
    /// `None` when the upstream object lacked a usable `user.id`.
    pub participant_id: Option<String>,
    pub display_name: Option<String>,
    /// Already coerced: missing, non-numeric or negative amounts become 0.
    pub amount: f64,
    pub auto_cashout: Option<f64>,
    pub round_id: Option<RoundId>,
}

/// Primary event enum - the state machine consumes ONLY this type.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `type: "update"`.
    StatusUpdate {
        round_id: Option<RoundId>,
        status: Option<i64>,
        delta: Option<f64>,
    },

    /// `type: "betCreated"` or `type: "bet"`, one event per wager found.
    WagerPlaced(Wager),

    /// `type: "crash"` or `type: "end"`.
    Settled {
        round_id: Option<RoundId>,
        value: Option<f64>,
    },

    /// Any other `type`; kept so callers can count and log it.
    Unrecognized { kind: Option<String> },
}

impl StreamEvent {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::StatusUpdate { .. } => "update",
            StreamEvent::WagerPlaced(_) => "wager",
            StreamEvent::Settled { .. } => "settled",
            StreamEvent::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// A push publication extracted from one decoded JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel: Option<String>,
    pub data: Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PushDocument {
    push: PushBody,
}

#[derive(Debug, Deserialize)]
struct PushBody {
    #[serde(default)]
    channel: Option<String>,
    #[serde(rename = "pub")]
    publication: Option<Publication>,
}

#[derive(Debug, Deserialize)]
struct Publication {
    data: Value,
}

impl Envelope {
    /// Extracts the push publication from a decoded document.
    ///
    /// Returns `None` for documents that are not pushes (connect/subscribe
    /// replies, errors) or whose `data` is not an object.
    pub fn from_document(document: Value) -> Option<Self> {
        let PushDocument { push } = serde_json::from_value(document).ok()?;
        let data = push.publication?.data;
        if !data.is_object() {
            return None;
        }
        Some(Self {
            channel: push.channel,
            data,
            received_at: Utc::now(),
        })
    }

    /// The discriminating `data.type`, if it is a string.
    pub fn event_type(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }

    /// Normalizes this publication into zero or more stream events.
    pub fn events(&self) -> Vec<StreamEvent> {
        let data = &self.data;
        match self.event_type() {
            Some("update") => vec![StreamEvent::StatusUpdate {
                round_id: data.get("id").and_then(RoundId::from_value),
                status: data.get("status").and_then(as_status_code),
                delta: data.get("delta").and_then(as_number),
            }],
            Some("betCreated") | Some("bet") => wager_objects(data)
                .into_iter()
                .map(|bet| StreamEvent::WagerPlaced(parse_wager(bet, data)))
                .collect(),
            Some("crash") | Some("end") => vec![StreamEvent::Settled {
                round_id: data
                    .get("id")
                    .and_then(RoundId::from_value)
                    .or_else(|| data.get("gameId").and_then(RoundId::from_value)),
                value: data.get("crash").and_then(as_number),
            }],
            other => vec![StreamEvent::Unrecognized {
                kind: other.map(str::to_string),
            }],
        }
    }
}

/// Collects wager objects from the known placements inside a bet event:
/// `data.bet`, `data.payload.bet`, `data.bets[]`, `data.state.bets[]`, or
/// `data` itself when it carries `user` and `deposit`.
fn wager_objects(data: &Value) -> Vec<&Value> {
    let mut found = Vec::new();

    if let Some(bet) = data.get("bet").filter(|b| b.is_object()) {
        found.push(bet);
    }
    if let Some(bet) = data
        .get("payload")
        .and_then(|p| p.get("bet"))
        .filter(|b| b.is_object())
    {
        found.push(bet);
    }
    for list in [
        data.get("bets"),
        data.get("state").and_then(|s| s.get("bets")),
    ]
    .into_iter()
    .flatten()
    {
        if let Some(items) = list.as_array() {
            found.extend(items.iter().filter(|b| looks_like_wager(b)));
        }
    }
    if looks_like_wager(data) {
        found.push(data);
    }

    found
}

fn looks_like_wager(value: &Value) -> bool {
    value.get("user").map_or(false, |u| u.is_object()) && value.get("deposit").is_some()
}

fn parse_wager(bet: &Value, data: &Value) -> Wager {
    let user = bet.get("user");
    let participant_id = user
        .and_then(|u| u.get("id"))
        .and_then(RoundId::from_value)
        .map(|id| id.0);
    let display_name = user
        .and_then(|u| u.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let amount = bet
        .get("deposit")
        .and_then(|d| match d {
            Value::Object(_) => d.get("amount").and_then(as_number),
            other => as_number(other),
        })
        .map(|a| a.max(0.0))
        .unwrap_or(0.0);

    let round_id = bet
        .get("gameId")
        .and_then(RoundId::from_value)
        .or_else(|| data.get("gameId").and_then(RoundId::from_value));

    Wager {
        participant_id,
        display_name,
        amount,
        auto_cashout: bet.get("coefficientAuto").and_then(as_number),
        round_id,
    }
}

/// Reads a finite number from a JSON number or a numeric string.
pub fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn as_status_code(value: &Value) -> Option<i64> {
    let number = as_number(value)?;
    (number.fract() == 0.0).then_some(number as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(data: Value) -> Envelope {
        Envelope::from_document(json!({
            "push": { "channel": "csgorun:crash", "pub": { "data": data } }
        }))
        .unwrap()
    }

    #[test]
    fn test_non_push_documents_are_not_envelopes() {
        assert!(Envelope::from_document(json!({"id": 1, "connect": {"client": "x"}})).is_none());
        assert!(Envelope::from_document(json!({"push": {"channel": "c"}})).is_none());
        assert!(Envelope::from_document(json!({"push": {"pub": {"data": 5}}})).is_none());
    }

    #[test]
    fn test_update_event() {
        let events = envelope(json!({"type": "update", "id": 812, "status": 2, "delta": 1.4})).events();
        assert_eq!(
            events,
            vec![StreamEvent::StatusUpdate {
                round_id: Some(RoundId::from("812")),
                status: Some(2),
                delta: Some(1.4),
            }]
        );
    }

    #[test]
    fn test_update_ignores_non_integral_status() {
        let events = envelope(json!({"type": "update", "status": 1.5})).events();
        assert_eq!(
            events,
            vec![StreamEvent::StatusUpdate { round_id: None, status: None, delta: None }]
        );
    }

    #[test]
    fn test_bet_in_nested_bet_field() {
        let events = envelope(json!({
            "type": "betCreated",
            "gameId": "g-1",
            "bet": {
                "user": {"id": 77, "name": "ann"},
                "deposit": {"amount": "12.5"},
                "coefficientAuto": 2.0
            }
        }))
        .events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::WagerPlaced(w) => {
                assert_eq!(w.participant_id.as_deref(), Some("77"));
                assert_eq!(w.display_name.as_deref(), Some("ann"));
                assert_eq!(w.amount, 12.5);
                assert_eq!(w.auto_cashout, Some(2.0));
                assert_eq!(w.round_id, Some(RoundId::from("g-1")));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_bet_list_and_state_list() {
        let events = envelope(json!({
            "type": "bet",
            "bets": [
                {"user": {"id": "a"}, "deposit": {"amount": 1}},
                {"nothing": true}
            ],
            "state": {"bets": [{"user": {"id": "b"}, "deposit": {"amount": 2}}]}
        }))
        .events();
        let ids: Vec<_> = events
            .iter()
            .map(|e| match e {
                StreamEvent::WagerPlaced(w) => w.participant_id.clone().unwrap(),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_flat_bet_and_payload_bet() {
        let flat = envelope(json!({
            "type": "bet",
            "user": {"id": "flat"},
            "deposit": {"amount": 3}
        }))
        .events();
        assert_eq!(flat.len(), 1);

        let payload = envelope(json!({
            "type": "bet",
            "payload": {"bet": {"user": {"id": "p"}, "deposit": {"amount": 4}}}
        }))
        .events();
        assert_eq!(payload.len(), 1);
    }

    #[test]
    fn test_malformed_amount_coerces_to_zero() {
        let events = envelope(json!({
            "type": "bet",
            "bet": {"user": {"id": "x"}, "deposit": {"amount": "lots"}}
        }))
        .events();
        let StreamEvent::WagerPlaced(w) = &events[0] else {
            panic!("expected wager");
        };
        assert_eq!(w.amount, 0.0);

        let events = envelope(json!({
            "type": "bet",
            "bet": {"user": {"id": "x"}, "deposit": {"amount": -9}}
        }))
        .events();
        let StreamEvent::WagerPlaced(w) = &events[0] else {
            panic!("expected wager");
        };
        assert_eq!(w.amount, 0.0);
    }

    #[test]
    fn test_bet_without_user_id_keeps_missing_identity() {
        let events = envelope(json!({
            "type": "bet",
            "bet": {"user": {"name": "ghost"}, "deposit": {"amount": 5}}
        }))
        .events();
        let StreamEvent::WagerPlaced(w) = &events[0] else {
            panic!("expected wager");
        };
        assert!(w.participant_id.is_none());
    }

    #[test]
    fn test_settlement_id_fallback() {
        let events = envelope(json!({"type": "crash", "gameId": 9, "crash": 3.2})).events();
        assert_eq!(
            events,
            vec![StreamEvent::Settled { round_id: Some(RoundId::from("9")), value: Some(3.2) }]
        );

        let events = envelope(json!({"type": "end"})).events();
        assert_eq!(events, vec![StreamEvent::Settled { round_id: None, value: None }]);
    }

    #[test]
    fn test_unknown_type_is_unrecognized() {
        let events = envelope(json!({"type": "chat", "text": "hi"})).events();
        assert_eq!(events, vec![StreamEvent::Unrecognized { kind: Some("chat".to_string()) }]);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RoundStatus::from_code(1), RoundStatus::Collecting);
        assert_eq!(RoundStatus::from_code(2), RoundStatus::Settling);
        assert_eq!(RoundStatus::from_code(3), RoundStatus::Unknown);
        assert_eq!(RoundStatus::Collecting.to_string(), "collecting");
    }
}
