//! Relay wire messages: the subscription request we send and the envelopes
//! we accept back.

use serde_json::{json, Value};
use url::Url;

use haven_core::Record;

use crate::error::FeedError;

/// An inbound envelope `[type, subscription_id, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event {
        subscription_id: String,
        record: Record,
    },
    /// Any other message type (`EOSE`, `NOTICE`, ...). Not an error.
    Ignored,
}

/// `["REQ", id, {"kinds": [...], "limit": n}]`
pub fn subscription_request(subscription_id: &str, kinds: &[u32], limit: u32) -> String {
    json!(["REQ", subscription_id, { "kinds": kinds, "limit": limit }]).to_string()
}

/// `viewer-<last path segment or "root">-<4 hex>`; the suffix keeps a
/// resubscription after reset from reusing the old id.
pub fn subscription_id(endpoint: &Url) -> String {
    let segment = endpoint
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("root");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("viewer-{segment}-{}", &suffix[..4])
}

pub fn parse_inbound(raw: &str) -> Result<Inbound, FeedError> {
    let value: Value = serde_json::from_str(raw)?;
    let items = value
        .as_array()
        .ok_or(FeedError::Envelope("not an array"))?;
    if items.first().and_then(Value::as_str) != Some("EVENT") {
        return Ok(Inbound::Ignored);
    }
    let [_, subscription_id, payload, ..] = items.as_slice() else {
        return Err(FeedError::Envelope("EVENT needs a subscription id and a payload"));
    };
    let subscription_id = subscription_id
        .as_str()
        .ok_or(FeedError::Envelope("subscription id is not a string"))?
        .to_string();
    let record: Record = serde_json::from_value(payload.clone())?;
    Ok(Inbound::Event {
        subscription_id,
        record,
    })
}
