//! User channel wire messages

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::{
    Error, LiquidationOrderFilled, OrderCancelled, OrderFilled, OrderModified, OrderPlaceFailed, OrderPlaced,
    OrderSpec, Result,
};

pub(crate) type JsonObject = Map<String, Value>;

/// Command sent through the nonce sequencer
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Subscribe,
    Order(OrderSpec),
    Batch(Vec<OrderSpec>),
}

impl Command {
    /// JSON body without the nonce, nonce group and account fields.
    pub(crate) fn body(&self) -> Result<JsonObject> {
        let mut body = JsonObject::new();
        match self {
            Command::Subscribe => {
                body.insert("type".to_string(), "subscribe".into());
            }
            Command::Order(spec) => match serde_json::to_value(spec)? {
                Value::Object(fields) => body = fields,
                other => return Err(Error::InvalidOrder(format!("order spec serialized as {other}"))),
            },
            Command::Batch(specs) => {
                body.insert("type".to_string(), "batch".into());
                body.insert("batch".to_string(), serde_json::to_value(specs)?);
            }
        }
        Ok(body)
    }
}

pub(crate) fn get_last_nonce(nonce_group: u32) -> JsonObject {
    let mut body = JsonObject::new();
    body.insert("type".to_string(), "get_last_nonce".into());
    body.insert("nonce_group".to_string(), nonce_group.into());
    body
}

/// Account event delivered to the user listener
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    OrderPlaced(OrderPlaced),
    OrderPlaceFailed(OrderPlaceFailed),
    OrderCancelled(OrderCancelled),
    OrderModified(OrderModified),
    OrderFilled(OrderFilled),
    LiquidationOrderFilled(LiquidationOrderFilled),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum UserMessage {
    LastNonce { last_nonce: u64, nonce_group: u32 },
    OrderPlaced(OrderPlaced),
    OrderPlaceFailed(OrderPlaceFailed),
    OrderCancelled(OrderCancelled),
    OrderModified(OrderModified),
    OrderFilled(OrderFilled),
    LiquidationOrderFilled(LiquidationOrderFilled),
    #[serde(other)]
    Unknown,
}

impl UserMessage {
    pub(crate) fn into_event(self) -> Option<UserEvent> {
        match self {
            UserMessage::OrderPlaced(e) => Some(UserEvent::OrderPlaced(e)),
            UserMessage::OrderPlaceFailed(e) => Some(UserEvent::OrderPlaceFailed(e)),
            UserMessage::OrderCancelled(e) => Some(UserEvent::OrderCancelled(e)),
            UserMessage::OrderModified(e) => Some(UserEvent::OrderModified(e)),
            UserMessage::OrderFilled(e) => Some(UserEvent::OrderFilled(e)),
            UserMessage::LiquidationOrderFilled(e) => Some(UserEvent::LiquidationOrderFilled(e)),
            UserMessage::LastNonce { .. } | UserMessage::Unknown => None,
        }
    }
}
