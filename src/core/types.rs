//! Core types - Strong typing for safety

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::{Error, Result};

/// Venue instrument identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub u32);

impl InstrumentId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for InstrumentId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Price level in an order book: `[price, quantity]` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel(pub Decimal, pub u64);

impl PriceLevel {
    pub fn price(&self) -> Decimal {
        self.0
    }

    pub fn quantity(&self) -> u64 {
        self.1
    }
}

/// Order book snapshot for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub instrument_id: InstrumentId,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

/// Top-of-book and session statistics for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quotes {
    pub instrument_id: InstrumentId,
    pub last: Option<Decimal>,
    pub last_quantity: Option<u64>,
    pub bid: Option<Decimal>,
    pub bid_quantity: Option<u64>,
    pub ask: Option<Decimal>,
    pub ask_quantity: Option<u64>,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub open_interest: u64,
}

/// Side that provided liquidity in a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityProvider {
    Buyer,
    Seller,
}

/// Public trade print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub instrument_id: InstrumentId,
    pub trade_id: u64,
    pub timestamp: u64,
    pub price: Decimal,
    pub quantity: u64,
    pub liquidity_provider: LiquidityProvider,
}

/// Venue trading session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Inactive,
    Terminating,
}

impl FromStr for SessionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(SessionState::Active),
            "INACTIVE" => Ok(SessionState::Inactive),
            "TERMINATING" => Ok(SessionState::Terminating),
            other => Err(Error::InvalidState(format!("unknown session state {other}"))),
        }
    }
}

impl TryFrom<String> for SessionState {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Active => write!(f, "ACTIVE"),
            SessionState::Inactive => write!(f, "INACTIVE"),
            SessionState::Terminating => write!(f, "TERMINATING"),
        }
    }
}

// Outbound order specs

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
}

/// New limit order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitOrderSpec {
    client_order_id: u64,
    instrument_id: InstrumentId,
    order_type: OrderType,
    side: Side,
    quantity: u64,
    limit_price: Decimal,
}

impl LimitOrderSpec {
    pub fn new(
        client_order_id: u64,
        instrument_id: InstrumentId,
        side: Side,
        quantity: u64,
        limit_price: Decimal,
    ) -> Result<Self> {
        if quantity == 0 {
            return Err(Error::InvalidOrder(format!("quantity={quantity} <= 0")));
        }
        ensure_positive("limit_price", limit_price)?;
        Ok(Self {
            client_order_id,
            instrument_id,
            order_type: OrderType::Limit,
            side,
            quantity,
            limit_price,
        })
    }

    pub fn client_order_id(&self) -> u64 {
        self.client_order_id
    }

    pub fn instrument_id(&self) -> InstrumentId {
        self.instrument_id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn limit_price(&self) -> Decimal {
        self.limit_price
    }
}

/// Change of quantity and/or price of a resting order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderModificationSpec {
    client_order_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_quantity: Option<u64>,
    #[serde(rename = "new_price", skip_serializing_if = "Option::is_none")]
    new_limit_price: Option<Decimal>,
}

impl OrderModificationSpec {
    pub fn new(client_order_id: u64, new_quantity: u64, new_limit_price: Decimal) -> Result<Self> {
        Self::build(client_order_id, Some(new_quantity), Some(new_limit_price))
    }

    pub fn quantity(client_order_id: u64, new_quantity: u64) -> Result<Self> {
        Self::build(client_order_id, Some(new_quantity), None)
    }

    pub fn price(client_order_id: u64, new_limit_price: Decimal) -> Result<Self> {
        Self::build(client_order_id, None, Some(new_limit_price))
    }

    fn build(client_order_id: u64, new_quantity: Option<u64>, new_limit_price: Option<Decimal>) -> Result<Self> {
        if new_quantity == Some(0) {
            return Err(Error::InvalidOrder("new_quantity=0 <= 0".to_string()));
        }
        if let Some(price) = new_limit_price {
            ensure_positive("new_limit_price", price)?;
        }
        Ok(Self {
            client_order_id,
            new_quantity,
            new_limit_price,
        })
    }

    pub fn client_order_id(&self) -> u64 {
        self.client_order_id
    }

    pub fn new_quantity(&self) -> Option<u64> {
        self.new_quantity
    }

    pub fn new_limit_price(&self) -> Option<Decimal> {
        self.new_limit_price
    }
}

/// Any single order command; serialized with its `type` discriminator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderSpec {
    PlaceOrder(LimitOrderSpec),
    CancelOrder { client_order_id: u64 },
    ModifyOrder(OrderModificationSpec),
    CancelAllOrders,
}

impl From<LimitOrderSpec> for OrderSpec {
    fn from(spec: LimitOrderSpec) -> Self {
        OrderSpec::PlaceOrder(spec)
    }
}

impl From<OrderModificationSpec> for OrderSpec {
    fn from(spec: OrderModificationSpec) -> Self {
        OrderSpec::ModifyOrder(spec)
    }
}

fn ensure_positive(field: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(Error::InvalidOrder(format!("{field}={value} <= 0")));
    }
    Ok(())
}

// Inbound user events

/// Reason the venue refused to place an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum OrderPlaceFailedCause {
    InvalidOrderId,
    InvalidInstrumentId,
    NonpositiveQuantity,
    NonpositivePrice,
    SessionNotActive,
    InvalidTickSize,
    InsufficientFunds,
}

impl FromStr for OrderPlaceFailedCause {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        use OrderPlaceFailedCause::*;
        match s.to_ascii_uppercase().as_str() {
            "INVALID_ORDER_ID" => Ok(InvalidOrderId),
            "INVALID_INSTRUMENT_ID" => Ok(InvalidInstrumentId),
            "NONPOSITIVE_QUANTITY" => Ok(NonpositiveQuantity),
            "NONPOSITIVE_PRICE" => Ok(NonpositivePrice),
            "SESSION_NOT_ACTIVE" => Ok(SessionNotActive),
            "INVALID_TICK_SIZE" => Ok(InvalidTickSize),
            "INSUFFICIENT_FUNDS" => Ok(InsufficientFunds),
            other => Err(Error::InvalidState(format!("unknown order place failure cause {other}"))),
        }
    }
}

impl TryFrom<String> for OrderPlaceFailedCause {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Domain-level rejection of a `place_order` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaceFailed {
    pub client_order_id: u64,
    pub cause: OrderPlaceFailedCause,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub client_order_id: u64,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub limit_price: Decimal,
    pub quantity: u64,
    pub initial_quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub client_order_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderModified {
    pub client_order_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFilled {
    pub client_order_id: u64,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub limit_price: Decimal,
    pub initial_quantity: u64,
    pub leaves_order_quantity: u64,
    pub trade_price: Decimal,
    pub trade_quantity: u64,
}

/// Fill of an order the venue placed to liquidate the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationOrderFilled {
    pub system_order_id: u64,
    pub instrument_id: InstrumentId,
    pub order_side: Side,
    pub order_initial_quantity: u64,
    pub leaves_order_quantity: u64,
    pub trade_price: Decimal,
    pub trade_quantity: u64,
}
