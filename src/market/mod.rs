//! Clear-signed public market data stream

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::cache::{Keyed, LatestValue, Registration, SubscriptionCache};
use crate::core::{
    InstrumentId, MessageHandler, OrderBook, Quotes, Result, SessionState, StreamFailureListener, Trade,
    UpdateListener,
};
use crate::listener::ListenerSlot;
use crate::pgp::SignatureVerifier;

impl Keyed for OrderBook {
    type Key = InstrumentId;

    fn key(&self) -> InstrumentId {
        self.instrument_id
    }
}

impl Keyed for Trade {
    type Key = InstrumentId;

    fn key(&self) -> InstrumentId {
        self.instrument_id
    }
}

impl Keyed for Quotes {
    type Key = InstrumentId;

    fn key(&self) -> InstrumentId {
        self.instrument_id
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MarketMessage {
    OrderBook(OrderBook),
    Quotes(Quotes),
    Trade(Trade),
    SessionState { state: SessionState },
    #[serde(other)]
    Unknown,
}

/// Receiver for the market stream: verifies, decodes and fans out into one
/// cache per entity type.
pub struct MarketStream {
    verifier: SignatureVerifier,
    order_books: Arc<SubscriptionCache<OrderBook>>,
    trades: Arc<SubscriptionCache<Trade>>,
    quotes: Arc<SubscriptionCache<Quotes>>,
    session_state: LatestValue<SessionState>,
    failures: ListenerSlot<dyn StreamFailureListener>,
}

impl MarketStream {
    pub fn new(verifier: SignatureVerifier) -> Self {
        Self {
            verifier,
            order_books: Arc::new(SubscriptionCache::new()),
            trades: Arc::new(SubscriptionCache::new()),
            quotes: Arc::new(SubscriptionCache::new()),
            session_state: LatestValue::new(),
            failures: ListenerSlot::new(),
        }
    }

    pub fn register_order_book_listener(&self, listener: Arc<dyn UpdateListener<OrderBook>>) -> Registration<OrderBook> {
        self.order_books.set_listener(listener);
        Registration::new(self.order_books.clone())
    }

    pub fn register_trade_listener(&self, listener: Arc<dyn UpdateListener<Trade>>) -> Registration<Trade> {
        self.trades.set_listener(listener);
        Registration::new(self.trades.clone())
    }

    pub fn register_quotes_listener(&self, listener: Arc<dyn UpdateListener<Quotes>>) -> Registration<Quotes> {
        self.quotes.set_listener(listener);
        Registration::new(self.quotes.clone())
    }

    /// Registers and immediately replays the last known state, if any.
    pub fn register_session_state_listener(&self, listener: Arc<dyn UpdateListener<SessionState>>) {
        self.session_state.register(listener);
    }

    pub fn register_stream_failure_listener(&self, listener: Arc<dyn StreamFailureListener>) {
        self.failures.register(listener);
    }

    pub fn order_book(&self, instrument_id: InstrumentId) -> Option<OrderBook> {
        self.order_books.get(&instrument_id)
    }

    pub fn trade(&self, instrument_id: InstrumentId) -> Option<Trade> {
        self.trades.get(&instrument_id)
    }

    pub fn quotes(&self, instrument_id: InstrumentId) -> Option<Quotes> {
        self.quotes.get(&instrument_id)
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.session_state.get()
    }

    fn process(&self, data: &str) -> Result<()> {
        trace!(data, "Market message");
        let verified = self.verifier.verify(data)?;

        match serde_json::from_str::<MarketMessage>(&verified)? {
            MarketMessage::OrderBook(book) => self.order_books.on_receive(book),
            MarketMessage::Quotes(quotes) => self.quotes.on_receive(quotes),
            MarketMessage::Trade(trade) => self.trades.on_receive(trade),
            MarketMessage::SessionState { state } => {
                debug!(%state, "Session state");
                self.session_state.on_receive(state);
            }
            MarketMessage::Unknown => trace!("Ignoring market message of unknown type"),
        }
        Ok(())
    }
}

impl MessageHandler for MarketStream {
    fn process_data(&self, data: &str) -> Result<()> {
        let result = self.process(data);
        if let Err(e) = &result {
            warn!(error = %e, "Dropped market message");
            if e.is_authentication_failure() {
                if let Some(listener) = self.failures.get() {
                    listener.on_stream_failure(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Error, LiquidityProvider};
    use crate::pgp::keys::tests::generate_cert;
    use crate::pgp::{ClearSigner, PgpError, SecretKeys};
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::OnceLock;

    fn venue() -> &'static (ClearSigner, SignatureVerifier) {
        static VENUE: OnceLock<(ClearSigner, SignatureVerifier)> = OnceLock::new();
        VENUE.get_or_init(|| {
            let keys = Arc::new(SecretKeys::from_cert(&generate_cert("venue", 1, None), None).unwrap());
            (
                ClearSigner::new(keys.clone()),
                SignatureVerifier::new(Arc::new(keys.public().clone())),
            )
        })
    }

    fn stream() -> MarketStream {
        MarketStream::new(venue().1.clone())
    }

    fn signed(json: &str) -> String {
        venue().0.sign(json).unwrap()
    }

    const BOOK: &str = r#"{"type":"order_book","instrument_id":71,"bids":[["0.0025",10]],"asks":[["0.0027",5]]}"#;
    const TRADE: &str = r#"{"type":"trade","instrument_id":71,"trade_id":3,"timestamp":1500000000000,"price":"0.0026","quantity":4,"liquidity_provider":"seller"}"#;

    #[test]
    fn test_order_book_cached_and_replayed_on_subscribe() {
        let stream = stream();
        stream.process_data(&signed(BOOK)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        stream
            .register_order_book_listener(Arc::new(move |book: &OrderBook| log.lock().push(book.clone())))
            .subscribe(InstrumentId(71));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].best_bid().unwrap().price(), Decimal::from_str("0.0025").unwrap());
        assert_eq!(seen[0].best_ask().unwrap().quantity(), 5);
    }

    #[test]
    fn test_trade_delivered_live_to_subscriber() {
        let stream = stream();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        stream
            .register_trade_listener(Arc::new(move |trade: &Trade| log.lock().push(trade.clone())))
            .subscribe(InstrumentId(71));

        stream.process_data(&signed(TRADE)).unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].liquidity_provider, LiquidityProvider::Seller);
        assert_eq!(stream.trade(InstrumentId(71)).unwrap().trade_id, 3);
    }

    #[test]
    fn test_session_state_is_case_insensitive_and_replayed() {
        let stream = stream();
        stream
            .process_data(&signed(r#"{"type":"session_state","state":"active"}"#))
            .unwrap();
        assert_eq!(stream.session_state(), Some(SessionState::Active));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        stream.register_session_state_listener(Arc::new(move |s: &SessionState| log.lock().push(*s)));
        stream
            .process_data(&signed(r#"{"type":"session_state","state":"TERMINATING"}"#))
            .unwrap();
        assert_eq!(*seen.lock(), vec![SessionState::Active, SessionState::Terminating]);
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let stream = stream();
        stream
            .process_data(&signed(r#"{"type":"spot_data","instrument_id":1}"#))
            .unwrap();
        assert!(stream.order_book(InstrumentId(1)).is_none());
    }

    #[test]
    fn test_tampered_message_reported_and_not_cached() {
        let stream = stream();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let log = failures.clone();
        stream.register_stream_failure_listener(Arc::new(move |e: &Error| log.lock().push(e.to_string())));

        let tampered = signed(BOOK).replace("0.0025", "0.0035");
        let err = stream.process_data(&tampered).unwrap_err();
        assert!(matches!(err, Error::Verification(PgpError::InvalidSignature(_))));
        assert!(stream.order_book(InstrumentId(71)).is_none());
        assert_eq!(failures.lock().len(), 1);

        // Malformed input is dropped without involving the listener.
        assert!(stream.process_data("not signed").is_err());
        assert_eq!(failures.lock().len(), 1);
    }
}
