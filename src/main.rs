use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use venue_channel::core::{Error, InstrumentId, OrderBook, SessionState, Trade, UpdateListener};
use venue_channel::feeds::WsClient;
use venue_channel::{Config, MarketStream, PublicKeys, SecretKeys, SecureEnvelope, SignatureVerifier, UserEvent, UserStream};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("venue-channel.toml"));
    let config = Config::load(&config_path)?;

    // 1. Logger: RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.app.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!(account_id = config.account.account_id, "venue-channel starting");

    // 2. Key material
    let venue_keys = Arc::new(PublicKeys::load(&config.venue.public_key)?);
    let passphrase = config.account.passphrase()?;
    let account_keys = Arc::new(SecretKeys::load(&config.account.secret_key, passphrase.as_deref())?);
    tracing::info!(venue = %venue_keys.fingerprint(), account = %account_keys.public().fingerprint(), "Keys loaded");

    // 3. Market stream
    let market = Arc::new(MarketStream::new(SignatureVerifier::new(venue_keys.clone())));
    market.register_session_state_listener(Arc::new(|state: &SessionState| {
        tracing::info!(%state, "Session state");
    }));
    let order_books: Arc<dyn UpdateListener<OrderBook>> = Arc::new(|book: &OrderBook| {
        tracing::debug!(instrument = %book.instrument_id, bid = ?book.best_bid(), ask = ?book.best_ask(), "Order book");
    });
    let trades: Arc<dyn UpdateListener<Trade>> = Arc::new(|trade: &Trade| {
        tracing::debug!(instrument = %trade.instrument_id, price = %trade.price, quantity = trade.quantity, "Trade");
    });
    let instruments = config.app.instruments.iter().copied().map(InstrumentId::new).collect::<Vec<_>>();
    market.register_order_book_listener(order_books).subscribe_many(instruments.clone());
    market.register_trade_listener(trades).subscribe_many(instruments);
    market.register_stream_failure_listener(Arc::new(|e: &Error| {
        tracing::warn!(error = %e, "Market stream failure");
    }));

    // 4. User stream
    let (market_ws, _market_transport) = WsClient::new("market", config.venue.market_stream_url.clone());
    let (user_ws, user_transport) = WsClient::new("user", config.venue.user_stream_url.clone());
    let envelope = SecureEnvelope::new(venue_keys, account_keys, config.account.hide_recipient);
    let user = Arc::new(UserStream::new(
        Arc::new(user_transport),
        envelope,
        config.account.account_id,
        config.account.nonce_group,
    )?);
    user.register_user_listener(Arc::new(|event: &UserEvent| {
        tracing::info!(?event, "User event");
    }));
    user.register_stream_failure_listener(Arc::new(|e: &Error| {
        tracing::warn!(error = %e, "User stream failure");
    }));
    // Queued until the connection task starts writing.
    user.start()?;

    let market_task = tokio::spawn({
        let market = market.clone();
        async move { market_ws.run(market).await }
    });
    let user_task = tokio::spawn({
        let user = user.clone();
        async move { user_ws.run(user).await }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-C received, shutting down"),
        result = market_task => tracing::warn!(?result, "Market stream ended"),
        result = user_task => tracing::warn!(?result, "User stream ended"),
    }

    user.stop();
    Ok(())
}
