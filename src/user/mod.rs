//! Encrypted per-account user stream
//!
//! Startup handshake: `get_last_nonce` goes out unsequenced; the venue's
//! `last_nonce` reply for our nonce group sets the sequencer baseline, and
//! `subscribe` is the first sequenced command after it.

pub mod messages;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::core::{
    Error, LimitOrderSpec, MessageHandler, OrderModificationSpec, OrderSpec, Result, StreamFailureListener,
    Transport, UpdateListener,
};
use crate::listener::ListenerSlot;
use crate::pgp::{PgpError, SecureEnvelope};
use crate::sequencer::NonceSequencer;

pub use messages::{Command, UserEvent};
use messages::{JsonObject, UserMessage};

/// Stamps the account id, encrypts and hands frames to the transport.
struct UserMessageSender {
    transport: Arc<dyn Transport>,
    envelope: SecureEnvelope,
    account_id: u64,
}

impl UserMessageSender {
    fn send(&self, mut message: JsonObject) -> Result<()> {
        message.insert("account_id".to_string(), self.account_id.into());
        let text = serde_json::to_string(&message)?;
        trace!(message = %text, "Sending user message");

        let armored = self
            .envelope
            .encrypt(&text)
            .map_err(|e| Error::Communication(format!("Failed to encrypt message: {e}")))?;
        self.transport.send(armored)
    }
}

pub struct UserStream {
    sender: Arc<UserMessageSender>,
    sequencer: NonceSequencer<Command>,
    nonce_group: u32,
    events: ListenerSlot<dyn UpdateListener<UserEvent>>,
    failures: ListenerSlot<dyn StreamFailureListener>,
    authentication_failures: AtomicU32,
}

impl UserStream {
    pub fn new(transport: Arc<dyn Transport>, envelope: SecureEnvelope, account_id: u64, nonce_group: u32) -> Result<Self> {
        if account_id == 0 {
            return Err(Error::Config("account_id must be > 0".to_string()));
        }

        let sender = Arc::new(UserMessageSender {
            transport,
            envelope,
            account_id,
        });
        let lane_sender = sender.clone();
        let sequencer = NonceSequencer::start(
            &format!("nonce-lane-{nonce_group}"),
            move |command: Command, nonce: u64| {
                let mut message = command.body()?;
                message.insert("nonce".to_string(), nonce.into());
                message.insert("nonce_group".to_string(), nonce_group.into());
                lane_sender.send(message)
            },
        )?;

        Ok(Self {
            sender,
            sequencer,
            nonce_group,
            events: ListenerSlot::new(),
            failures: ListenerSlot::new(),
            authentication_failures: AtomicU32::new(0),
        })
    }

    pub fn register_user_listener(&self, listener: Arc<dyn UpdateListener<UserEvent>>) {
        self.events.register(listener);
    }

    /// Told about inbound authentication failures and failed sends.
    pub fn register_stream_failure_listener(&self, listener: Arc<dyn StreamFailureListener>) {
        self.failures.register(listener.clone());
        self.sequencer.set_failure_listener(listener);
    }

    /// Ask the venue for our last nonce. Call on every (re)connect: commands
    /// queued after this wait for the venue's answer before they are stamped.
    pub fn start(&self) -> Result<()> {
        self.sequencer.reset()?;
        debug!(nonce_group = self.nonce_group, "Requesting last nonce");
        self.sender.send(messages::get_last_nonce(self.nonce_group))
    }

    pub fn place_order(&self, spec: LimitOrderSpec) -> Result<()> {
        self.submit(Command::Order(spec.into()))
    }

    pub fn cancel_order(&self, client_order_id: u64) -> Result<()> {
        self.submit(Command::Order(OrderSpec::CancelOrder { client_order_id }))
    }

    pub fn modify_order(&self, spec: OrderModificationSpec) -> Result<()> {
        self.submit(Command::Order(spec.into()))
    }

    pub fn cancel_all_orders(&self) -> Result<()> {
        self.submit(Command::Order(OrderSpec::CancelAllOrders))
    }

    /// Several order commands under a single nonce, applied in order.
    pub fn batch(&self, specs: Vec<OrderSpec>) -> Result<()> {
        if specs.is_empty() {
            return Err(Error::InvalidOrder("empty batch".to_string()));
        }
        self.submit(Command::Batch(specs))
    }

    fn submit(&self, command: Command) -> Result<()> {
        trace!(?command, "Queueing command");
        self.sequencer.submit(command)
    }

    /// Drain queued commands and stop the outbound lane.
    pub fn stop(&self) {
        info!("Stopping user stream");
        self.sequencer.shutdown();
    }

    fn process(&self, data: &str) -> Result<()> {
        trace!(data, "User message");
        let plaintext = self.sender.envelope.decrypt(data)?;
        self.authentication_failures.store(0, Ordering::Relaxed);

        match serde_json::from_str::<UserMessage>(&plaintext)? {
            UserMessage::LastNonce {
                last_nonce,
                nonce_group,
            } if nonce_group == self.nonce_group => {
                debug!(last_nonce, nonce_group, "Received last nonce");
                self.sequencer.initialize(last_nonce)?;
                self.sequencer.submit(Command::Subscribe)?;
            }
            UserMessage::LastNonce { nonce_group, .. } => {
                debug!(nonce_group, "Ignoring last nonce of another nonce group");
            }
            message => match message.into_event() {
                Some(event) => {
                    if let Some(listener) = self.events.get() {
                        listener.on_update(&event);
                    }
                }
                None => trace!("Ignoring user message of unknown type"),
            },
        }
        Ok(())
    }

    fn on_error(&self, error: &Error) {
        if let Error::Decryption(e) = error {
            if e.cause() == &PgpError::UnknownRecipient {
                debug!("Dropped user message for another recipient");
                return;
            }
        }

        if error.is_authentication_failure() {
            let count = self.authentication_failures.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(error = %error, consecutive = count, "Dropped unauthenticated user message");
            if let Some(listener) = self.failures.get() {
                listener.on_stream_failure(error);
            }
        } else {
            warn!(error = %error, "Dropped user message");
        }
    }
}

impl MessageHandler for UserStream {
    fn process_data(&self, data: &str) -> Result<()> {
        let result = self.process(data);
        if let Err(e) = &result {
            self.on_error(e);
        }
        result
    }
}

impl Drop for UserStream {
    fn drop(&mut self) {
        self.sequencer.shutdown();
    }
}
