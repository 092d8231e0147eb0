//! Encrypted, signed and compressed user-channel messages
//!
//! Inbound shape: PKESK* SEIP( [CompressedData( ] OnePassSig Literal Signature [ )] MDC ).
//! Anything else is rejected before the plaintext leaves this module. Once
//! the container is open, shape errors are reported only after the MDC
//! verifies; a tampered container is an integrity failure whatever it
//! decrypts to.

use std::io::{Read, Write};
use std::sync::Arc;

use sequoia_openpgp as openpgp;
use openpgp::crypto::SessionKey;
use openpgp::packet::{Signature, Tag, PKESK};
use openpgp::parse::{PacketParser, PacketParserResult, Parse};
use openpgp::serialize::stream::{Armorer, Compressor, Encryptor2, LiteralWriter, Message, Recipient, Signer};
use openpgp::types::{CompressionAlgorithm, SymmetricAlgorithm};
use openpgp::{KeyID, Packet};
use tracing::trace;

use crate::pgp::keys::{PublicKey, PublicKeys, SecretKey, SecretKeys};
use crate::pgp::{DecryptionFailed, PgpError, Result};

/// One side of the encrypted channel: `peer` is who we talk to, `own` is us.
#[derive(Debug, Clone)]
pub struct SecureEnvelope {
    peer: Arc<PublicKeys>,
    own: Arc<SecretKeys>,
    hide_recipient: bool,
}

impl SecureEnvelope {
    pub fn new(peer: Arc<PublicKeys>, own: Arc<SecretKeys>, hide_recipient: bool) -> Self {
        Self {
            peer,
            own,
            hide_recipient,
        }
    }

    /// Open a message from the peer. The plaintext is returned only if the
    /// peer's signature and the container integrity tag both verify.
    pub fn decrypt(&self, payload: &str) -> std::result::Result<String, DecryptionFailed> {
        self.open(payload).map_err(|cause| {
            trace!(%cause, "Failed to open message");
            DecryptionFailed::from(cause)
        })
    }

    /// Sign, compress, encrypt to the peer and armor `plaintext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        self.seal(plaintext, self.peer.encryption_keys())
    }

    fn seal<'k>(&self, plaintext: &str, recipients: impl IntoIterator<Item = &'k PublicKey>) -> Result<String> {
        let recipients: Vec<Recipient<'k>> = recipients
            .into_iter()
            .map(|key| {
                let keyid = if self.hide_recipient {
                    KeyID::wildcard()
                } else {
                    key.keyid()
                };
                Recipient::new(keyid, key)
            })
            .collect();
        if recipients.is_empty() {
            return Err(PgpError::engine("no recipient encryption key"));
        }
        let keypair = self.own.signing_keypair().map_err(PgpError::engine)?;

        let mut sink = Vec::new();
        let message = Message::new(&mut sink);
        let message = Armorer::new(message).build().map_err(PgpError::engine)?;
        let message = Encryptor2::for_recipients(message, recipients)
            .build()
            .map_err(PgpError::engine)?;
        let message = Compressor::new(message)
            .algo(CompressionAlgorithm::Zip)
            .build()
            .map_err(PgpError::engine)?;
        let message = Signer::new(message, keypair).build().map_err(PgpError::engine)?;
        let mut message = LiteralWriter::new(message).build().map_err(PgpError::engine)?;
        message.write_all(plaintext.as_bytes()).map_err(PgpError::engine)?;
        message.finalize().map_err(PgpError::engine)?;

        String::from_utf8(sink).map_err(PgpError::engine)
    }

    fn open(&self, payload: &str) -> Result<String> {
        let mut ppr = PacketParser::from_bytes(payload.as_bytes()).map_err(PgpError::malformed)?;

        let mut recipients: Vec<PKESK> = Vec::new();
        let mut opened = false;
        let mut one_pass = false;
        let mut literal: Option<Vec<u8>> = None;
        let mut signature: Option<Signature> = None;
        let mut mdc: Option<bool> = None;
        // First shape error seen inside the opened container.
        let mut shape_error: Option<PgpError> = None;

        while let PacketParserResult::Some(mut pp) = ppr {
            let step = match pp.packet.tag() {
                Tag::PKESK if !opened => {
                    if let Packet::PKESK(pkesk) = &pp.packet {
                        recipients.push(pkesk.clone());
                    }
                    Ok(())
                }
                Tag::SEIP if !opened => {
                    let (algo, session_key) = self.open_session(&recipients)?;
                    pp.decrypt(algo, &session_key)
                        .map_err(|e| PgpError::IntegrityFailure(e.to_string()))?;
                    opened = true;
                    Ok(())
                }
                // Legacy SED container, or no container at all.
                Tag::SED | Tag::OnePassSig | Tag::CompressedData | Tag::Literal if !opened => {
                    check_integrity(false, None)
                }
                Tag::MDC if mdc.is_none() => {
                    mdc = mdc_valid(&pp.packet);
                    Ok(())
                }
                _ if shape_error.is_some() => Ok(()),
                Tag::CompressedData if !one_pass => Ok(()),
                Tag::OnePassSig if !one_pass => {
                    one_pass = true;
                    Ok(())
                }
                Tag::Literal if one_pass && literal.is_none() => {
                    let mut body = Vec::new();
                    match pp.read_to_end(&mut body) {
                        Ok(_) => {
                            literal = Some(body);
                            Ok(())
                        }
                        Err(e) => Err(PgpError::malformed(e)),
                    }
                }
                Tag::Signature if literal.is_some() && signature.is_none() => match &pp.packet {
                    Packet::Signature(sig) => {
                        signature = Some(sig.clone());
                        Ok(())
                    }
                    _ => Err(PgpError::malformed("unparsable signature packet")),
                },
                tag => Err(PgpError::malformed(format!("unexpected {tag} packet"))),
            };

            match step {
                Ok(()) => {}
                Err(e) if opened => {
                    shape_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }

            ppr = match pp.recurse() {
                Ok((_, next)) => next,
                Err(e) if opened => {
                    shape_error.get_or_insert(PgpError::malformed(e));
                    break;
                }
                Err(e) => return Err(PgpError::malformed(e)),
            };
        }

        if !opened {
            return Err(PgpError::malformed("no encrypted message found"));
        }
        let parts = match (shape_error, literal, signature) {
            (Some(e), _, _) => Err(e),
            (None, None, _) => Err(PgpError::malformed("missing literal data")),
            (None, _, None) => Err(PgpError::malformed("missing signature")),
            (None, Some(literal), Some(signature)) => Ok((literal, signature)),
        };
        let (literal, signature) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                // Only a container that checks out can be blamed on its sender.
                check_integrity(true, mdc)?;
                return Err(e);
            }
        };

        self.verify_signature(&signature, &literal)?;
        check_integrity(true, mdc)?;

        String::from_utf8(literal).map_err(PgpError::malformed)
    }

    fn open_session(&self, recipients: &[PKESK]) -> Result<(SymmetricAlgorithm, SessionKey)> {
        for pkesk in recipients {
            let recipient = pkesk.recipient();
            if recipient.is_wildcard() {
                // Hidden recipient: any of our keys may be the one.
                if let Some(opened) = self.own.decryption_keys().iter().find_map(|key| try_open(pkesk, key)) {
                    return Ok(opened);
                }
            } else if let Some(key) = self.own.decryption_key(recipient) {
                if let Some(opened) = try_open(pkesk, key) {
                    return Ok(opened);
                }
            }
        }
        Err(PgpError::UnknownRecipient)
    }

    fn verify_signature(&self, signature: &Signature, literal: &[u8]) -> Result<()> {
        let mut last_error = None;
        for key in self.peer.signing_keys() {
            match signature.verify_message(key, literal) {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(PgpError::InvalidSignature(
            last_error.map_or_else(|| "no signing key".to_string(), |e| e.to_string()),
        ))
    }
}

fn try_open(pkesk: &PKESK, key: &SecretKey) -> Option<(SymmetricAlgorithm, SessionKey)> {
    let mut keypair = key.clone().into_keypair().ok()?;
    pkesk.decrypt(&mut keypair, None)
}

#[allow(deprecated)]
fn mdc_valid(packet: &Packet) -> Option<bool> {
    match packet {
        Packet::MDC(tag) => Some(tag.valid()),
        _ => None,
    }
}

/// The container must be integrity protected and its MDC must match.
fn check_integrity(protected: bool, mdc: Option<bool>) -> Result<()> {
    match (protected, mdc) {
        (false, _) => Err(PgpError::IntegrityFailure("message is not integrity protected".to_string())),
        (true, None) => Err(PgpError::IntegrityFailure("missing modification detection code".to_string())),
        (true, Some(false)) => Err(PgpError::IntegrityFailure("modification detection code mismatch".to_string())),
        (true, Some(true)) => Ok(()),
    }
}
