//! Clear-signed text: verification (client side) and signing (venue side)

use std::io::Read;
use std::sync::Arc;

use sequoia_openpgp as openpgp;
use openpgp::armor;
use openpgp::packet::signature::SignatureBuilder;
use openpgp::packet::Signature;
use openpgp::parse::Parse;
use openpgp::serialize::Serialize;
use openpgp::types::{HashAlgorithm, SignatureType};
use openpgp::{Packet, PacketPile};
use tracing::trace;

use crate::pgp::canonical::{canonicalize, frame, ClearSigned};
use crate::pgp::keys::{PublicKeys, SecretKeys};
use crate::pgp::{PgpError, Result};

/// Verifies clear-signed market data against the venue's signing keys.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    keys: Arc<PublicKeys>,
}

impl SignatureVerifier {
    pub fn new(keys: Arc<PublicKeys>) -> Self {
        Self { keys }
    }

    /// Returns the signed text exactly as framed, only if a signature in the
    /// block validates over its canonical form.
    pub fn verify(&self, armored: &str) -> Result<String> {
        let message = ClearSigned::parse(armored)?;
        let signatures = read_signatures(message.signature_block)?;
        let canonical = canonicalize(&message.text);

        let mut last_error = None;
        for signature in &signatures {
            for key in self.keys.signing_keys() {
                match signature.verify_message(key, &canonical) {
                    Ok(()) => return Ok(message.text),
                    Err(e) => last_error = Some(e),
                }
            }
        }

        let reason = last_error.map_or_else(|| "no signature".to_string(), |e| e.to_string());
        trace!(%reason, "Clear-signed message rejected");
        Err(PgpError::InvalidSignature(reason))
    }
}

fn read_signatures(block: &str) -> Result<Vec<Signature>> {
    let mut reader = armor::Reader::from_bytes(
        block.as_bytes(),
        armor::ReaderMode::Tolerant(Some(armor::Kind::Signature)),
    );
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(PgpError::malformed)?;

    let signatures: Vec<Signature> = PacketPile::from_bytes(&bytes)
        .map_err(PgpError::malformed)?
        .into_children()
        .filter_map(|packet| match packet {
            Packet::Signature(signature) => Some(signature),
            _ => None,
        })
        .collect();

    if signatures.is_empty() {
        return Err(PgpError::malformed("signature block holds no signature packet"));
    }
    Ok(signatures)
}

/// Produces clear-signed text with the account (or venue) signing key.
#[derive(Debug, Clone)]
pub struct ClearSigner {
    keys: Arc<SecretKeys>,
}

impl ClearSigner {
    pub fn new(keys: Arc<SecretKeys>) -> Self {
        Self { keys }
    }

    pub fn sign(&self, text: &str) -> Result<String> {
        let mut keypair = self.keys.signing_keypair().map_err(PgpError::engine)?;
        let signature = SignatureBuilder::new(SignatureType::Text)
            .set_hash_algo(HashAlgorithm::SHA512)
            .sign_message(&mut keypair, canonicalize(text))
            .map_err(PgpError::engine)?;

        let mut armored = Vec::new();
        let mut writer = armor::Writer::new(&mut armored, armor::Kind::Signature).map_err(PgpError::engine)?;
        Packet::from(signature)
            .serialize(&mut writer)
            .map_err(PgpError::engine)?;
        writer.finalize().map_err(PgpError::engine)?;

        let armored = String::from_utf8(armored).map_err(PgpError::engine)?;
        Ok(frame(text, "SHA512", &armored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgp::keys::tests::generate_cert;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    struct Fixture {
        signer: ClearSigner,
        verifier: SignatureVerifier,
    }

    fn fixture() -> &'static Fixture {
        static FIXTURE: OnceLock<Fixture> = OnceLock::new();
        FIXTURE.get_or_init(|| {
            let cert = generate_cert("venue <market@venue.example>", 1, None);
            let secret = Arc::new(SecretKeys::from_cert(&cert, None).unwrap());
            Fixture {
                verifier: SignatureVerifier::new(Arc::new(secret.public().clone())),
                signer: ClearSigner::new(secret),
            }
        })
    }

    /// Re-frame `text` around the signature of an already signed message.
    fn reframe(signed: &str, text: &str) -> String {
        let block = ClearSigned::parse(signed).unwrap().signature_block.to_string();
        frame(text, "SHA512", &block)
    }

    const TRADE: &str = r#"{"type":"trade","instrument_id":7,"trade_id":9,"price":"25.05","quantity":3}"#;

    #[test]
    fn test_sign_then_verify_returns_text() {
        let f = fixture();
        let signed = f.signer.sign(TRADE).unwrap();
        assert!(signed.starts_with("-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\n"));
        assert_eq!(f.verifier.verify(&signed).unwrap(), TRADE);
    }

    #[test]
    fn test_tampered_text_is_invalid_signature() {
        let f = fixture();
        let signed = f.signer.sign(TRADE).unwrap();
        let tampered = signed.replacen("25.05", "25.06", 1);
        assert!(matches!(f.verifier.verify(&tampered), Err(PgpError::InvalidSignature(_))));
    }

    #[test]
    fn test_wrong_key_is_invalid_signature() {
        let f = fixture();
        let other = generate_cert("impostor", 1, None);
        let other = SignatureVerifier::new(Arc::new(PublicKeys::from_cert(&other).unwrap()));
        let signed = f.signer.sign(TRADE).unwrap();
        assert!(matches!(other.verify(&signed), Err(PgpError::InvalidSignature(_))));
    }

    #[test]
    fn test_malformed_input() {
        let f = fixture();
        assert!(matches!(f.verifier.verify(TRADE), Err(PgpError::MalformedInput(_))));

        let signed = f.signer.sign(TRADE).unwrap();
        let start = signed.find("-----BEGIN PGP SIGNATURE-----").unwrap();
        let garbage = format!(
            "{}-----BEGIN PGP SIGNATURE-----\n\n!!!not base64!!!\n-----END PGP SIGNATURE-----\n",
            &signed[..start]
        );
        assert!(matches!(f.verifier.verify(&garbage), Err(PgpError::MalformedInput(_))));
    }

    #[test]
    fn test_dash_escaped_and_blank_lines() {
        let f = fixture();
        let text = "- leading dash\n\n-----BEGIN PGP SIGNATURE-----\nend";
        let signed = f.signer.sign(text).unwrap();
        assert_eq!(f.verifier.verify(&signed).unwrap(), text);
    }

    #[test]
    fn test_line_ending_and_trailing_whitespace_do_not_matter() {
        let f = fixture();
        let signed = f.signer.sign("first\nsecond\nthird").unwrap();
        for variant in [
            "first\r\nsecond\r\nthird",
            "first\rsecond\rthird",
            "first \t\nsecond  \r\nthird\t",
        ] {
            let reframed = reframe(&signed, variant);
            assert_eq!(f.verifier.verify(&reframed).unwrap(), variant);
        }

        let changed = reframe(&signed, "first\nsecond\n third");
        assert!(matches!(f.verifier.verify(&changed), Err(PgpError::InvalidSignature(_))));
    }

    fn terminator() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("\n"), Just("\r\n"), Just("\r")]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_canonical_form_survives_reformatting(
            lines in prop::collection::vec(
                ("[a-z0-9{}\":,.]{1,12}", "[ \t]{0,3}", terminator()),
                1..6,
            ),
            trailing in prop::option::of(terminator()),
        ) {
            let f = fixture();
            let base: Vec<&str> = lines.iter().map(|(content, _, _)| content.as_str()).collect();
            let signed = f.signer.sign(&base.join("\n")).unwrap();

            let mut variant = String::new();
            for (i, (content, padding, ending)) in lines.iter().enumerate() {
                variant.push_str(content);
                variant.push_str(padding);
                if i + 1 < lines.len() {
                    variant.push_str(ending);
                }
            }
            if let Some(ending) = trailing {
                variant.push_str(ending);
            }

            let verified = f.verifier.verify(&reframe(&signed, &variant));
            prop_assert!(verified.is_ok(), "{:?} rejected: {:?}", variant, verified);
        }
    }
}
