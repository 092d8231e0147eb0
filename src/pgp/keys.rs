//! Key material, loaded once at startup and never mutated

use std::path::Path;

use sequoia_openpgp as openpgp;
use openpgp::crypto::{KeyPair, Password};
use openpgp::packet::key::{PublicParts, SecretParts, UnspecifiedRole};
use openpgp::packet::Key;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::{Cert, Fingerprint, KeyID};
use tracing::debug;

use crate::core::{Error, Result};

pub type PublicKey = Key<PublicParts, UnspecifiedRole>;
pub type SecretKey = Key<SecretParts, UnspecifiedRole>;

fn read_armored(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::Key(format!("Failed to read {}: {}", path.display(), e)))
}

fn parse_cert(bytes: &[u8]) -> Result<Cert> {
    Cert::from_bytes(bytes).map_err(|e| Error::Key(format!("Failed to parse certificate: {e}")))
}

/// Public half of a certificate: the keys a peer signs with and is
/// encrypted to.
#[derive(Debug, Clone)]
pub struct PublicKeys {
    fingerprint: Fingerprint,
    signing: Vec<PublicKey>,
    encryption: Vec<PublicKey>,
}

impl PublicKeys {
    pub fn from_cert(cert: &Cert) -> Result<Self> {
        let policy = StandardPolicy::new();
        let valid = || {
            cert.keys()
                .with_policy(&policy, None)
                .supported()
                .alive()
                .revoked(false)
        };

        let signing: Vec<PublicKey> = valid().for_signing().map(|ka| ka.key().clone()).collect();
        let encryption: Vec<PublicKey> = valid()
            .for_transport_encryption()
            .for_storage_encryption()
            .map(|ka| ka.key().clone())
            .collect();

        if signing.is_empty() {
            return Err(Error::Key(format!("{} has no usable signing key", cert.fingerprint())));
        }
        if encryption.is_empty() {
            return Err(Error::Key(format!("{} has no usable encryption key", cert.fingerprint())));
        }

        debug!(
            fingerprint = %cert.fingerprint(),
            signing = signing.len(),
            encryption = encryption.len(),
            "Loaded public keys"
        );

        Ok(Self {
            fingerprint: cert.fingerprint(),
            signing,
            encryption,
        })
    }

    /// Parse an ASCII-armored (or binary) certificate.
    pub fn from_armored(bytes: impl AsRef<[u8]>) -> Result<Self> {
        Self::from_cert(&parse_cert(bytes.as_ref())?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_armored(read_armored(path)?)
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn signing_keys(&self) -> &[PublicKey] {
        &self.signing
    }

    pub fn encryption_keys(&self) -> &[PublicKey] {
        &self.encryption
    }
}

/// Secret half of the account certificate
///
/// Every encryption-capable secret key is kept (already decrypted) so hidden
/// recipients can be tried against each of them.
#[derive(Debug, Clone)]
pub struct SecretKeys {
    public: PublicKeys,
    signing: SecretKey,
    decryption: Vec<SecretKey>,
}

impl SecretKeys {
    pub fn from_cert(cert: &Cert, passphrase: Option<&str>) -> Result<Self> {
        let policy = StandardPolicy::new();
        let password = passphrase.map(Password::from);
        let unlock = |key: SecretKey| -> Result<SecretKey> {
            if !key.secret().is_encrypted() {
                return Ok(key);
            }
            let password = password
                .as_ref()
                .ok_or_else(|| Error::Key(format!("Secret key {} is locked and no passphrase was given", key.keyid())))?;
            let keyid = key.keyid();
            key.decrypt_secret(password)
                .map_err(|e| Error::Key(format!("Failed to unlock secret key {keyid}: {e}")))
        };

        let valid = || {
            cert.keys()
                .with_policy(&policy, None)
                .supported()
                .alive()
                .revoked(false)
                .secret()
        };

        let signing = valid()
            .for_signing()
            .next()
            .map(|ka| ka.key().clone())
            .ok_or_else(|| Error::Key(format!("{} has no signing-capable secret key", cert.fingerprint())))?;
        let signing = unlock(signing)?;

        let decryption = valid()
            .for_transport_encryption()
            .for_storage_encryption()
            .map(|ka| unlock(ka.key().clone()))
            .collect::<Result<Vec<_>>>()?;
        if decryption.is_empty() {
            return Err(Error::Key(format!("{} has no encryption-capable secret key", cert.fingerprint())));
        }

        Ok(Self {
            public: PublicKeys::from_cert(cert)?,
            signing,
            decryption,
        })
    }

    pub fn from_armored(bytes: impl AsRef<[u8]>, passphrase: Option<&str>) -> Result<Self> {
        Self::from_cert(&parse_cert(bytes.as_ref())?, passphrase)
    }

    pub fn load(path: &Path, passphrase: Option<&str>) -> Result<Self> {
        Self::from_armored(read_armored(path)?, passphrase)
    }

    /// Our own public keys, as a peer would hold them.
    pub fn public(&self) -> &PublicKeys {
        &self.public
    }

    pub(crate) fn signing_keypair(&self) -> openpgp::Result<KeyPair> {
        self.signing.clone().into_keypair()
    }

    pub(crate) fn decryption_keys(&self) -> &[SecretKey] {
        &self.decryption
    }

    /// The held decryption key with this key id, if any.
    pub(crate) fn decryption_key(&self, keyid: &KeyID) -> Option<&SecretKey> {
        self.decryption.iter().find(|key| &key.keyid() == keyid)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use openpgp::cert::CertBuilder;
    use openpgp::serialize::SerializeInto;

    /// Certificate with a signing subkey and `encryption_subkeys` encryption subkeys.
    pub(crate) fn generate_cert(user: &str, encryption_subkeys: usize, password: Option<&str>) -> Cert {
        let mut builder = CertBuilder::new()
            .add_userid(user)
            .add_signing_subkey()
            .set_password(password.map(Password::from));
        for _ in 0..encryption_subkeys {
            builder = builder.add_transport_encryption_subkey();
        }
        let (cert, _revocation) = builder.generate().unwrap();
        cert
    }

    #[test]
    fn test_public_keys_from_armored_cert() {
        let cert = generate_cert("venue <venue@example.com>", 1, None);
        let armored = cert.armored().to_vec().unwrap();

        let keys = PublicKeys::from_armored(&armored).unwrap();
        assert_eq!(keys.fingerprint(), &cert.fingerprint());
        assert_eq!(keys.signing_keys().len(), 1);
        assert_eq!(keys.encryption_keys().len(), 1);
    }

    #[test]
    fn test_secret_keys_unlock_with_passphrase() {
        let cert = generate_cert("account", 2, Some("hunter2"));
        let armored = cert.as_tsk().armored().to_vec().unwrap();

        let keys = SecretKeys::from_armored(&armored, Some("hunter2")).unwrap();
        assert_eq!(keys.decryption_keys().len(), 2);
        assert!(keys.signing_keypair().is_ok());

        let missing = SecretKeys::from_armored(&armored, None).unwrap_err();
        assert!(matches!(missing, Error::Key(_)));
        let wrong = SecretKeys::from_armored(&armored, Some("nope")).unwrap_err();
        assert!(matches!(wrong, Error::Key(_)));
    }

    #[test]
    fn test_public_cert_has_no_secret_keys() {
        let cert = generate_cert("venue", 1, None);
        let public_only = cert.armored().to_vec().unwrap();
        assert!(matches!(SecretKeys::from_armored(&public_only, None), Err(Error::Key(_))));
    }

    #[test]
    fn test_load_from_file() {
        let cert = generate_cert("venue", 1, None);
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), cert.armored().to_vec().unwrap()).unwrap();
        assert!(PublicKeys::load(file.path()).is_ok());
        assert!(matches!(
            PublicKeys::load(Path::new("/nonexistent/venue.asc")),
            Err(Error::Key(_))
        ));
    }
}
