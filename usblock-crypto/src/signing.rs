//! Ed25519 signing and verification over arbitrary byte messages.
//!
//! Private keys travel as PKCS#8 PEM, public keys as SPKI PEM, so keys made
//! with `openssl genpkey -algorithm ed25519` load unchanged.

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{
    Signature as DalekSignature, Signer as _, SigningKey as DalekSigningKey,
    VerifyingKey as DalekVerifyingKey,
};
use rand::rngs::OsRng;
use std::fmt;

use crate::error::{CryptoError, CryptoResult};

/// Length in bytes of a raw Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// Ed25519 private key. Held only by the issuing authority.
#[derive(Clone)]
pub struct PrivateKey(DalekSigningKey);

/// Ed25519 public key. Distributed with every verifying host.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(DalekVerifyingKey);

/// A matching private/public key pair.
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random key pair from the OS RNG.
    pub fn generate() -> Self {
        Self::from_private(PrivateKey(DalekSigningKey::generate(&mut OsRng)))
    }

    /// Derives a key pair from a fixed 32-byte seed. Intended for fixtures.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_private(PrivateKey(DalekSigningKey::from_bytes(seed)))
    }

    fn from_private(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }
}

impl PrivateKey {
    /// Parses a PKCS#8 PEM private key.
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        DalekSigningKey::from_pkcs8_pem(pem.trim())
            .map(Self)
            .map_err(|e| CryptoError::KeyFormat(format!("private key: {e}")))
    }

    /// Encodes the key as PKCS#8 PEM.
    pub fn to_pem(&self) -> CryptoResult<String> {
        self.0
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| CryptoError::KeyFormat(format!("private key: {e}")))
    }

    /// Signs `message` and returns the raw signature bytes.
    pub fn sign(&self, message: &[u8]) -> CryptoResult<Vec<u8>> {
        self.0
            .try_sign(message)
            .map(|sig| sig.to_bytes().to_vec())
            .map_err(|e| CryptoError::Signing(e.to_string()))
    }

    /// Returns the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PublicKey {
    /// Parses an SPKI PEM public key.
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        DalekVerifyingKey::from_public_key_pem(pem.trim())
            .map(Self)
            .map_err(|e| CryptoError::KeyFormat(format!("public key: {e}")))
    }

    /// Encodes the key as SPKI PEM.
    pub fn to_pem(&self) -> CryptoResult<String> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyFormat(format!("public key: {e}")))
    }

    /// Returns the raw 32-byte public key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Checks `signature` over `message`.
    ///
    /// Signatures of the wrong length or with invalid encodings simply do not
    /// verify.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = DalekSignature::from_slice(signature) else {
            return false;
        };
        self.0.verify_strict(message, &signature).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "PublicKey(")?;
        for b in &bytes[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Signs `message` with a PEM-encoded private key.
pub fn sign(message: &[u8], private_key_pem: &str) -> CryptoResult<Vec<u8>> {
    PrivateKey::from_pem(private_key_pem)?.sign(message)
}

/// Verifies `signature` over `message` with a PEM-encoded public key.
///
/// Only an unparsable key is an error; a bad signature yields `Ok(false)`.
pub fn verify(message: &[u8], signature: &[u8], public_key_pem: &str) -> CryptoResult<bool> {
    Ok(PublicKey::from_pem(public_key_pem)?.verify(message, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = KeyPair::generate();
        let msg = b"hello world";
        let sig = kp.private_key.sign(msg).unwrap();
        assert_eq!(sig.len(), SIGNATURE_LENGTH);
        assert!(kp.public_key.verify(msg, &sig));
    }

    #[test]
    fn wrong_message_fails() {
        let kp = KeyPair::generate();
        let sig = kp.private_key.sign(b"correct").unwrap();
        assert!(!kp.public_key.verify(b"wrong", &sig));
    }

    #[test]
    fn wrong_key_fails() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let sig = kp1.private_key.sign(b"message").unwrap();
        assert!(!kp2.public_key.verify(b"message", &sig));
    }

    #[test]
    fn short_signature_is_false_not_error() {
        let kp = KeyPair::generate();
        assert!(!kp.public_key.verify(b"message", &[0u8; 12]));
        assert!(!kp.public_key.verify(b"message", &[]));
    }

    #[test]
    fn seeded_pairs_are_deterministic() {
        let a = KeyPair::from_seed(&[7u8; 32]);
        let b = KeyPair::from_seed(&[7u8; 32]);
        assert_eq!(a.public_key, b.public_key);
        assert_eq!(
            a.private_key.sign(b"same").unwrap(),
            b.private_key.sign(b"same").unwrap()
        );
    }

    #[test]
    fn debug_does_not_leak_private_key() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        assert_eq!(format!("{:?}", kp.private_key), "PrivateKey(..)");
    }
}
