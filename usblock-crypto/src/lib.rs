//! Signing primitive for usblock licenses.
//!
//! Produces and checks detached Ed25519 signatures over arbitrary byte
//! messages. Knows nothing about license structure.
//!
//! # Example
//!
//! ```
//! use usblock_crypto::KeyPair;
//!
//! let kp = KeyPair::generate();
//! let sig = kp.private_key.sign(b"payload").unwrap();
//! assert!(kp.public_key.verify(b"payload", &sig));
//! ```

mod error;
mod signing;

pub use error::{CryptoError, CryptoResult};
pub use signing::{sign, verify, KeyPair, PrivateKey, PublicKey, SIGNATURE_LENGTH};
