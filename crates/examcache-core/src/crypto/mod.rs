//! Encryption of credentials at rest.
//!
//! - `TokenCipher`: ChaCha20-Poly1305 with a random nonce per call, base64 blobs
//! - `KeyStore`: where the 256-bit key lives (OS keychain, passphrase-derived, memory)
//!
//! Ciphertext format: base64(nonce (12 bytes) || ciphertext || tag (16 bytes)).

pub mod cipher;
pub mod keystore;

pub use cipher::TokenCipher;
pub use keystore::{KeyMaterial, KeyStore, KeyringKeyStore, MemoryKeyStore, PassphraseKeyStore, KEY_LEN};
