//! ShareThings relay core: an end-to-end-encrypted clipboard and file
//! sharing relay. Clients bound to a shared passphrase form a session; the
//! server verifies membership by zero-knowledge fingerprint, relays opaque
//! ciphertext between members, and persists chunks for replay and download.
//! Plaintext never reaches the server.

pub mod api;
pub mod config;
pub mod relay;
pub mod session;
pub mod store;
pub mod transport;
