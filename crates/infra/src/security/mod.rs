//! Platform-backed secret storage

pub mod keyring_store;

pub use keyring_store::{KeyringSecureStore, DEFAULT_SERVICE_NAME};
