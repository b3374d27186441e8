//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `Session`: login, registration and logout against the ticket server
//! - `CredentialStore`: persistence of the session credential behind a
//!   small key-value capability (`FileKv`, `KeyringKv`, `MemoryKv`)

pub mod credentials;
pub mod session;

pub use credentials::{CredentialStore, FileKv, KeyringKv, MemoryKv, PersistentKv, AUTH_HEADER_KEY};
pub use session::Session;
pub(crate) use session::LogoutHook;
