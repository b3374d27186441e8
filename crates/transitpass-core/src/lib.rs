//! Client core for a transit ticketing service.
//!
//! A [`Session`] owns the credential and the event bus. [`TicketClient`] and
//! [`CheckoutInitiator`] borrow it for authenticated calls, and
//! [`CodeRenderer`] turns ticket payloads into scannable QR images offline.
//!
//! Every network operation returns a [`tokio::task::JoinHandle`] with its
//! typed outcome and also publishes a [`SessionEvent`] when it completes.

pub mod api;
pub mod auth;
pub mod checkout;
pub mod config;
pub mod events;
pub mod models;
pub mod render;
pub mod tickets;

pub use api::{ApiClient, ApiError};
pub use auth::{CredentialStore, Session};
pub use checkout::CheckoutInitiator;
pub use config::{Config, CredentialBackend};
pub use events::{callback, AuthOutcome, Callback, EventBus, EventKind, EventSubscription, SessionEvent};
pub use models::{CheckoutSession, CodeImage, Credential, SessionState, Ticket, WalletSnapshot};
pub use render::{CodeRenderer, ErrorCorrection, RenderError};
pub use tickets::TicketClient;
