//! Data models for the ticketing service.
//!
//! - `Credential`, `SessionState`: authentication
//! - `Ticket`, `WalletSnapshot`: the user's wallet
//! - `CheckoutSession`: payment hand-off
//! - `CodeImage`: rendered or downloaded scannable codes

pub mod code_image;
pub mod credential;
pub mod ticket;

pub use code_image::{CodeImage, DEFAULT_IMAGE_MIME};
pub use credential::{Credential, SessionState};
pub(crate) use credential::TokenResponse;
pub use ticket::{CheckoutSession, Ticket, WalletSnapshot};
pub(crate) use ticket::GeneratedTicket;
