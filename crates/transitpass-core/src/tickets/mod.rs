//! Ticket operations and the session-scoped wallet cache.
//!
//! `TicketClient` issues tickets, fetches the wallet and downloads per-ticket
//! code images. Every operation requires a logged-in [`crate::auth::Session`];
//! the wallet and current code image are dropped when the session logs out.

pub mod client;
mod wallet;

pub use client::TicketClient;
