//! Session-scoped cache of the wallet and the current code image.
//!
//! Each fetch is stamped with a sequence number when it is issued. A
//! response is applied only if its number is higher than every response
//! applied before it, so a slow, older fetch can never overwrite a newer one.

use crate::api::ApiError;
use crate::models::{CodeImage, Ticket, WalletSnapshot};

#[derive(Debug, Default)]
pub(crate) struct WalletCache {
    snapshot: Option<WalletSnapshot>,
    code_image: Option<CodeImage>,
    wallet_issued: u64,
    wallet_applied: u64,
    image_issued: u64,
    image_applied: u64,
}

impl WalletCache {
    pub fn tickets(&self) -> Vec<Ticket> {
        self.snapshot
            .as_ref()
            .map(|s| s.tickets.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<&WalletSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn code_image(&self) -> Option<&CodeImage> {
        self.code_image.as_ref()
    }

    pub fn next_wallet_seq(&mut self) -> u64 {
        self.wallet_issued += 1;
        self.wallet_issued
    }

    pub fn next_image_seq(&mut self) -> u64 {
        self.image_issued += 1;
        self.image_issued
    }

    /// Replace the wallet wholesale if `seq` is the newest response so far.
    pub fn apply_wallet(&mut self, seq: u64, tickets: Vec<Ticket>) -> Result<(), ApiError> {
        if seq <= self.wallet_applied {
            return Err(ApiError::Superseded);
        }
        self.wallet_applied = seq;
        self.snapshot = Some(WalletSnapshot::new(tickets));
        Ok(())
    }

    pub fn apply_code_image(&mut self, seq: u64, image: CodeImage) -> Result<(), ApiError> {
        if seq <= self.image_applied {
            return Err(ApiError::Superseded);
        }
        self.image_applied = seq;
        self.code_image = Some(image);
        Ok(())
    }

    /// Drop cached data. Sequence counters keep running so responses issued
    /// before the clear stay ordered against later ones.
    pub fn clear(&mut self) {
        self.snapshot = None;
        self.code_image = None;
    }
}
