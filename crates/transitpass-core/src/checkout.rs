//! Payment checkout hand-off.
//!
//! The server creates a hosted payment page for a ticket type and returns its
//! URL; the caller sends the user's browser there. Nothing is persisted.

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::api::ApiError;
use crate::auth::Session;
use crate::events::{Callback, SessionEvent};
use crate::models::CheckoutSession;

#[derive(Clone)]
pub struct CheckoutInitiator {
    session: Session,
}

impl CheckoutInitiator {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Request a checkout page for `ticket_type`.
    ///
    /// Sends the Authorization header when logged in and omits it otherwise;
    /// the server decides whether that is acceptable. On success
    /// `checkout-session-created` is published and `callback` gets the URL.
    /// On failure only an `error` event is published and `callback` is
    /// dropped without being called.
    pub fn create_checkout_session(
        &self,
        ticket_type: &str,
        callback: Option<Callback<String>>,
    ) -> JoinHandle<Result<CheckoutSession, ApiError>> {
        let session = self.session.clone();
        let ticket_type = ticket_type.to_string();

        tokio::spawn(async move {
            let authorization = session.authorization();
            debug!(
                ticket_type = %ticket_type,
                authenticated = authorization.is_some(),
                "Creating checkout session"
            );

            let result = async {
                let response = session
                    .api()
                    .post_json(
                        "/create-checkout-session",
                        authorization,
                        json!({ "ticket_type": ticket_type }),
                    )
                    .await?;
                response.json::<CheckoutSession>()
            }
            .await;

            match result {
                Ok(checkout) => {
                    info!(url = %checkout.url, "Checkout session created");
                    session.events().complete(
                        SessionEvent::CheckoutSessionCreated {
                            url: checkout.url.clone(),
                        },
                        callback,
                        checkout.url.clone(),
                    );
                    Ok(checkout)
                }
                Err(e) => {
                    error!(ticket_type = %ticket_type, error = %e, "Checkout session creation failed");
                    session.events().publish(SessionEvent::error(format!(
                        "Failed to create checkout session: {}",
                        e
                    )));
                    Err(e)
                }
            }
        })
    }
}
