use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::wallet::WalletCache;
use crate::api::ApiError;
use crate::auth::{LogoutHook, Session};
use crate::events::SessionEvent;
use crate::models::{CodeImage, GeneratedTicket, Ticket, WalletSnapshot, DEFAULT_IMAGE_MIME};

/// Authenticated ticket operations for one [`Session`].
/// Clone is cheap - clones share the same wallet cache.
#[derive(Clone)]
pub struct TicketClient {
    session: Session,
    cache: Arc<Mutex<WalletCache>>,
}

impl TicketClient {
    pub fn new(session: Session) -> Self {
        let cache = Arc::new(Mutex::new(WalletCache::default()));

        let hook: Weak<dyn LogoutHook> = Arc::downgrade(&cache) as Weak<Mutex<WalletCache>>;
        session.add_logout_hook(hook);

        Self { session, cache }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Tickets from the last applied fetch, in server order.
    pub fn wallet(&self) -> Vec<Ticket> {
        self.cache.lock().tickets()
    }

    pub fn wallet_snapshot(&self) -> Option<WalletSnapshot> {
        self.cache.lock().snapshot().cloned()
    }

    /// The code image from the last successful `load_code_image`.
    pub fn code_image(&self) -> Option<CodeImage> {
        self.cache.lock().code_image().cloned()
    }

    /// Ask the server to issue a ticket. Completes with `ticket-generated` or
    /// `error`. The wallet is not updated; fetch it again to see the ticket.
    pub fn generate_ticket(&self, ticket_type: &str) -> JoinHandle<Result<String, ApiError>> {
        let auth = self.authorize();
        let client = self.clone();
        let ticket_type = ticket_type.to_string();

        tokio::spawn(async move {
            let (authorization, _) = auth?;
            debug!(ticket_type = %ticket_type, "Generating ticket");

            let result = async {
                let response = client
                    .session
                    .api()
                    .post_json(
                        "/generate",
                        Some(authorization),
                        json!({ "ticket_type": ticket_type }),
                    )
                    .await?;
                Ok::<_, ApiError>(response.json::<GeneratedTicket>()?.payload)
            }
            .await;

            match result {
                Ok(payload) => {
                    debug!(payload_len = payload.len(), "Ticket generated");
                    client.session.events().publish(SessionEvent::TicketGenerated {
                        payload: payload.clone(),
                    });
                    Ok(payload)
                }
                Err(e) => {
                    error!(ticket_type = %ticket_type, error = %e, "Ticket generation failed");
                    client
                        .session
                        .events()
                        .publish(SessionEvent::error(format!("Ticket generation failed: {}", e)));
                    Err(e)
                }
            }
        })
    }

    /// Fetch the wallet and replace the cache. Completes with
    /// `tickets-fetched` or `error`. A response overtaken by a newer fetch is
    /// dropped silently and resolves to [`ApiError::Superseded`].
    pub fn fetch_tickets(&self) -> JoinHandle<Result<Vec<Ticket>, ApiError>> {
        let auth = self.authorize();
        let seq = self.cache.lock().next_wallet_seq();
        let client = self.clone();

        tokio::spawn(async move {
            let (authorization, epoch) = auth?;
            debug!(seq, "Fetching wallet");

            let result = async {
                let response = client.session.api().get("/wallet", Some(authorization)).await?;
                response.json::<Vec<Ticket>>()
            }
            .await;

            match result {
                Ok(tickets) => client.apply_wallet(seq, epoch, tickets),
                Err(e) => {
                    error!(error = %e, "Fetch tickets failed");
                    client
                        .session
                        .events()
                        .publish(SessionEvent::error(format!("Fetch tickets failed: {}", e)));
                    Err(e)
                }
            }
        })
    }

    /// Download the code image for `ticket_id` and make it the current one.
    /// No event is sent on success; read [`TicketClient::code_image`].
    pub fn load_code_image(&self, ticket_id: &str) -> JoinHandle<Result<CodeImage, ApiError>> {
        let auth = self.authorize();
        let seq = self.cache.lock().next_image_seq();
        let client = self.clone();
        let ticket_id = ticket_id.to_string();

        tokio::spawn(async move {
            let (authorization, epoch) = auth?;
            debug!(ticket_id = %ticket_id, seq, "Loading code image");

            let result = client
                .session
                .api()
                .get_segments(&["qr", ticket_id.as_str()], Some(authorization))
                .await;

            match result {
                Ok(response) => {
                    let mime_type = response
                        .content_type
                        .as_deref()
                        .and_then(|ct| ct.split(';').next())
                        .map(str::trim)
                        .filter(|ct| !ct.is_empty())
                        .unwrap_or(DEFAULT_IMAGE_MIME)
                        .to_string();
                    let image = CodeImage::new(mime_type, response.body);
                    client.apply_code_image(seq, epoch, image)
                }
                Err(e) => {
                    error!(ticket_id = %ticket_id, error = %e, "Load code image failed");
                    client
                        .session
                        .events()
                        .publish(SessionEvent::error(format!("Load QR failed: {}", e)));
                    Err(e)
                }
            }
        })
    }

    /// Credential check done before anything is sent. When logged out this
    /// reports the error immediately, from the caller's context.
    fn authorize(&self) -> Result<(String, u64), ApiError> {
        match self.session.authorization_with_epoch() {
            Some(auth) => Ok(auth),
            None => {
                debug!("Ticket operation requested without auth token");
                self.session
                    .events()
                    .publish(SessionEvent::error(ApiError::NotAuthenticated.to_string()));
                Err(ApiError::NotAuthenticated)
            }
        }
    }

    fn apply_wallet(
        &self,
        seq: u64,
        epoch: u64,
        tickets: Vec<Ticket>,
    ) -> Result<Vec<Ticket>, ApiError> {
        let mut cache = self.cache.lock();
        if self.session.epoch() != epoch {
            debug!(seq, "Discarding wallet response from before logout");
            return Err(ApiError::LoggedOutDuringRequest);
        }
        if let Err(e) = cache.apply_wallet(seq, tickets.clone()) {
            debug!(seq, "Discarding superseded wallet response");
            return Err(e);
        }
        info!(count = tickets.len(), "Wallet updated");
        // Published under the cache lock so event order matches cache order
        self.session.events().publish(SessionEvent::TicketsFetched {
            tickets: tickets.clone(),
        });
        Ok(tickets)
    }

    fn apply_code_image(&self, seq: u64, epoch: u64, image: CodeImage) -> Result<CodeImage, ApiError> {
        let mut cache = self.cache.lock();
        if self.session.epoch() != epoch {
            debug!(seq, "Discarding code image from before logout");
            return Err(ApiError::LoggedOutDuringRequest);
        }
        cache.apply_code_image(seq, image.clone())?;
        debug!(bytes = image.data.len(), mime = %image.mime_type, "Code image stored");
        Ok(image)
    }
}

impl LogoutHook for Mutex<WalletCache> {
    fn on_logout(&self) {
        self.lock().clear();
        debug!("Wallet and code image cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::auth::CredentialStore;
    use crate::events::EventKind;
    use crate::models::Credential;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, logged_in: bool) -> TicketClient {
        let store = CredentialStore::in_memory();
        if logged_in {
            store.save(&Credential::new("bearer", "tok")).unwrap();
        }
        let session = Session::new(ApiClient::with_base_url(&server.uri()).unwrap(), store);
        TicketClient::new(session)
    }

    fn tickets(value: serde_json::Value) -> Vec<Ticket> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_generate_ticket_broadcasts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(header("authorization", "bearer tok"))
            .and(body_json(json!({"ticket_type": "day-pass"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"payload": "abc123"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let mut events = client.session().subscribe();

        let payload = client.generate_ticket("day-pass").await.unwrap().unwrap();

        assert_eq!(payload, "abc123");
        assert_eq!(
            events.drain(),
            vec![SessionEvent::TicketGenerated {
                payload: "abc123".to_string()
            }]
        );
        // Generation never touches the wallet
        assert!(client.wallet().is_empty());
    }

    #[tokio::test]
    async fn test_generate_ticket_failure_reports_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unknown ticket type"))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let mut errors = client.session().events().subscribe_to(&[EventKind::Error]);

        let err = client.generate_ticket("bogus").await.unwrap().unwrap_err();

        assert!(matches!(err, ApiError::Rejected { .. }));
        match errors.drain().as_slice() {
            [SessionEvent::Error { message }] => {
                assert!(message.starts_with("Ticket generation failed: "));
                assert!(message.contains("unknown ticket type"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_logged_out_short_circuits_without_network() {
        let server = MockServer::start().await;
        let client = client_for(&server, false);
        let mut events = client.session().subscribe();

        let err = client.fetch_tickets().await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::NotAuthenticated));
        assert_eq!(
            events.drain(),
            vec![SessionEvent::error("No auth token available.")]
        );

        assert!(client.generate_ticket("day-pass").await.unwrap().is_err());
        assert!(client.load_code_image("t1").await.unwrap().is_err());
        assert_eq!(events.drain().len(), 2);

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_authenticated_event_is_synchronous() {
        let server = MockServer::start().await;
        let client = client_for(&server, false);
        let mut events = client.session().subscribe();

        let handle = client.fetch_tickets();
        // Reported before the task has had a chance to run
        assert_eq!(events.try_recv(), Some(SessionEvent::error("No auth token available.")));
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_fetch_replaces_wallet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "old1", "type": "single"},
                {"id": "old2", "type": "single"}
            ])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .and(header("authorization", "bearer tok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": "t1", "type": "day-pass"}])),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        client.fetch_tickets().await.unwrap().unwrap();
        assert_eq!(client.wallet().len(), 2);

        let mut events = client.session().subscribe();
        client.fetch_tickets().await.unwrap().unwrap();

        let expected = tickets(json!([{"id": "t1", "type": "day-pass"}]));
        assert_eq!(client.wallet(), expected);
        assert_eq!(
            events.drain(),
            vec![SessionEvent::TicketsFetched { tickets: expected }]
        );
        assert_eq!(
            client.wallet_snapshot().map(|s| s.age_display()),
            Some("just now".to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_keeps_records_verbatim() {
        let server = MockServer::start().await;
        let body = json!([
            {"id": "t1", "type": "day-pass", "ticket_type": "day-pass"},
            {"id": 7, "ticket_type": "single"},
            {"id": "t3", "type": {"name": "week", "zones": [1, 2]}}
        ]);
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let fetched = client.fetch_tickets().await.unwrap().unwrap();

        let ids: Vec<&str> = fetched.iter().map(Ticket::id).collect();
        assert_eq!(ids, vec!["t1", "7", "t3"]);
        assert_eq!(fetched[1].type_display(), "single");
        assert_eq!(fetched[2].type_display(), "unknown");
        assert_eq!(serde_json::to_value(client.wallet()).unwrap(), body);
    }

    #[tokio::test]
    async fn test_code_image_id_is_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qr/a%2Fb%3Fc%23d"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1, 2, 3], "image/png"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let image = client.load_code_image("a/b?c#d").await.unwrap().unwrap();
        assert_eq!(image.data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dropped_clients_release_logout_hooks() {
        let server = MockServer::start().await;
        let session = Session::new(
            ApiClient::with_base_url(&server.uri()).unwrap(),
            CredentialStore::in_memory(),
        );

        for _ in 0..10 {
            drop(TicketClient::new(session.clone()));
        }
        let live = TicketClient::new(session.clone());
        assert_eq!(session.logout_hook_count(), 1);

        session.logout();
        assert_eq!(session.logout_hook_count(), 1);
        drop(live);
        session.logout();
        assert_eq!(session.logout_hook_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_previous_wallet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "t1"}])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        client.fetch_tickets().await.unwrap().unwrap();

        let mut events = client.session().subscribe();
        let err = client.fetch_tickets().await.unwrap().unwrap_err();

        assert!(!err.is_auth_rejected());
        assert_eq!(client.wallet(), tickets(json!([{"id": "t1"}])));
        match events.drain().as_slice() {
            [SessionEvent::Error { message }] => assert!(message.starts_with("Fetch tickets failed: ")),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_token_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let err = client.fetch_tickets().await.unwrap().unwrap_err();

        assert!(err.is_auth_rejected());
        assert!(!matches!(err, ApiError::NotAuthenticated));
        // Expiry is discovered, not acted on
        assert!(client.session().is_logged_in());
    }

    #[tokio::test]
    async fn test_stale_fetch_cannot_overwrite_newer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"id": "stale"}]))
                    .set_delay(Duration::from_millis(400)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "fresh"}])))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let mut events = client
            .session()
            .events()
            .subscribe_to(&[EventKind::TicketsFetched]);

        let first = client.fetch_tickets();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = client.fetch_tickets();

        let second = second.await.unwrap();
        let first = first.await.unwrap();

        assert!(second.is_ok());
        assert!(matches!(first, Err(ApiError::Superseded)));
        assert_eq!(client.wallet(), tickets(json!([{"id": "fresh"}])));
        assert_eq!(events.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_load_code_image() {
        let server = MockServer::start().await;
        let png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a];
        Mock::given(method("GET"))
            .and(path("/qr/t1"))
            .and(header("authorization", "bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(png.clone(), "image/png"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/qr/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let mut events = client.session().subscribe();

        let image = client.load_code_image("t1").await.unwrap().unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, png);
        assert_eq!(client.code_image(), Some(image.clone()));
        assert!(image.data_uri().starts_with("data:image/png;base64,"));
        assert!(events.drain().is_empty());

        let err = client.load_code_image("missing").await.unwrap().unwrap_err();
        assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
        assert_eq!(client.code_image(), Some(image));
        match events.drain().as_slice() {
            [SessionEvent::Error { message }] => assert!(message.starts_with("Load QR failed: ")),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_logout_clears_wallet_and_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "t1"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/qr/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1, 2, 3], "image/png"))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        client.fetch_tickets().await.unwrap().unwrap();
        client.load_code_image("t1").await.unwrap().unwrap();

        client.session().logout();
        assert!(!client.session().is_logged_in());
        assert!(client.wallet().is_empty());
        assert!(client.code_image().is_none());

        client.session().logout();
        assert!(!client.session().is_logged_in());
        assert!(client.wallet().is_empty());
        assert!(client.code_image().is_none());
    }

    #[tokio::test]
    async fn test_fetch_in_flight_during_logout_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wallet"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"id": "t1"}]))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        let handle = client.fetch_tickets();
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.session().logout();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ApiError::LoggedOutDuringRequest)));
        assert!(client.wallet().is_empty());
    }
}
