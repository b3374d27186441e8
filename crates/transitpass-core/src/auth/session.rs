//! Session manager: owns the credential and the authentication lifecycle.
//!
//! A `Session` is a cheap-to-clone handle. The ticket client and the checkout
//! initiator are constructed from it, so every place that reads or mutates
//! the credential goes through this type.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::auth::CredentialStore;
use crate::events::{AuthOutcome, Callback, EventBus, EventSubscription, SessionEvent};
use crate::models::{Credential, SessionState, TokenResponse};

const LOGIN_SUCCESS: &str = "Login successful.";
const REGISTER_SUCCESS: &str = "Registration successful.";

/// Session-scoped state that must be dropped on logout.
pub(crate) trait LogoutHook: Send + Sync {
    fn on_logout(&self);
}

/// Mutable authentication state. Guarded by one lock so that persisting a
/// new credential and a concurrent logout cannot interleave.
struct AuthSlot {
    credential: Option<Credential>,
    /// Bumped on every logout; attempts started under an older epoch are void.
    epoch: u64,
    /// Login/registration attempts currently in flight.
    pending: usize,
}

impl AuthSlot {
    fn state(&self) -> SessionState {
        if self.pending > 0 {
            SessionState::Authenticating
        } else if self.credential.is_some() {
            SessionState::LoggedIn
        } else {
            SessionState::LoggedOut
        }
    }
}

struct SessionInner {
    api: ApiClient,
    store: CredentialStore,
    events: EventBus,
    auth: Mutex<AuthSlot>,
    state: watch::Sender<SessionState>,
    logout_hooks: Mutex<Vec<Weak<dyn LogoutHook>>>,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session, starting logged in if `store` holds a credential.
    pub fn new(api: ApiClient, store: CredentialStore) -> Self {
        Self::with_events(api, store, EventBus::new())
    }

    pub fn with_events(api: ApiClient, store: CredentialStore, events: EventBus) -> Self {
        let credential = store.load();
        debug!(has_credential = credential.is_some(), "Session created");

        let slot = AuthSlot {
            credential,
            epoch: 0,
            pending: 0,
        };
        let (state, _) = watch::channel(slot.state());

        Self {
            inner: Arc::new(SessionInner {
                api,
                store,
                events,
                auth: Mutex::new(slot),
                state,
                logout_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Follow state transitions as they happen.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// True when a credential is held. Does not contact the server.
    pub fn is_logged_in(&self) -> bool {
        self.inner.auth.lock().credential.is_some()
    }

    /// Authorization header value for the held credential, if any.
    pub fn authorization(&self) -> Option<String> {
        self.inner
            .auth
            .lock()
            .credential
            .as_ref()
            .map(Credential::header_value)
    }

    /// Authorization header together with the current logout epoch, read
    /// under one lock. Results of requests that straddle a logout are voided
    /// by comparing epochs.
    pub(crate) fn authorization_with_epoch(&self) -> Option<(String, u64)> {
        let slot = self.inner.auth.lock();
        slot.credential
            .as_ref()
            .map(|c| (c.header_value(), slot.epoch))
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.inner.auth.lock().epoch
    }

    /// Run `hook` on every logout, after the credential is cleared.
    ///
    /// Only a weak reference is kept. Hooks whose owner has been dropped are
    /// pruned here and on logout.
    pub(crate) fn add_logout_hook(&self, hook: Weak<dyn LogoutHook>) {
        let mut hooks = self.inner.logout_hooks.lock();
        hooks.retain(|h| h.strong_count() > 0);
        hooks.push(hook);
    }

    #[cfg(test)]
    pub(crate) fn logout_hook_count(&self) -> usize {
        self.inner.logout_hooks.lock().len()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Log in with the password grant. Completes with `login-finished` and
    /// the optional callback.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        callback: Option<Callback<AuthOutcome>>,
    ) -> JoinHandle<AuthOutcome> {
        let session = self.clone();
        let username = username.to_string();
        let password = password.to_string();
        tokio::spawn(async move { session.login_and_notify(&username, &password, callback).await })
    }

    /// Create an account, then log in with the same credentials. Completes
    /// with `register-finished` and the optional callback.
    pub fn register(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
        callback: Option<Callback<AuthOutcome>>,
    ) -> JoinHandle<AuthOutcome> {
        let session = self.clone();
        let username = username.to_string();
        let email = email.filter(|e| !e.is_empty()).map(str::to_string);
        let password = password.to_string();
        tokio::spawn(async move {
            session
                .register_and_notify(&username, email.as_deref(), &password, callback)
                .await
        })
    }

    /// Forget the credential locally and drop every session-scoped cache.
    /// Nothing is sent to the server.
    pub fn logout(&self) {
        {
            let mut slot = self.inner.auth.lock();
            slot.epoch += 1;
            if let Err(e) = self.inner.store.clear() {
                warn!(error = %e, "Failed to remove stored credential");
            }
            slot.credential = None;
            self.publish_state(&slot);
        }

        let live: Vec<Arc<dyn LogoutHook>> = {
            let mut hooks = self.inner.logout_hooks.lock();
            hooks.retain(|h| h.strong_count() > 0);
            hooks.iter().filter_map(Weak::upgrade).collect()
        };
        for hook in live {
            hook.on_logout();
        }
        info!("Logged out");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn login_and_notify(
        &self,
        username: &str,
        password: &str,
        callback: Option<Callback<AuthOutcome>>,
    ) -> AuthOutcome {
        debug!(username, "Login requested");
        let outcome = match self.authenticate(username, password).await {
            Ok(()) => {
                info!(username, "Login successful");
                AuthOutcome::ok(LOGIN_SUCCESS)
            }
            Err(e) => {
                error!(username, error = %e, "Login failed");
                AuthOutcome::failed(format!("Login failed: {}", e))
            }
        };
        self.inner
            .events
            .complete(SessionEvent::login(&outcome), callback, outcome.clone());
        outcome
    }

    async fn register_and_notify(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
        callback: Option<Callback<AuthOutcome>>,
    ) -> AuthOutcome {
        debug!(username, has_email = email.is_some(), "Registration requested");
        let outcome = match self.create_account(username, email, password).await {
            Ok(()) => {
                // The follow-up login reports on its own channel; the account
                // exists either way.
                let follow_up = self.login_and_notify(username, password, None).await;
                if !follow_up.success {
                    warn!(username, "Login after registration failed, keeping registration token");
                }
                info!(username, "Registration successful");
                AuthOutcome::ok(REGISTER_SUCCESS)
            }
            Err(e) => {
                error!(username, error = %e, "Registration failed");
                AuthOutcome::failed(format!("Registration failed: {}", e))
            }
        };
        self.inner
            .events
            .complete(SessionEvent::register(&outcome), callback, outcome.clone());
        outcome
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let epoch = self.begin_attempt();
        let result = async {
            let response = self
                .inner
                .api
                .post_form("/token", &[("username", username), ("password", password)])
                .await?;
            let token: TokenResponse = response.json()?;
            Ok::<_, ApiError>(Credential::from(token))
        }
        .await;
        self.finish_attempt(epoch, result)
    }

    async fn create_account(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
    ) -> Result<(), ApiError> {
        let epoch = self.begin_attempt();
        let body = json!({
            "username": username,
            "email": email,
            "password": password,
        });
        let result = async {
            let response = self.inner.api.post_json("/register", None, body).await?;
            let token: TokenResponse = response.json()?;
            Ok::<_, ApiError>(Credential::from(token))
        }
        .await;
        self.finish_attempt(epoch, result)
    }

    fn begin_attempt(&self) -> u64 {
        let mut slot = self.inner.auth.lock();
        slot.pending += 1;
        self.publish_state(&slot);
        slot.epoch
    }

    /// Apply the result of an attempt. The credential is only replaced on
    /// success, and only if no logout happened since the attempt began.
    fn finish_attempt(
        &self,
        epoch: u64,
        result: Result<Credential, ApiError>,
    ) -> Result<(), ApiError> {
        let mut slot = self.inner.auth.lock();
        slot.pending = slot.pending.saturating_sub(1);

        let outcome = match result {
            Ok(credential) if slot.epoch == epoch => {
                if let Err(e) = self.inner.store.save(&credential) {
                    warn!(error = %e, "Failed to persist credential, keeping it in memory only");
                }
                slot.credential = Some(credential);
                Ok(())
            }
            Ok(_) => Err(ApiError::LoggedOutDuringRequest),
            Err(e) => Err(e),
        };

        self.publish_state(&slot);
        outcome
    }

    fn publish_state(&self, slot: &AuthSlot) {
        let state = slot.state();
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!(from = previous.label(), to = state.label(), "Session state changed");
        }
    }
}
