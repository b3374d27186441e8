//! Completion notifications.
//!
//! Every asynchronous operation finishes with exactly one [`SessionEvent`].
//! The event is always published on the [`EventBus`] so that any number of
//! listeners can follow ambient state, and, when the caller passed one, a
//! [`Callback`] tied to that single invocation is run with the result.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::models::Ticket;

/// Events buffered per subscriber before the oldest are dropped.
/// Completions are user-driven, so 64 leaves plenty of headroom.
const EVENT_BUFFER_SIZE: usize = 64;

/// Caller-supplied completion handle, run at most once.
pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Box a closure as a [`Callback`].
pub fn callback<T, F>(f: F) -> Callback<T>
where
    F: FnOnce(T) + Send + 'static,
{
    Box::new(f)
}

/// Result handed to login and registration callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub success: bool,
    pub message: String,
}

impl AuthOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoginFinished { success: bool, message: String },
    RegisterFinished { success: bool, message: String },
    /// Payload of a newly issued ticket
    TicketGenerated { payload: String },
    TicketsFetched { tickets: Vec<Ticket> },
    /// Payment page the user must visit
    CheckoutSessionCreated { url: String },
    Error { message: String },
}

/// Channel key used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoginFinished,
    RegisterFinished,
    TicketGenerated,
    TicketsFetched,
    CheckoutSessionCreated,
    Error,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::LoginFinished { .. } => EventKind::LoginFinished,
            SessionEvent::RegisterFinished { .. } => EventKind::RegisterFinished,
            SessionEvent::TicketGenerated { .. } => EventKind::TicketGenerated,
            SessionEvent::TicketsFetched { .. } => EventKind::TicketsFetched,
            SessionEvent::CheckoutSessionCreated { .. } => EventKind::CheckoutSessionCreated,
            SessionEvent::Error { .. } => EventKind::Error,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        SessionEvent::Error {
            message: message.into(),
        }
    }

    pub(crate) fn login(outcome: &AuthOutcome) -> Self {
        SessionEvent::LoginFinished {
            success: outcome.success,
            message: outcome.message.clone(),
        }
    }

    pub(crate) fn register(outcome: &AuthOutcome) -> Self {
        SessionEvent::RegisterFinished {
            success: outcome.success,
            message: outcome.message.clone(),
        }
    }
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::LoginFinished => "login-finished",
            EventKind::RegisterFinished => "register-finished",
            EventKind::TicketGenerated => "ticket-generated",
            EventKind::TicketsFetched => "tickets-fetched",
            EventKind::CheckoutSessionCreated => "checkout-session-created",
            EventKind::Error => "error",
        }
    }
}

/// Broadcast bus shared by every component of one session.
/// Clone is cheap - all clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            kinds: None,
        }
    }

    /// Receive only events of the given kinds.
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            kinds: Some(kinds.to_vec()),
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        let kind = event.kind();
        // No subscribers is not an error
        let delivered = self.sender.send(event).unwrap_or(0);
        debug!(event = kind.name(), delivered, "Event published");
    }

    /// Publish `event`, then hand `value` to the caller's callback if any.
    pub fn complete<T>(&self, event: SessionEvent, callback: Option<Callback<T>>, value: T) {
        self.publish(event);
        if let Some(callback) = callback {
            callback(value);
        }
    }
}

/// A listener on an [`EventBus`].
pub struct EventSubscription {
    receiver: broadcast::Receiver<SessionEvent>,
    kinds: Option<Vec<EventKind>>,
}

impl EventSubscription {
    fn accepts(&self, event: &SessionEvent) -> bool {
        self.kinds
            .as_ref()
            .map(|kinds| kinds.contains(&event.kind()))
            .unwrap_or(true)
    }

    /// Wait for the next matching event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, skipping missed events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, skipping missed events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// All matching events currently queued.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
