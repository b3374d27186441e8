use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A ticket as returned by the wallet endpoint.
///
/// The record is kept exactly as the server sent it. Only the identifier has
/// meaning to the client, and it may arrive as a string or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Ticket {
    id: String,
    fields: Map<String, Value>,
}

impl Ticket {
    /// Identifier as text, used to request the code image.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The ticket type, read from `type` or `ticket_type` when either holds
    /// a string.
    pub fn ticket_type(&self) -> Option<&str> {
        ["type", "ticket_type"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
    }

    pub fn type_display(&self) -> &str {
        self.ticket_type().unwrap_or("unknown")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Every field of the record, untouched.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl TryFrom<Map<String, Value>> for Ticket {
    type Error = String;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        // Some servers emit integer primary keys
        let id = match fields.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(format!("invalid ticket id: {}", other)),
            None => return Err("missing field `id`".to_string()),
        };
        Ok(Self { id, fields })
    }
}

impl From<Ticket> for Map<String, Value> {
    fn from(ticket: Ticket) -> Self {
        ticket.fields
    }
}

/// The wallet as last fetched from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletSnapshot {
    pub tickets: Vec<Ticket>,
    pub fetched_at: DateTime<Utc>,
}

impl WalletSnapshot {
    pub fn new(tickets: Vec<Ticket>) -> Self {
        Self {
            tickets,
            fetched_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.fetched_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Payment page returned by `/create-checkout-session`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub url: String,
}

/// Response body of `/generate`.
#[derive(Debug, Deserialize)]
pub(crate) struct GeneratedTicket {
    #[serde(default)]
    pub payload: String,
}
