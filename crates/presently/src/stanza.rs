//! In-memory stanza model.
//!
//! Stanzas arrive already parsed; this module only carries the fields the
//! presence core reads or rewrites.

use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Presence type.
///
/// `Available` is the absence of a type attribute on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PresenceType {
    /// Entity is available.
    #[default]
    Available,
    /// Entity is no longer available.
    Unavailable,
    /// Request to subscribe to the recipient's presence.
    Subscribe,
    /// Subscription request approved.
    Subscribed,
    /// Request to unsubscribe from the recipient's presence.
    Unsubscribe,
    /// Subscription denied or cancelled.
    Unsubscribed,
    /// Error response.
    Error,
    /// Request for the recipient's current presence.
    Probe,
}

/// Error conditions the presence core answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCondition {
    /// The stanza was malformed or not allowed here.
    BadRequest,
    /// The sender must authenticate first.
    NotAuthorized,
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => f.write_str("bad-request"),
            Self::NotAuthorized => f.write_str("not-authorized"),
        }
    }
}

/// A presence stanza.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Presence {
    /// Sender address.
    pub from: Option<Address>,
    /// Recipient address; `None` for a broadcast update.
    pub to: Option<Address>,
    /// Presence type.
    pub kind: PresenceType,
    /// Free-form status text.
    pub status: Option<String>,
    /// Error condition, set on error responses.
    pub error: Option<ErrorCondition>,
}

impl Presence {
    /// Create a presence of the given type.
    pub fn new(kind: PresenceType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Create an available presence from `from`.
    pub fn available(from: Address) -> Self {
        Self::new(PresenceType::Available).with_from(from)
    }

    /// Create an unavailable presence `from -> to`.
    pub fn unavailable(from: Address, to: Address) -> Self {
        Self::new(PresenceType::Unavailable).with_from(from).with_to(to)
    }

    /// Set the sender.
    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the recipient.
    pub fn with_to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    /// Set the status text.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Copy of this stanza readdressed to `to`.
    pub fn readdressed(&self, to: Address) -> Self {
        Self {
            to: Some(to),
            ..self.clone()
        }
    }

    /// Copy of this stanza turned into an error response.
    pub fn into_error(mut self, condition: ErrorCondition) -> Self {
        self.kind = PresenceType::Error;
        self.error = Some(condition);
        self
    }
}

/// A chat message; only relayed by the presence core (offline delivery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sender address.
    pub from: Option<Address>,
    /// Recipient address.
    pub to: Option<Address>,
    /// Message body.
    pub body: String,
}

/// Any stanza the presence core may emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stanza {
    /// A presence stanza.
    Presence(Presence),
    /// A message stanza.
    Message(Message),
}

impl Stanza {
    /// Recipient of the stanza.
    pub fn to(&self) -> Option<&Address> {
        match self {
            Self::Presence(p) => p.to.as_ref(),
            Self::Message(m) => m.to.as_ref(),
        }
    }

    /// Borrow the presence, if this is one.
    pub fn as_presence(&self) -> Option<&Presence> {
        match self {
            Self::Presence(p) => Some(p),
            Self::Message(_) => None,
        }
    }
}

impl From<Presence> for Stanza {
    fn from(p: Presence) -> Self {
        Self::Presence(p)
    }
}

impl From<Message> for Stanza {
    fn from(m: Message) -> Self {
        Self::Message(m)
    }
}

/// Returns `true` if the stanza is a presence reflected back to its sender.
pub fn is_presence_update_reflection(stanza: &Stanza) -> bool {
    match stanza {
        Stanza::Presence(p) => p.to.is_some() && p.to == p.from,
        Stanza::Message(_) => false,
    }
}

/// Build a subscribe (or unsubscribe) request `from -> to`.
pub fn create_subscribe_presence(from: Address, to: Address, subscribe: bool) -> Presence {
    let kind = if subscribe {
        PresenceType::Subscribe
    } else {
        PresenceType::Unsubscribe
    };
    Presence::new(kind).with_from(from).with_to(to)
}
