//! Error types for presence operations.

use crate::address::{Address, NodeId};
use thiserror::Error;

/// Errors that can occur while processing a presence stanza.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The sending session has not authenticated.
    #[error("session not authorized: {0}")]
    NotAuthorized(Address),

    /// The sender has no account on this server.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Failed to route a stanza.
    #[error("route failed: {0}")]
    Route(#[from] RouteError),

    /// The roster collaborator failed.
    #[error("roster failed: {0}")]
    Roster(#[from] RosterError),

    /// The replicated cache failed.
    #[error("cache failed: {0}")]
    Cache(#[from] CacheError),
}

/// Errors that can occur when routing a stanza.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No route to the recipient.
    #[error("no route to {0}")]
    NoRoute(Address),

    /// The stanza has no recipient.
    #[error("stanza has no recipient")]
    MissingRecipient,

    /// Delivery failed downstream.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Errors reported by the roster collaborator.
#[derive(Debug, Error)]
pub enum RosterError {
    /// The roster owner does not exist.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Roster storage failed.
    #[error("roster unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur in the replicated cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A value could not be encoded for replication.
    #[error("encoding error: {0}")]
    Encode(String),

    /// A replicated value could not be decoded.
    #[error("decoding error: {0}")]
    Decode(String),
}

/// Errors raised by a cache entry listener.
///
/// Any listener error is fatal for that listener.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenerError {
    /// The event carried no value; the listener was registered with values suppressed.
    #[error(
        "event for {key} from {node} carried no value; this listener requires values and \
         cannot function when they are suppressed"
    )]
    MissingValue {
        /// Cache key of the event.
        key: Address,
        /// Node the mutation originated from.
        node: NodeId,
    },
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field failed validation.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors that can occur when parsing an address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The domain part is empty.
    #[error("address has an empty domain: {0:?}")]
    EmptyDomain(String),

    /// The node part is present but empty (`@domain`).
    #[error("address has an empty node part: {0:?}")]
    EmptyNode(String),

    /// The resource part is present but empty (`domain/`).
    #[error("address has an empty resource: {0:?}")]
    EmptyResource(String),

    /// The domain part contains an `@`.
    #[error("address has more than one node separator: {0:?}")]
    InvalidDomain(String),
}
