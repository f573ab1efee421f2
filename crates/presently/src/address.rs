//! Entity addresses and cluster node identifiers.

use crate::error::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address of a messaging entity: `[node@]domain[/resource]`.
///
/// A *bare* address identifies an account (or a service); a *full* address
/// also names one connected resource of it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Address {
    /// Create an address from its parts.
    pub fn new(node: Option<&str>, domain: &str, resource: Option<&str>) -> Self {
        Self {
            node: node.map(str::to_string),
            domain: domain.to_ascii_lowercase(),
            resource: resource.map(str::to_string),
        }
    }

    /// Create a domain-only address (a server or a component).
    pub fn domain(domain: &str) -> Self {
        Self {
            node: None,
            domain: domain.to_ascii_lowercase(),
            resource: None,
        }
    }

    /// The account part, if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// The domain part.
    pub fn domain_part(&self) -> &str {
        &self.domain
    }

    /// The resource part, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Returns `true` if this address has no resource.
    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// The bare form of this address.
    pub fn to_bare(&self) -> Address {
        Self {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Returns `true` if both addresses share the same bare form.
    pub fn same_bare(&self, other: &Address) -> bool {
        self.node == other.node && self.domain == other.domain
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, resource) = match s.split_once('/') {
            Some((_, "")) => return Err(AddressError::EmptyResource(s.to_string())),
            Some((rest, resource)) => (rest, Some(resource.to_string())),
            None => (s, None),
        };
        let (node, domain) = match rest.split_once('@') {
            Some(("", _)) => return Err(AddressError::EmptyNode(s.to_string())),
            Some((node, domain)) => (Some(node.to_string()), domain),
            None => (None, rest),
        };
        if domain.is_empty() {
            return Err(AddressError::EmptyDomain(s.to_string()));
        }
        if domain.contains('@') {
            return Err(AddressError::InvalidDomain(s.to_string()));
        }
        Ok(Self {
            node,
            domain: domain.to_ascii_lowercase(),
            resource,
        })
    }
}

impl TryFrom<&str> for Address {
    type Error = AddressError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(f, "{}@", node)?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// Identifier of a cluster node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
