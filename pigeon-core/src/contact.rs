//! Endpoints and contacts.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::identity::PublicKey;

/// Longest accepted contact name, in characters.
pub const MAX_NAME_LEN: usize = 32;

/// Network address and UDP port. Equality is structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Endpoint(SocketAddr::new(ip, port))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint(addr)
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<SocketAddr>().map(Endpoint)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier-like characters only: letters, digits, `_` and `$`.
pub fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Check a contact name: 1 to 32 characters, all identifier-like.
pub fn validate_name(name: &str) -> Result<(), ContactError> {
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(ContactError::NameLength(len));
    }
    if let Some(c) = name.chars().find(|c| !is_name_char(*c)) {
        return Err(ContactError::NameChar(c));
    }
    Ok(())
}

/// Identity record: name, public key and the endpoints where the person may be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    name: String,
    public_key: PublicKey,
    endpoints: Vec<Endpoint>,
}

impl Contact {
    pub fn new(
        name: impl Into<String>,
        public_key: PublicKey,
        endpoint: Endpoint,
    ) -> Result<Self, ContactError> {
        Self::with_endpoints(name, public_key, [endpoint])
    }

    /// Build from several endpoints; duplicates are dropped, at least one is required.
    pub fn with_endpoints(
        name: impl Into<String>,
        public_key: PublicKey,
        endpoints: impl IntoIterator<Item = Endpoint>,
    ) -> Result<Self, ContactError> {
        let name = name.into();
        validate_name(&name)?;
        let mut contact = Contact {
            name,
            public_key,
            endpoints: Vec::new(),
        };
        for e in endpoints {
            contact.add_endpoint(e);
        }
        if contact.endpoints.is_empty() {
            return Err(ContactError::NoEndpoints);
        }
        Ok(contact)
    }

    /// Add an endpoint; already-known endpoints are ignored.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        if !self.endpoints.contains(&endpoint) {
            self.endpoints.push(endpoint);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// First recorded endpoint; used for one-to-one replies.
    pub fn primary_endpoint(&self) -> Endpoint {
        self.endpoints[0]
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n/{}", self.name, self.public_key.to_hex())?;
        for e in &self.endpoints {
            write!(f, "\n@{}", e)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContactError {
    #[error("illegal name length {0}")]
    NameLength(usize),
    #[error("character {0:?} not allowed in a name")]
    NameChar(char),
    #[error("contact has no endpoints")]
    NoEndpoints,
}
