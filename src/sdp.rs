//! SDP session descriptions
//!
//! Only what the announcement engine needs: the session identity and a few
//! fields. The description is kept verbatim; two descriptions are equal
//! when their text is byte-identical.
//!
//! The identity follows RFC 4566 §5.2: `<username> <sess-id> <nettype>
//! <addrtype> <unicast-address>` from the origin line, so that a new
//! `<sess-version>` of the same session keeps its id.
//!
//! ```text
//! o=- 1311738121 1311738121 IN IP4 192.168.1.1
//!   │      │         │       │  │      │
//!   │      │         └ skip  │  │      │
//!   └──────┴─────────────────┴──┴──────┴──► "- 1311738121 IN IP4 192.168.1.1"
//! ```

use std::fmt;
use std::net::IpAddr;

use crate::error::SdpError;

/// MIME type of SDP payloads in SAP packets
pub const SDP_MIME_TYPE: &str = "application/sdp";

/// A parsed session description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sdp {
    raw: String,
    id: String,
}

impl Sdp {
    /// Parse a session description
    ///
    /// Fails if there is not exactly one well formed origin (`o=`) line.
    pub fn parse(raw: impl Into<String>) -> Result<Self, SdpError> {
        let raw = raw.into();
        let origin = field(&raw, 'o')?;

        let parts: Vec<&str> = origin.split(' ').collect();
        let &[username, session_id, _version, nettype, addrtype, addr] = parts.as_slice() else {
            return Err(SdpError::MalformedOrigin);
        };
        let id = [username, session_id, nettype, addrtype, addr].join(" ");

        Ok(Self { raw, id })
    }

    /// Parse a session description from packet payload bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SdpError> {
        let text = std::str::from_utf8(bytes).map_err(|_| SdpError::InvalidEncoding)?;
        Self::parse(text)
    }

    /// Globally unique session identity
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The full text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }

    /// Value of the origin (`o=`) line
    pub fn origin(&self) -> &str {
        // Checked in `parse`
        field(&self.raw, 'o').unwrap_or_default()
    }

    /// Unicast address of the originating host
    ///
    /// `None` if the origin carries a hostname rather than an address.
    pub fn origin_addr(&self) -> Option<IpAddr> {
        self.origin().rsplit(' ').next()?.parse().ok()
    }

    /// Session name (`s=`)
    pub fn name(&self) -> Result<&str, SdpError> {
        self.field('s')
    }

    /// Session-level connection data (`c=`)
    pub fn connection(&self) -> Result<&str, SdpError> {
        self.field('c')
    }

    /// Reference clock (`a=ts-refclk:`), RFC 7273
    pub fn clock_reference(&self) -> Option<&str> {
        self.attribute("ts-refclk")
    }

    /// Value of the first `a=<name>:<value>` attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.fields('a').find_map(|attr| {
            let (key, value) = attr.split_once(':')?;
            (key == name).then_some(value)
        })
    }

    /// Values of every line of type `c`, in order
    pub fn fields(&self, c: char) -> impl Iterator<Item = &str> + '_ {
        fields(&self.raw, c)
    }

    /// Value of the single line of type `c`
    pub fn field(&self, c: char) -> Result<&str, SdpError> {
        field(&self.raw, c)
    }
}

fn fields(raw: &str, c: char) -> impl Iterator<Item = &str> + '_ {
    raw.lines().filter_map(move |line| {
        let (ty, value) = line.split_once('=')?;
        let mut chars = ty.chars();
        (chars.next() == Some(c) && chars.next().is_none()).then_some(value)
    })
}

fn field(raw: &str, c: char) -> Result<&str, SdpError> {
    let mut values = fields(raw, c);
    let value = values.next().ok_or(SdpError::FieldNotFound(c))?;
    if values.next().is_some() {
        return Err(SdpError::FieldNotUnique(c));
    }
    Ok(value)
}

impl fmt::Display for Sdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for Sdp {
    type Err = SdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
