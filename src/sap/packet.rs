//! SAP packet codec (RFC 2974 §6)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | V=1 |A|R|T|E|C|   auth len    |         msg id hash           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! :                originating source (32 or 128 bits)            :
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    optional authentication data               |
//! :                              ....                             :
//! *-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*-*
//! |                      optional payload type                    |
//! +                                         +-+- - - - - - - - - -+
//! |                                         |0|                   |
//! + - - - - - - - - - - - - - - - - - - - - +-+                   |
//! |                                                               |
//! :                            payload                            :
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Only IPv4 sources, cleartext and uncompressed payloads are supported.
//! The payload type is always present and NUL terminated.

use std::net::{IpAddr, Ipv4Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Feature, ProtocolError, SdpError};
use crate::sdp::{Sdp, SDP_MIME_TYPE};

use super::constants::*;

/// A SAP announcement or deletion packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Originating source address
    pub source: IpAddr,
    /// Authentication data, a multiple of 4 bytes
    pub auth: Option<Bytes>,
    /// Message identification hash
    pub hash: u16,
    /// MIME type of the payload
    pub payload_type: String,
    pub payload: Bytes,
    /// Session deletion rather than announcement
    pub deletion: bool,
}

impl Packet {
    /// Announcement of `sdp`
    pub fn announcement(source: IpAddr, hash: u16, sdp: &Sdp) -> Self {
        Self {
            source,
            auth: None,
            hash,
            payload_type: SDP_MIME_TYPE.to_string(),
            payload: Bytes::copy_from_slice(sdp.as_bytes()),
            deletion: false,
        }
    }

    /// Deletion of a previously announced `sdp`
    pub fn retraction(source: IpAddr, hash: u16, sdp: &Sdp) -> Self {
        Self {
            deletion: true,
            ..Self::announcement(source, hash, sdp)
        }
    }

    pub fn is_announcement(&self) -> bool {
        !self.deletion
    }

    pub fn has_sdp_payload(&self) -> bool {
        self.payload_type == SDP_MIME_TYPE
    }

    /// Parse the payload as SDP
    pub fn sdp(&self) -> Result<Sdp, SdpError> {
        if !self.has_sdp_payload() {
            return Err(SdpError::NotSdp(self.payload_type.clone()));
        }
        Sdp::from_bytes(&self.payload)
    }

    /// Size of the encoded packet
    pub fn encoded_len(&self) -> usize {
        let addr_len = match self.source {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 16,
        };
        FIXED_HEADER_SIZE
            + addr_len
            + self.auth.as_ref().map_or(0, |a| a.len())
            + self.payload_type.len()
            + 1
            + self.payload.len()
    }

    /// Encode to wire format
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let IpAddr::V4(source) = self.source else {
            return Err(ProtocolError::UnsupportedFeature(Feature::Ipv6));
        };

        let auth = self.auth.as_ref().filter(|a| !a.is_empty());
        let auth_len = auth.map_or(0, |a| a.len());
        if auth_len % 4 != 0 || auth_len > MAX_AUTH_LEN {
            return Err(ProtocolError::InvalidAuthLength(auth_len));
        }
        if !self.payload_type.is_ascii() || self.payload_type.contains('\0') {
            return Err(ProtocolError::InvalidPayloadType);
        }

        let mut flags = SAP_VERSION << 5;
        if self.deletion {
            flags |= FLAG_MESSAGE_TYPE;
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(flags);
        buf.put_u8((auth_len / 4) as u8);
        buf.put_u16(self.hash);
        buf.put_slice(&source.octets());
        if let Some(auth) = auth {
            buf.put_slice(auth);
        }
        buf.put_slice(self.payload_type.as_bytes());
        buf.put_u8(0);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Decode from wire format
    pub fn decode(mut buf: Bytes) -> Result<Self, ProtocolError> {
        if buf.remaining() < FIXED_HEADER_SIZE {
            return Err(ProtocolError::Truncated);
        }

        let flags = buf.get_u8();
        let version = flags >> 5;
        if version != SAP_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        if flags & FLAG_ADDRESS_TYPE != 0 {
            return Err(ProtocolError::UnsupportedFeature(Feature::Ipv6));
        }
        if flags & FLAG_ENCRYPTED != 0 {
            return Err(ProtocolError::UnsupportedFeature(Feature::Encryption));
        }
        if flags & FLAG_COMPRESSED != 0 {
            return Err(ProtocolError::UnsupportedFeature(Feature::Compression));
        }

        let auth_len = buf.get_u8() as usize * 4;
        let hash = buf.get_u16();

        if buf.remaining() < 4 + auth_len {
            return Err(ProtocolError::Truncated);
        }
        let source = Ipv4Addr::from(buf.get_u32());
        let auth = (auth_len > 0).then(|| buf.split_to(auth_len));

        let nul = buf
            .iter()
            .position(|b| *b == 0)
            .ok_or(ProtocolError::MissingPayloadType)?;
        let payload_type = buf.split_to(nul);
        buf.advance(1);

        if !payload_type.is_ascii() {
            return Err(ProtocolError::InvalidPayloadType);
        }
        let payload_type = String::from_utf8(payload_type.to_vec())
            .map_err(|_| ProtocolError::InvalidPayloadType)?;

        Ok(Self {
            source: source.into(),
            auth,
            hash,
            payload_type,
            payload: buf,
            deletion: flags & FLAG_MESSAGE_TYPE != 0,
        })
    }
}
