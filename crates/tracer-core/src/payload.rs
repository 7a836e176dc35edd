//! Propagation payload: the record a parent leaves on a child so that the
//! child binds to the same controller with the same elevation policy.
//!
//! Format: `"<controller_id> <flag>"`, UTF-8, single line, where flag `1`
//! means elevation allowed and `0` disallowed.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Upper bound of an encoded payload, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("empty payload")]
    Empty,
    #[error("payload of {0} bytes exceeds {MAX_PAYLOAD_LEN}")]
    TooLong(usize),
    #[error("payload is not valid utf-8")]
    NotUtf8,
    #[error("payload must contain a single separator: {0:?}")]
    BadSeparator(String),
    #[error("invalid controller id {0:?}")]
    InvalidControllerId(String),
    #[error("invalid elevation flag {0:?}")]
    InvalidFlag(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationPayload {
    pub controller_id: u32,
    pub elevation_allowed: bool,
}

impl PropagationPayload {
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parses a received payload.
    ///
    /// Trailing NUL bytes and whitespace are ignored. A payload carrying only
    /// the controller id allows elevation.
    pub fn parse(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() > MAX_PAYLOAD_LEN {
            return Err(PayloadError::TooLong(bytes.len()));
        }
        let text = std::str::from_utf8(bytes).map_err(|_| PayloadError::NotUtf8)?;
        text.parse()
    }
}

impl fmt::Display for PropagationPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = if self.elevation_allowed { '1' } else { '0' };
        write!(f, "{} {flag}", self.controller_id)
    }
}

impl FromStr for PropagationPayload {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
        if text.is_empty() {
            return Err(PayloadError::Empty);
        }

        let mut fields = text.split(' ');
        let id = fields.next().unwrap_or_default();
        let flag = fields.next();
        if fields.next().is_some() {
            return Err(PayloadError::BadSeparator(text.to_string()));
        }

        let controller_id = match id.parse::<u32>() {
            Ok(0) | Err(_) => return Err(PayloadError::InvalidControllerId(id.to_string())),
            Ok(id) => id,
        };
        let elevation_allowed = match flag {
            None | Some("1") => true,
            Some("0") => false,
            Some(other) => return Err(PayloadError::InvalidFlag(other.to_string())),
        };

        Ok(Self {
            controller_id,
            elevation_allowed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_canonical() {
        let payload = PropagationPayload {
            controller_id: 4242,
            elevation_allowed: true,
        };
        assert_eq!(payload.encode(), b"4242 1");
        let payload = PropagationPayload {
            controller_id: 4242,
            elevation_allowed: false,
        };
        assert_eq!(payload.encode(), b"4242 0");
        assert_eq!(PropagationPayload::parse(&payload.encode()), Ok(payload));
    }

    #[test]
    fn longest_payload_fits() {
        let payload = PropagationPayload {
            controller_id: u32::MAX,
            elevation_allowed: false,
        };
        assert!(payload.encode().len() <= MAX_PAYLOAD_LEN);
    }

    #[test]
    fn parse_tolerates_c_string_terminator() {
        assert_eq!(
            PropagationPayload::parse(b"4242 0\0\0"),
            Ok(PropagationPayload {
                controller_id: 4242,
                elevation_allowed: false,
            })
        );
        assert_eq!(
            PropagationPayload::parse(b"17 1\r\n"),
            Ok(PropagationPayload {
                controller_id: 17,
                elevation_allowed: true,
            })
        );
    }

    #[test]
    fn id_only_allows_elevation() {
        assert_eq!(
            PropagationPayload::parse(b"4242"),
            Ok(PropagationPayload {
                controller_id: 4242,
                elevation_allowed: true,
            })
        );
    }

    #[test]
    fn malformed_payloads() {
        assert_eq!(PropagationPayload::parse(b""), Err(PayloadError::Empty));
        assert_eq!(PropagationPayload::parse(b"\0\0"), Err(PayloadError::Empty));
        assert_eq!(
            PropagationPayload::parse(&[b'1'; 33]),
            Err(PayloadError::TooLong(33))
        );
        assert_eq!(
            PropagationPayload::parse(&[0xff, 0xfe]),
            Err(PayloadError::NotUtf8)
        );
        assert_eq!(
            PropagationPayload::parse(b"4242 1 1"),
            Err(PayloadError::BadSeparator("4242 1 1".to_string()))
        );
        assert_eq!(
            PropagationPayload::parse(b"0 1"),
            Err(PayloadError::InvalidControllerId("0".to_string()))
        );
        assert_eq!(
            PropagationPayload::parse(b"abc 1"),
            Err(PayloadError::InvalidControllerId("abc".to_string()))
        );
        assert_eq!(
            PropagationPayload::parse(b"4242 yes"),
            Err(PayloadError::InvalidFlag("yes".to_string()))
        );
    }
}
