//! Endpoint — a contactable URI for one instance of a service.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

/// A parsed, absolute URI identifying one service instance.
///
/// Identity is the literal announced string: two announcements carrying the
/// same text are the same endpoint. The parsed form is kept alongside for
/// callers that want scheme/host/port, but it plays no part in equality
/// (`Url` normalises, e.g. appends a trailing `/`).
#[derive(Clone)]
pub struct Endpoint {
    literal: String,
    url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid URI {uri:?}: {reason}")]
    Invalid { uri: String, reason: url::ParseError },
    #[error("invalid URI {uri:?}: {reason}")]
    Syntax { uri: String, reason: &'static str },
}

impl Endpoint {
    /// Parse an absolute URI. Relative references are rejected.
    ///
    /// The literal must be RFC 3986 text before `Url` sees it: `Url`
    /// follows the WHATWG rules, which quietly trim, escape or rewrite
    /// input, and the literal is what gives an endpoint its identity.
    pub fn parse(uri: &str) -> Result<Self, EndpointError> {
        check_rfc3986(uri).map_err(|reason| EndpointError::Syntax {
            uri: uri.to_string(),
            reason,
        })?;

        let url = Url::parse(uri).map_err(|reason| EndpointError::Invalid {
            uri: uri.to_string(),
            reason,
        })?;
        // `http:host` parses as `http://host/`; the literal must spell
        // the authority out if the parsed form has one.
        if url.has_host() && !uri[url.scheme().len() + 1..].starts_with("//") {
            return Err(EndpointError::Syntax {
                uri: uri.to_string(),
                reason: "authority without //",
            });
        }

        Ok(Self {
            literal: uri.to_string(),
            url,
        })
    }

    /// The URI exactly as announced.
    pub fn as_str(&self) -> &str {
        &self.literal
    }

    /// The parsed URI.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Character-level RFC 3986 check: a scheme, then only unreserved,
/// reserved and well-formed percent-encoded characters.
fn check_rfc3986(uri: &str) -> Result<(), &'static str> {
    let (scheme, _) = uri.split_once(':').ok_or("missing scheme")?;
    let mut chars = scheme.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err("scheme must start with a letter");
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return Err("invalid character in scheme");
    }

    let bytes = uri.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3).ok_or("truncated percent-encoding")?;
                if !hex.iter().all(u8::is_ascii_hexdigit) {
                    return Err("invalid percent-encoding");
                }
                i += 3;
                continue;
            }
            b if b.is_ascii_alphanumeric() => {}
            // unreserved
            b'-' | b'.' | b'_' | b'~' => {}
            // gen-delims
            b':' | b'/' | b'?' | b'#' | b'[' | b']' | b'@' => {}
            // sub-delims
            b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' => {}
            _ => return Err("character not allowed in a URI"),
        }
        i += 1;
    }
    Ok(())
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.literal == other.literal
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.literal.hash(state);
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.literal.cmp(&other.literal)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Endpoint").field(&self.literal).finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.literal)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
