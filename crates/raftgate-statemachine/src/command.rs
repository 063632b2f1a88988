//! Log entry and query codec.
//!
//! Both the gateway (encoding) and every replica (decoding) go through this
//! module, so the byte format is defined in one place and stays identical
//! across replicas.

use crate::{Result, StateMachineError};
use bytes::Bytes;
use std::fmt;

/// Verb carried in a log entry header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verb {
    Post,
    Put,
    Patch,
    Delete,
    /// Any other verb, kept verbatim so the entry re-encodes to the same bytes.
    Other(String),
}

/// What applying an entry does to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Increment the counter by one.
    Increment,
    /// Remove the counter.
    Delete,
    /// Not a recognized mutation.
    Unknown,
}

impl Verb {
    /// Parses a verb from its wire form. Never fails: unrecognized verbs
    /// become [`Verb::Other`].
    pub fn parse(s: &str) -> Self {
        match s {
            "POST" => Verb::Post,
            "PUT" => Verb::Put,
            "PATCH" => Verb::Patch,
            "DELETE" => Verb::Delete,
            other => Verb::Other(other.to_string()),
        }
    }

    /// Returns the wire form of the verb.
    pub fn as_str(&self) -> &str {
        match self {
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
            Verb::Other(s) => s,
        }
    }

    /// Maps the verb onto the operation it performs.
    pub fn operation(&self) -> Operation {
        match self {
            Verb::Post | Verb::Put | Verb::Patch => Operation::Increment,
            Verb::Delete => Operation::Delete,
            Verb::Other(_) => Operation::Unknown,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation submitted to the replicated log.
///
/// Encoded as `"<VERB> <KEY>\n<BODY>"`; the newline and body are omitted
/// when the body is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub key: String,
    pub body: Bytes,
}

impl Command {
    /// Creates a command with an empty body.
    pub fn new(verb: Verb, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if verb.as_str().is_empty() || verb.as_str().contains([' ', '\n']) {
            return Err(StateMachineError::InvalidEntrySyntax(format!(
                "invalid verb: {:?}",
                verb.as_str()
            )));
        }
        validate_key(&key).map_err(StateMachineError::InvalidEntrySyntax)?;

        Ok(Self {
            verb,
            key,
            body: Bytes::new(),
        })
    }

    /// Attaches a body to the command.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Encodes the command into log entry bytes.
    pub fn encode(&self) -> Vec<u8> {
        let verb = self.verb.as_str();
        let mut out = Vec::with_capacity(verb.len() + self.key.len() + self.body.len() + 2);
        out.extend_from_slice(verb.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.key.as_bytes());
        if !self.body.is_empty() {
            out.push(b'\n');
            out.extend_from_slice(&self.body);
        }
        out
    }

    /// Decodes log entry bytes.
    ///
    /// Fails with [`StateMachineError::InvalidEntrySyntax`] when the header
    /// line cannot be split into a verb and a key.
    pub fn decode(entry: &[u8]) -> Result<Self> {
        let (header, body) = match entry.iter().position(|&b| b == b'\n') {
            Some(pos) => (&entry[..pos], &entry[pos + 1..]),
            None => (entry, &[][..]),
        };

        let header = std::str::from_utf8(header).map_err(|_| {
            StateMachineError::InvalidEntrySyntax("header is not valid UTF-8".into())
        })?;
        let (verb, key) = header.split_once(' ').ok_or_else(|| {
            StateMachineError::InvalidEntrySyntax(format!("missing key in header {:?}", header))
        })?;
        if verb.is_empty() {
            return Err(StateMachineError::InvalidEntrySyntax("empty verb".into()));
        }
        validate_key(key).map_err(StateMachineError::InvalidEntrySyntax)?;

        Ok(Self {
            verb: Verb::parse(verb),
            key: key.to_string(),
            body: Bytes::copy_from_slice(body),
        })
    }
}

/// A read of a single key, encoded as `"GET <KEY>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadQuery {
    pub key: String,
}

impl ReadQuery {
    const VERB: &'static str = "GET";

    /// Creates a query for `key`.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_key(&key).map_err(StateMachineError::InvalidQuerySyntax)?;
        Ok(Self { key })
    }

    /// Encodes the query into bytes.
    pub fn encode(&self) -> Vec<u8> {
        format!("{} {}", Self::VERB, self.key).into_bytes()
    }

    /// Decodes query bytes, failing with
    /// [`StateMachineError::InvalidQuerySyntax`] unless they read
    /// `GET <key>` with a non-empty key.
    pub fn decode(query: &[u8]) -> Result<Self> {
        let query = std::str::from_utf8(query).map_err(|_| {
            StateMachineError::InvalidQuerySyntax("query is not valid UTF-8".into())
        })?;
        match query.split_once(' ') {
            Some((Self::VERB, key)) => {
                validate_key(key).map_err(StateMachineError::InvalidQuerySyntax)?;
                Ok(Self {
                    key: key.to_string(),
                })
            }
            Some((verb, _)) => Err(StateMachineError::InvalidQuerySyntax(format!(
                "unsupported query verb {:?}",
                verb
            ))),
            None => Err(StateMachineError::InvalidQuerySyntax(format!(
                "missing key in query {:?}",
                query
            ))),
        }
    }
}

fn validate_key(key: &str) -> std::result::Result<(), String> {
    if key.is_empty() {
        return Err("missing key".into());
    }
    if key.contains('\n') {
        return Err("key contains a newline".into());
    }
    Ok(())
}
