//! Decoding of JSON-encoded columns.
//!
//! Stage lists, backstory threads, secrets and requirement params are stored
//! as serialized JSON text. They are decoded exactly once, at the storage
//! boundary, into typed records. A corrupt blob never aborts a load: it
//! decodes to [`Decoded::Fallback`], which yields `T::default()` (an empty
//! list or map), and the caller logs the fault.

use serde::de::DeserializeOwned;

/// Outcome of decoding a stored JSON blob.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// The blob decoded into the expected shape.
    Parsed(T),
    /// The blob was missing or malformed; carries the decode error message.
    Fallback(String),
}

impl<T: DeserializeOwned> Decoded<T> {
    /// Decode `text`. `None`, empty and whitespace-only input decode to
    /// `Fallback` as well, so a NULL column behaves like a corrupt one.
    pub fn from_json(text: Option<&str>) -> Self {
        match text.map(str::trim) {
            None | Some("") => Decoded::Fallback("empty column".to_string()),
            Some(text) => match serde_json::from_str(text) {
                Ok(value) => Decoded::Parsed(value),
                Err(e) => Decoded::Fallback(e.to_string()),
            },
        }
    }
}

impl<T: Default> Decoded<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Decoded::Fallback(_))
    }

    /// The decoded value, or the empty structure on fallback.
    pub fn into_inner(self) -> T {
        match self {
            Decoded::Parsed(value) => value,
            Decoded::Fallback(_) => T::default(),
        }
    }

    /// Like [`into_inner`](Self::into_inner), logging a warning when falling
    /// back. `what` names the column for the log line.
    pub fn or_empty(self, what: &str, owner: &str) -> T {
        if let Decoded::Fallback(reason) = &self {
            tracing::warn!(
                column = what,
                owner = owner,
                reason = %reason,
                "Corrupt JSON column, substituting empty value"
            );
        }
        self.into_inner()
    }
}
