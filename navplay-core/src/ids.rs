use std::fmt;

use thiserror::Error;

const MAX_ID_LEN: usize = 128;

/// An upstream-assigned song or cover-art id.
///
/// Opaque apart from a character check that keeps path and query syntax
/// out of upstream URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemId(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidItemId {
    #[error("id is empty")]
    Empty,
    #[error("id is longer than 128 bytes")]
    TooLong,
    #[error("id contains unsupported character {0:?}")]
    BadChar(char),
}

impl ItemId {
    pub fn parse(raw: &str) -> Result<Self, InvalidItemId> {
        if raw.is_empty() {
            return Err(InvalidItemId::Empty);
        }
        if raw.len() > MAX_ID_LEN {
            return Err(InvalidItemId::TooLong);
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
        {
            return Err(InvalidItemId::BadChar(c));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
