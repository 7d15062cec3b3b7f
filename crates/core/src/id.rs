//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Longest account address accepted by the external ledger.
pub const MAX_ACCOUNT_LEN: usize = 64;

/// Identifier of a ledger account (employer or employee address).
///
/// Addresses are opaque to this crate, but malformed ones are rejected up front:
/// they must be non-empty, at most [`MAX_ACCOUNT_LEN`] bytes and ASCII
/// alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_input("account address cannot be empty"));
        }
        if trimmed.len() > MAX_ACCOUNT_LEN {
            return Err(DomainError::invalid_input(format!(
                "account address longer than {MAX_ACCOUNT_LEN} characters"
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::invalid_input(format!(
                "account address '{trimmed}' contains non-alphanumeric characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for AccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.0
    }
}

/// Identifier of a wage stream, assigned by the ledger in creation order.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StreamId(u64);

impl StreamId {
    pub const FIRST: StreamId = StreamId(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The identifier assigned to the stream created after this one; `None`
    /// once the id space is used up.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

impl From<u64> for StreamId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for StreamId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("stream#").unwrap_or(s);
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|e| DomainError::invalid_input(format!("StreamId: {e}")))
    }
}
