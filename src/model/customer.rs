use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// URI prefix of the platform's global customer identifiers.
pub const CUSTOMER_GID_PREFIX: &str = "gid://shopify/Customer/";

/// Normalized numeric customer identifier.
///
/// The ledger only ever sees this form. Both the bare numeric id and the
/// global-id URI are accepted by [`CustomerId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CustomerId(String);

impl CustomerId {
    pub fn parse(input: &str) -> Result<Self, LedgerError> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix(CUSTOMER_GID_PREFIX).unwrap_or(trimmed);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LedgerError::InvalidCustomerId(input.to_string()));
        }
        Ok(Self(digits.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Global-id URI form used by the GraphQL admin API.
    pub fn to_gid(&self) -> String {
        format!("{}{}", CUSTOMER_GID_PREFIX, self.0)
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CustomerId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CustomerId> for String {
    fn from(id: CustomerId) -> Self {
        id.0
    }
}

impl std::str::FromStr for CustomerId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A customer as named by a caller: an id in either format, or an email
/// address resolved through a [`crate::store::CustomerDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerRef {
    Id(CustomerId),
    Email(String),
}

impl std::str::FromStr for CustomerRef {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.contains('@') {
            return Ok(CustomerRef::Email(trimmed.to_string()));
        }
        CustomerId::parse(trimmed).map(CustomerRef::Id)
    }
}

impl fmt::Display for CustomerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomerRef::Id(id) => id.fmt(f),
            CustomerRef::Email(email) => f.write_str(email),
        }
    }
}
