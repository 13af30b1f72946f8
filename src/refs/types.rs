//! Branch names, users and sessions.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::storage::InvalidNameError;

/// A validated branch name.
///
/// Branch names are free text ("publish 2017-10-21", "Electrical Review")
/// but cannot be empty, padded with whitespace, or contain control
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    const MAX_LEN: usize = 255;

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();

        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        if name.trim() != name {
            return Err(InvalidNameError::Untrimmed(name));
        }
        if let Some((position, c)) = name.chars().enumerate().find(|(_, c)| c.is_control()) {
            return Err(InvalidNameError::InvalidCharacter { char: c, position });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Ord and Eq are derived from the inner string, so map lookups by `&str` agree.
impl Borrow<str> for BranchName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl PartialEq<str> for BranchName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for BranchName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Opaque reference to whoever makes a change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef(String);

impl UserRef {
    pub fn new(user: impl Into<String>) -> Self {
        Self(user.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserRef {
    fn from(user: &str) -> Self {
        Self::new(user)
    }
}

impl From<String> for UserRef {
    fn from(user: String) -> Self {
        Self(user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Ulid);

impl SessionId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who is acting, passed explicitly to every engine operation.
///
/// Each session is pinned to exactly one current branch inside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    user: UserRef,
}

impl Session {
    pub(crate) fn new(user: UserRef) -> Self {
        Self {
            id: SessionId::generate(),
            user,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> &UserRef {
        &self.user
    }
}
