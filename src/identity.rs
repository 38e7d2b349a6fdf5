//! Owner identities.
//!
//! Identity issuance lives outside this crate. Callers pass an explicit
//! [`CallerIdentity`] into every dispatch, and owners are looked up through
//! an [`OwnerDirectory`].

use crate::model::OwnerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An identity that can own mocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Owner {
    pub id: OwnerId,
    pub username: String,
    /// Request budget for this owner's rate-limit bucket
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
}

/// Who is making the current call, as established by the auth layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CallerIdentity {
    #[default]
    Anonymous,
    /// Authenticated username
    User(String),
}

impl CallerIdentity {
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::User(name) => Some(name.as_str()),
        }
    }
}

/// Lookup of owners by username.
pub trait OwnerDirectory: Send + Sync {
    fn find_by_username(&self, username: &str) -> Option<Owner>;
}

/// Fixed set of owners, usually loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticOwnerDirectory {
    by_username: HashMap<String, Owner>,
}

impl StaticOwnerDirectory {
    pub fn new(owners: impl IntoIterator<Item = Owner>) -> Self {
        let by_username = owners
            .into_iter()
            .map(|owner| (owner.username.clone(), owner))
            .collect();
        Self { by_username }
    }

    pub fn len(&self) -> usize {
        self.by_username.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_username.is_empty()
    }
}

impl OwnerDirectory for StaticOwnerDirectory {
    fn find_by_username(&self, username: &str) -> Option<Owner> {
        self.by_username.get(username).cloned()
    }
}
