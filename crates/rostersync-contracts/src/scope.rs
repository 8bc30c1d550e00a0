//! Credential scope types used by the permission probe.
//!
//! A run needs a fixed set of scopes. The probe confirms each one with a
//! read or no-op call and collects the confirmed ones in a `ScopeSet`.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One permission the credential must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    UsersRead,
    GroupsRead,
    CustomFieldsRead,
    /// Manage user groups; probed with an idempotent membership re-assert.
    GroupsWrite,
}

impl Scope {
    /// Scopes every run requires.
    pub const REQUIRED: [Scope; 4] = [
        Scope::UsersRead,
        Scope::GroupsRead,
        Scope::CustomFieldsRead,
        Scope::GroupsWrite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::UsersRead => "users:read",
            Scope::GroupsRead => "groups:read",
            Scope::CustomFieldsRead => "custom-fields:read",
            Scope::GroupsWrite => "groups:write",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The scopes a probe has confirmed.
#[derive(Debug, Clone, Default)]
pub struct ScopeSet {
    inner: HashSet<Scope>,
}

impl ScopeSet {
    pub fn grant(&mut self, scope: Scope) {
        self.inner.insert(scope);
    }

    pub fn has(&self, scope: Scope) -> bool {
        self.inner.contains(&scope)
    }

    pub fn all(&self) -> impl Iterator<Item = &Scope> {
        self.inner.iter()
    }

    /// The members of `required` this set lacks, in the order given.
    pub fn missing(&self, required: &[Scope]) -> Vec<Scope> {
        required
            .iter()
            .copied()
            .filter(|s| !self.has(*s))
            .collect()
    }
}
