use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Request header carrying the caller's e-mail address.
pub const CALLER_HEADER: &str = "x-census-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

impl Role {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "operator" => Some(Self::Operator),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Viewer => "viewer",
        }
    }

    /// Whether this role may perform `action`.
    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => true,
            Action::Write => matches!(self, Self::Admin | Self::Operator),
            Action::Delete => matches!(self, Self::Admin),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Read => "read records",
            Action::Write => "write records",
            Action::Delete => "delete rows",
        })
    }
}

/// Identity and capability of whoever issued an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub email: Option<String>,
    pub role: Role,
}

impl Caller {
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        Self {
            email: Some(email.into()),
            role,
        }
    }

    pub fn anonymous(role: Role) -> Self {
        Self { email: None, role }
    }

    /// Name used in history entries and logs.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or("anonymous")
    }

    pub fn authorize(&self, action: Action) -> StoreResult<()> {
        if self.role.allows(action) {
            Ok(())
        } else {
            Err(StoreError::Forbidden {
                role: self.role,
                action,
            })
        }
    }
}

/// Maps known e-mail addresses to roles; everyone else gets `default_role`.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    users: HashMap<String, Role>,
    default_role: Role,
}

impl AccessPolicy {
    pub fn new(users: HashMap<String, Role>, default_role: Role) -> Self {
        let users = users
            .into_iter()
            .map(|(email, role)| (email.trim().to_lowercase(), role))
            .collect();
        Self {
            users,
            default_role,
        }
    }

    /// Policy that grants every caller the same role.
    pub fn open(role: Role) -> Self {
        Self::new(HashMap::new(), role)
    }

    pub fn resolve(&self, email: Option<&str>) -> Caller {
        match email.map(str::trim).filter(|e| !e.is_empty()) {
            Some(email) => {
                let role = self
                    .users
                    .get(&email.to_lowercase())
                    .copied()
                    .unwrap_or(self.default_role);
                Caller::new(email, role)
            }
            None => Caller::anonymous(self.default_role),
        }
    }
}
