//! Entities returned by the platform.
//!
//! Only the fields the reports need are kept. REST payloads use the platform's snake_case
//! field names, graph payloads are mapped from camelCase.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// An organization that belongs to the enterprise.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl core::fmt::Display for Organization {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.login)
    }
}

/// A user account that holds an enterprise seat.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnterpriseUser {
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl core::fmt::Display for EnterpriseUser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.login)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub language: Option<String>,

    /// Size in kilobytes.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
}

impl Repository {
    /// Visibility as reported, falling back to the `private` flag for older servers.
    #[must_use]
    pub fn visibility(&self) -> &str {
        match &self.visibility {
            Some(v) => v,
            None if self.private => "private",
            None => "public",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TeamRef {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Team {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub privacy: Option<String>,

    /// Only present when listing the teams of a repository.
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub parent: Option<TeamRef>,
}

/// An organization or team member.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Member {
    pub login: String,
}

/// A user with direct access to a repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Collaborator {
    pub login: String,
    #[serde(default)]
    pub role_name: Option<String>,
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

impl Collaborator {
    /// The effective permission, preferring the named role.
    #[must_use]
    pub fn permission(&self) -> &str {
        if let Some(role) = &self.role_name {
            return role;
        }

        self.permissions.as_ref().map_or("unknown", Permissions::highest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[expect(clippy::struct_excessive_bools, reason = "mirrors the platform's permission flags")]
pub struct Permissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub maintain: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub triage: bool,
    #[serde(default)]
    pub pull: bool,
}

impl Permissions {
    #[must_use]
    pub const fn highest(&self) -> &'static str {
        if self.admin {
            "admin"
        } else if self.maintain {
            "maintain"
        } else if self.push {
            "write"
        } else if self.triage {
            "triage"
        } else if self.pull {
            "read"
        } else {
            "none"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomProperty {
    pub property_name: String,
    #[serde(default)]
    pub value: Option<PropertyValue>,
}

/// A custom property holds either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Single(String),
    Multiple(Vec<String>),
}

impl core::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Single(value) => f.write_str(value),
            Self::Multiple(values) => f.write_str(&values.join("|")),
        }
    }
}

/// An identity-provider group linked to a team.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExternalGroup {
    pub group_id: u64,
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuditLogEntry {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,

    /// Milliseconds since the Unix epoch.
    #[serde(rename = "@timestamp")]
    pub timestamp: i64,
}

impl AuditLogEntry {
    #[must_use]
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}
