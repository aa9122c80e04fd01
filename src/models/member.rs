//! Participant roles
//!
//! Conversations know two roles. The group creator is the admin and only an
//! admin may add users; everyone else is a member. 1:1 participants are members.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::UserId;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    #[default]
    Member = 0,
    Admin = 1,
}

impl MemberRole {
    /// Parse role from database string
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Self::Member),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }

    /// Whether this role may add users to a group
    pub fn is_privileged(&self) -> bool {
        *self >= MemberRole::Admin
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

impl std::str::FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(s).ok_or_else(|| format!("Invalid role: {}", s))
    }
}

/// Row of the participant listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: MemberRole,
}
