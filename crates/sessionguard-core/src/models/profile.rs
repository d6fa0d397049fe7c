use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of the signed-in principal returned by login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub email: String,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email: String,
    pub name: String,
    pub role: String,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub last_login: DateTime<Utc>,
}

impl Profile {
    pub fn user(&self) -> User {
        User {
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
        }
    }

    /// Name for greeting text, falling back when the account has none.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "User"
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ProtectedData {
    pub message: String,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub timestamp: DateTime<Utc>,
    pub items: Vec<String>,
}
