use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authority::token::{self, Claims, TokenError};

/// Identity a credential was issued to (the principal's email).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque credential newtype. Debug output never includes the token text.
macro_rules! credential {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(token: impl Into<String>) -> Self {
                Self(token.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }

            /// Claims embedded in the token, integrity-checked but not
            /// expiry-checked.
            pub fn claims(&self) -> Result<Claims, TokenError> {
                token::decode(&self.0)
            }

            pub fn subject(&self) -> Option<Subject> {
                self.claims().ok().map(|c| Subject::new(c.sub))
            }

            pub fn expires_at(&self) -> Option<DateTime<Utc>> {
                self.claims().ok().and_then(|c| c.expires_at())
            }

            /// True only when the embedded expiry is readable and in the past.
            /// Unreadable tokens are left for the server to reject.
            pub fn is_expired(&self) -> bool {
                self.claims()
                    .map(|c| c.is_expired_at(Utc::now().timestamp_millis()))
                    .unwrap_or(false)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(<{} bytes>)", stringify!($name), self.0.len())
            }
        }
    };
}

credential!(
    /// Short-lived bearer token attached to authenticated requests.
    AccessCredential
);

credential!(
    /// Long-lived token used only to mint new access credentials.
    RefreshCredential
);
