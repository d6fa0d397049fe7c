use crate::models::User;

/// A principal the authority can sign in.
#[derive(Debug, Clone)]
pub struct Principal {
    pub email: String,
    pub secret: String,
    pub name: String,
    pub role: String,
}

impl Principal {
    pub fn new(
        email: impl Into<String>,
        secret: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
            name: name.into(),
            role: role.into(),
        }
    }

    pub fn user(&self) -> User {
        User {
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrincipalRegistry {
    principals: Vec<Principal>,
}

impl Default for PrincipalRegistry {
    fn default() -> Self {
        Self::new(vec![
            Principal::new("demo@example.com", "password123", "Demo User", "user"),
            Principal::new("admin@example.com", "admin123", "Admin User", "admin"),
        ])
    }
}

impl PrincipalRegistry {
    pub fn new(principals: Vec<Principal>) -> Self {
        Self { principals }
    }

    pub fn find(&self, email: &str) -> Option<&Principal> {
        self.principals.iter().find(|p| p.email == email)
    }

    /// Look up a principal by identity and secret. Both must match.
    pub fn authenticate(&self, email: &str, secret: &str) -> Option<&Principal> {
        self.find(email).filter(|p| p.secret == secret)
    }
}
