use serde::{Deserialize, Serialize};

use super::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UserSummary {
    /// Name shown in 1:1 conversation lists: the user's name, else the email.
    pub fn display_name(&self) -> Option<String> {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.email.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user = UserSummary {
            id: 1,
            name: None,
            email: Some("a@example.com".into()),
        };
        assert_eq!(user.display_name().as_deref(), Some("a@example.com"));

        let named = UserSummary {
            name: Some("Ann".into()),
            ..user.clone()
        };
        assert_eq!(named.display_name().as_deref(), Some("Ann"));

        let blank = UserSummary {
            name: Some(String::new()),
            ..user
        };
        assert_eq!(blank.display_name().as_deref(), Some("a@example.com"));
    }
}
