use serde::{Deserialize, Serialize};

use workhub_core::{DomainError, DomainResult, UserId};

/// A normalized (trimmed, lower-cased) email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let normalized = raw.trim().to_lowercase();

        let mut parts = normalized.split('@');
        let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) => (local, domain),
            _ => {
                return Err(DomainError::validation(format!(
                    "invalid email address: {raw:?}"
                )));
            }
        };

        let domain_ok = !domain.is_empty()
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.');
        if local.is_empty() || !domain_ok || normalized.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "invalid email address: {raw:?}"
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0.rsplit('@').next().unwrap_or_default()
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

impl core::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Someone a report is delivered to. May or may not be a WorkHub user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: EmailAddress,
    pub name: Option<String>,
    pub user_id: Option<UserId>,
}

impl Recipient {
    pub fn new(email: EmailAddress) -> Self {
        Self {
            email,
            name: None,
            user_id: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        self.name = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Name to greet the recipient with.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.email.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let e = EmailAddress::parse("  Jane.Doe@Example.COM ").unwrap();
        assert_eq!(e.as_str(), "jane.doe@example.com");
        assert_eq!(e.domain(), "example.com");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["", "jane", "@example.com", "jane@", "jane@example", "a@b@c.com", "ja ne@x.io", "j@.com"] {
            assert!(EmailAddress::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn display_name_falls_back_to_address() {
        let email = EmailAddress::parse("ops@example.com").unwrap();
        let r = Recipient::new(email.clone()).named("   ");
        assert_eq!(r.display_name(), "ops@example.com");

        let r = Recipient::new(email).named("Ops Team");
        assert_eq!(r.display_name(), "Ops Team");
    }

    #[test]
    fn deserializing_validates() {
        let ok: Result<EmailAddress, _> = serde_json::from_str("\"A@B.io\"");
        assert_eq!(ok.unwrap().as_str(), "a@b.io");
        let bad: Result<EmailAddress, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }
}
