use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MailError, Mailer, OutgoingEmail};

/// In-memory mailer for tests and demos.
///
/// Failures can be scripted for the next N sends ([`fail_next`](Self::fail_next))
/// or pinned to a recipient ([`fail_address`](Self::fail_address)). Failed sends
/// are not recorded.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    scripted: Mutex<VecDeque<MailError>>,
    failing_addresses: Mutex<HashMap<String, MailError>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: MailError) {
        if let Ok(mut q) = self.scripted.lock() {
            q.push_back(error);
        }
    }

    pub fn fail_address(&self, address: &str, error: MailError) {
        if let Ok(mut m) = self.failing_addresses.lock() {
            m.insert(address.trim().to_lowercase(), error);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut q) = self.scripted.lock() {
            q.clear();
        }
        if let Ok(mut m) = self.failing_addresses.lock() {
            m.clear();
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, address: &str) -> Vec<OutgoingEmail> {
        let address = address.trim().to_lowercase();
        self.sent()
            .into_iter()
            .filter(|e| e.to.as_str() == address)
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let pinned = self
            .failing_addresses
            .lock()
            .map_err(|_| MailError::Transient("mailer lock poisoned".to_string()))?
            .get(email.to.as_str())
            .cloned();
        if let Some(err) = pinned {
            return Err(err);
        }

        let scripted = self
            .scripted
            .lock()
            .map_err(|_| MailError::Transient("mailer lock poisoned".to_string()))?
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }

        self.sent
            .lock()
            .map_err(|_| MailError::Transient("mailer lock poisoned".to_string()))?
            .push(email.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workhub_reports::EmailAddress;

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            to: EmailAddress::parse(to).unwrap(),
            to_name: None,
            subject: "s".to_string(),
            text_body: "b".to_string(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let mailer = RecordingMailer::new();
        mailer.fail_next(MailError::Transient("421".to_string()));

        assert_eq!(
            mailer.send(&email("a@example.com")).await,
            Err(MailError::Transient("421".to_string()))
        );
        mailer.send(&email("a@example.com")).await.unwrap();
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn pinned_address_keeps_failing_until_cleared() {
        let mailer = RecordingMailer::new();
        mailer.fail_address("Bad@Example.com", MailError::Permanent("550".to_string()));

        for _ in 0..3 {
            assert!(mailer.send(&email("bad@example.com")).await.is_err());
        }
        mailer.send(&email("good@example.com")).await.unwrap();

        mailer.clear_failures();
        mailer.send(&email("bad@example.com")).await.unwrap();
        assert_eq!(mailer.sent_to("bad@example.com").len(), 1);
    }
}
