//! In-memory outbox standing in for outbound mail.

use crate::fixture::Fixture;
use crate::poller::Poller;
use crate::result::{HarnessError, HarnessResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, OnceLock};

const NAME: &str = "mail";

fn url_pattern() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| {
        // literal pattern, always valid
        #[allow(clippy::unwrap_used)]
        Regex::new(r#"https?://[^\s"'<>)\]]+"#).unwrap()
    })
}

/// One delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mail {
    /// Recipients
    pub to: Vec<String>,
    /// Sender
    pub from: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Delivery time
    pub sent_at: DateTime<Utc>,
}

impl Mail {
    /// Message to a single recipient
    #[must_use]
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            from: "noreply@localhost".into(),
            subject: subject.into(),
            body: body.into(),
            sent_at: Utc::now(),
        }
    }

    /// Sender address
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Add a recipient
    pub fn cc(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    /// Whether `address` is among the recipients (case-insensitive)
    #[must_use]
    pub fn is_to(&self, address: &str) -> bool {
        self.to.iter().any(|t| t.eq_ignore_ascii_case(address))
    }

    /// Every URL in the body, in order
    #[must_use]
    pub fn links(&self) -> Vec<&str> {
        url_pattern().find_iter(&self.body).map(|m| m.as_str()).collect()
    }
}

/// Outbox shared between the application side and the scenario
#[derive(Debug, Clone, Default)]
pub struct MailCollector {
    outbox: Arc<Mutex<Vec<Mail>>>,
}

impl MailCollector {
    /// Empty outbox
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery
    pub fn deliver(&self, mail: Mail) {
        tracing::debug!(to = ?mail.to, subject = %mail.subject, "mail delivered");
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.push(mail);
        }
    }

    /// Every delivery, oldest first
    #[must_use]
    pub fn deliveries(&self) -> Vec<Mail> {
        self.outbox.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Number of deliveries
    #[must_use]
    pub fn count(&self) -> usize {
        self.outbox.lock().map(|o| o.len()).unwrap_or_default()
    }

    /// Most recent delivery
    #[must_use]
    pub fn last(&self) -> Option<Mail> {
        self.outbox.lock().ok().and_then(|o| o.last().cloned())
    }

    /// Most recent delivery to `address`
    #[must_use]
    pub fn last_to(&self, address: &str) -> Option<Mail> {
        self.outbox
            .lock()
            .ok()
            .and_then(|o| o.iter().rev().find(|m| m.is_to(address)).cloned())
    }

    /// Forget every delivery
    pub fn clear(&self) {
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.clear();
        }
    }

    /// Poll until a message to `address` arrives
    pub async fn wait_for_mail(&self, address: &str, poller: &Poller) -> HarnessResult<Mail> {
        let label = format!("mail to {address}");
        poller
            .retry(&label, || {
                let found = self.last_to(address);
                async move {
                    found.ok_or_else(|| HarnessError::assertion(format!("no mail to {address} yet")))
                }
            })
            .await
    }
}

/// First match of `pattern` in the body; capture group 1 when present
pub fn extract_link(mail: &Mail, pattern: &str) -> HarnessResult<String> {
    let re = Regex::new(pattern).map_err(|e| HarnessError::double(NAME, e.to_string()))?;
    let caps = re.captures(&mail.body).ok_or_else(|| {
        HarnessError::double(
            NAME,
            format!("no match for /{pattern}/ in mail '{}'", mail.subject),
        )
    })?;
    let m = caps.get(1).or_else(|| caps.get(0));
    Ok(m.map(|m| m.as_str().to_string()).unwrap_or_default())
}

/// First URL in the body whose path contains `path`
pub fn magic_link(mail: &Mail, path: &str) -> HarnessResult<String> {
    mail.links()
        .into_iter()
        .find(|link| {
            url::Url::parse(link)
                .map(|u| u.path().contains(path))
                .unwrap_or(false)
        })
        .map(str::to_string)
        .ok_or_else(|| {
            HarnessError::double(
                NAME,
                format!("no link to '{path}' in mail '{}'", mail.subject),
            )
        })
}

#[async_trait]
impl Fixture for MailCollector {
    async fn setup(&mut self) -> HarnessResult<()> {
        self.clear();
        Ok(())
    }

    async fn teardown(&mut self) -> HarnessResult<()> {
        self.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mail collector"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn welcome() -> Mail {
        Mail::new(
            "bob@example.com",
            "Welcome",
            "Hi Bob,\nconfirm at https://forum.test/u/activate-account/abc123 (expires soon).\nhttps://forum.test/faq",
        )
    }

    mod outbox_tests {
        use super::*;

        #[test]
        fn test_last_and_last_to() {
            let mail = MailCollector::new();
            assert!(mail.last().is_none());
            mail.deliver(welcome());
            mail.deliver(Mail::new("ann@example.com", "Digest", "nothing new"));
            assert_eq!(mail.count(), 2);
            assert_eq!(mail.last().unwrap().subject, "Digest");
            assert_eq!(mail.last_to("BOB@example.com").unwrap().subject, "Welcome");
            assert!(mail.last_to("carl@example.com").is_none());
            mail.clear();
            assert!(mail.deliveries().is_empty());
        }

        #[test]
        fn test_clones_share_outbox() {
            let app_side = MailCollector::new();
            let scenario_side = app_side.clone();
            app_side.deliver(welcome().cc("ann@example.com"));
            assert!(scenario_side.last_to("ann@example.com").is_some());
        }
    }

    mod link_tests {
        use super::*;

        #[test]
        fn test_magic_link_by_path() {
            let link = magic_link(&welcome(), "/u/activate-account/").unwrap();
            assert_eq!(link, "https://forum.test/u/activate-account/abc123");
            assert!(magic_link(&welcome(), "/session/email-login").is_err());
        }

        #[test]
        fn test_extract_link_prefers_group() {
            let token = extract_link(&welcome(), r"activate-account/(\w+)").unwrap();
            assert_eq!(token, "abc123");
            let whole = extract_link(&welcome(), r"https://\S+/faq").unwrap();
            assert_eq!(whole, "https://forum.test/faq");
            assert!(extract_link(&welcome(), "(").is_err());
        }

        #[test]
        fn test_links_in_order() {
            assert_eq!(welcome().links().len(), 2);
        }
    }

    mod wait_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_mail_sees_late_delivery() {
            let mail = MailCollector::new();
            let sender = mail.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                sender.deliver(welcome());
            });
            let poller = Poller::new(Duration::from_secs(2), Duration::from_millis(50));
            let got = mail.wait_for_mail("bob@example.com", &poller).await.unwrap();
            assert_eq!(got.subject, "Welcome");
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_mail_times_out() {
            let mail = MailCollector::new();
            let poller = Poller::new(Duration::from_millis(500), Duration::from_millis(50));
            let err = mail.wait_for_mail("nobody@example.com", &poller).await.unwrap_err();
            assert!(matches!(err, HarnessError::Timeout { .. }));
            assert!(err.to_string().contains("nobody@example.com"));
        }
    }
}
