//! Bookkeeping for a single in-flight gateway round-trip.
//!
//! An order carries at most one of these records, created when a payment or
//! refund request is sent to a gateway. More than one gateway call may be
//! issued speculatively before one settles, so the record stores a candidate
//! provider set and a transaction-id set. Ids leave the set as webhooks or
//! reconciliation resolve them; the record is cleared the moment the set
//! empties, or when the attempt is judged abandoned.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{EventKind, ProviderTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineTransactionStatus {
    /// The round-trip has started; no gateway-side evidence seen yet.
    Init,
    /// At least one gateway-side transaction id has been observed, but it has
    /// not resolved to success or failure.
    Processing,
}

impl std::fmt::Display for OnlineTransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnlineTransactionStatus::Init => write!(f, "init"),
            OnlineTransactionStatus::Processing => write!(f, "processing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineTransaction {
    /// What the pending round-trip is for.
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub status: OnlineTransactionStatus,
    pub providers: Vec<ProviderTag>,
    pub transaction_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_url: Option<String>,
}

impl OnlineTransaction {
    /// Starts tracking a fresh gateway round-trip.
    pub fn begin(kind: EventKind, provider: ProviderTag, transaction_id: String, confirmation_url: Option<String>) -> Self {
        Self {
            kind,
            status: OnlineTransactionStatus::Init,
            providers: vec![provider],
            transaction_ids: vec![transaction_id],
            started_at: Utc::now(),
            confirmation_url,
        }
    }

    /// Adds a speculative additional attempt (e.g. the customer retried
    /// through a different integration before the first settled).
    pub fn with_attempt(mut self, provider: ProviderTag, transaction_id: String, confirmation_url: Option<String>) -> Self {
        if !self.providers.contains(&provider) {
            self.providers.push(provider);
        }
        if !self.transaction_ids.contains(&transaction_id) {
            self.transaction_ids.push(transaction_id);
        }
        if confirmation_url.is_some() {
            self.confirmation_url = confirmation_url;
        }
        self
    }

    /// Records gateway-side evidence for this attempt and moves the record to
    /// `processing`.
    pub fn absorb_evidence(&mut self, provider: ProviderTag, transaction_id: &str, confirmation_url: Option<&str>) {
        if !self.providers.contains(&provider) {
            self.providers.push(provider);
        }
        if !self.transaction_ids.iter().any(|id| id == transaction_id) {
            self.transaction_ids.push(transaction_id.to_string());
        }
        if let Some(url) = confirmation_url {
            self.confirmation_url = Some(url.to_string());
        }
        self.status = OnlineTransactionStatus::Processing;
    }

    /// Removes a resolved id from the pending set. Returns `true` if the id
    /// was present.
    pub fn resolve(&mut self, transaction_id: &str) -> bool {
        let before = self.transaction_ids.len();
        self.transaction_ids.retain(|id| id != transaction_id);
        self.transaction_ids.len() != before
    }

    /// The pending set is empty; nothing is outstanding any more.
    pub fn is_cleared(&self) -> bool {
        self.transaction_ids.is_empty()
    }

    /// Stuck means: still in `init` with no gateway evidence, and older than
    /// the expiration window.
    pub fn is_stuck(&self, now: DateTime<Utc>, expiration_window: Duration) -> bool {
        self.status == OnlineTransactionStatus::Init && self.started_at + expiration_window <= now
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pending() -> OnlineTransaction {
        OnlineTransaction::begin(
            EventKind::Payment,
            ProviderTag::Yookassa,
            "tx1".to_string(),
            Some("https://pay.example/confirm".to_string()),
        )
    }

    #[test]
    fn begins_in_init_with_one_candidate() {
        let tx = pending();
        assert_eq!(tx.status, OnlineTransactionStatus::Init);
        assert_eq!(tx.transaction_ids, vec!["tx1".to_string()]);
        assert!(!tx.is_cleared());
    }

    #[test]
    fn speculative_attempts_accumulate_without_duplicates() {
        let tx = pending()
            .with_attempt(ProviderTag::CloudPayments, "tx2".to_string(), None)
            .with_attempt(ProviderTag::Yookassa, "tx1".to_string(), None);
        assert_eq!(tx.providers.len(), 2);
        assert_eq!(tx.transaction_ids, vec!["tx1".to_string(), "tx2".to_string()]);
    }

    #[test]
    fn evidence_moves_to_processing_and_resolution_shrinks_the_set() {
        let mut tx = pending().with_attempt(ProviderTag::Yookassa, "tx2".to_string(), None);
        tx.absorb_evidence(ProviderTag::Yookassa, "tx1", None);
        assert_eq!(tx.status, OnlineTransactionStatus::Processing);
        assert!(tx.resolve("tx1"));
        assert!(!tx.resolve("tx1"));
        assert!(!tx.is_cleared());
        assert!(tx.resolve("tx2"));
        assert!(tx.is_cleared());
    }

    #[test]
    fn stuck_detection_uses_the_expiration_window() {
        let mut tx = pending();
        tx.started_at = Utc::now() - Duration::minutes(31);
        assert!(tx.is_stuck(Utc::now(), Duration::minutes(30)));
        assert!(!tx.is_stuck(Utc::now(), Duration::minutes(45)));
        tx.status = OnlineTransactionStatus::Processing;
        assert!(!tx.is_stuck(Utc::now(), Duration::minutes(30)));
    }

    #[test]
    fn wire_format_is_camel_case() {
        let tx = pending();
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "payment");
        assert_eq!(json["status"], "init");
        assert_eq!(json["transactionIds"][0], "tx1");
        assert!(json["startedAt"].is_string());
        let back: OnlineTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }
}
