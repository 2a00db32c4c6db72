use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::order::OrderId;
use crate::money::Money;

type HmacSha256 = Hmac<Sha256>;

/// Money movements recorded against an order. Every entry is append-only;
/// the chain hash makes after-the-fact edits detectable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Capture,
    Hold,
    Release,
    Refund,
    Payout,
}

impl LedgerAction {
    fn as_key(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Hold => "hold",
            Self::Release => "release",
            Self::Refund => "refund",
            Self::Payout => "payout",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub order_id: OrderId,
    pub version: u32,
    pub amount: Money,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub action: LedgerAction,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub order_id: OrderId,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Append-only, HMAC-signed audit ledger of escrow money movements.
#[derive(Clone, Debug)]
pub struct OrderLedger {
    signing_key: Vec<u8>,
    entries_by_order: HashMap<String, Vec<LedgerEntry>>,
}

impl OrderLedger {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec(), entries_by_order: HashMap::new() }
    }

    pub fn append_entry(
        &mut self,
        order_id: &OrderId,
        action: LedgerAction,
        amount: Money,
        actor_id: impl Into<String>,
    ) -> LedgerEntry {
        let actor_id = actor_id.into();
        let chain = self.entries_by_order.entry(order_id.0.clone()).or_default();
        let version = u32::try_from(chain.len()).unwrap_or(u32::MAX).saturating_add(1);
        let prev_hash = chain.last().map(|entry| entry.entry_hash.clone());
        let timestamp = Utc::now();
        let entry_hash = hash_entry_material(
            order_id,
            version,
            amount,
            prev_hash.as_deref(),
            timestamp,
            &actor_id,
            &action,
        );
        let signature = hmac_hex(&self.signing_key, entry_hash.as_bytes());

        let entry = LedgerEntry {
            entry_id: Uuid::new_v4().to_string(),
            order_id: order_id.clone(),
            version,
            amount,
            prev_hash,
            entry_hash,
            timestamp,
            actor_id,
            action,
            signature,
        };

        chain.push(entry.clone());
        entry
    }

    pub fn verify_chain(&self, order_id: &OrderId) -> VerificationResult {
        let Some(entries) = self.entries_by_order.get(&order_id.0) else {
            return VerificationResult {
                order_id: order_id.clone(),
                valid: false,
                verified_entries: 0,
                latest_hash: None,
                failure_reason: Some("no ledger entries found for order".to_string()),
            };
        };

        let mut previous_hash: Option<String> = None;
        for (index, entry) in entries.iter().enumerate() {
            let expected_version = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if entry.version != expected_version {
                return failure(
                    order_id,
                    index,
                    previous_hash,
                    format!(
                        "version mismatch at entry {}: expected {}, found {}",
                        entry.entry_id, expected_version, entry.version
                    ),
                );
            }

            if entry.prev_hash != previous_hash {
                return failure(
                    order_id,
                    index,
                    previous_hash,
                    format!("previous hash mismatch at entry {}", entry.entry_id),
                );
            }

            let computed_entry_hash = hash_entry_material(
                &entry.order_id,
                entry.version,
                entry.amount,
                entry.prev_hash.as_deref(),
                entry.timestamp,
                &entry.actor_id,
                &entry.action,
            );
            if computed_entry_hash != entry.entry_hash {
                return failure(
                    order_id,
                    index,
                    previous_hash,
                    format!("entry hash mismatch at entry {}", entry.entry_id),
                );
            }

            let expected_signature = hmac_hex(&self.signing_key, entry.entry_hash.as_bytes());
            if expected_signature != entry.signature {
                return failure(
                    order_id,
                    index,
                    previous_hash,
                    format!("signature mismatch at entry {}", entry.entry_id),
                );
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        VerificationResult {
            order_id: order_id.clone(),
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }

    pub fn entries_for_order(&self, order_id: &OrderId) -> Vec<LedgerEntry> {
        self.entries_by_order.get(&order_id.0).cloned().unwrap_or_default()
    }
}

fn failure(
    order_id: &OrderId,
    verified: usize,
    latest_hash: Option<String>,
    reason: String,
) -> VerificationResult {
    VerificationResult {
        order_id: order_id.clone(),
        valid: false,
        verified_entries: verified,
        latest_hash,
        failure_reason: Some(reason),
    }
}

fn hash_entry_material(
    order_id: &OrderId,
    version: u32,
    amount: Money,
    prev_hash: Option<&str>,
    timestamp: DateTime<Utc>,
    actor_id: &str,
    action: &LedgerAction,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        order_id.0,
        version,
        amount.amount_minor,
        amount.currency,
        prev_hash.unwrap_or(""),
        timestamp.to_rfc3339(),
        actor_id,
        action.as_key(),
    );
    sha256_hex(material.as_bytes())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::{LedgerAction, OrderLedger};
    use crate::domain::order::OrderId;
    use crate::money::{Currency, Money};

    fn order_id(value: &str) -> OrderId {
        OrderId(value.to_string())
    }

    #[test]
    fn append_entry_links_previous_hash_chain() {
        let mut ledger = OrderLedger::new("signing-key");
        let order = order_id("o-ledger-1");

        let capture = ledger.append_entry(
            &order,
            LedgerAction::Capture,
            Money::new(45_000, Currency::Eur),
            "escrow-engine",
        );
        let hold = ledger.append_entry(
            &order,
            LedgerAction::Hold,
            Money::new(45_000, Currency::Eur),
            "escrow-engine",
        );

        assert_eq!(capture.version, 1);
        assert_eq!(hold.version, 2);
        assert_eq!(hold.prev_hash, Some(capture.entry_hash));
    }

    #[test]
    fn verify_chain_succeeds_for_untampered_entries() {
        let mut ledger = OrderLedger::new("signing-key");
        let order = order_id("o-ledger-2");

        ledger.append_entry(
            &order,
            LedgerAction::Capture,
            Money::new(45_000, Currency::Eur),
            "escrow-engine",
        );
        ledger.append_entry(
            &order,
            LedgerAction::Release,
            Money::new(6_000, Currency::Eur),
            "payout-engine",
        );
        ledger.append_entry(
            &order,
            LedgerAction::Payout,
            Money::new(6_000, Currency::Eur),
            "payout-engine",
        );

        let result = ledger.verify_chain(&order);
        assert!(result.valid);
        assert_eq!(result.verified_entries, 3);
        assert!(result.failure_reason.is_none());
    }

    #[test]
    fn verify_chain_detects_tampered_amounts() {
        let mut ledger = OrderLedger::new("signing-key");
        let order = order_id("o-ledger-3");

        ledger.append_entry(
            &order,
            LedgerAction::Capture,
            Money::new(45_000, Currency::Eur),
            "escrow-engine",
        );
        ledger.append_entry(
            &order,
            LedgerAction::Release,
            Money::new(6_000, Currency::Eur),
            "payout-engine",
        );

        let entries = ledger.entries_by_order.get_mut("o-ledger-3").expect("entries");
        entries[1].amount = Money::new(60_000, Currency::Eur);

        let result = ledger.verify_chain(&order);
        assert!(!result.valid);
        assert!(result.failure_reason.unwrap_or_default().contains("entry hash mismatch"));
    }

    #[test]
    fn verify_chain_reports_missing_order() {
        let ledger = OrderLedger::new("signing-key");
        let result = ledger.verify_chain(&order_id("o-unknown"));

        assert!(!result.valid);
        assert_eq!(result.verified_entries, 0);
    }
}
