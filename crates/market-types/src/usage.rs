//! Usage / cost ledger entries and their aggregation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ActorId, ContentHash, LedgerId, MarketError, Result, hash_canonical};

/// Kind of metered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Model,
    Search,
    Storage,
}

/// Metering unit. Summaries aggregate per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageUnit {
    Token,
    Call,
    Query,
    Byte,
}

/// Caller-supplied part of a usage entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageDraft {
    pub lease_id: String,
    pub resource_id: String,
    pub kind: ResourceKind,
    pub provider_actor_id: ActorId,
    pub consumer_actor_id: ActorId,
    pub unit: UsageUnit,
    pub quantity: Decimal,
    pub cost: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl UsageDraft {
    pub fn validate(&self) -> Result<()> {
        if self.lease_id.trim().is_empty() {
            return Err(MarketError::MissingField("entry.leaseId"));
        }
        if self.resource_id.trim().is_empty() {
            return Err(MarketError::MissingField("entry.resourceId"));
        }
        if self.currency.trim().is_empty() {
            return Err(MarketError::MissingField("entry.currency"));
        }
        if self.quantity.is_sign_negative() {
            return Err(MarketError::InvalidArgument("quantity must be >= 0".into()));
        }
        if self.cost.is_sign_negative() {
            return Err(MarketError::InvalidArgument("cost must be >= 0".into()));
        }
        Ok(())
    }
}

/// An appended, hashed usage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub ledger_id: LedgerId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub draft: UsageDraft,
    pub entry_hash: ContentHash,
}

impl UsageEntry {
    pub fn record(draft: UsageDraft, timestamp: DateTime<Utc>) -> Result<Self> {
        draft.validate()?;
        let entry_hash = hash_canonical(&json!({
            "draft": draft,
            "timestamp": timestamp,
        }))?;
        Ok(Self {
            ledger_id: LedgerId::new(),
            timestamp,
            draft,
            entry_hash,
        })
    }
}

/// Filter for usage listings. `limit` keeps the most recent entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageFilter {
    pub lease_id: Option<String>,
    pub resource_id: Option<String>,
    pub provider_actor_id: Option<ActorId>,
    pub consumer_actor_id: Option<ActorId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl UsageFilter {
    /// Field predicates only; `limit` is applied after sorting.
    #[must_use]
    pub fn matches(&self, entry: &UsageEntry) -> bool {
        let d = &entry.draft;
        self.lease_id.as_ref().is_none_or(|v| *v == d.lease_id)
            && self.resource_id.as_ref().is_none_or(|v| *v == d.resource_id)
            && self
                .provider_actor_id
                .as_ref()
                .is_none_or(|v| *v == d.provider_actor_id)
            && self
                .consumer_actor_id
                .as_ref()
                .is_none_or(|v| *v == d.consumer_actor_id)
            && self.since.is_none_or(|t| entry.timestamp >= t)
            && self.until.is_none_or(|t| entry.timestamp <= t)
    }

    /// Sort chronologically, then keep the last `limit` entries.
    #[must_use]
    pub fn finish(&self, mut entries: Vec<UsageEntry>) -> Vec<UsageEntry> {
        entries.sort_by_key(|e| e.timestamp);
        if let Some(limit) = self.limit {
            let skip = entries.len().saturating_sub(limit);
            entries = entries.split_off(skip);
        }
        entries
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTotals {
    pub quantity: Decimal,
    pub cost: Decimal,
}

/// Per-unit totals. Exact decimal arithmetic, never floating point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub by_unit: BTreeMap<UsageUnit, UnitTotals>,
    pub total_cost: Decimal,
    /// Currency of the first entry; empty when there are no entries.
    pub currency: String,
}

impl UsageSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a UsageEntry>) -> Result<Self> {
        let mut summary = Self::default();
        for entry in entries {
            if summary.currency.is_empty() {
                summary.currency.clone_from(&entry.draft.currency);
            }
            let bucket = summary.by_unit.entry(entry.draft.unit).or_default();
            bucket.quantity = checked(bucket.quantity.checked_add(entry.draft.quantity))?;
            bucket.cost = checked(bucket.cost.checked_add(entry.draft.cost))?;
            summary.total_cost = checked(summary.total_cost.checked_add(entry.draft.cost))?;
        }
        Ok(summary)
    }
}

fn checked(value: Option<Decimal>) -> Result<Decimal> {
    value.ok_or_else(|| MarketError::InvalidArgument("usage total overflows".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft(unit: UsageUnit, quantity: i64, cost: &str) -> UsageDraft {
        UsageDraft {
            lease_id: "lease-1".into(),
            resource_id: "res-1".into(),
            kind: ResourceKind::Model,
            provider_actor_id: ActorId::from("provider"),
            consumer_actor_id: ActorId::from("consumer"),
            unit,
            quantity: Decimal::from(quantity),
            cost: cost.parse().unwrap(),
            currency: "USDC".into(),
            token_address: None,
            session_id: None,
            run_id: None,
        }
    }

    #[test]
    fn summary_uses_exact_decimals() {
        let now = Utc::now();
        let entries: Vec<UsageEntry> = (0..10)
            .map(|_| UsageEntry::record(draft(UsageUnit::Token, 1, "0.1"), now).unwrap())
            .collect();
        let summary = UsageSummary::from_entries(&entries).unwrap();
        // Ten times 0.1 is exactly 1 (would not be in binary floating point).
        assert_eq!(summary.total_cost, Decimal::ONE);
        assert_eq!(summary.by_unit[&UsageUnit::Token].quantity, Decimal::from(10));
        assert_eq!(summary.currency, "USDC");
    }

    #[test]
    fn summary_groups_by_unit() {
        let now = Utc::now();
        let entries = vec![
            UsageEntry::record(draft(UsageUnit::Call, 2, "3"), now).unwrap(),
            UsageEntry::record(draft(UsageUnit::Byte, 1024, "1"), now).unwrap(),
            UsageEntry::record(draft(UsageUnit::Call, 1, "1.5"), now).unwrap(),
        ];
        let summary = UsageSummary::from_entries(&entries).unwrap();
        assert_eq!(summary.by_unit.len(), 2);
        assert_eq!(summary.by_unit[&UsageUnit::Call].cost, Decimal::new(45, 1));
        assert_eq!(summary.total_cost, Decimal::new(55, 1));
    }

    #[test]
    fn empty_summary() {
        let summary = UsageSummary::from_entries(&Vec::<UsageEntry>::new()).unwrap();
        assert!(summary.by_unit.is_empty());
        assert_eq!(summary.total_cost, Decimal::ZERO);
        assert!(summary.currency.is_empty());
    }

    #[test]
    fn negative_cost_rejected() {
        let bad = draft(UsageUnit::Call, 1, "-1");
        assert!(UsageEntry::record(bad, Utc::now()).is_err());
    }

    #[test]
    fn filter_limit_keeps_most_recent() {
        let base = Utc::now();
        let entries: Vec<UsageEntry> = (0..5)
            .rev()
            .map(|i| {
                UsageEntry::record(draft(UsageUnit::Call, i, "1"), base + Duration::seconds(i))
                    .unwrap()
            })
            .collect();
        let filter = UsageFilter {
            limit: Some(2),
            ..UsageFilter::default()
        };
        let kept = filter.finish(entries);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].timestamp, base + Duration::seconds(3));
        assert_eq!(kept[1].timestamp, base + Duration::seconds(4));
    }

    #[test]
    fn filter_time_window() {
        let base = Utc::now();
        let entry = UsageEntry::record(draft(UsageUnit::Query, 1, "1"), base).unwrap();
        let inside = UsageFilter {
            since: Some(base - Duration::seconds(1)),
            until: Some(base),
            ..UsageFilter::default()
        };
        assert!(inside.matches(&entry));
        let after = UsageFilter {
            since: Some(base + Duration::seconds(1)),
            ..UsageFilter::default()
        };
        assert!(!after.matches(&entry));
    }

    #[test]
    fn entry_serializes_flat() {
        let entry = UsageEntry::record(draft(UsageUnit::Call, 1, "2"), Utc::now()).unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["lease_id"], "lease-1");
        assert_eq!(json["cost"], "2");
        let back: UsageEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
