//! Idea records and priority ordering for the approval queue.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdeaStatus {
    Pending,
    Approved,
    Rejected,
}

impl IdeaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IdeaStatus::Pending => "pending",
            IdeaStatus::Approved => "approved",
            IdeaStatus::Rejected => "rejected",
        }
    }
}

/// A human-submitted work item (`ideas/<id>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaItem {
    pub id: String,
    pub text: String,
    pub priority: u8,
    pub status: IdeaStatus,
    pub start_now: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
}

/// One row of `ideas/index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub priority: u8,
    pub status: IdeaStatus,
}

impl IndexEntry {
    pub fn from_item(item: &IdeaItem) -> Self {
        Self {
            id: item.id.clone(),
            priority: item.priority,
            status: item.status,
        }
    }
}

pub fn clamp_priority(value: i64) -> u8 {
    // Bounded by MAX_PRIORITY, so the cast cannot truncate.
    value.clamp(MIN_PRIORITY, MAX_PRIORITY) as u8
}

/// Sort by priority descending; ties keep insertion order.
///
/// Ids are time-ordered, so id order is insertion order. The sort is stable,
/// so entries with equal keys never swap.
pub fn sort_index(index: &mut [IndexEntry]) {
    index.sort_by(|a, b| {
        Reverse(a.priority)
            .cmp(&Reverse(b.priority))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Rebuild the active index from authoritative item records.
///
/// Rejected items are excluded. Used to repair an index that lags behind a
/// record update interrupted mid-operation.
pub fn reconcile_index(items: &[IdeaItem]) -> Vec<IndexEntry> {
    let mut index: Vec<IndexEntry> = items
        .iter()
        .filter(|item| item.status != IdeaStatus::Rejected)
        .map(IndexEntry::from_item)
        .collect();
    sort_index(&mut index);
    index
}
