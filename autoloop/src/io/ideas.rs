//! Idea approval queue persisted under `ideas/`.
//!
//! Each idea lives in `ideas/<id>.json`; `ideas/index.json` holds the active
//! queue ordered by priority. Every mutation writes the item record before the
//! index, so after an interrupted write the record is authoritative and the
//! index is repaired from it on the next load.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::fs_util::{read_optional, write_atomic, write_json};
use super::init::ProjectPaths;
use super::markers::{Markers, StartTrigger};
use super::schema::Schema;
use crate::core::ideas::{
    IdeaItem, IdeaStatus, IndexEntry, clamp_priority, reconcile_index, sort_index,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdeaError {
    NotFound(String),
    NotPending { id: String, status: IdeaStatus },
    EmptyText,
}

impl fmt::Display for IdeaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdeaError::NotFound(id) => write!(f, "idea {id} not found"),
            IdeaError::NotPending { id, status } => {
                write!(f, "idea {id} is {} (expected pending)", status.as_str())
            }
            IdeaError::EmptyText => write!(f, "idea text is required"),
        }
    }
}

impl std::error::Error for IdeaError {}

pub struct IdeaQueue {
    ideas_dir: PathBuf,
    index_path: PathBuf,
    current_idea_path: PathBuf,
    markers: Markers,
}

impl IdeaQueue {
    pub fn new(paths: &ProjectPaths) -> Self {
        Self {
            ideas_dir: paths.ideas_dir.clone(),
            index_path: paths.idea_index_path.clone(),
            current_idea_path: paths.current_idea_path.clone(),
            markers: Markers::new(paths),
        }
    }

    /// Queue a new pending idea. With `start_now`, also signal the scheduler to run it.
    pub fn submit(&self, text: &str, priority: i64, start_now: bool) -> Result<IdeaItem> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IdeaError::EmptyText.into());
        }
        let item = IdeaItem {
            id: self.next_id()?,
            text: text.to_string(),
            priority: clamp_priority(priority),
            status: IdeaStatus::Pending,
            start_now,
            created_at: Utc::now(),
            started_at: None,
            rejected_at: None,
        };
        self.write_item(&item)?;

        let mut index = self.load_index()?;
        index.push(IndexEntry::from_item(&item));
        sort_index(&mut index);
        self.write_index(&index)?;

        if start_now {
            self.markers
                .trigger_start(&StartTrigger::Idea(item.id.clone()))?;
        }
        info!(id = %item.id, priority = item.priority, start_now, "idea submitted");
        Ok(item)
    }

    /// Approve a pending idea: it becomes the current idea and a start trigger is written.
    pub fn approve(&self, id: &str) -> Result<IdeaItem> {
        let mut item = self.pending_item(id)?;
        item.status = IdeaStatus::Approved;
        item.started_at = Some(Utc::now());
        self.write_item(&item)?;

        let mut index = self.load_index()?;
        upsert_entry(&mut index, &item);
        sort_index(&mut index);
        self.write_index(&index)?;

        write_atomic(&self.current_idea_path, &item.text)?;
        self.markers
            .trigger_start(&StartTrigger::Idea(item.id.clone()))?;
        info!(id = %item.id, "idea approved");
        Ok(item)
    }

    /// Reject a pending idea. The record stays on disk; the index drops it.
    pub fn reject(&self, id: &str) -> Result<IdeaItem> {
        let mut item = self.pending_item(id)?;
        item.status = IdeaStatus::Rejected;
        item.rejected_at = Some(Utc::now());
        self.write_item(&item)?;

        let mut index = self.load_index()?;
        index.retain(|entry| entry.id != item.id);
        self.write_index(&index)?;
        info!(id = %item.id, "idea rejected");
        Ok(item)
    }

    /// Change an idea's priority (clamped to 1..=10) and re-sort the queue.
    pub fn set_priority(&self, id: &str, value: i64) -> Result<IdeaItem> {
        let mut item = self.get(id)?;
        item.priority = clamp_priority(value);
        self.write_item(&item)?;

        let mut index = self.load_index()?;
        if let Some(entry) = index.iter_mut().find(|entry| entry.id == item.id) {
            entry.priority = item.priority;
        }
        sort_index(&mut index);
        self.write_index(&index)?;
        debug!(id = %item.id, priority = item.priority, "idea priority updated");
        Ok(item)
    }

    pub fn get(&self, id: &str) -> Result<IdeaItem> {
        let path = self
            .item_path(id)
            .ok_or_else(|| IdeaError::NotFound(id.to_string()))?;
        if !path.exists() {
            return Err(IdeaError::NotFound(id.to_string()).into());
        }
        load_item(&path)
    }

    /// The active queue in priority order.
    pub fn list(&self) -> Result<Vec<IndexEntry>> {
        self.load_index()
    }

    /// Rebuild `index.json` from the item records.
    pub fn reconcile(&self) -> Result<Vec<IndexEntry>> {
        let index = reconcile_index(&self.load_all_items()?);
        self.write_index(&index)?;
        Ok(index)
    }

    /// Text of the most recently approved idea, if any.
    pub fn current_idea(&self) -> Result<Option<String>> {
        Ok(read_optional(&self.current_idea_path)?
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()))
    }

    fn pending_item(&self, id: &str) -> Result<IdeaItem> {
        let item = self.get(id)?;
        if item.status != IdeaStatus::Pending {
            return Err(IdeaError::NotPending {
                id: item.id,
                status: item.status,
            }
            .into());
        }
        Ok(item)
    }

    /// Ids are file names, so only a conservative character set is accepted.
    fn item_path(&self, id: &str) -> Option<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.ideas_dir.join(format!("{id}.json")))
    }

    /// Millisecond timestamp, bumped past any existing record so ids stay unique
    /// and sort in submission order.
    fn next_id(&self) -> Result<String> {
        let mut millis = Utc::now().timestamp_millis();
        if let Some(last) = self.latest_id_millis()? {
            millis = millis.max(last + 1);
        }
        loop {
            let id = format!("{millis:013}");
            let taken = self.item_path(&id).is_some_and(|path| path.exists());
            if !taken {
                return Ok(id);
            }
            millis += 1;
        }
    }

    fn latest_id_millis(&self) -> Result<Option<i64>> {
        Ok(self
            .record_ids()?
            .iter()
            .filter_map(|id| id.parse::<i64>().ok())
            .max())
    }

    fn record_ids(&self) -> Result<Vec<String>> {
        if !self.ideas_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.ideas_dir)
            .with_context(|| format!("read {}", self.ideas_dir.display()))?
        {
            let path = entry
                .with_context(|| format!("read {}", self.ideas_dir.display()))?
                .path();
            if path == self.index_path || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load_all_items(&self) -> Result<Vec<IdeaItem>> {
        let mut items = Vec::new();
        for id in self.record_ids()? {
            if let Some(path) = self.item_path(&id) {
                items.push(load_item(&path)?);
            }
        }
        Ok(items)
    }

    fn write_item(&self, item: &IdeaItem) -> Result<()> {
        let path = self
            .item_path(&item.id)
            .ok_or_else(|| IdeaError::NotFound(item.id.clone()))?;
        write_json(&path, item)
    }

    /// Load the index, overlaying each entry with its authoritative record.
    fn load_index(&self) -> Result<Vec<IndexEntry>> {
        let Some(raw) = read_optional(&self.index_path)? else {
            return Ok(Vec::new());
        };
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", self.index_path.display()))?;
        Schema::IdeaIndex.validate(&value)?;
        let stored: Vec<IndexEntry> = serde_json::from_value(value)
            .with_context(|| format!("deserialize {}", self.index_path.display()))?;

        let mut index = Vec::with_capacity(stored.len());
        for entry in stored {
            let Some(path) = self.item_path(&entry.id).filter(|path| path.exists()) else {
                warn!(id = %entry.id, "index entry without record, dropping");
                continue;
            };
            let item = load_item(&path)?;
            if item.status == IdeaStatus::Rejected {
                continue;
            }
            index.push(IndexEntry::from_item(&item));
        }
        sort_index(&mut index);
        Ok(index)
    }

    fn write_index(&self, index: &[IndexEntry]) -> Result<()> {
        write_json(&self.index_path, &index)
    }
}

fn upsert_entry(index: &mut Vec<IndexEntry>, item: &IdeaItem) {
    match index.iter_mut().find(|entry| entry.id == item.id) {
        Some(entry) => *entry = IndexEntry::from_item(item),
        None => index.push(IndexEntry::from_item(item)),
    }
}

fn load_item(path: &Path) -> Result<IdeaItem> {
    let raw = fs::read_to_string(path).with_context(|| format!("read idea {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse idea {}", path.display()))?;
    Schema::Idea.validate(&value)?;
    serde_json::from_value(value).with_context(|| format!("deserialize idea {}", path.display()))
}
