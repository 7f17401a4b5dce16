//! In-memory sources for tests and embedding.

use super::{FeedReader, SnapshotReader};
use crate::error::SourceError;
use crate::value::Frame;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    tables: BTreeMap<String, Frame>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, frame: Frame) -> Self {
        self.tables.insert(name.to_string(), frame);
        self
    }
}

impl SnapshotReader for MemorySnapshot {
    fn list_tables(&self) -> Result<BTreeSet<String>, SourceError> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn read_table(&self, name: &str) -> Result<Frame, SourceError> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("snapshot table {}", name)))
    }
}

/// Order feed held in memory; `missing()` behaves like an absent file.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    frame: Option<Frame>,
}

impl MemoryFeed {
    pub fn new(frame: Frame) -> Self {
        Self { frame: Some(frame) }
    }

    pub fn missing() -> Self {
        Self { frame: None }
    }
}

impl FeedReader for MemoryFeed {
    fn read_orders(&self) -> Result<Frame, SourceError> {
        self.frame
            .clone()
            .ok_or_else(|| SourceError::NotFound("order feed".to_string()))
    }
}
