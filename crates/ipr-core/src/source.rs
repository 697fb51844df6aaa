// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::IprError;
use crate::record::{Record, RecordId, SampleTypeFilter};
use std::collections::HashMap;

/// Storage collaborator that supplies training populations.
///
/// Retrieval may block; no timeout is applied by callers in this workspace.
pub trait RecordSource: Send + Sync {
    /// Ordered identifiers of every record accepted by `filter`.
    fn ids_matching(&self, filter: &SampleTypeFilter) -> Result<Vec<RecordId>, IprError>;

    fn load_by_id(&self, id: RecordId) -> Result<Record, IprError>;
}

/// Record source backed by a vector, preserving insertion order.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordSource {
    records: Vec<Record>,
    index: HashMap<RecordId, usize>,
}

impl InMemoryRecordSource {
    pub fn new(records: Vec<Record>) -> Result<Self, IprError> {
        let mut index = HashMap::with_capacity(records.len());
        for (pos, record) in records.iter().enumerate() {
            if index.insert(record.id, pos).is_some() {
                return Err(IprError::invalid_input(format!(
                    "duplicate record id {} in in-memory source",
                    record.id
                )));
            }
        }
        Ok(Self { records, index })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

impl RecordSource for InMemoryRecordSource {
    fn ids_matching(&self, filter: &SampleTypeFilter) -> Result<Vec<RecordId>, IprError> {
        Ok(self
            .records
            .iter()
            .filter(|record| filter.accepts(record.sample_type.as_deref()))
            .map(|record| record.id)
            .collect())
    }

    fn load_by_id(&self, id: RecordId) -> Result<Record, IprError> {
        self.index
            .get(&id)
            .map(|&pos| self.records[pos].clone())
            .ok_or_else(|| IprError::invalid_input(format!("record id {id} not found")))
    }
}
