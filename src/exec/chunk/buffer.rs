// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Accumulation buffer for one join input.
//!
//! Responsibilities:
//! - Appends incoming chunks (`merge`), evicts consumed rows from the front
//!   (`clear_front_rows`) and drops everything (`delete_rows`).
//! - Presents the buffered rows as one row-addressable chunk on demand.
//! - Reports retained bytes to a `MemTracker` reservation.
//!
//! Merged chunks are kept pending and concatenated lazily, so a burst of small
//! input batches costs one copy instead of one per batch. Eviction is a
//! zero-copy slice.

use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;

use super::Chunk;
use crate::runtime::mem_tracker::{MemReservation, MemTracker};

#[derive(Debug)]
pub struct ChunkBuffer {
    label: String,
    schema: Option<SchemaRef>,
    compacted: Option<Chunk>,
    pending: Vec<Chunk>,
    row_count: usize,
    reservation: Option<MemReservation>,
}

impl ChunkBuffer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            schema: None,
            compacted: None,
            pending: Vec::new(),
            row_count: 0,
            reservation: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        match self.reservation.as_mut() {
            Some(reservation) => reservation.transfer_to(tracker),
            None => self.reservation = Some(MemReservation::new(tracker)),
        }
        self.refresh_accounting();
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Schema of the first chunk seen, including zero-row chunks.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    pub fn merge(&mut self, chunk: Chunk) -> Result<(), String> {
        match self.schema.as_ref() {
            Some(schema) => check_same_layout(&self.label, schema, &chunk.schema())?,
            None => self.schema = Some(chunk.schema()),
        }
        if chunk.is_empty() {
            return Ok(());
        }
        self.row_count += chunk.len();
        self.pending.push(chunk);
        self.refresh_accounting();
        Ok(())
    }

    /// All buffered rows as a single chunk. `None` until a schema is known.
    pub fn compact(&mut self) -> Result<Option<&Chunk>, String> {
        let Some(schema) = self.schema.clone() else {
            return Ok(None);
        };
        if !self.pending.is_empty() {
            let mut batches = Vec::with_capacity(self.pending.len() + 1);
            if let Some(current) = self.compacted.take()
                && !current.is_empty()
            {
                batches.push(current.batch);
            }
            batches.extend(self.pending.drain(..).map(|c| c.batch));
            let merged = concat_batches(&schema, &batches).map_err(|e| {
                format!("{} buffer concat failed: {}", self.label, e)
            })?;
            self.compacted = Some(Chunk::try_new(merged)?);
            self.refresh_accounting();
        } else if self.compacted.is_none() {
            self.compacted = Some(Chunk::new_empty(schema)?);
        }
        Ok(self.compacted.as_ref())
    }

    /// Evict the first `n` rows; remaining rows shift down to index 0.
    pub fn clear_front_rows(&mut self, n: usize) -> Result<(), String> {
        if n == 0 {
            return Ok(());
        }
        if n > self.row_count {
            return Err(format!(
                "{} buffer cannot clear {} rows, only {} buffered",
                self.label, n, self.row_count
            ));
        }
        self.compact()?;
        let current = self
            .compacted
            .as_ref()
            .ok_or_else(|| format!("{} buffer has rows but no chunk", self.label))?;
        let remaining = current.len() - n;
        if remaining == 0 {
            return self.delete_rows();
        }
        self.compacted = Some(current.slice(n, remaining));
        self.row_count = remaining;
        self.refresh_accounting();
        Ok(())
    }

    pub fn delete_rows(&mut self) -> Result<(), String> {
        self.pending.clear();
        self.compacted = match self.schema.clone() {
            Some(schema) => Some(Chunk::new_empty(schema)?),
            None => None,
        };
        self.row_count = 0;
        self.refresh_accounting();
        Ok(())
    }

    fn retained_bytes(&self) -> usize {
        let compacted = self
            .compacted
            .as_ref()
            .map(Chunk::estimated_bytes)
            .unwrap_or(0);
        self.pending
            .iter()
            .map(Chunk::estimated_bytes)
            .fold(compacted, usize::saturating_add)
    }

    fn refresh_accounting(&mut self) {
        if self.reservation.is_none() {
            return;
        }
        let bytes = self.retained_bytes();
        if let Some(reservation) = self.reservation.as_mut() {
            reservation.resize(bytes);
        }
    }
}

fn check_same_layout(label: &str, expected: &SchemaRef, actual: &SchemaRef) -> Result<(), String> {
    let same = expected.fields().len() == actual.fields().len()
        && expected
            .fields()
            .iter()
            .zip(actual.fields().iter())
            .all(|(e, a)| e.name() == a.name() && e.data_type() == a.data_type());
    if same {
        Ok(())
    } else {
        Err(format!(
            "{} buffer schema mismatch: expected={:?} actual={:?}",
            label,
            expected
                .fields()
                .iter()
                .map(|f| (f.name().as_str(), f.data_type()))
                .collect::<Vec<_>>(),
            actual
                .fields()
                .iter()
                .map(|f| (f.name().as_str(), f.data_type()))
                .collect::<Vec<_>>()
        ))
    }
}
