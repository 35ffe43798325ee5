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
//! Hash index over the build side of a join.
//!
//! Responsibilities:
//! - Maps composite key hashes to build-row chains, preserving insertion order.
//! - Reports its footprint to a `MemTracker` while alive.
//!
//! Key exported interfaces:
//! - Types: `JoinHashTable`.
//!
//! Current limitations:
//! - Equality is decided on the 64-bit composite hash alone; keys are not re-compared.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::exec::chunk::Chunk;
use crate::exec::hash_table::key_builder::build_composite_hash_values;
use crate::runtime::mem_tracker::{MemReservation, MemTracker};

/// Build-side index: composite hash -> build rows in insertion order.
#[derive(Debug, Default)]
pub(crate) struct JoinHashTable {
    buckets: HashMap<u64, Vec<u32>>,
    entry_count: usize,
    build_rows: usize,
    reservation: Option<MemReservation>,
}

impl JoinHashTable {
    /// Hash every row of `chunk` on `key_columns` and index the entries.
    pub(crate) fn build(chunk: &Chunk, key_columns: &[String]) -> Result<Self, String> {
        if chunk.len() > u32::MAX as usize {
            return Err(format!(
                "join build side too large: rows={} max={}",
                chunk.len(),
                u32::MAX
            ));
        }
        let entries = build_composite_hash_values(chunk, key_columns)?;
        let mut buckets: HashMap<u64, Vec<u32>> = HashMap::with_capacity(entries.len());
        for entry in &entries {
            let chain = buckets.entry(entry.hash).or_default();
            // A multi-value row may repeat one element; keep one chain slot per row.
            if chain.last() != Some(&entry.row) {
                chain.push(entry.row);
            }
        }
        Ok(Self {
            buckets,
            entry_count: entries.len(),
            build_rows: chunk.len(),
            reservation: None,
        })
    }

    pub(crate) fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        let bytes = self.estimated_bytes();
        let reservation = self
            .reservation
            .get_or_insert_with(|| MemReservation::new(Arc::clone(&tracker)));
        reservation.transfer_to(tracker);
        reservation.resize(bytes);
    }

    /// Build rows whose key hash equals `hash`, in insertion order.
    pub(crate) fn probe(&self, hash: u64) -> &[u32] {
        self.buckets.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of hash entries indexed (multi-value rows contribute several).
    pub(crate) fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub(crate) fn build_rows(&self) -> usize {
        self.build_rows
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    fn estimated_bytes(&self) -> usize {
        let slots = self.buckets.capacity() * (size_of::<u64>() + size_of::<Vec<u32>>());
        let chains: usize = self
            .buckets
            .values()
            .map(|chain| chain.capacity() * size_of::<u32>())
            .sum();
        slots.saturating_add(chains)
    }
}
