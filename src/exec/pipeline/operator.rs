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
//! Core operator traits and input port contracts.
//!
//! Responsibilities:
//! - Defines the pull-based input port (`InputPort`) the host hands to a two-input operator.
//! - Defines the per-call output (`ComputeOutput`) and the `DualInputOperator` step contract.
//!
//! Key exported interfaces:
//! - Types: `InputBatch`, `InputPort`, `ChunkQueue`, `ComputeOutput`, `BlockedReason`,
//!   `Operator`, `DualInputOperator`.
//!
//! Current limitations:
//! - Operators are stepped cooperatively; nothing here blocks or spawns threads.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::runtime::mem_tracker::MemTracker;

/// One delivery from an input port. `chunk` may be absent on a bare EOF marker.
#[derive(Clone, Debug, Default)]
pub struct InputBatch {
    pub chunk: Option<Chunk>,
    pub eof: bool,
}

/// Upstream side of a join input.
pub trait InputPort {
    /// `None` when nothing is available right now; the caller retries on a later step.
    fn try_pull(&mut self) -> Option<InputBatch>;
}

/// In-memory input port. EOF is delivered exactly once, with the last chunk when the
/// queue is finished while non-empty.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Chunk>,
    finished: bool,
    eof_delivered: bool,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue holding `chunks` that is already finished.
    pub fn from_chunks(chunks: impl IntoIterator<Item = Chunk>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
            finished: true,
            eof_delivered: false,
        }
    }

    pub fn push(&mut self, chunk: Chunk) {
        debug_assert!(!self.finished, "push after set_finished");
        self.chunks.push_back(chunk);
    }

    pub fn set_finished(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// True once every chunk and the EOF marker have been pulled.
    pub fn is_drained(&self) -> bool {
        self.eof_delivered
    }
}

impl InputPort for ChunkQueue {
    fn try_pull(&mut self) -> Option<InputBatch> {
        if let Some(chunk) = self.chunks.pop_front() {
            let eof = self.finished && self.chunks.is_empty();
            self.eof_delivered |= eof;
            return Some(InputBatch {
                chunk: Some(chunk),
                eof,
            });
        }
        if self.finished && !self.eof_delivered {
            self.eof_delivered = true;
            return Some(InputBatch {
                chunk: None,
                eof: true,
            });
        }
        None
    }
}

/// Result of one `compute` step.
#[derive(Clone, Debug, Default)]
pub struct ComputeOutput {
    pub chunk: Option<Chunk>,
    pub eof: bool,
}

impl ComputeOutput {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn done() -> Self {
        Self {
            chunk: None,
            eof: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Why a step produced nothing.
pub enum BlockedReason {
    /// Neither input delivered anything this step.
    InputEmpty,
}

/// Base operator contract.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        let _ = tracker;
    }

    fn prepare(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }
}

/// Two-input operator driven by repeated `compute` calls.
///
/// Each call pulls at most one batch from each port, advances internal state, and
/// returns at most one chunk. Once `eof` has been returned (or an error), later calls
/// return an empty output with `eof = true` and leave state untouched.
pub trait DualInputOperator: Operator {
    fn compute(
        &mut self,
        left: &mut dyn InputPort,
        right: &mut dyn InputPort,
    ) -> Result<ComputeOutput, String>;
}
