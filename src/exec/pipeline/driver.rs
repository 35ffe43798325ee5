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
//! Join driver execution loop.
//!
//! Responsibilities:
//! - Feeds two in-memory input queues into one `DualInputOperator` step by step.
//! - Tracks driver state transitions and collects emitted chunks.
//!
//! Key exported interfaces:
//! - Types: `DriverState`, `JoinDriver`.
//!
//! Current limitations:
//! - Single operator, single thread; scheduling across drivers belongs to the host.

use std::sync::Arc;

use super::operator::{BlockedReason, ChunkQueue, DualInputOperator};
use crate::exec::chunk::Chunk;
use crate::runtime::mem_tracker::MemTracker;
use crate::streamjoin_logging::{debug, error};

#[derive(Clone, Debug, PartialEq, Eq)]
/// Runtime state for a join driver.
///
/// ```text
///   Ready ──step──► Ready | Blocked(InputEmpty)
///     │
///     ├─ operator reports eof ──► Finished
///     └─ operator error ────────► Failed(err)
/// ```
pub enum DriverState {
    Ready,
    Blocked(BlockedReason),
    Finished,
    Failed(String),
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed(_))
    }
}

pub struct JoinDriver {
    driver_id: i32,
    operator: Box<dyn DualInputOperator>,
    left: ChunkQueue,
    right: ChunkQueue,
    output: Vec<Chunk>,
    state: DriverState,
    prepared: bool,
    steps: usize,
    mem_tracker: Option<Arc<MemTracker>>,
}

impl JoinDriver {
    pub fn new(driver_id: i32, operator: Box<dyn DualInputOperator>) -> Self {
        Self {
            driver_id,
            operator,
            left: ChunkQueue::new(),
            right: ChunkQueue::new(),
            output: Vec::new(),
            state: DriverState::Ready,
            prepared: false,
            steps: 0,
            mem_tracker: None,
        }
    }

    pub fn with_inputs(
        driver_id: i32,
        operator: Box<dyn DualInputOperator>,
        left: ChunkQueue,
        right: ChunkQueue,
    ) -> Self {
        let mut driver = Self::new(driver_id, operator);
        driver.left = left;
        driver.right = right;
        driver
    }

    pub fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.operator.set_mem_tracker(Arc::clone(&tracker));
        self.mem_tracker = Some(tracker);
    }

    pub fn driver_id(&self) -> i32 {
        self.driver_id
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn left_mut(&mut self) -> &mut ChunkQueue {
        &mut self.left
    }

    pub fn right_mut(&mut self) -> &mut ChunkQueue {
        &mut self.right
    }

    /// Chunks emitted so far; clears the driver's copy.
    pub fn take_output(&mut self) -> Vec<Chunk> {
        std::mem::take(&mut self.output)
    }

    /// Run one `compute` call. Terminal states are sticky.
    pub fn step(&mut self) -> DriverState {
        if self.state.is_terminal() {
            return self.state.clone();
        }
        if !self.prepared {
            self.prepared = true;
            if let Err(err) = self.operator.prepare() {
                return self.finish_with_state(DriverState::Failed(err));
            }
        }

        self.steps += 1;
        match self.operator.compute(&mut self.left, &mut self.right) {
            Ok(out) => {
                let produced = out.chunk.is_some();
                if let Some(chunk) = out.chunk {
                    self.output.push(chunk);
                }
                if out.eof {
                    return self.finish_with_state(DriverState::Finished);
                }
                self.state = if produced {
                    DriverState::Ready
                } else {
                    DriverState::Blocked(BlockedReason::InputEmpty)
                };
                self.state.clone()
            }
            Err(err) => self.finish_with_state(DriverState::Failed(err)),
        }
    }

    /// Step until EOF and return every emitted chunk.
    pub fn run_to_end(&mut self, max_steps: usize) -> Result<Vec<Chunk>, String> {
        let mut budget = max_steps;
        loop {
            match self.step() {
                DriverState::Finished => return Ok(self.take_output()),
                DriverState::Failed(err) => return Err(err),
                DriverState::Ready | DriverState::Blocked(_) => {}
            }
            budget = budget.saturating_sub(1);
            if budget == 0 {
                return Err(format!(
                    "driver {} ({}) did not finish within {} steps",
                    self.driver_id,
                    self.operator.name(),
                    max_steps
                ));
            }
        }
    }

    fn finish_with_state(&mut self, state: DriverState) -> DriverState {
        match &state {
            DriverState::Finished => {
                debug!(
                    "Driver finished: driver_id={} op={} steps={} chunks={}",
                    self.driver_id,
                    self.operator.name(),
                    self.steps,
                    self.output.len()
                );
                if let Err(err) = self.operator.close() {
                    error!(
                        "Driver close failed: driver_id={} error={}",
                        self.driver_id, err
                    );
                    self.state = DriverState::Failed(err);
                    return self.state.clone();
                }
                if let Some(tracker) = self.mem_tracker.as_ref() {
                    debug!(
                        "Driver memory after close: driver_id={} {}",
                        self.driver_id,
                        tracker.usage_summary()
                    );
                }
            }
            DriverState::Failed(err) => {
                error!(
                    "Driver failed: driver_id={} op={} error={}",
                    self.driver_id,
                    self.operator.name(),
                    err
                );
                let _ = self.operator.close();
            }
            _ => {}
        }
        self.state = state;
        self.state.clone()
    }
}
