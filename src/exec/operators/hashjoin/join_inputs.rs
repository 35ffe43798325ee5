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
//! Input-side state shared by the streaming join operators.
//!
//! Responsibilities:
//! - Owns one `ChunkBuffer` per side and the per-side EOF flags.
//! - Remembers which side reached EOF first (left wins within one pull).
//! - Enforces the buffer-limit abort and the output truncation cap.
//!
//! Key exported interfaces:
//! - Types: `JoinInputs`, `OutputLimit`.

use std::sync::Arc;

use crate::exec::chunk::{Chunk, ChunkBuffer};
use crate::exec::node::join::JoinSide;
use crate::exec::pipeline::operator::InputPort;
use crate::runtime::mem_tracker::MemTracker;

#[derive(Debug)]
pub(crate) struct JoinInputs {
    left: ChunkBuffer,
    right: ChunkBuffer,
    left_eof: bool,
    right_eof: bool,
    first_eof: Option<JoinSide>,
}

impl JoinInputs {
    pub(crate) fn new() -> Self {
        Self {
            left: ChunkBuffer::new("left"),
            right: ChunkBuffer::new("right"),
            left_eof: false,
            right_eof: false,
            first_eof: None,
        }
    }

    pub(crate) fn set_mem_tracker(&mut self, tracker: &Arc<MemTracker>) {
        self.left
            .set_mem_tracker(MemTracker::new_child("left buffer", tracker));
        self.right
            .set_mem_tracker(MemTracker::new_child("right buffer", tracker));
    }

    /// Pull at most one batch from each side that has not reached EOF. Left is pulled first.
    pub(crate) fn pull(
        &mut self,
        left: &mut dyn InputPort,
        right: &mut dyn InputPort,
    ) -> Result<(), String> {
        self.pull_side(JoinSide::Left, left)?;
        self.pull_side(JoinSide::Right, right)
    }

    pub(crate) fn pull_side(&mut self, side: JoinSide, port: &mut dyn InputPort) -> Result<(), String> {
        if self.is_eof(side) {
            return Ok(());
        }
        let Some(batch) = port.try_pull() else {
            return Ok(());
        };
        if let Some(chunk) = batch.chunk {
            self.buffer_mut(side).merge(chunk)?;
        }
        if batch.eof {
            match side {
                JoinSide::Left => self.left_eof = true,
                JoinSide::Right => self.right_eof = true,
            }
            self.first_eof.get_or_insert(side);
        }
        Ok(())
    }

    pub(crate) fn buffer(&self, side: JoinSide) -> &ChunkBuffer {
        match side {
            JoinSide::Left => &self.left,
            JoinSide::Right => &self.right,
        }
    }

    pub(crate) fn buffer_mut(&mut self, side: JoinSide) -> &mut ChunkBuffer {
        match side {
            JoinSide::Left => &mut self.left,
            JoinSide::Right => &mut self.right,
        }
    }

    pub(crate) fn rows(&self, side: JoinSide) -> usize {
        self.buffer(side).row_count()
    }

    pub(crate) fn is_eof(&self, side: JoinSide) -> bool {
        match side {
            JoinSide::Left => self.left_eof,
            JoinSide::Right => self.right_eof,
        }
    }

    pub(crate) fn first_eof(&self) -> Option<JoinSide> {
        self.first_eof
    }

    /// Both sides past `limit` rows with neither finished cannot make progress.
    pub(crate) fn check_buffer_limit(&self, limit: usize) -> Result<(), String> {
        if !self.left_eof
            && !self.right_eof
            && self.left.row_count() > limit
            && self.right.row_count() > limit
        {
            return Err(format!(
                "join buffers exceed limit without eof: left={} right={} limit={}",
                self.left.row_count(),
                self.right.row_count(),
                limit
            ));
        }
        Ok(())
    }
}

/// Cumulative output row cap. A threshold of 0 disables it.
#[derive(Debug)]
pub(crate) struct OutputLimit {
    threshold: usize,
    emitted: usize,
}

impl OutputLimit {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            threshold,
            emitted: 0,
        }
    }

    pub(crate) fn emitted(&self) -> usize {
        self.emitted
    }

    /// Count `chunk` against the cap. Returns the (possibly sliced) chunk and whether the
    /// cap has been reached.
    pub(crate) fn apply(&mut self, chunk: Option<Chunk>) -> (Option<Chunk>, bool) {
        let Some(chunk) = chunk else {
            return (None, self.threshold > 0 && self.emitted >= self.threshold);
        };
        if self.threshold == 0 {
            self.emitted += chunk.len();
            return (Some(chunk), false);
        }
        let remaining = self.threshold.saturating_sub(self.emitted);
        if chunk.len() < remaining {
            self.emitted += chunk.len();
            return (Some(chunk), false);
        }
        self.emitted = self.threshold;
        let out = (remaining > 0).then(|| chunk.slice(0, remaining));
        (out, true)
    }
}
