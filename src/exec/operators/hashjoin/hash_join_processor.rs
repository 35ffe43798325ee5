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
//! Streaming hash join operator.
//!
//! Responsibilities:
//! - Accumulates both inputs until one side can serve as the build side, builds the
//!   hash index once, then probes the other side one bounded pass per `compute` call.
//! - Applies the optional residual filter, join-type output rules, and output truncation.
//!
//! Key exported interfaces:
//! - Types: `HashJoinOperatorFactory`.
//!
//! Current limitations:
//! - A side whose keys produce no hash entries at all is dropped instead of joined,
//!   even for LEFT and ANTI joins.

use std::sync::Arc;

use hashbrown::HashSet;

use super::join_hash_table::JoinHashTable;
use super::join_inputs::{JoinInputs, OutputLimit};
use super::join_probe_utils::{
    OutputProjection, ResidualFilter, apply_residual_filter, concat_output_chunks,
};
use super::join_strategy::JoinStrategy;
use crate::exec::chunk::Chunk;
use crate::exec::hash_table::key_builder::{HashEntry, build_composite_hash_values};
use crate::exec::node::join::{JoinAlgorithm, JoinConfig, JoinKernelConfig, JoinSide};
use crate::exec::pipeline::operator::{
    ComputeOutput, DualInputOperator, InputPort, Operator,
};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::runtime::mem_tracker::MemTracker;
use crate::streamjoin_logging::{debug, warn};

/// Factory for streaming hash join operators sharing one validated configuration.
pub struct HashJoinOperatorFactory {
    name: String,
    config: Arc<JoinConfig>,
    residual: Option<Arc<dyn ResidualFilter>>,
}

impl HashJoinOperatorFactory {
    pub fn new(
        config: JoinConfig,
        residual: Option<Arc<dyn ResidualFilter>>,
    ) -> Result<Self, String> {
        if config.algorithm != JoinAlgorithm::Hash {
            return Err(format!(
                "hash join factory requires a hash join config, got {:?}",
                config.algorithm
            ));
        }
        if !config.is_equi_join && residual.is_none() {
            return Err("non-equi hash join requires a residual filter".to_string());
        }
        Ok(Self {
            name: format!("HASH_JOIN ({})", config.join_type.as_str()),
            config: Arc::new(config),
            residual,
        })
    }

    pub fn try_from_kernel_config(
        cfg: &JoinKernelConfig,
        residual: Option<Arc<dyn ResidualFilter>>,
    ) -> Result<Self, String> {
        Self::new(
            JoinConfig::try_from_kernel_config(cfg, JoinAlgorithm::Hash)?,
            residual,
        )
    }

    pub fn from_json(
        json: &str,
        residual: Option<Arc<dyn ResidualFilter>>,
    ) -> Result<Self, String> {
        Self::try_from_kernel_config(&JoinKernelConfig::from_json(json)?, residual)
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }
}

impl OperatorFactory for HashJoinOperatorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, driver_id: i32) -> Box<dyn DualInputOperator> {
        Box::new(HashJoinOperator {
            name: self.name.clone(),
            driver_id,
            config: Arc::clone(&self.config),
            residual: self.residual.clone(),
            inputs: JoinInputs::new(),
            state: HashJoinState::Accumulating,
            strategy: JoinStrategy::new(self.config.join_type),
            projection: None,
            limit: OutputLimit::new(self.config.truncate_threshold),
            mem_tracker: None,
            passes: 0,
        })
    }
}

struct ProbeState {
    build_side: JoinSide,
    build_chunk: Chunk,
    table: JoinHashTable,
}

enum HashJoinState {
    Accumulating,
    Building { build_side: JoinSide },
    Probing(ProbeState),
    Done,
}

struct HashJoinOperator {
    name: String,
    driver_id: i32,
    config: Arc<JoinConfig>,
    residual: Option<Arc<dyn ResidualFilter>>,
    inputs: JoinInputs,
    state: HashJoinState,
    strategy: JoinStrategy,
    projection: Option<Arc<OutputProjection>>,
    limit: OutputLimit,
    mem_tracker: Option<Arc<MemTracker>>,
    passes: usize,
}

/// Matches gathered by one probe pass.
#[derive(Debug, Default, PartialEq, Eq)]
struct ProbeMatches {
    build_rows: Vec<u32>,
    probe_rows: Vec<u32>,
    /// Probe rows fully handled by this pass, counted from the front.
    consumed: usize,
}

/// Walk probe entries row by row, stopping at a row boundary once `batch_size` pairs
/// have been collected. Build rows are de-duplicated within one probe row.
fn collect_matches(
    entries: &[HashEntry],
    table: &JoinHashTable,
    probe_len: usize,
    batch_size: usize,
) -> ProbeMatches {
    let mut out = ProbeMatches {
        consumed: probe_len,
        ..ProbeMatches::default()
    };
    let mut seen: HashSet<u32> = HashSet::new();
    let mut i = 0usize;
    while i < entries.len() {
        let row = entries[i].row;
        let mut end = i + 1;
        while end < entries.len() && entries[end].row == row {
            end += 1;
        }
        if end - i == 1 {
            for &build_row in table.probe(entries[i].hash) {
                out.build_rows.push(build_row);
                out.probe_rows.push(row);
            }
        } else {
            seen.clear();
            for entry in &entries[i..end] {
                for &build_row in table.probe(entry.hash) {
                    if seen.insert(build_row) {
                        out.build_rows.push(build_row);
                        out.probe_rows.push(row);
                    }
                }
            }
        }
        i = end;
        if out.build_rows.len() >= batch_size && i < entries.len() {
            out.consumed = row as usize + 1;
            break;
        }
    }
    out
}

impl HashJoinOperator {
    fn key_columns(&self, side: JoinSide) -> &[String] {
        match side {
            JoinSide::Left => &self.config.left_join_columns,
            JoinSide::Right => &self.config.right_join_columns,
        }
    }

    /// Build side once it can be decided, else `None` (keep accumulating).
    fn choose_build_side(&self) -> Option<JoinSide> {
        let left_rows = self.inputs.rows(JoinSide::Left);
        let right_rows = self.inputs.rows(JoinSide::Right);
        let limit = self.config.buffer_limit_size;
        match (
            self.inputs.is_eof(JoinSide::Left),
            self.inputs.is_eof(JoinSide::Right),
        ) {
            (true, true) => Some(if left_rows < right_rows {
                JoinSide::Left
            } else if right_rows < left_rows {
                JoinSide::Right
            } else {
                self.inputs.first_eof().unwrap_or(JoinSide::Left)
            }),
            (true, false) => {
                (left_rows <= right_rows || right_rows > limit).then_some(JoinSide::Left)
            }
            (false, true) => {
                (right_rows <= left_rows || left_rows > limit).then_some(JoinSide::Right)
            }
            (false, false) => None,
        }
    }

    fn projection(&mut self) -> Result<Arc<OutputProjection>, String> {
        if let Some(projection) = self.projection.as_ref() {
            return Ok(Arc::clone(projection));
        }
        let projection = Arc::new(OutputProjection::resolve(
            &self.config,
            self.inputs.buffer(JoinSide::Left).schema().as_ref(),
            self.inputs.buffer(JoinSide::Right).schema().as_ref(),
        )?);
        self.projection = Some(Arc::clone(&projection));
        Ok(projection)
    }

    fn build(&mut self, build_side: JoinSide) -> Result<ProbeState, String> {
        let mut build_chunk = self
            .inputs
            .buffer_mut(build_side)
            .compact()?
            .cloned()
            .unwrap_or_default();
        let mut table = if build_chunk.is_empty() {
            JoinHashTable::default()
        } else {
            JoinHashTable::build(&build_chunk, self.key_columns(build_side))?
        };
        if table.is_empty() && !build_chunk.is_empty() {
            warn!(
                "{} build side {} has no usable join keys in {} rows; dropping it",
                self.name,
                build_side.as_str(),
                build_chunk.len()
            );
            self.inputs.buffer_mut(build_side).delete_rows()?;
            build_chunk = build_chunk.slice(0, 0);
        }
        if let Some(tracker) = self.mem_tracker.as_ref() {
            table.set_mem_tracker(MemTracker::new_child("hash table", tracker));
        }
        debug!(
            "{} built: driver_id={} build_side={} build_rows={} entries={} probe_rows_buffered={}",
            self.name,
            self.driver_id,
            build_side.as_str(),
            table.build_rows(),
            table.entry_count(),
            self.inputs.rows(build_side.other())
        );
        Ok(ProbeState {
            build_side,
            build_chunk,
            table,
        })
    }

    /// One probe pass over the buffered probe rows, plus completion when the probe side
    /// is exhausted.
    fn probe_pass(&mut self, probe: &ProbeState) -> Result<ComputeOutput, String> {
        let build_side = probe.build_side;
        let probe_side = build_side.other();
        let probe_chunk = self
            .inputs
            .buffer_mut(probe_side)
            .compact()?
            .cloned()
            .unwrap_or_default();

        let mut outputs = Vec::new();
        let mut projection = None;
        if !probe_chunk.is_empty() {
            self.passes += 1;
            let entries = build_composite_hash_values(&probe_chunk, self.key_columns(probe_side))?;
            if entries.is_empty() {
                warn!(
                    "{} probe side {} has no usable join keys in {} rows; dropping them",
                    self.name,
                    probe_side.as_str(),
                    probe_chunk.len()
                );
                if probe_side == JoinSide::Left {
                    self.strategy.discard(probe_chunk.len());
                }
                self.inputs.buffer_mut(probe_side).delete_rows()?;
            } else {
                let matches = collect_matches(
                    &entries,
                    &probe.table,
                    probe_chunk.len(),
                    self.config.batch_size,
                );
                let proj = self.projection()?;
                let (left, right, mut left_rows, mut right_rows) = match build_side {
                    JoinSide::Left => (
                        &probe.build_chunk,
                        &probe_chunk,
                        matches.build_rows,
                        matches.probe_rows,
                    ),
                    JoinSide::Right => (
                        &probe_chunk,
                        &probe.build_chunk,
                        matches.probe_rows,
                        matches.build_rows,
                    ),
                };
                if let Some(filter) = self.residual.as_ref() {
                    apply_residual_filter(
                        filter.as_ref(),
                        left,
                        right,
                        &mut left_rows,
                        &mut right_rows,
                    )?;
                }
                if let Some(chunk) = self.strategy.generate_result_table(
                    &proj,
                    left,
                    right,
                    &left_rows,
                    &right_rows,
                )? {
                    outputs.push(chunk);
                }
                if probe_side == JoinSide::Left
                    && let Some(chunk) = self.strategy.finish(&proj, &probe_chunk, matches.consumed)?
                {
                    outputs.push(chunk);
                }
                self.inputs
                    .buffer_mut(probe_side)
                    .clear_front_rows(matches.consumed)?;
                debug!(
                    "{} pass {}: driver_id={} probe_rows={} consumed={} pairs={}",
                    self.name,
                    self.passes,
                    self.driver_id,
                    probe_chunk.len(),
                    matches.consumed,
                    left_rows.len()
                );
                projection = Some(proj);
            }
        }

        let probe_done =
            self.inputs.is_eof(probe_side) && self.inputs.rows(probe_side) == 0;
        if probe_done && build_side == JoinSide::Left {
            let proj = self.projection()?;
            if let Some(chunk) =
                self.strategy
                    .finish(&proj, &probe.build_chunk, probe.build_chunk.len())?
            {
                outputs.push(chunk);
            }
            projection = Some(proj);
        }

        let chunk = match projection {
            Some(proj) => concat_output_chunks(proj.schema(), outputs)?,
            None => None,
        };
        let (chunk, truncated) = self.limit.apply(chunk);
        if truncated {
            debug!(
                "{} truncated at {} rows: driver_id={}",
                self.name,
                self.limit.emitted(),
                self.driver_id
            );
        }
        Ok(ComputeOutput {
            chunk,
            eof: probe_done || truncated,
        })
    }

    fn step(
        &mut self,
        left: &mut dyn InputPort,
        right: &mut dyn InputPort,
    ) -> Result<ComputeOutput, String> {
        self.inputs.pull(left, right)?;
        // Owned state is moved out for the step; an early error leaves it `Done`.
        let state = std::mem::replace(&mut self.state, HashJoinState::Done);
        let probe = match state {
            HashJoinState::Accumulating => match self.choose_build_side() {
                Some(build_side) => {
                    debug!(
                        "{} accumulating -> building: driver_id={} build_side={} left_rows={} right_rows={}",
                        self.name,
                        self.driver_id,
                        build_side.as_str(),
                        self.inputs.rows(JoinSide::Left),
                        self.inputs.rows(JoinSide::Right)
                    );
                    self.state = HashJoinState::Building { build_side };
                    self.build(build_side)?
                }
                None => {
                    self.inputs.check_buffer_limit(self.config.buffer_limit_size)?;
                    self.state = HashJoinState::Accumulating;
                    return Ok(ComputeOutput::pending());
                }
            },
            HashJoinState::Building { build_side } => self.build(build_side)?,
            HashJoinState::Probing(probe) => probe,
            HashJoinState::Done => return Ok(ComputeOutput::done()),
        };
        self.state = HashJoinState::Done;
        let out = self.probe_pass(&probe)?;
        if !out.eof {
            self.state = HashJoinState::Probing(probe);
        }
        Ok(out)
    }

    fn release(&mut self) {
        self.state = HashJoinState::Done;
        self.inputs = JoinInputs::new();
        self.projection = None;
    }
}

impl Operator for HashJoinOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.inputs.set_mem_tracker(&tracker);
        if let HashJoinState::Probing(probe) = &mut self.state {
            probe
                .table
                .set_mem_tracker(MemTracker::new_child("hash table", &tracker));
        }
        self.mem_tracker = Some(tracker);
    }

    fn close(&mut self) -> Result<(), String> {
        self.release();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, HashJoinState::Done)
    }
}

impl DualInputOperator for HashJoinOperator {
    fn compute(
        &mut self,
        left: &mut dyn InputPort,
        right: &mut dyn InputPort,
    ) -> Result<ComputeOutput, String> {
        if matches!(self.state, HashJoinState::Done) {
            return Ok(ComputeOutput::done());
        }
        match self.step(left, right) {
            Ok(out) => {
                if out.eof {
                    debug!(
                        "{} finished: driver_id={} passes={} output_rows={} join_type={}",
                        self.name,
                        self.driver_id,
                        self.passes,
                        self.limit.emitted(),
                        self.strategy.join_type().as_str()
                    );
                    self.release();
                }
                Ok(out)
            }
            Err(err) => {
                self.release();
                Err(err)
            }
        }
    }
}
