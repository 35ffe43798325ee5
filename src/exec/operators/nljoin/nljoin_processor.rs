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
//! Nested-loop join operator.
//!
//! Responsibilities:
//! - Accumulates both inputs until one side finishes; that side becomes the full table.
//! - Crosses each streamed (large-side) row with every full-table row, one bounded pass
//!   per `compute` call, never splitting a large row across passes.
//! - Shares output rules, residual filtering and truncation with the hash join.
//!
//! Key exported interfaces:
//! - Types: `NestedLoopJoinOperatorFactory`.

use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::exec::hash_table::key_builder::build_composite_hash_values;
use crate::exec::node::join::{JoinAlgorithm, JoinConfig, JoinKernelConfig, JoinSide, JoinType};
use crate::exec::operators::hashjoin::join_inputs::{JoinInputs, OutputLimit};
use crate::exec::operators::hashjoin::join_probe_utils::{
    OutputProjection, ResidualFilter, apply_residual_filter, concat_output_chunks,
};
use crate::exec::operators::hashjoin::join_strategy::JoinStrategy;
use crate::exec::pipeline::operator::{ComputeOutput, DualInputOperator, InputPort, Operator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::runtime::mem_tracker::MemTracker;
use crate::streamjoin_logging::debug;

/// Factory for nested-loop join operators sharing one validated configuration.
pub struct NestedLoopJoinOperatorFactory {
    name: String,
    config: Arc<JoinConfig>,
    residual: Option<Arc<dyn ResidualFilter>>,
}

impl NestedLoopJoinOperatorFactory {
    pub fn new(
        config: JoinConfig,
        residual: Option<Arc<dyn ResidualFilter>>,
    ) -> Result<Self, String> {
        if config.algorithm != JoinAlgorithm::NestedLoop {
            return Err(format!(
                "nested-loop join factory requires a nested-loop config, got {:?}",
                config.algorithm
            ));
        }
        if !config.is_equi_join && config.join_type != JoinType::Cross && residual.is_none() {
            return Err("non-equi nested-loop join requires a residual filter".to_string());
        }
        Ok(Self {
            name: format!("NESTLOOP_JOIN ({})", config.join_type.as_str()),
            config: Arc::new(config),
            residual,
        })
    }

    pub fn try_from_kernel_config(
        cfg: &JoinKernelConfig,
        residual: Option<Arc<dyn ResidualFilter>>,
    ) -> Result<Self, String> {
        Self::new(
            JoinConfig::try_from_kernel_config(cfg, JoinAlgorithm::NestedLoop)?,
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

impl OperatorFactory for NestedLoopJoinOperatorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, driver_id: i32) -> Box<dyn DualInputOperator> {
        Box::new(NestedLoopJoinOperator {
            name: self.name.clone(),
            driver_id,
            config: Arc::clone(&self.config),
            residual: self.residual.clone(),
            inputs: JoinInputs::new(),
            state: NlJoinState::Accumulating,
            strategy: JoinStrategy::new(self.config.join_type),
            projection: None,
            limit: OutputLimit::new(self.config.truncate_threshold),
            passes: 0,
        })
    }
}

struct FullTable {
    side: JoinSide,
    chunk: Chunk,
    /// Per-row composite key hashes, sorted; `None` when no join keys are configured.
    keys: Option<Vec<Vec<u64>>>,
}

enum NlJoinState {
    Accumulating,
    WaitingFullTable { full_side: JoinSide },
    Probing(FullTable),
    Done,
}

struct NestedLoopJoinOperator {
    name: String,
    driver_id: i32,
    config: Arc<JoinConfig>,
    residual: Option<Arc<dyn ResidualFilter>>,
    inputs: JoinInputs,
    state: NlJoinState,
    strategy: JoinStrategy,
    projection: Option<Arc<OutputProjection>>,
    limit: OutputLimit,
    passes: usize,
}

/// Sorted, de-duplicated composite key hashes per row.
fn row_key_hashes(chunk: &Chunk, key_columns: &[String]) -> Result<Vec<Vec<u64>>, String> {
    let mut rows = vec![Vec::new(); chunk.len()];
    if chunk.is_empty() {
        return Ok(rows);
    }
    for entry in build_composite_hash_values(chunk, key_columns)? {
        rows[entry.row as usize].push(entry.hash);
    }
    for hashes in &mut rows {
        hashes.sort_unstable();
        hashes.dedup();
    }
    Ok(rows)
}

fn keys_intersect(a: &[u64], b: &[u64]) -> bool {
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            return true;
        }
        if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    false
}

/// Pairs gathered by one pass, as (full row, large row).
#[derive(Debug, Default, PartialEq, Eq)]
struct CrossMatches {
    full_rows: Vec<u32>,
    large_rows: Vec<u32>,
    consumed: usize,
}

fn collect_cross_matches(
    full_len: usize,
    full_keys: Option<&[Vec<u64>]>,
    large_len: usize,
    large_keys: Option<&[Vec<u64>]>,
    batch_size: usize,
) -> CrossMatches {
    let mut out = CrossMatches {
        consumed: large_len,
        ..CrossMatches::default()
    };
    for large_row in 0..large_len {
        for full_row in 0..full_len {
            let keep = match (full_keys, large_keys) {
                (Some(full), Some(large)) => keys_intersect(&full[full_row], &large[large_row]),
                _ => true,
            };
            if keep {
                out.full_rows.push(full_row as u32);
                out.large_rows.push(large_row as u32);
            }
        }
        if out.full_rows.len() >= batch_size && large_row + 1 < large_len {
            out.consumed = large_row + 1;
            break;
        }
    }
    out
}

impl NestedLoopJoinOperator {
    fn key_columns(&self, side: JoinSide) -> Option<&[String]> {
        let keys = match side {
            JoinSide::Left => &self.config.left_join_columns,
            JoinSide::Right => &self.config.right_join_columns,
        };
        (!keys.is_empty() && self.config.join_type != JoinType::Cross).then_some(keys.as_slice())
    }

    /// The first side to finish; if both finish in the same pull, the smaller (left on a tie).
    fn choose_full_side(&self) -> Option<JoinSide> {
        match (
            self.inputs.is_eof(JoinSide::Left),
            self.inputs.is_eof(JoinSide::Right),
        ) {
            (true, true) => Some(
                if self.inputs.rows(JoinSide::Right) < self.inputs.rows(JoinSide::Left) {
                    JoinSide::Right
                } else {
                    JoinSide::Left
                },
            ),
            (true, false) => Some(JoinSide::Left),
            (false, true) => Some(JoinSide::Right),
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

    fn materialize_full_table(&mut self, full_side: JoinSide) -> Result<FullTable, String> {
        let chunk = self
            .inputs
            .buffer_mut(full_side)
            .compact()?
            .cloned()
            .unwrap_or_default();
        if chunk.len() > u32::MAX as usize {
            return Err(format!(
                "nested-loop full table too large: rows={} max={}",
                chunk.len(),
                u32::MAX
            ));
        }
        let keys = match self.key_columns(full_side) {
            Some(columns) => Some(row_key_hashes(&chunk, columns)?),
            None => None,
        };
        debug!(
            "{} full table ready: driver_id={} full_side={} full_rows={} large_rows_buffered={}",
            self.name,
            self.driver_id,
            full_side.as_str(),
            chunk.len(),
            self.inputs.rows(full_side.other())
        );
        Ok(FullTable {
            side: full_side,
            chunk,
            keys,
        })
    }

    fn probe_pass(&mut self, full: &FullTable) -> Result<ComputeOutput, String> {
        let full_side = full.side;
        let large_side = full_side.other();
        let large_chunk = self
            .inputs
            .buffer_mut(large_side)
            .compact()?
            .cloned()
            .unwrap_or_default();

        let mut outputs = Vec::new();
        let mut projection = None;
        if !large_chunk.is_empty() {
            self.passes += 1;
            if large_chunk.len() > u32::MAX as usize {
                return Err(format!(
                    "nested-loop large side too large: rows={} max={}",
                    large_chunk.len(),
                    u32::MAX
                ));
            }
            let large_keys = match (full.keys.as_ref(), self.key_columns(large_side)) {
                (Some(_), Some(columns)) => Some(row_key_hashes(&large_chunk, columns)?),
                _ => None,
            };
            let matches = collect_cross_matches(
                full.chunk.len(),
                full.keys.as_deref(),
                large_chunk.len(),
                large_keys.as_deref(),
                self.config.batch_size,
            );
            let proj = self.projection()?;
            let (left, right, mut left_rows, mut right_rows) = match full_side {
                JoinSide::Left => (
                    &full.chunk,
                    &large_chunk,
                    matches.full_rows,
                    matches.large_rows,
                ),
                JoinSide::Right => (
                    &large_chunk,
                    &full.chunk,
                    matches.large_rows,
                    matches.full_rows,
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
            if let Some(chunk) =
                self.strategy
                    .generate_result_table(&proj, left, right, &left_rows, &right_rows)?
            {
                outputs.push(chunk);
            }
            if large_side == JoinSide::Left
                && let Some(chunk) = self.strategy.finish(&proj, &large_chunk, matches.consumed)?
            {
                outputs.push(chunk);
            }
            self.inputs
                .buffer_mut(large_side)
                .clear_front_rows(matches.consumed)?;
            debug!(
                "{} pass {}: driver_id={} large_rows={} consumed={} pairs={}",
                self.name,
                self.passes,
                self.driver_id,
                large_chunk.len(),
                matches.consumed,
                left_rows.len()
            );
            projection = Some(proj);
        }

        let large_done = self.inputs.is_eof(large_side) && self.inputs.rows(large_side) == 0;
        if large_done && full_side == JoinSide::Left {
            let proj = self.projection()?;
            if let Some(chunk) = self.strategy.finish(&proj, &full.chunk, full.chunk.len())? {
                outputs.push(chunk);
            }
            projection = Some(proj);
        }

        let chunk = match projection {
            Some(proj) => concat_output_chunks(proj.schema(), outputs)?,
            None => None,
        };
        let (chunk, truncated) = self.limit.apply(chunk);
        Ok(ComputeOutput {
            chunk,
            eof: large_done || truncated,
        })
    }

    fn step(
        &mut self,
        left: &mut dyn InputPort,
        right: &mut dyn InputPort,
    ) -> Result<ComputeOutput, String> {
        self.inputs.pull(left, right)?;
        let state = std::mem::replace(&mut self.state, NlJoinState::Done);
        let full_side = match state {
            NlJoinState::Accumulating => match self.choose_full_side() {
                Some(full_side) => {
                    debug!(
                        "{} accumulating -> waiting full table: driver_id={} full_side={} left_rows={} right_rows={}",
                        self.name,
                        self.driver_id,
                        full_side.as_str(),
                        self.inputs.rows(JoinSide::Left),
                        self.inputs.rows(JoinSide::Right)
                    );
                    full_side
                }
                None => {
                    self.inputs.check_buffer_limit(self.config.buffer_limit_size)?;
                    self.state = NlJoinState::Accumulating;
                    return Ok(ComputeOutput::pending());
                }
            },
            NlJoinState::WaitingFullTable { full_side } => full_side,
            NlJoinState::Probing(full) => {
                let out = self.probe_pass(&full)?;
                if !out.eof {
                    self.state = NlJoinState::Probing(full);
                }
                return Ok(out);
            }
            NlJoinState::Done => return Ok(ComputeOutput::done()),
        };
        self.state = NlJoinState::WaitingFullTable { full_side };
        let full = self.materialize_full_table(full_side)?;
        self.state = NlJoinState::Done;
        let out = self.probe_pass(&full)?;
        if !out.eof {
            self.state = NlJoinState::Probing(full);
        }
        Ok(out)
    }

    fn release(&mut self) {
        self.state = NlJoinState::Done;
        self.inputs = JoinInputs::new();
        self.projection = None;
    }
}

impl Operator for NestedLoopJoinOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.inputs.set_mem_tracker(&tracker);
    }

    fn close(&mut self) -> Result<(), String> {
        self.release();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, NlJoinState::Done)
    }
}

impl DualInputOperator for NestedLoopJoinOperator {
    fn compute(
        &mut self,
        left: &mut dyn InputPort,
        right: &mut dyn InputPort,
    ) -> Result<ComputeOutput, String> {
        if matches!(self.state, NlJoinState::Done) {
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
