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
//! Join-type specific output rules.
//!
//! Responsibilities:
//! - Turns matched (left, right) row pairs into output rows per join type.
//! - Remembers which left rows matched and emits the unmatched ones on `finish`.
//!
//! Match flags are indexed by row position in the *current* left buffer. Callers
//! that evict `n` left rows must call `finish(.., n)` first so the flags shift with
//! the buffer.

use super::join_probe_utils::OutputProjection;
use crate::exec::chunk::Chunk;
use crate::exec::node::join::JoinType;

#[derive(Debug)]
pub(crate) struct JoinStrategy {
    join_type: JoinType,
    left_matched: Vec<bool>,
}

impl JoinStrategy {
    pub(crate) fn new(join_type: JoinType) -> Self {
        Self {
            join_type,
            left_matched: Vec::new(),
        }
    }

    pub(crate) fn join_type(&self) -> JoinType {
        self.join_type
    }

    /// Project matched pairs and record left matches.
    pub(crate) fn generate_result_table(
        &mut self,
        projection: &OutputProjection,
        left: &Chunk,
        right: &Chunk,
        left_rows: &[u32],
        right_rows: &[u32],
    ) -> Result<Option<Chunk>, String> {
        if self.left_matched.len() < left.len() {
            self.left_matched.resize(left.len(), false);
        }
        match self.join_type {
            JoinType::Inner | JoinType::Cross | JoinType::LeftOuter => {
                self.mark(left_rows)?;
                projection.build_pairs(left, Some(right), left_rows, right_rows)
            }
            JoinType::LeftSemi => {
                // First match only; later matches of the same row are dropped.
                let mut newly = Vec::new();
                for &row in left_rows {
                    let flag = self.flag_mut(row)?;
                    if !*flag {
                        *flag = true;
                        newly.push(row);
                    }
                }
                projection.build_left_only(left, &newly)
            }
            JoinType::LeftAnti => {
                self.mark(left_rows)?;
                Ok(None)
            }
        }
    }

    /// Emit unmatched rows among the first `left_size` left rows, then forget their flags.
    pub(crate) fn finish(
        &mut self,
        projection: &OutputProjection,
        left: &Chunk,
        left_size: usize,
    ) -> Result<Option<Chunk>, String> {
        if left_size > left.len() {
            return Err(format!(
                "join finish over {} rows but left chunk has {}",
                left_size,
                left.len()
            ));
        }
        if self.left_matched.len() < left_size {
            self.left_matched.resize(left_size, false);
        }
        let flags: Vec<bool> = self.left_matched.drain(..left_size).collect();
        match self.join_type {
            JoinType::LeftOuter | JoinType::LeftAnti => {
                let unmatched: Vec<u32> = flags
                    .iter()
                    .enumerate()
                    .filter(|(_, matched)| !**matched)
                    .map(|(row, _)| row as u32)
                    .collect();
                projection.build_left_only(left, &unmatched)
            }
            JoinType::Inner | JoinType::Cross | JoinType::LeftSemi => Ok(None),
        }
    }

    /// Forget the first `left_size` flags without emitting anything.
    pub(crate) fn discard(&mut self, left_size: usize) {
        let n = left_size.min(self.left_matched.len());
        self.left_matched.drain(..n);
    }

    fn mark(&mut self, left_rows: &[u32]) -> Result<(), String> {
        for &row in left_rows {
            *self.flag_mut(row)? = true;
        }
        Ok(())
    }

    fn flag_mut(&mut self, row: u32) -> Result<&mut bool, String> {
        let len = self.left_matched.len();
        self.left_matched
            .get_mut(row as usize)
            .ok_or_else(|| format!("left row {} out of range ({} rows)", row, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Array, ArrayRef, Int64Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};

    use crate::exec::node::join::{JoinAlgorithm, JoinConfig, JoinKernelConfig};

    fn config(join_type: &str) -> JoinConfig {
        let semi = matches!(join_type, "SEMI" | "ANTI");
        let raw = JoinKernelConfig {
            join_type: join_type.to_string(),
            left_input_fields: vec!["a".to_string()],
            right_input_fields: vec!["b".to_string()],
            output_fields: if semi {
                vec!["a".to_string()]
            } else {
                vec!["a".to_string(), "b".to_string()]
            },
            left_join_columns: vec!["a".to_string()],
            right_join_columns: vec!["b".to_string()],
            ..JoinKernelConfig::default()
        };
        JoinConfig::try_from_kernel_config(&raw, JoinAlgorithm::Hash).expect("config")
    }

    fn chunk(name: &str, values: Vec<i64>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Int64, true)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values)) as ArrayRef])
            .expect("batch");
        Chunk::try_new(batch).expect("chunk")
    }

    fn column(chunk: &Chunk, name: &str) -> Vec<Option<i64>> {
        let array = chunk.column_by_name(name).expect("column");
        let array = array.as_any().downcast_ref::<Int64Array>().expect("int64");
        (0..array.len())
            .map(|i| (!array.is_null(i)).then(|| array.value(i)))
            .collect()
    }

    fn setup(join_type: &str) -> (JoinStrategy, OutputProjection, Chunk, Chunk) {
        let cfg = config(join_type);
        let left = chunk("a", vec![10, 20, 30]);
        let right = chunk("b", vec![20, 30, 30]);
        let projection =
            OutputProjection::resolve(&cfg, Some(&left.schema()), Some(&right.schema()))
                .expect("projection");
        (JoinStrategy::new(cfg.join_type), projection, left, right)
    }

    #[test]
    fn left_outer_emits_unmatched_once() {
        let (mut strategy, projection, left, right) = setup("LEFT");
        let out = strategy
            .generate_result_table(&projection, &left, &right, &[1, 2, 2], &[0, 1, 2])
            .expect("generate")
            .expect("chunk");
        assert_eq!(out.len(), 3);
        let rest = strategy
            .finish(&projection, &left, 3)
            .expect("finish")
            .expect("chunk");
        assert_eq!(column(&rest, "a"), vec![Some(10)]);
        assert_eq!(column(&rest, "b"), vec![None]);
    }

    #[test]
    fn semi_emits_each_left_row_once_across_calls() {
        let (mut strategy, projection, left, right) = setup("SEMI");
        let first = strategy
            .generate_result_table(&projection, &left, &right, &[2, 2], &[1, 2])
            .expect("generate")
            .expect("chunk");
        assert_eq!(column(&first, "a"), vec![Some(30)]);
        let second = strategy
            .generate_result_table(&projection, &left, &right, &[2, 1], &[1, 0])
            .expect("generate")
            .expect("chunk");
        assert_eq!(column(&second, "a"), vec![Some(20)]);
        assert!(strategy.finish(&projection, &left, 3).expect("finish").is_none());
    }

    #[test]
    fn anti_emits_only_on_finish() {
        let (mut strategy, projection, left, right) = setup("ANTI");
        assert!(
            strategy
                .generate_result_table(&projection, &left, &right, &[1], &[0])
                .expect("generate")
                .is_none()
        );
        let rest = strategy
            .finish(&projection, &left, 3)
            .expect("finish")
            .expect("chunk");
        assert_eq!(column(&rest, "a"), vec![Some(10), Some(30)]);
    }

    #[test]
    fn finish_shifts_flags_with_evicted_rows() {
        let (mut strategy, projection, left, right) = setup("ANTI");
        strategy
            .generate_result_table(&projection, &left, &right, &[2], &[1])
            .expect("generate");
        // Rows 0 and 1 leave the buffer; row 2 (matched) becomes row 0.
        let first = strategy
            .finish(&projection, &left, 2)
            .expect("finish")
            .expect("chunk");
        assert_eq!(column(&first, "a"), vec![Some(10), Some(20)]);
        let tail = left.slice(2, 1);
        assert!(strategy.finish(&projection, &tail, 1).expect("finish").is_none());
    }
}
