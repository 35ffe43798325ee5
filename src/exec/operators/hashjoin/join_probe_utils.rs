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
//! Utility functions for join output construction.
//!
//! Responsibilities:
//! - Resolves configured output columns against the runtime input schemas (`OutputProjection`).
//! - Builds joined chunks for matched pairs and for unmatched-left rows with default-filled right
//!   columns.
//! - Applies the host-supplied residual predicate to candidate row pairs.
//!
//! Key exported interfaces:
//! - Types: `OutputProjection`, `ResidualFilter`.
//! - Functions: `apply_residual_filter`, `concat_output_chunks`.
//!
//! Current limitations:
//! - Default values are parsed with Arrow's string cast; types without a Utf8 cast path
//!   (lists, structs) cannot carry a default.

use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray, UInt32Array, new_null_array};
use arrow::compute::{CastOptions, cast_with_options, concat_batches, take};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::exec::chunk::Chunk;
use crate::exec::node::join::{JoinConfig, JoinSide};

/// Non-equi part of a join condition, evaluated on candidate row pairs.
///
/// `left_rows[i]` and `right_rows[i]` address one pair; the result must have one flag per
/// pair, `true` to keep it.
pub trait ResidualFilter: Send + Sync {
    fn filter(
        &self,
        left: &Chunk,
        right: &Chunk,
        left_rows: &[u32],
        right_rows: &[u32],
    ) -> Result<Vec<bool>, String>;
}

/// Keep only pairs accepted by `filter`, preserving order.
pub(crate) fn apply_residual_filter(
    filter: &dyn ResidualFilter,
    left: &Chunk,
    right: &Chunk,
    left_rows: &mut Vec<u32>,
    right_rows: &mut Vec<u32>,
) -> Result<(), String> {
    if left_rows.is_empty() {
        return Ok(());
    }
    let keep = filter.filter(left, right, left_rows, right_rows)?;
    if keep.len() != left_rows.len() {
        return Err(format!(
            "residual filter returned {} flags for {} row pairs",
            keep.len(),
            left_rows.len()
        ));
    }
    let mut write = 0usize;
    for (read, keep) in keep.iter().enumerate() {
        if *keep {
            left_rows[write] = left_rows[read];
            right_rows[write] = right_rows[read];
            write += 1;
        }
    }
    left_rows.truncate(write);
    right_rows.truncate(write);
    Ok(())
}

#[derive(Clone, Debug)]
enum ColumnSource {
    Input { side: JoinSide, index: usize },
    /// The side never delivered a schema; the column is all-null or all-default.
    Absent { side: JoinSide },
}

#[derive(Clone, Debug)]
struct ProjectedColumn {
    source: ColumnSource,
    data_type: DataType,
    /// One-row array holding the fill value for unmatched rows.
    default: Option<ArrayRef>,
}

/// Output columns resolved against concrete input schemas.
#[derive(Clone, Debug)]
pub(crate) struct OutputProjection {
    schema: SchemaRef,
    columns: Vec<ProjectedColumn>,
}

impl OutputProjection {
    pub(crate) fn resolve(
        config: &JoinConfig,
        left_schema: Option<&SchemaRef>,
        right_schema: Option<&SchemaRef>,
    ) -> Result<Self, String> {
        let output = config.output_schema.columns();
        let mut fields = Vec::with_capacity(output.len());
        let mut columns = Vec::with_capacity(output.len());
        for column in output {
            let input_schema = match column.side {
                JoinSide::Left => left_schema,
                JoinSide::Right => right_schema,
            };
            let default_text = config.default_values.get(&column.name);
            let (source, data_type) = match input_schema {
                Some(schema) => {
                    let (index, field) =
                        schema.column_with_name(&column.input_field).ok_or_else(|| {
                            format!(
                                "{} input field {} not found for output column {} (fields={:?})",
                                column.side.as_str(),
                                column.input_field,
                                column.name,
                                schema
                                    .fields()
                                    .iter()
                                    .map(|f| f.name().as_str())
                                    .collect::<Vec<_>>()
                            )
                        })?;
                    (
                        ColumnSource::Input {
                            side: column.side,
                            index,
                        },
                        field.data_type().clone(),
                    )
                }
                None => {
                    let data_type = if default_text.is_some() {
                        DataType::Utf8
                    } else {
                        DataType::Null
                    };
                    (ColumnSource::Absent { side: column.side }, data_type)
                }
            };
            let default = match default_text {
                Some(text) => Some(parse_default_value(&column.name, text, &data_type)?),
                None => None,
            };
            fields.push(Field::new(column.name.clone(), data_type.clone(), true));
            columns.push(ProjectedColumn {
                source,
                data_type,
                default,
            });
        }
        Ok(Self {
            schema: Arc::new(Schema::new(fields)),
            columns,
        })
    }

    pub(crate) fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Materialize matched pairs. `right` may be `None` when no right column is projected.
    pub(crate) fn build_pairs(
        &self,
        left: &Chunk,
        right: Option<&Chunk>,
        left_rows: &[u32],
        right_rows: &[u32],
    ) -> Result<Option<Chunk>, String> {
        if left_rows.is_empty() {
            return Ok(None);
        }
        if left_rows.len() != right_rows.len() {
            return Err(format!(
                "join row pair arity mismatch: left={} right={}",
                left_rows.len(),
                right_rows.len()
            ));
        }
        let left_idx = UInt32Array::from(left_rows.to_vec());
        let right_idx = UInt32Array::from(right_rows.to_vec());
        let mut arrays = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let array = match &column.source {
                ColumnSource::Input { side, index } => {
                    let (chunk, idx) = match side {
                        JoinSide::Left => (left, &left_idx),
                        JoinSide::Right => (
                            right.ok_or_else(|| {
                                "right chunk required for projected right column".to_string()
                            })?,
                            &right_idx,
                        ),
                    };
                    let values = chunk.columns().get(*index).ok_or_else(|| {
                        format!("{} column index {} out of bounds", side.as_str(), index)
                    })?;
                    take(values.as_ref(), idx, None).map_err(|e| e.to_string())?
                }
                ColumnSource::Absent { side } => {
                    return Err(format!(
                        "{} side produced rows without a schema",
                        side.as_str()
                    ));
                }
            };
            arrays.push(array);
        }
        self.finish_batch(arrays)
    }

    /// Materialize unmatched left rows; right columns take their default or null.
    pub(crate) fn build_left_only(
        &self,
        left: &Chunk,
        left_rows: &[u32],
    ) -> Result<Option<Chunk>, String> {
        if left_rows.is_empty() {
            return Ok(None);
        }
        let len = left_rows.len();
        let left_idx = UInt32Array::from(left_rows.to_vec());
        let mut arrays = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let array = match &column.source {
                ColumnSource::Input {
                    side: JoinSide::Left,
                    index,
                } => {
                    let values = left
                        .columns()
                        .get(*index)
                        .ok_or_else(|| format!("left column index {} out of bounds", index))?;
                    take(values.as_ref(), &left_idx, None).map_err(|e| e.to_string())?
                }
                ColumnSource::Absent {
                    side: JoinSide::Left,
                } => {
                    return Err("left side produced rows without a schema".to_string());
                }
                ColumnSource::Input {
                    side: JoinSide::Right,
                    ..
                }
                | ColumnSource::Absent {
                    side: JoinSide::Right,
                } => match &column.default {
                    Some(default) => {
                        let repeat = UInt32Array::from(vec![0u32; len]);
                        take(default.as_ref(), &repeat, None).map_err(|e| e.to_string())?
                    }
                    None => new_null_array(&column.data_type, len),
                },
            };
            arrays.push(array);
        }
        self.finish_batch(arrays)
    }

    fn finish_batch(&self, arrays: Vec<ArrayRef>) -> Result<Option<Chunk>, String> {
        let batch =
            RecordBatch::try_new(Arc::clone(&self.schema), arrays).map_err(|e| e.to_string())?;
        Ok(Some(Chunk::try_new(batch)?))
    }
}

fn parse_default_value(column: &str, text: &str, data_type: &DataType) -> Result<ArrayRef, String> {
    let source = StringArray::from(vec![text]);
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    cast_with_options(&source, data_type, &options).map_err(|e| {
        format!(
            "invalid default value {:?} for column {} of type {:?}: {}",
            text, column, data_type, e
        )
    })
}

/// Merge the chunks produced by one step into a single output chunk.
pub(crate) fn concat_output_chunks(
    schema: &SchemaRef,
    chunks: Vec<Chunk>,
) -> Result<Option<Chunk>, String> {
    let mut chunks: Vec<Chunk> = chunks.into_iter().filter(|c| !c.is_empty()).collect();
    match chunks.len() {
        0 => Ok(None),
        1 => Ok(chunks.pop()),
        _ => {
            let batches: Vec<RecordBatch> = chunks.into_iter().map(|c| c.batch).collect();
            let merged = concat_batches(schema, &batches).map_err(|e| e.to_string())?;
            Ok(Some(Chunk::try_new(merged)?))
        }
    }
}
