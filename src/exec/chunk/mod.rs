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
mod buffer;

pub use buffer::ChunkBuffer;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::buffer::Buffer;
use arrow::datatypes::{Schema, SchemaRef};

/// A batch of rows flowing through join ports.
/// Wrapper around Arrow RecordBatch with by-name column lookup.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
    name_to_index: Arc<HashMap<String, usize>>,
}

impl Chunk {
    pub fn try_new(batch: RecordBatch) -> Result<Self, String> {
        let name_to_index = name_to_index_from_schema(batch.schema().as_ref())?;
        Ok(Self {
            batch,
            name_to_index: Arc::new(name_to_index),
        })
    }

    pub fn new_empty(schema: SchemaRef) -> Result<Self, String> {
        Self::try_new(RecordBatch::new_empty(schema))
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, String> {
        self.name_to_index.get(name).copied().ok_or_else(|| {
            format!(
                "column {} not found in chunk (num_columns={}, columns={:?})",
                name,
                self.batch.num_columns(),
                self.batch
                    .schema()
                    .fields()
                    .iter()
                    .map(|f| f.name().as_str())
                    .collect::<Vec<_>>()
            )
        })
    }

    pub fn column_by_name(&self, name: &str) -> Result<ArrayRef, String> {
        let idx = self.column_index(name)?;
        self.batch
            .columns()
            .get(idx)
            .cloned()
            .ok_or_else(|| format!("column {} mapped to invalid index {}", name, idx))
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn slice(&self, offset: usize, length: usize) -> Self {
        Self {
            batch: self.batch.slice(offset, length),
            name_to_index: Arc::clone(&self.name_to_index),
        }
    }

    pub fn estimated_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
            name_to_index: Arc::new(HashMap::new()),
        }
    }
}

fn name_to_index_from_schema(schema: &Schema) -> Result<HashMap<String, usize>, String> {
    let mut map = HashMap::with_capacity(schema.fields().len());
    for (idx, f) in schema.fields().iter().enumerate() {
        if map.insert(f.name().clone(), idx).is_some() {
            // Duplicate names would make key and output resolution ambiguous.
            return Err(format!(
                "duplicate column name {} in chunk schema: fields={:?}",
                f.name(),
                schema
                    .fields()
                    .iter()
                    .map(|f| f.name().as_str())
                    .collect::<Vec<_>>()
            ));
        }
    }
    Ok(map)
}

/// Estimate RecordBatch size by summing unique buffers inside the batch.
///
/// Sliced batches report the full size of the buffers they still pin.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}
