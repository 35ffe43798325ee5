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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Int64Array, Int64Builder, ListBuilder, RecordBatch, StringArray,
};
use arrow::datatypes::{Field, Schema};
use arrow::util::pretty::pretty_format_batches;
use tempfile::TempDir;

use streamjoin::{
    Chunk, ChunkQueue, DualInputOperator, JoinDriver, JoinKernelConfig, OperatorFactory,
    streamjoin_config, streamjoin_logging,
};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a test configuration with the given `[join]` section body.
    pub fn with_join_section(join: &str) -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_streamjoin.toml");
        let config_content = format!(
            r#"
log_level = "debug"

[join]
{join}
"#
        );
        std::fs::write(&config_path, config_content)?;
        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    pub fn new() -> anyhow::Result<Self> {
        Self::with_join_section("")
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        streamjoin_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static streamjoin_config::StreamJoinConfig> {
        streamjoin_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

pub fn int_col(values: Vec<Option<i64>>) -> ArrayRef {
    Arc::new(Int64Array::from(values))
}

pub fn ints(values: &[i64]) -> ArrayRef {
    Arc::new(Int64Array::from(values.to_vec()))
}

pub fn str_col(values: &[&str]) -> ArrayRef {
    Arc::new(StringArray::from(values.to_vec()))
}

pub fn int_list_col(rows: Vec<Option<Vec<i64>>>) -> ArrayRef {
    let mut builder = ListBuilder::new(Int64Builder::new());
    for row in rows {
        match row {
            Some(values) => {
                for v in values {
                    builder.values().append_value(v);
                }
                builder.append(true);
            }
            None => builder.append(false),
        }
    }
    Arc::new(builder.finish())
}

/// Build a chunk from named columns.
pub fn chunk(columns: Vec<(&str, ArrayRef)>) -> Chunk {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, array)| array).collect();
    let batch =
        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).expect("record batch");
    Chunk::try_new(batch).expect("chunk")
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Kernel config joining `left_fields` and `right_fields` on one key pair. Output columns
/// are the input names (left only for SEMI/ANTI).
pub fn kernel_config(
    join_type: &str,
    left_fields: &[&str],
    right_fields: &[&str],
    left_key: &[&str],
    right_key: &[&str],
) -> JoinKernelConfig {
    let left_only = matches!(join_type, "SEMI" | "ANTI");
    let mut output = strings(left_fields);
    if !left_only {
        output.extend(strings(right_fields));
    }
    JoinKernelConfig {
        join_type: join_type.to_string(),
        left_input_fields: strings(left_fields),
        right_input_fields: strings(right_fields),
        output_fields: output,
        left_join_columns: strings(left_key),
        right_join_columns: strings(right_key),
        ..JoinKernelConfig::default()
    }
}

pub fn set_join_hint(cfg: &mut JoinKernelConfig, key: &str, value: &str) {
    cfg.hints
        .entry("join".to_string())
        .or_insert_with(HashMap::new)
        .insert(key.to_string(), value.to_string());
}

/// Drive a fresh operator over finished inputs and return every output chunk.
pub fn run_join(
    factory: &dyn OperatorFactory,
    left: Vec<Chunk>,
    right: Vec<Chunk>,
) -> Result<Vec<Chunk>, String> {
    let mut driver = JoinDriver::with_inputs(
        0,
        factory.create(0),
        ChunkQueue::from_chunks(left),
        ChunkQueue::from_chunks(right),
    );
    driver.run_to_end(100_000)
}

pub fn total_rows(chunks: &[Chunk]) -> usize {
    chunks.iter().map(Chunk::len).sum()
}

pub fn collect_i64(chunks: &[Chunk], column: &str) -> Vec<Option<i64>> {
    let mut out = Vec::new();
    for chunk in chunks {
        let array = chunk.column_by_name(column).expect("column");
        let array = array
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64 column");
        for i in 0..array.len() {
            out.push((!array.is_null(i)).then(|| array.value(i)));
        }
    }
    out
}

pub fn collect_str(chunks: &[Chunk], column: &str) -> Vec<Option<String>> {
    let mut out = Vec::new();
    for chunk in chunks {
        let array = chunk.column_by_name(column).expect("column");
        let array = array
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8 column");
        for i in 0..array.len() {
            out.push((!array.is_null(i)).then(|| array.value(i).to_string()));
        }
    }
    out
}

/// Pretty table of the chunks, for assertion messages.
pub fn render(chunks: &[Chunk]) -> String {
    let batches: Vec<RecordBatch> = chunks.iter().map(|c| c.batch.clone()).collect();
    pretty_format_batches(&batches)
        .map(|t| t.to_string())
        .unwrap_or_else(|e| format!("<unprintable: {e}>"))
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(_) => panic!("Expected Err, got Ok"),
            Err(e) => e,
        }
    };
}
