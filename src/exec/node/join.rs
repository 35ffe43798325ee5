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
//! Join kernel configuration.
//!
//! Responsibilities:
//! - Deserializes the declarative kernel config (`JoinKernelConfig`) handed over by the planner.
//! - Validates arities and hints, and derives the output column layout (`JoinOutputSchema`).
//!
//! Key exported interfaces:
//! - Types: `JoinKernelConfig`, `JoinConfig`, `JoinType`, `JoinAlgorithm`, `JoinSide`,
//!   `JoinOutputSchema`, `OutputColumn`.
//!
//! Current limitations:
//! - Residual (non-equi) conditions are not parsed here; the host attaches them as a
//!   `ResidualFilter` when creating the operator.

use std::collections::HashMap;

use serde::Deserialize;

use crate::common::config::{join_buffer_limit_size, join_default_batch_size};
use crate::streamjoin_logging::{debug, warn};

pub const JOIN_HINT_KEY: &str = "join";
pub const HINT_BATCH_SIZE: &str = "batchSize";
pub const HINT_TRUNCATE_THRESHOLD: &str = "truncateThreshold";
pub const HINT_DEFAULT_VALUE: &str = "defaultValue";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    LeftSemi,
    LeftAnti,
    /// Cartesian product; nested-loop only.
    Cross,
}

impl JoinType {
    pub fn parse(join_type: &str, semi_join_type: &str) -> Result<Self, String> {
        let join_type = join_type.trim().to_ascii_uppercase();
        let semi_join_type = semi_join_type.trim().to_ascii_uppercase();
        match join_type.as_str() {
            "INNER" => Ok(Self::Inner),
            "LEFT" => Ok(Self::LeftOuter),
            "SEMI" => match semi_join_type.as_str() {
                "" | "SEMI" => Ok(Self::LeftSemi),
                "ANTI" => Ok(Self::LeftAnti),
                other => Err(format!("unsupported semi_join_type: {}", other)),
            },
            "ANTI" => Ok(Self::LeftAnti),
            "CROSS" | "CARTESIAN" => Ok(Self::Cross),
            other => Err(format!("unsupported join_type: {:?}", other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "INNER",
            Self::LeftOuter => "LEFT",
            Self::LeftSemi => "SEMI",
            Self::LeftAnti => "ANTI",
            Self::Cross => "CROSS",
        }
    }

    /// SEMI and ANTI project left columns only.
    pub fn outputs_right_columns(self) -> bool {
        !matches!(self, Self::LeftSemi | Self::LeftAnti)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinAlgorithm {
    Hash,
    NestedLoop,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    pub fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Raw kernel config as produced by the planner (JSON).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct JoinKernelConfig {
    pub join_type: String,
    pub semi_join_type: String,
    pub left_input_fields: Vec<String>,
    pub right_input_fields: Vec<String>,
    pub output_fields_internal: Vec<String>,
    pub output_fields: Vec<String>,
    pub system_field_num: usize,
    pub is_equi_join: bool,
    pub batch_size: usize,
    pub buffer_limit_size: usize,
    /// Equi-key columns on each side, as split out by the condition parser.
    pub left_join_columns: Vec<String>,
    pub right_join_columns: Vec<String>,
    pub hints: HashMap<String, HashMap<String, String>>,
}

impl Default for JoinKernelConfig {
    fn default() -> Self {
        Self {
            join_type: String::new(),
            semi_join_type: String::new(),
            left_input_fields: Vec::new(),
            right_input_fields: Vec::new(),
            output_fields_internal: Vec::new(),
            output_fields: Vec::new(),
            system_field_num: 0,
            is_equi_join: true,
            batch_size: 0,
            buffer_limit_size: 0,
            left_join_columns: Vec::new(),
            right_join_columns: Vec::new(),
            hints: HashMap::new(),
        }
    }
}

impl JoinKernelConfig {
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("parse join kernel config: {}", e))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub side: JoinSide,
    pub input_field: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JoinOutputSchema {
    columns: Vec<OutputColumn>,
}

impl JoinOutputSchema {
    fn derive(
        join_type: JoinType,
        left_input_fields: &[String],
        right_input_fields: &[String],
        output_names: &[String],
        system_field_num: usize,
    ) -> Result<Self, String> {
        if system_field_num > right_input_fields.len() {
            return Err(format!(
                "system_field_num {} exceeds right input field count {}",
                system_field_num,
                right_input_fields.len()
            ));
        }
        let projected_right = if join_type.outputs_right_columns() {
            &right_input_fields[..right_input_fields.len() - system_field_num]
        } else {
            &right_input_fields[..0]
        };
        let expected = left_input_fields.len() + projected_right.len();
        if output_names.len() != expected {
            return Err(if join_type.outputs_right_columns() {
                format!(
                    "{} join output field count mismatch: output={} left={} right={} system={}",
                    join_type.as_str(),
                    output_names.len(),
                    left_input_fields.len(),
                    right_input_fields.len(),
                    system_field_num
                )
            } else {
                format!(
                    "{} join output field count mismatch: output={} left={}",
                    join_type.as_str(),
                    output_names.len(),
                    left_input_fields.len()
                )
            });
        }

        let inputs = left_input_fields
            .iter()
            .map(|f| (JoinSide::Left, f))
            .chain(projected_right.iter().map(|f| (JoinSide::Right, f)));
        let columns = output_names
            .iter()
            .zip(inputs)
            .map(|(name, (side, input_field))| OutputColumn {
                name: name.clone(),
                side,
                input_field: input_field.clone(),
            })
            .collect();
        Ok(Self { columns })
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[OutputColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct JoinHints {
    batch_size: usize,
    truncate_threshold: usize,
    default_values: Vec<(String, String)>,
}

fn parse_usize_hint(hints: &HashMap<String, String>, key: &str) -> Result<usize, String> {
    match hints.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(0),
        Some(v) => v
            .parse::<usize>()
            .map_err(|e| format!("invalid join hint {}={:?}: {}", key, v, e)),
    }
}

/// `FIELD:VALUE[,FIELD:VALUE...]`; the value keeps everything after the first `:`.
fn parse_default_values(text: &str) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    for pair in text.split(',') {
        if pair.trim().is_empty() {
            continue;
        }
        let Some((field, value)) = pair.split_once(':') else {
            return Err(format!("invalid join hint {} entry: {:?}", HINT_DEFAULT_VALUE, pair));
        };
        let field = field.trim();
        if field.is_empty() {
            return Err(format!(
                "invalid join hint {} entry (empty field): {:?}",
                HINT_DEFAULT_VALUE, pair
            ));
        }
        out.push((field.to_string(), value.to_string()));
    }
    Ok(out)
}

fn parse_join_hints(hints: Option<&HashMap<String, String>>) -> Result<JoinHints, String> {
    let Some(hints) = hints else {
        return Ok(JoinHints::default());
    };
    let default_values = match hints.get(HINT_DEFAULT_VALUE) {
        Some(text) => parse_default_values(text)?,
        None => Vec::new(),
    };
    Ok(JoinHints {
        batch_size: parse_usize_hint(hints, HINT_BATCH_SIZE)?,
        truncate_threshold: parse_usize_hint(hints, HINT_TRUNCATE_THRESHOLD)?,
        default_values,
    })
}

/// Validated, immutable join configuration shared by operator instances.
#[derive(Clone, Debug)]
pub struct JoinConfig {
    pub algorithm: JoinAlgorithm,
    pub join_type: JoinType,
    pub left_input_fields: Vec<String>,
    pub right_input_fields: Vec<String>,
    pub left_join_columns: Vec<String>,
    pub right_join_columns: Vec<String>,
    pub output_schema: JoinOutputSchema,
    pub is_equi_join: bool,
    /// Row-pair budget for one probe pass.
    pub batch_size: usize,
    /// 0 disables truncation.
    pub truncate_threshold: usize,
    pub buffer_limit_size: usize,
    /// Fill values for unmatched LEFT rows, keyed by output column name.
    pub default_values: HashMap<String, String>,
}

impl JoinConfig {
    pub fn try_from_kernel_config(
        cfg: &JoinKernelConfig,
        algorithm: JoinAlgorithm,
    ) -> Result<Self, String> {
        let join_type = JoinType::parse(&cfg.join_type, &cfg.semi_join_type)?;
        if algorithm == JoinAlgorithm::Hash && join_type == JoinType::Cross {
            return Err("hash join does not support CROSS join".to_string());
        }
        if cfg.left_join_columns.len() != cfg.right_join_columns.len() {
            return Err(format!(
                "join column count mismatch: left={:?} right={:?}",
                cfg.left_join_columns, cfg.right_join_columns
            ));
        }
        if algorithm == JoinAlgorithm::Hash && cfg.left_join_columns.is_empty() {
            return Err("hash join requires join keys".to_string());
        }

        let output_names = if cfg.output_fields_internal.is_empty() {
            &cfg.output_fields
        } else {
            if !cfg.output_fields.is_empty()
                && cfg.output_fields.len() != cfg.output_fields_internal.len()
            {
                return Err(format!(
                    "output_fields_internal count {} does not match output_fields count {}",
                    cfg.output_fields_internal.len(),
                    cfg.output_fields.len()
                ));
            }
            &cfg.output_fields_internal
        };
        let output_schema = JoinOutputSchema::derive(
            join_type,
            &cfg.left_input_fields,
            &cfg.right_input_fields,
            output_names,
            cfg.system_field_num,
        )?;

        let hints = parse_join_hints(cfg.hints.get(JOIN_HINT_KEY))?;
        let batch_size = if hints.batch_size > 0 {
            hints.batch_size
        } else if cfg.batch_size > 0 {
            cfg.batch_size
        } else {
            join_default_batch_size()
        };
        let buffer_limit_size = if cfg.buffer_limit_size > 0 {
            cfg.buffer_limit_size
        } else {
            join_buffer_limit_size()
        };
        let default_values = resolve_default_values(&output_schema, hints.default_values);

        let config = Self {
            algorithm,
            join_type,
            left_input_fields: cfg.left_input_fields.clone(),
            right_input_fields: cfg.right_input_fields.clone(),
            left_join_columns: cfg.left_join_columns.clone(),
            right_join_columns: cfg.right_join_columns.clone(),
            output_schema,
            is_equi_join: cfg.is_equi_join,
            batch_size,
            truncate_threshold: hints.truncate_threshold,
            buffer_limit_size,
            default_values,
        };
        debug!(
            "join config resolved: algorithm={:?} type={} keys={:?}/{:?} outputs={:?} batch_size={} truncate_threshold={} buffer_limit_size={}",
            config.algorithm,
            config.join_type.as_str(),
            config.left_join_columns,
            config.right_join_columns,
            config.output_schema.names(),
            config.batch_size,
            config.truncate_threshold,
            config.buffer_limit_size
        );
        Ok(config)
    }

    pub fn from_json(json: &str, algorithm: JoinAlgorithm) -> Result<Self, String> {
        Self::try_from_kernel_config(&JoinKernelConfig::from_json(json)?, algorithm)
    }
}

/// Map default-value keys to right-side output column names. Keys may name either the
/// output column or its right input field.
fn resolve_default_values(
    schema: &JoinOutputSchema,
    pairs: Vec<(String, String)>,
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (field, value) in pairs {
        let target = schema
            .columns()
            .iter()
            .filter(|c| c.side == JoinSide::Right)
            .find(|c| c.name == field || c.input_field == field);
        match target {
            Some(column) => {
                out.insert(column.name.clone(), value);
            }
            None => {
                warn!(
                    "join default value for {} ignored: no right-side output column with that name",
                    field
                );
            }
        }
    }
    out
}
