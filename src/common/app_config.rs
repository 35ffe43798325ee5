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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<StreamJoinConfig> = OnceLock::new();

pub const DEFAULT_JOIN_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_JOIN_BUFFER_LIMIT_SIZE: usize = 10_000_000;

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static StreamJoinConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = StreamJoinConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("streamjoin config not initialized"))
}

pub fn init_from_env_or_default() -> Result<&'static StreamJoinConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static StreamJoinConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("STREAMJOIN_CONFIG")
        && !p.trim().is_empty()
    {
        return Ok(PathBuf::from(p));
    }

    let candidate = PathBuf::from("streamjoin.toml");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "missing config file: set $STREAMJOIN_CONFIG or create ./streamjoin.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct StreamJoinConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "streamjoin=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub join: JoinRuntimeConfig,
}

impl StreamJoinConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: StreamJoinConfig = toml::from_str(s)?;
        cfg.join.validate()?;
        Ok(cfg)
    }
}

impl Default for StreamJoinConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            join: JoinRuntimeConfig::default(),
        }
    }
}

/// Process-wide fallbacks for join kernels whose plan does not set them.
#[derive(Clone, Debug, Deserialize)]
pub struct JoinRuntimeConfig {
    /// Row-pair budget for one probe pass.
    #[serde(default = "default_join_batch_size")]
    pub default_batch_size: usize,
    /// Row count at which an accumulating side counts as "full".
    #[serde(default = "default_join_buffer_limit_size")]
    pub buffer_limit_size: usize,
}

fn default_join_batch_size() -> usize {
    DEFAULT_JOIN_BATCH_SIZE
}

fn default_join_buffer_limit_size() -> usize {
    DEFAULT_JOIN_BUFFER_LIMIT_SIZE
}

impl JoinRuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.default_batch_size == 0 {
            return Err(anyhow!("join.default_batch_size must be positive"));
        }
        if self.buffer_limit_size == 0 {
            return Err(anyhow!("join.buffer_limit_size must be positive"));
        }
        Ok(())
    }
}

impl Default for JoinRuntimeConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_join_batch_size(),
            buffer_limit_size: default_join_buffer_limit_size(),
        }
    }
}
