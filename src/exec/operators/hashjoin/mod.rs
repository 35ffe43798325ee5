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
//! Hash-join operator module exports.
//!
//! Responsibilities:
//! - Registers the streaming hash-join operator and the helpers it shares with the
//!   nested-loop join (input buffering, output projection, join-type rules).
//!
//! Current limitations:
//! - One operator instance owns both inputs; there is no separate build pipeline.

mod hash_join_processor;
mod join_hash_table;
pub(crate) mod join_inputs;
pub(crate) mod join_probe_utils;
pub(crate) mod join_strategy;

pub use hash_join_processor::HashJoinOperatorFactory;
pub use join_probe_utils::ResidualFilter;
