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
use crate::common::app_config::{DEFAULT_JOIN_BATCH_SIZE, DEFAULT_JOIN_BUFFER_LIMIT_SIZE};
use crate::streamjoin_config::config as streamjoin_app_config;

pub(crate) fn join_default_batch_size() -> usize {
    streamjoin_app_config()
        .ok()
        .map(|c| c.join.default_batch_size)
        .unwrap_or(DEFAULT_JOIN_BATCH_SIZE)
}

pub(crate) fn join_buffer_limit_size() -> usize {
    streamjoin_app_config()
        .ok()
        .map(|c| c.join.buffer_limit_size)
        .unwrap_or(DEFAULT_JOIN_BUFFER_LIMIT_SIZE)
}
