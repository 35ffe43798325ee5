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
//! Integration tests for the streaming hash join.

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arrow::array::{Array, Int64Array};
use arrow::datatypes::DataType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::*;
use streamjoin::{
    Chunk, ChunkQueue, DriverState, HashJoinOperatorFactory, JoinDriver, MemTracker,
    OperatorFactory, ResidualFilter,
};

fn keyed(prefix: &str, keys: &[i64]) -> Chunk {
    let ids: Vec<i64> = (0..keys.len() as i64).collect();
    let id_name = format!("{prefix}id");
    let key_name = format!("{prefix}k");
    chunk(vec![(id_name.as_str(), ints(&ids)), (key_name.as_str(), ints(keys))])
}

fn hash_factory(join_type: &str) -> HashJoinOperatorFactory {
    let cfg = kernel_config(join_type, &["lid", "lk"], &["rid", "rk"], &["lk"], &["rk"]);
    assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None))
}

fn sorted(mut values: Vec<Option<i64>>) -> Vec<Option<i64>> {
    values.sort();
    values
}

#[test]
fn inner_join_matches_shared_keys() {
    let out = assert_ok!(run_join(
        &hash_factory("INNER"),
        vec![keyed("l", &[1, 2, 3])],
        vec![keyed("r", &[2, 3, 4])],
    ));
    assert_eq!(total_rows(&out), 2, "{}", render(&out));
    assert_eq!(sorted(collect_i64(&out, "lk")), vec![Some(2), Some(3)]);
    assert_eq!(collect_i64(&out, "lk"), collect_i64(&out, "rk"));
}

#[test]
fn left_join_fills_unmatched_rows_with_defaults() {
    let mut cfg = kernel_config(
        "LEFT",
        &["lid", "lk"],
        &["rk", "rname"],
        &["lk"],
        &["rk"],
    );
    set_join_hint(&mut cfg, "defaultValue", "rk:-1,rname:none");
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));
    let right = chunk(vec![
        ("rk", ints(&[2, 3, 4])),
        ("rname", str_col(&["two", "three", "four"])),
    ]);
    let out = assert_ok!(run_join(&factory, vec![keyed("l", &[1, 2, 3])], vec![right]));
    assert_eq!(total_rows(&out), 3, "{}", render(&out));

    let lk = collect_i64(&out, "lk");
    let rk = collect_i64(&out, "rk");
    let rname = collect_str(&out, "rname");
    let rows: BTreeMap<i64, (Option<i64>, Option<String>)> = lk
        .iter()
        .zip(rk)
        .zip(rname)
        .map(|((l, r), name)| (l.expect("left key"), (r, name)))
        .collect();
    assert_eq!(rows[&1], (Some(-1), Some("none".to_string())));
    assert_eq!(rows[&2], (Some(2), Some("two".to_string())));
    assert_eq!(rows[&3], (Some(3), Some("three".to_string())));
}

#[test]
fn semi_join_emits_each_matching_left_row_once() {
    // Each left row keyed 2 matches two right rows; 3 matches none.
    let out = assert_ok!(run_join(
        &hash_factory("SEMI"),
        vec![keyed("l", &[2, 2, 3])],
        vec![keyed("r", &[2, 2, 4])],
    ));
    assert_eq!(total_rows(&out), 2, "{}", render(&out));
    assert_eq!(sorted(collect_i64(&out, "lid")), vec![Some(0), Some(1)]);
    for chunk in &out {
        assert_eq!(chunk.num_columns(), 2);
    }
}

#[test]
fn truncate_threshold_forces_eof_after_cap() {
    let mut cfg = kernel_config("INNER", &["lid", "lk"], &["rid", "rk"], &["lk"], &["rk"]);
    set_join_hint(&mut cfg, "truncateThreshold", "1");
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));

    let mut op = factory.create(0);
    let mut left = ChunkQueue::from_chunks(vec![keyed("l", &[1, 2, 3])]);
    let mut right = ChunkQueue::from_chunks(vec![keyed("r", &[2, 3, 4])]);
    let out = assert_ok!(op.compute(&mut left, &mut right));
    assert!(out.eof);
    assert_eq!(out.chunk.map(|c| c.len()), Some(1));
}

#[test]
fn both_buffers_over_limit_without_eof_fails() {
    let mut cfg = kernel_config("INNER", &["lid", "lk"], &["rid", "rk"], &["lk"], &["rk"]);
    cfg.buffer_limit_size = 2;
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));

    let mut left = ChunkQueue::new();
    let mut right = ChunkQueue::new();
    left.push(keyed("l", &[1, 2, 3]));
    right.push(keyed("r", &[1, 2, 3]));
    let mut driver = JoinDriver::with_inputs(7, factory.create(7), left, right);
    let err = assert_err!(driver.run_to_end(10));
    assert!(err.contains("limit"), "err={}", err);
    assert!(matches!(driver.state(), DriverState::Failed(_)));
    assert_eq!(driver.step(), driver.state().clone());
}

#[test]
fn buffers_exactly_at_limit_keep_accumulating() {
    let mut cfg = kernel_config("INNER", &["lid", "lk"], &["rid", "rk"], &["lk"], &["rk"]);
    cfg.buffer_limit_size = 2;
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));
    let mut op = factory.create(0);
    let mut left = ChunkQueue::new();
    let mut right = ChunkQueue::new();
    left.push(keyed("l", &[1, 2]));
    right.push(keyed("r", &[2, 3]));
    let out = assert_ok!(op.compute(&mut left, &mut right));
    assert!(!out.eof);
    assert!(out.chunk.is_none());

    left.set_finished();
    right.set_finished();
    let mut rows = Vec::new();
    for _ in 0..5 {
        let out = assert_ok!(op.compute(&mut left, &mut right));
        rows.extend(out.chunk);
        if out.eof {
            break;
        }
    }
    assert!(op.is_finished());
    assert_eq!(collect_i64(&rows, "lk"), vec![Some(2)]);
}

#[test]
fn operator_is_done_after_error() {
    let mut cfg = kernel_config("INNER", &["lid", "lk"], &["rid", "rk"], &["lk"], &["rk"]);
    cfg.buffer_limit_size = 1;
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));
    let mut op = factory.create(0);
    let mut left = ChunkQueue::new();
    let mut right = ChunkQueue::new();
    left.push(keyed("l", &[1, 2]));
    right.push(keyed("r", &[1, 2]));
    assert!(op.compute(&mut left, &mut right).is_err());

    left.push(keyed("l", &[1]));
    left.set_finished();
    right.set_finished();
    let out = assert_ok!(op.compute(&mut left, &mut right));
    assert!(out.eof);
    assert!(out.chunk.is_none());
    assert!(op.is_finished());
}

#[test]
fn eof_is_idempotent() {
    let factory = hash_factory("LEFT");
    let mut op = factory.create(0);
    let mut left = ChunkQueue::from_chunks(vec![keyed("l", &[1, 2])]);
    let mut right = ChunkQueue::from_chunks(vec![keyed("r", &[2])]);
    let mut steps = 0;
    loop {
        let out = assert_ok!(op.compute(&mut left, &mut right));
        steps += 1;
        if out.eof {
            break;
        }
        assert!(steps < 10, "join did not finish");
    }
    for _ in 0..3 {
        let out = assert_ok!(op.compute(&mut left, &mut right));
        assert!(out.eof);
        assert!(out.chunk.is_none());
    }
}

#[test]
fn every_batch_has_the_configured_arity() {
    let mut cfg = kernel_config("LEFT", &["lid", "lk"], &["rid", "rk"], &["lk"], &["rk"]);
    set_join_hint(&mut cfg, "batchSize", "2");
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));
    let left = vec![keyed("l", &[1, 2, 3]), keyed("l", &[4, 5, 6, 7])];
    let right = vec![keyed("r", &[2, 3, 3, 5, 9, 9, 9, 9])];
    let out = assert_ok!(run_join(&factory, left, right));
    assert!(!out.is_empty());
    for chunk in &out {
        assert_eq!(chunk.num_columns(), 4);
        assert_eq!(
            chunk.schema().fields().iter().map(|f| f.name().as_str()).collect::<Vec<_>>(),
            vec!["lid", "lk", "rid", "rk"]
        );
    }
    // 1, 4, 6, 7 unmatched; 3 matches twice.
    assert_eq!(total_rows(&out), 8, "{}", render(&out));
}

#[test]
fn probe_row_groups_are_never_split() {
    let mut cfg = kernel_config("INNER", &["lid", "lk"], &["rid", "rk"], &["lk"], &["rk"]);
    set_join_hint(&mut cfg, "batchSize", "2");
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));
    // Right is smaller and builds; each left row keyed 7 yields three pairs.
    let out = assert_ok!(run_join(
        &factory,
        vec![keyed("l", &[7, 8, 7, 8])],
        vec![keyed("r", &[7, 7, 7])],
    ));
    assert_eq!(total_rows(&out), 6, "{}", render(&out));
    let mut seen = BTreeSet::new();
    for chunk in &out {
        let ids: BTreeSet<_> = collect_i64(std::slice::from_ref(chunk), "lid")
            .into_iter()
            .collect();
        for id in &ids {
            assert!(seen.insert(*id), "left row {:?} split across batches", id);
        }
        assert_eq!(chunk.len() % 3, 0);
    }
}

#[test]
fn smaller_side_builds_and_ties_go_to_left() {
    // Output follows probe order, which reveals the build side.
    let factory = hash_factory("INNER");
    let tie = assert_ok!(run_join(
        &factory,
        vec![keyed("l", &[1, 2])],
        vec![keyed("r", &[2, 1])],
    ));
    assert_eq!(collect_i64(&tie, "rk"), vec![Some(2), Some(1)]);

    let right_smaller = assert_ok!(run_join(
        &factory,
        vec![keyed("l", &[1, 2, 3])],
        vec![keyed("r", &[3, 1])],
    ));
    assert_eq!(collect_i64(&right_smaller, "lk"), vec![Some(1), Some(3)]);
}

#[test]
fn first_eof_side_builds_while_other_side_streams() {
    let factory = hash_factory("INNER");
    let mut op = factory.create(0);
    let mut left = ChunkQueue::from_chunks(vec![keyed("l", &[1, 2])]);
    let mut right = ChunkQueue::new();
    right.push(keyed("r", &[2, 1, 5]));

    let out = assert_ok!(op.compute(&mut left, &mut right));
    assert!(!out.eof);
    let chunk = out.chunk.expect("probe output before right eof");
    assert_eq!(collect_i64(&[chunk], "rk"), vec![Some(2), Some(1)]);

    right.push(keyed("r", &[1]));
    right.set_finished();
    let mut rest = Vec::new();
    for _ in 0..5 {
        let out = assert_ok!(op.compute(&mut left, &mut right));
        rest.extend(out.chunk);
        if out.eof {
            break;
        }
    }
    assert!(op.is_finished());
    assert_eq!(collect_i64(&rest, "lk"), vec![Some(1)]);
}

#[test]
fn anti_join_with_left_as_build_or_probe() {
    let factory = hash_factory("ANTI");
    // Left smaller: left builds.
    let left_build = assert_ok!(run_join(
        &factory,
        vec![keyed("l", &[1, 2, 3])],
        vec![keyed("r", &[2, 3, 4, 5])],
    ));
    assert_eq!(collect_i64(&left_build, "lk"), vec![Some(1)]);

    // Left larger: left probes.
    let left_probe = assert_ok!(run_join(
        &factory,
        vec![keyed("l", &[1, 2, 3, 6, 6])],
        vec![keyed("r", &[2, 3])],
    ));
    assert_eq!(
        sorted(collect_i64(&left_probe, "lk")),
        vec![Some(1), Some(6), Some(6)]
    );
    for chunk in left_probe.iter().chain(&left_build) {
        assert_eq!(chunk.num_columns(), 2);
    }
}

#[test]
fn left_join_without_right_schema_uses_null_columns() {
    let out = assert_ok!(run_join(
        &hash_factory("LEFT"),
        vec![keyed("l", &[1, 2])],
        Vec::new(),
    ));
    assert_eq!(total_rows(&out), 2, "{}", render(&out));
    for chunk in &out {
        let rk = assert_ok!(chunk.column_by_name("rk"));
        assert_eq!(rk.data_type(), &DataType::Null);
    }
    assert_eq!(sorted(collect_i64(&out, "lk")), vec![Some(1), Some(2)]);
}

#[test]
fn multi_value_keys_with_empty_arrays_match_nothing() {
    let cfg = kernel_config("LEFT", &["lid", "tags"], &["rk"], &["tags"], &["rk"]);
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));
    let left = chunk(vec![
        ("lid", ints(&[0, 1, 2, 3])),
        (
            "tags",
            int_list_col(vec![Some(vec![1]), Some(vec![]), None, Some(vec![2, 3])]),
        ),
    ]);
    let right = chunk(vec![("rk", ints(&[1, 3, 5]))]);
    let out = assert_ok!(run_join(&factory, vec![left], vec![right]));
    assert_eq!(total_rows(&out), 4, "{}", render(&out));
    let pairs: BTreeMap<i64, Option<i64>> = collect_i64(&out, "lid")
        .into_iter()
        .zip(collect_i64(&out, "rk"))
        .map(|(l, r)| (l.expect("lid"), r))
        .collect();
    assert_eq!(pairs[&0], Some(1));
    assert_eq!(pairs[&1], None);
    assert_eq!(pairs[&2], None);
    assert_eq!(pairs[&3], Some(3));
}

#[test]
fn all_empty_key_side_is_dropped_with_warning() {
    let cfg = kernel_config("INNER", &["lid", "tags"], &["rk"], &["tags"], &["rk"]);
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));
    let left = chunk(vec![
        ("lid", ints(&[0, 1])),
        ("tags", int_list_col(vec![Some(vec![]), None])),
    ]);
    let right = chunk(vec![("rk", ints(&[1, 2, 3]))]);
    let out = assert_ok!(run_join(&factory, vec![left], vec![right]));
    assert_eq!(total_rows(&out), 0);
}

#[test]
fn missing_second_key_column_aborts_even_when_first_key_is_all_null() {
    let cfg = kernel_config(
        "INNER",
        &["lid", "lk"],
        &["rid", "rk", "rk2"],
        &["lk", "lk2"],
        &["rk", "rk2"],
    );
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));
    let left = chunk(vec![("lid", ints(&[0, 1])), ("lk", int_col(vec![None, None]))]);
    let right = chunk(vec![
        ("rid", ints(&[0, 1, 2])),
        ("rk", ints(&[1, 2, 3])),
        ("rk2", ints(&[1, 2, 3])),
    ]);
    let err = assert_err!(run_join(&factory, vec![left], vec![right]));
    assert!(err.contains("lk2"), "err={}", err);
}

struct LessThan;

impl ResidualFilter for LessThan {
    fn filter(
        &self,
        left: &Chunk,
        right: &Chunk,
        left_rows: &[u32],
        right_rows: &[u32],
    ) -> Result<Vec<bool>, String> {
        let lv = left.column_by_name("lv")?;
        let rv = right.column_by_name("rv")?;
        let lv = lv
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or("lv is not int64")?;
        let rv = rv
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or("rv is not int64")?;
        Ok(left_rows
            .iter()
            .zip(right_rows)
            .map(|(&l, &r)| lv.value(l as usize) < rv.value(r as usize))
            .collect())
    }
}

#[test]
fn residual_filter_prunes_pairs_before_join_rules() {
    let cfg = kernel_config("LEFT", &["lk", "lv"], &["rk", "rv"], &["lk"], &["rk"]);
    let filter: Arc<dyn ResidualFilter> = Arc::new(LessThan);
    let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(
        &cfg,
        Some(filter)
    ));
    let left = chunk(vec![("lk", ints(&[1, 1, 2])), ("lv", ints(&[5, 50, 7]))]);
    let right = chunk(vec![("rk", ints(&[1, 2])), ("rv", ints(&[10, 1]))]);
    let out = assert_ok!(run_join(&factory, vec![left], vec![right]));
    assert_eq!(total_rows(&out), 3, "{}", render(&out));
    let rows: BTreeMap<i64, Option<i64>> = collect_i64(&out, "lv")
        .into_iter()
        .zip(collect_i64(&out, "rv"))
        .map(|(l, r)| (l.expect("lv"), r))
        .collect();
    assert_eq!(rows[&5], Some(10));
    assert_eq!(rows[&50], None);
    // (2, 7) vs (2, 1) fails the filter; it surfaces as an unmatched row.
    assert_eq!(rows[&7], None);
}

#[test]
fn mem_tracker_returns_to_zero_after_join() {
    let root = MemTracker::new_root("join test");
    let factory = hash_factory("INNER");
    let mut driver = JoinDriver::with_inputs(
        0,
        factory.create(0),
        ChunkQueue::from_chunks(vec![keyed("l", &[1, 2, 3, 4])]),
        ChunkQueue::from_chunks(vec![keyed("r", &[2, 4, 6])]),
    );
    driver.set_mem_tracker(Arc::clone(&root));
    let out = assert_ok!(driver.run_to_end(100));
    assert_eq!(total_rows(&out), 2);
    assert!(root.peak() > 0);
    drop(driver);
    assert_eq!(root.current(), 0);
}

type Row = (i64, Vec<i64>);

fn random_side(rng: &mut StdRng, rows: usize) -> Vec<Row> {
    (0..rows)
        .map(|_| {
            let a = rng.gen_range(0..3);
            let len = rng.gen_range(0..4);
            let b = (0..len).map(|_| rng.gen_range(0..5)).collect();
            (a, b)
        })
        .collect()
}

fn side_chunk(prefix: &str, rows: &[Row]) -> Chunk {
    let ids: Vec<i64> = (0..rows.len() as i64).collect();
    let a: Vec<i64> = rows.iter().map(|(a, _)| *a).collect();
    let b = rows.iter().map(|(_, b)| Some(b.clone())).collect();
    let names = [
        format!("{prefix}id"),
        format!("{prefix}a"),
        format!("{prefix}b"),
    ];
    chunk(vec![
        (names[0].as_str(), ints(&ids)),
        (names[1].as_str(), ints(&a)),
        (names[2].as_str(), int_list_col(b)),
    ])
}

#[test]
fn composite_keys_match_tuple_equality_on_random_tables() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..20 {
        let left_len = rng.gen_range(1..12);
        let left_rows = random_side(&mut rng, left_len);
        let right_len = rng.gen_range(1..12);
        let right_rows = random_side(&mut rng, right_len);

        let mut expected = Vec::new();
        for (i, (la, lb)) in left_rows.iter().enumerate() {
            for (j, (ra, rb)) in right_rows.iter().enumerate() {
                if la == ra && lb.iter().any(|v| rb.contains(v)) {
                    expected.push((i as i64, j as i64));
                }
            }
        }
        expected.sort();

        let mut cfg = kernel_config(
            "INNER",
            &["lid", "la", "lb"],
            &["rid", "ra", "rb"],
            &["la", "lb"],
            &["ra", "rb"],
        );
        set_join_hint(&mut cfg, "batchSize", "3");
        let factory = assert_ok!(HashJoinOperatorFactory::try_from_kernel_config(&cfg, None));
        let out = assert_ok!(run_join(
            &factory,
            vec![side_chunk("l", &left_rows)],
            vec![side_chunk("r", &right_rows)],
        ));
        let mut actual: Vec<(i64, i64)> = collect_i64(&out, "lid")
            .into_iter()
            .zip(collect_i64(&out, "rid"))
            .map(|(l, r)| (l.expect("lid"), r.expect("rid")))
            .collect();
        actual.sort();
        assert_eq!(
            actual, expected,
            "round {} left={:?} right={:?}",
            round, left_rows, right_rows
        );
    }
}
