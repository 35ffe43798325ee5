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
//! Join key hashing.
//!
//! Responsibilities:
//! - Hashes one join column into row-ordered `HashEntry` values; scalar columns give one
//!   entry per non-null row, multi-value (list) columns give one entry per non-null element.
//! - Combines per-column entry lists into composite keys by a sorted merge on row index.
//!
//! Key exported interfaces:
//! - Types: `HashEntry`.
//! - Functions: `hash_join_column`, `combine_hash_values`, `build_composite_hash_values`.
//!
//! Current limitations:
//! - Key columns must be integer, float, boolean, string, date or timestamp typed, or a
//!   List/LargeList of those. Other types are rejected as schema errors.

use std::ops::Range;

use arrow::array::{
    Array, ArrayRef, ArrowPrimitiveType, BooleanArray, Date32Array, Date64Array, Float32Array,
    Float64Array, Int8Array, Int16Array, Int32Array, Int64Array, LargeListArray,
    LargeStringArray, ListArray, PrimitiveArray, StringArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt8Array,
    UInt16Array, UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, TimeUnit};

use super::hash::{
    JOIN_HASH_SEED, canonical_f64_bits, combine_hash, hash_bytes_with_seed, hash_u64_with_seed,
};
use crate::exec::chunk::Chunk;

/// One hashed key occurrence: `row` is the row index inside the hashed chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashEntry {
    pub row: u32,
    pub hash: u64,
}

enum ScalarKeyView<'a> {
    Int8(&'a Int8Array),
    Int16(&'a Int16Array),
    Int32(&'a Int32Array),
    Int64(&'a Int64Array),
    UInt8(&'a UInt8Array),
    UInt16(&'a UInt16Array),
    UInt32(&'a UInt32Array),
    UInt64(&'a UInt64Array),
    Float32(&'a Float32Array),
    Float64(&'a Float64Array),
    Boolean(&'a BooleanArray),
    Utf8(&'a StringArray),
    LargeUtf8(&'a LargeStringArray),
    Date32(&'a Date32Array),
    Date64(&'a Date64Array),
    TimestampSecond(&'a TimestampSecondArray),
    TimestampMillisecond(&'a TimestampMillisecondArray),
    TimestampMicrosecond(&'a TimestampMicrosecondArray),
    TimestampNanosecond(&'a TimestampNanosecondArray),
}

enum JoinKeyView<'a> {
    Scalar(ScalarKeyView<'a>),
    List {
        list: &'a ListArray,
        values: ScalarKeyView<'a>,
    },
    LargeList {
        list: &'a LargeListArray,
        values: ScalarKeyView<'a>,
    },
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, type_name: &str) -> Result<&'a T, String> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| format!("failed to downcast join key to {}", type_name))
}

fn build_scalar_view(array: &ArrayRef) -> Result<ScalarKeyView<'_>, String> {
    let view = match array.data_type() {
        DataType::Int8 => ScalarKeyView::Int8(downcast(array, "Int8Array")?),
        DataType::Int16 => ScalarKeyView::Int16(downcast(array, "Int16Array")?),
        DataType::Int32 => ScalarKeyView::Int32(downcast(array, "Int32Array")?),
        DataType::Int64 => ScalarKeyView::Int64(downcast(array, "Int64Array")?),
        DataType::UInt8 => ScalarKeyView::UInt8(downcast(array, "UInt8Array")?),
        DataType::UInt16 => ScalarKeyView::UInt16(downcast(array, "UInt16Array")?),
        DataType::UInt32 => ScalarKeyView::UInt32(downcast(array, "UInt32Array")?),
        DataType::UInt64 => ScalarKeyView::UInt64(downcast(array, "UInt64Array")?),
        DataType::Float32 => ScalarKeyView::Float32(downcast(array, "Float32Array")?),
        DataType::Float64 => ScalarKeyView::Float64(downcast(array, "Float64Array")?),
        DataType::Boolean => ScalarKeyView::Boolean(downcast(array, "BooleanArray")?),
        DataType::Utf8 => ScalarKeyView::Utf8(downcast(array, "StringArray")?),
        DataType::LargeUtf8 => ScalarKeyView::LargeUtf8(downcast(array, "LargeStringArray")?),
        DataType::Date32 => ScalarKeyView::Date32(downcast(array, "Date32Array")?),
        DataType::Date64 => ScalarKeyView::Date64(downcast(array, "Date64Array")?),
        DataType::Timestamp(unit, _tz) => match unit {
            TimeUnit::Second => {
                ScalarKeyView::TimestampSecond(downcast(array, "TimestampSecondArray")?)
            }
            TimeUnit::Millisecond => ScalarKeyView::TimestampMillisecond(downcast(
                array,
                "TimestampMillisecondArray",
            )?),
            TimeUnit::Microsecond => ScalarKeyView::TimestampMicrosecond(downcast(
                array,
                "TimestampMicrosecondArray",
            )?),
            TimeUnit::Nanosecond => ScalarKeyView::TimestampNanosecond(downcast(
                array,
                "TimestampNanosecondArray",
            )?),
        },
        other => {
            return Err(format!("unsupported join key type {:?}", other));
        }
    };
    Ok(view)
}

fn build_join_key_view(array: &ArrayRef) -> Result<JoinKeyView<'_>, String> {
    match array.data_type() {
        DataType::List(_) => {
            let list: &ListArray = downcast(array, "ListArray")?;
            let values = build_scalar_view(list.values())?;
            Ok(JoinKeyView::List { list, values })
        }
        DataType::LargeList(_) => {
            let list: &LargeListArray = downcast(array, "LargeListArray")?;
            let values = build_scalar_view(list.values())?;
            Ok(JoinKeyView::LargeList { list, values })
        }
        _ => Ok(JoinKeyView::Scalar(build_scalar_view(array)?)),
    }
}

fn hash_primitive<T: ArrowPrimitiveType>(
    arr: &PrimitiveArray<T>,
    idx: usize,
    to_bits: impl Fn(T::Native) -> u64,
) -> Option<u64> {
    if arr.is_null(idx) {
        None
    } else {
        Some(hash_u64_with_seed(JOIN_HASH_SEED, to_bits(arr.value(idx))))
    }
}

impl ScalarKeyView<'_> {
    /// `None` for NULL: SQL equality never matches it.
    fn hash_at(&self, idx: usize) -> Option<u64> {
        match self {
            Self::Int8(arr) => hash_primitive(*arr, idx, |v| v as i64 as u64),
            Self::Int16(arr) => hash_primitive(*arr, idx, |v| v as i64 as u64),
            Self::Int32(arr) => hash_primitive(*arr, idx, |v| v as i64 as u64),
            Self::Int64(arr) => hash_primitive(*arr, idx, |v| v as u64),
            Self::UInt8(arr) => hash_primitive(*arr, idx, |v| v as u64),
            Self::UInt16(arr) => hash_primitive(*arr, idx, |v| v as u64),
            Self::UInt32(arr) => hash_primitive(*arr, idx, |v| v as u64),
            Self::UInt64(arr) => hash_primitive(*arr, idx, |v| v),
            Self::Float32(arr) => hash_primitive(*arr, idx, |v| canonical_f64_bits(v as f64)),
            Self::Float64(arr) => hash_primitive(*arr, idx, canonical_f64_bits),
            Self::Date32(arr) => hash_primitive(*arr, idx, |v| v as i64 as u64),
            Self::Date64(arr) => hash_primitive(*arr, idx, |v| v as u64),
            Self::TimestampSecond(arr) => hash_primitive(*arr, idx, |v| v as u64),
            Self::TimestampMillisecond(arr) => hash_primitive(*arr, idx, |v| v as u64),
            Self::TimestampMicrosecond(arr) => hash_primitive(*arr, idx, |v| v as u64),
            Self::TimestampNanosecond(arr) => hash_primitive(*arr, idx, |v| v as u64),
            Self::Boolean(arr) => {
                if arr.is_null(idx) {
                    None
                } else {
                    Some(hash_u64_with_seed(JOIN_HASH_SEED, arr.value(idx) as u64))
                }
            }
            Self::Utf8(arr) => {
                if arr.is_null(idx) {
                    None
                } else {
                    Some(hash_bytes_with_seed(JOIN_HASH_SEED, arr.value(idx).as_bytes()))
                }
            }
            Self::LargeUtf8(arr) => {
                if arr.is_null(idx) {
                    None
                } else {
                    Some(hash_bytes_with_seed(JOIN_HASH_SEED, arr.value(idx).as_bytes()))
                }
            }
        }
    }
}

fn push_elements(
    values: &ScalarKeyView<'_>,
    row: u32,
    elements: Range<usize>,
    out: &mut Vec<HashEntry>,
) {
    for idx in elements {
        if let Some(hash) = values.hash_at(idx) {
            out.push(HashEntry { row, hash });
        }
    }
}

/// Hash every row of one join column. Entries are ordered by row, then by element.
pub fn hash_join_column(array: &ArrayRef) -> Result<Vec<HashEntry>, String> {
    let num_rows = array.len();
    if num_rows > u32::MAX as usize {
        return Err(format!("join key column too large: rows={}", num_rows));
    }
    let view = build_join_key_view(array)?;
    let mut out = Vec::with_capacity(num_rows);
    match &view {
        JoinKeyView::Scalar(values) => {
            for row in 0..num_rows {
                if let Some(hash) = values.hash_at(row) {
                    out.push(HashEntry {
                        row: row as u32,
                        hash,
                    });
                }
            }
        }
        JoinKeyView::List { list, values } => {
            let offsets = list.value_offsets();
            for row in 0..num_rows {
                if list.is_null(row) {
                    continue;
                }
                let range = offsets[row] as usize..offsets[row + 1] as usize;
                push_elements(values, row as u32, range, &mut out);
            }
        }
        JoinKeyView::LargeList { list, values } => {
            let offsets = list.value_offsets();
            for row in 0..num_rows {
                if list.is_null(row) {
                    continue;
                }
                let range = offsets[row] as usize..offsets[row + 1] as usize;
                push_elements(values, row as u32, range, &mut out);
            }
        }
    }
    Ok(out)
}

/// Sorted merge of two row-ordered entry lists.
///
/// Rows present in both inputs emit one entry per (first, next) combination; rows
/// present in only one input are dropped. The output stays row-ordered.
pub fn combine_hash_values(first: &[HashEntry], next: &[HashEntry]) -> Vec<HashEntry> {
    let mut out = Vec::with_capacity(first.len().min(next.len()));
    let mut i = 0usize;
    let mut j = 0usize;
    while i < first.len() && j < next.len() {
        let row_a = first[i].row;
        let row_b = next[j].row;
        if row_a < row_b {
            i += 1;
            continue;
        }
        if row_b < row_a {
            j += 1;
            continue;
        }
        let end_a = run_end(first, i);
        let end_b = run_end(next, j);
        for a in &first[i..end_a] {
            for b in &next[j..end_b] {
                out.push(HashEntry {
                    row: row_a,
                    hash: combine_hash(a.hash, b.hash),
                });
            }
        }
        i = end_a;
        j = end_b;
    }
    out
}

fn run_end(entries: &[HashEntry], start: usize) -> usize {
    let row = entries[start].row;
    let mut end = start + 1;
    while end < entries.len() && entries[end].row == row {
        end += 1;
    }
    end
}

/// Composite key entries for `key_columns` over every row of `chunk`.
///
/// An empty result for a non-empty chunk means no row has a complete, non-null key.
pub fn build_composite_hash_values(
    chunk: &Chunk,
    key_columns: &[String],
) -> Result<Vec<HashEntry>, String> {
    if key_columns.is_empty() {
        return Err("join key columns are empty".to_string());
    }
    // Every key column must resolve even when an earlier one leaves no entries.
    let per_column = key_columns
        .iter()
        .map(|name| chunk.column_by_name(name).and_then(|array| hash_join_column(&array)))
        .collect::<Result<Vec<_>, String>>()?;
    let mut columns = per_column.into_iter();
    let mut acc = columns.next().unwrap_or_default();
    for next in columns {
        if acc.is_empty() {
            break;
        }
        acc = combine_hash_values(&acc, &next);
    }
    Ok(acc)
}
