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

//! Derived-state math for the doubles sketch. Everything about the layout
//! follows from `k` and `N`: the base-buffer count is `N mod 2k` and the
//! level occupancy bit pattern is `⌊N / 2k⌋`.

use super::MAX_K;
use super::MIN_K;
use crate::error::Error;

/// Preamble plus min/max bytes of a non-empty doubles image.
const META_BYTES: usize = 32;

/// Smallest base-buffer allocation for a heap sketch.
const MIN_BASE_BUFFER_ITEMS: usize = 4;

pub fn check_k(k: u16) -> Result<(), Error> {
    if k < MIN_K || k > MAX_K || k % 2 != 0 {
        return Err(Error::invalid_argument(format!(
            "k must be even and in [{MIN_K}, {MAX_K}], got {k}"
        )));
    }
    Ok(())
}

/// Level occupancy: bit `i` set means level `i` holds exactly `k` items.
pub fn compute_bit_pattern(k: u16, n: u64) -> u64 {
    n / (2 * k as u64)
}

/// Items currently in the base buffer.
pub fn compute_base_buffer_items(k: u16, n: u64) -> usize {
    (n % (2 * k as u64)) as usize
}

/// Number of levels spanned by the bit pattern, populated or not.
pub fn compute_total_levels(bit_pattern: u64) -> usize {
    (64 - bit_pattern.leading_zeros()) as usize
}

/// Number of populated levels.
pub fn compute_valid_levels(bit_pattern: u64) -> usize {
    bit_pattern.count_ones() as usize
}

/// Total items retained by the sketch.
pub fn compute_retained_items(k: u16, n: u64) -> usize {
    compute_base_buffer_items(k, n)
        + compute_valid_levels(compute_bit_pattern(k, n)) * k as usize
}

/// Index of the lowest zero bit of `bits` at or above `starting_bit`.
pub fn lowest_zero_bit_starting_at(bits: u64, starting_bit: u8) -> u8 {
    let mut pos = starting_bit & 0x3F;
    let mut my_bits = bits >> pos;
    while my_bits & 1 != 0 {
        my_bits >>= 1;
        pos += 1;
    }
    pos
}

/// Bytes of the updatable image for a sketch with parameters `k` and `n`:
/// 32 preamble/min/max bytes, `2k` base-buffer slots, and `k` slots per
/// level up to the total level count.
pub fn updatable_storage_bytes(k: u16, n: u64) -> usize {
    let total_levels = compute_total_levels(compute_bit_pattern(k, n));
    META_BYTES + 8 * (2 * k as usize + total_levels * k as usize)
}

/// Bytes of the compact image: 8 when empty, otherwise 32 plus the densely
/// packed retained items.
pub fn compact_storage_bytes(k: u16, n: u64) -> usize {
    if n == 0 {
        return 8;
    }
    META_BYTES + 8 * compute_retained_items(k, n)
}

/// Base-buffer allocation that holds `items`, growing geometrically and
/// capped at `2k`.
pub fn base_buffer_alloc_items(k: u16, items: usize) -> usize {
    let two_k = 2 * k as usize;
    items
        .next_power_of_two()
        .max(MIN_BASE_BUFFER_ITEMS)
        .min(two_k)
}

/// The a-priori normalized rank error for the given k.
pub fn normalized_rank_error(k: u16) -> f64 {
    1.7 / k as f64
}
