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

//! Positional window view over a doubles sketch payload.
//!
//! Window 0 is the base buffer; window `i >= 1` is level `i - 1`. The
//! accessor maps window-relative item indices onto the payload of whatever
//! representation backs the sketch, so update, merge, and serialization
//! code never branch on heap/direct/compact themselves.

use super::helper::compute_base_buffer_items;
use super::helper::compute_bit_pattern;
use super::sketch::DoublesSketch;
use crate::error::Error;

/// Compute the payload item offset and item count of a window.
///
/// `full_size` makes every updatable-layout window report its full width
/// (`2k` for the base buffer, `k` for each level) whether populated or not;
/// compact layouts always report populated windows only.
pub(crate) fn window_spec(
    sketch: &DoublesSketch<'_>,
    window: usize,
    full_size: bool,
) -> (usize, usize) {
    let k = sketch.k() as usize;
    let bit_pattern = compute_bit_pattern(sketch.k(), sketch.n());
    let bb_count = compute_base_buffer_items(sketch.k(), sketch.n());

    if sketch.is_compact_layout() {
        if window == 0 {
            return (0, bb_count);
        }
        let level = window - 1;
        let valid_below = (bit_pattern & ((1u64 << level) - 1)).count_ones() as usize;
        let populated = (bit_pattern >> level) & 1 == 1;
        (
            bb_count + valid_below * k,
            if populated { k } else { 0 },
        )
    } else if window == 0 {
        (0, if full_size { 2 * k } else { bb_count })
    } else {
        let level = window - 1;
        let populated = (bit_pattern >> level) & 1 == 1;
        (
            2 * k + level * k,
            if full_size || populated { k } else { 0 },
        )
    }
}

/// Mutable positional accessor over one window at a time.
pub(crate) struct DoublesAccessor<'s, 'a> {
    sketch: &'s mut DoublesSketch<'a>,
    full_size: bool,
    offset: usize,
    num_items: usize,
}

impl<'s, 'a> DoublesAccessor<'s, 'a> {
    /// Wrap a sketch, positioned at the base buffer window.
    pub fn wrap(sketch: &'s mut DoublesSketch<'a>, full_size: bool) -> Self {
        let (offset, num_items) = window_spec(sketch, 0, full_size);
        Self {
            sketch,
            full_size,
            offset,
            num_items,
        }
    }

    /// Switch the view to another window.
    pub fn set_window(&mut self, window: usize) {
        let (offset, num_items) = window_spec(self.sketch, window, self.full_size);
        self.offset = offset;
        self.num_items = num_items;
    }

    /// Items visible in the current window.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Read one item of the current window.
    pub fn get(&self, index: usize) -> f64 {
        debug_assert!(index < self.num_items, "index beyond window");
        self.sketch.payload_get(self.offset + index)
    }

    /// Write one item of the current window.
    pub fn set(&mut self, index: usize, value: f64) -> Result<(), Error> {
        debug_assert!(index < self.num_items, "index beyond window");
        self.sketch.payload_set(self.offset + index, value)
    }

    /// Copy out a contiguous range of the current window.
    pub fn get_array(&self, from: usize, count: usize) -> Vec<f64> {
        debug_assert!(from + count <= self.num_items, "range beyond window");
        (from..from + count)
            .map(|i| self.sketch.payload_get(self.offset + i))
            .collect()
    }

    /// Copy values into the current window starting at `dst_index`.
    pub fn put_array(&mut self, values: &[f64], dst_index: usize) -> Result<(), Error> {
        debug_assert!(dst_index + values.len() <= self.num_items, "range beyond window");
        for (i, v) in values.iter().enumerate() {
            self.sketch.payload_set(self.offset + dst_index + i, *v)?;
        }
        Ok(())
    }

    /// Sort the current window in place.
    pub fn sort(&mut self) -> Result<(), Error> {
        let mut items: Vec<f64> = (0..self.num_items).map(|i| self.get(i)).collect();
        items.sort_unstable_by(f64::total_cmp);
        self.put_array(&items, 0)
    }
}
