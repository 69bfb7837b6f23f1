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

//! Doubles sketch implementation.
//!
//! This module provides [`DoublesSketch`] in its three representations:
//! heap update, direct update over a caller-supplied memory region, and a
//! read-only wrapped image. All algorithms address payload items through
//! the positional accessor, so they are representation-agnostic.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::accessor::window_spec;
use super::accessor::DoublesAccessor;
use super::helper::base_buffer_alloc_items;
use super::helper::check_k;
use super::helper::compact_storage_bytes;
use super::helper::compute_base_buffer_items;
use super::helper::compute_bit_pattern;
use super::helper::compute_retained_items;
use super::helper::compute_total_levels;
use super::helper::lowest_zero_bit_starting_at;
use super::helper::normalized_rank_error;
use super::helper::updatable_storage_bytes;
use super::serialization::COMBINED_BUFFER;
use super::serialization::EMPTY_COMPACT_SIZE_BYTES;
use super::serialization::MAX_DOUBLE;
use super::serialization::MIN_DOUBLE;
use super::serialization::N_LONG;
use super::serialization::PREAMBLE_LONGS_EMPTY_COMPACT;
use super::serialization::PREAMBLE_LONGS_FULL;
use super::DEFAULT_K;
use crate::codec::preamble::FLAG_COMPACT;
use crate::codec::preamble::FLAG_EMPTY;
use crate::codec::preamble::FLAG_ORDERED;
use crate::codec::preamble::FLAG_READ_ONLY;
use crate::codec::preamble::FLAGS_BYTE;
use crate::codec::preamble::SERIAL_VERSION;
use crate::codec::Family;
use crate::codec::PreamblePrefix;
use crate::common::RandomSource;
use crate::common::XorShift64;
use crate::error::Error;
use crate::memory::Memory;

/// A mergeable quantiles sketch over `f64` values.
///
/// Create an update sketch with [`builder`](Self::builder), feed it with
/// [`update`](Self::update), and query ranks and quantiles at any point.
/// [`to_byte_array`](Self::to_byte_array) emits a self-contained image;
/// [`heapify`](Self::heapify) rebuilds a mutable sketch from an image and
/// [`wrap`](Self::wrap) views one in place.
///
/// # Examples
///
/// ```
/// # use sketches_core::quantiles::DoublesSketch;
/// let mut sketch = DoublesSketch::builder().k(128).build();
/// for i in 0..1000 {
///     sketch.update(i as f64).unwrap();
/// }
/// assert_eq!(sketch.min_value(), 0.0);
/// assert_eq!(sketch.max_value(), 999.0);
/// ```
#[derive(Debug)]
pub struct DoublesSketch<'a> {
    k: u16,
    rng: XorShift64,
    repr: DoublesRepr<'a>,
}

#[derive(Debug)]
enum DoublesRepr<'a> {
    /// Mutable update sketch owning its payload.
    Heap(HeapDoubles),
    /// Mutable update sketch writing through a caller-supplied region.
    Direct(Memory<'a>),
    /// Read-only image, compact or updatable layout.
    Image(ImageDoubles<'a>),
}

#[derive(Debug, Clone)]
struct HeapDoubles {
    n: u64,
    min: f64,
    max: f64,
    /// Base buffer in `[0, 2k)` (allocation grows geometrically), level
    /// `L` at `[2k + L*k, 2k + (L+1)*k)`.
    combined: Vec<f64>,
}

#[derive(Debug)]
struct ImageDoubles<'a> {
    mem: Memory<'a>,
    n: u64,
    min: f64,
    max: f64,
    compact: bool,
}

impl DoublesSketch<'static> {
    /// Create a new builder.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sketches_core::quantiles::DoublesSketch;
    /// let sketch = DoublesSketch::builder().k(64).build();
    /// assert_eq!(sketch.k(), 64);
    /// ```
    pub fn builder() -> DoublesSketchBuilder {
        DoublesSketchBuilder::default()
    }

    /// Rebuild a heap update sketch from a serialized image. The result
    /// retains no link to the source memory and accepts further updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is malformed: wrong family or serial
    /// version, inconsistent flags, or capacity below the payload size.
    pub fn heapify(mem: &Memory<'_>) -> Result<DoublesSketch<'static>, Error> {
        let meta = validate_image(mem)?;
        let view = DoublesSketch {
            k: meta.k,
            rng: XorShift64::default(),
            repr: DoublesRepr::Image(ImageDoubles {
                mem: mem.as_read_only(),
                n: meta.n,
                min: meta.min,
                max: meta.max,
                compact: meta.compact,
            }),
        };

        let k = meta.k as usize;
        let two_k = 2 * k;
        let bb_count = compute_base_buffer_items(meta.k, meta.n);
        let bit_pattern = compute_bit_pattern(meta.k, meta.n);
        let total_levels = compute_total_levels(bit_pattern);

        let combined_len = if bit_pattern == 0 {
            base_buffer_alloc_items(meta.k, bb_count)
        } else {
            two_k + total_levels * k
        };
        let mut combined = vec![0.0f64; combined_len];
        combined[..bb_count].copy_from_slice(&view.window_array(0, false));
        for level in 0..total_levels {
            if (bit_pattern >> level) & 1 == 1 {
                let items = view.window_array(level + 1, false);
                combined[two_k + level * k..two_k + (level + 1) * k].copy_from_slice(&items);
            }
        }

        Ok(DoublesSketch {
            k: meta.k,
            rng: XorShift64::default(),
            repr: DoublesRepr::Heap(HeapDoubles {
                n: meta.n,
                min: meta.min,
                max: meta.max,
                combined,
            }),
        })
    }
}

impl<'a> DoublesSketch<'a> {
    /// View a serialized image in place.
    ///
    /// A compact image yields a read-only sketch. An updatable image over
    /// writable memory yields a direct update sketch that mutates the
    /// region; over read-only memory it yields a read-only view.
    ///
    /// # Errors
    ///
    /// Returns an error if the image fails the decode contract.
    pub fn wrap(mem: Memory<'a>) -> Result<DoublesSketch<'a>, Error> {
        let meta = validate_image(&mem)?;
        let repr = if meta.compact || mem.is_read_only() {
            DoublesRepr::Image(ImageDoubles {
                mem: mem.into_read_only(),
                n: meta.n,
                min: meta.min,
                max: meta.max,
                compact: meta.compact,
            })
        } else {
            DoublesRepr::Direct(mem)
        };
        Ok(DoublesSketch {
            k: meta.k,
            rng: XorShift64::default(),
            repr,
        })
    }

    /// Returns the configured accuracy parameter k.
    pub fn k(&self) -> u16 {
        self.k
    }

    /// Returns the total number of items this sketch has seen.
    pub fn n(&self) -> u64 {
        match &self.repr {
            DoublesRepr::Heap(h) => h.n,
            DoublesRepr::Direct(mem) => {
                mem.get_u64(N_LONG).expect("region holds the preamble")
            }
            DoublesRepr::Image(img) => img.n,
        }
    }

    /// Returns true if no items have been seen.
    pub fn is_empty(&self) -> bool {
        self.n() == 0
    }

    /// Returns the smallest value seen, or `+inf` when empty.
    pub fn min_value(&self) -> f64 {
        match &self.repr {
            DoublesRepr::Heap(h) => h.min,
            DoublesRepr::Direct(mem) => {
                mem.get_f64(MIN_DOUBLE).expect("region holds the preamble")
            }
            DoublesRepr::Image(img) => img.min,
        }
    }

    /// Returns the largest value seen, or `-inf` when empty.
    pub fn max_value(&self) -> f64 {
        match &self.repr {
            DoublesRepr::Heap(h) => h.max,
            DoublesRepr::Direct(mem) => {
                mem.get_f64(MAX_DOUBLE).expect("region holds the preamble")
            }
            DoublesRepr::Image(img) => img.max,
        }
    }

    /// The level occupancy pattern, `⌊N / 2k⌋`.
    pub fn bit_pattern(&self) -> u64 {
        compute_bit_pattern(self.k, self.n())
    }

    /// Items currently in the base buffer.
    pub fn base_buffer_count(&self) -> usize {
        compute_base_buffer_items(self.k, self.n())
    }

    /// Total items retained across the base buffer and all levels.
    pub fn num_retained(&self) -> usize {
        compute_retained_items(self.k, self.n())
    }

    /// Returns true if the sketch writes through a caller-supplied region.
    pub fn is_direct(&self) -> bool {
        match &self.repr {
            DoublesRepr::Heap(_) => false,
            DoublesRepr::Direct(mem) => mem.is_direct(),
            DoublesRepr::Image(img) => img.mem.is_direct(),
        }
    }

    /// Returns true if this sketch rejects updates.
    pub fn is_read_only(&self) -> bool {
        matches!(self.repr, DoublesRepr::Image(_))
    }

    /// Returns true if this sketch is a compact image.
    pub fn is_compact(&self) -> bool {
        matches!(&self.repr, DoublesRepr::Image(img) if img.compact)
    }

    /// Returns true if this sketch is backed by the same region as `mem`.
    pub fn is_same_resource(&self, mem: &Memory<'_>) -> bool {
        match &self.repr {
            DoublesRepr::Heap(_) => false,
            DoublesRepr::Direct(m) => m.is_same_resource(mem),
            DoublesRepr::Image(img) => img.mem.is_same_resource(mem),
        }
    }

    /// The a-priori normalized rank error for this sketch's k.
    pub fn rank_error(&self) -> f64 {
        normalized_rank_error(self.k)
    }

    /// Present a value to the sketch.
    ///
    /// # Errors
    ///
    /// `NaN` is rejected with an argument error, leaving the sketch
    /// untouched. Updating a read-only sketch is a state error. A direct
    /// sketch whose next carry would not fit its region fails with an
    /// argument error naming the bytes required, and is left unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sketches_core::quantiles::DoublesSketch;
    /// let mut sketch = DoublesSketch::builder().build();
    /// sketch.update(1.0).unwrap();
    /// assert!(sketch.update(f64::NAN).is_err());
    /// assert_eq!(sketch.n(), 1);
    /// ```
    pub fn update(&mut self, value: f64) -> Result<(), Error> {
        if value.is_nan() {
            return Err(Error::invalid_argument("cannot update with NaN"));
        }
        if self.is_read_only() {
            return Err(Error::invalid_state("cannot update a read-only sketch"));
        }

        let two_k = 2 * self.k as usize;
        let n = self.n();
        let bb_count = compute_base_buffer_items(self.k, n);
        let fills_base_buffer = bb_count + 1 == two_k;

        // Reserve everything the carry will touch before mutating state.
        if fills_base_buffer {
            let bit_pattern = compute_bit_pattern(self.k, n);
            let ending = lowest_zero_bit_starting_at(bit_pattern, 0) as usize;
            self.ensure_levels_capacity(ending + 1)?;
        } else if let DoublesRepr::Heap(h) = &mut self.repr {
            let needed = bb_count + 1;
            if h.combined.len() < needed {
                h.combined
                    .resize(base_buffer_alloc_items(self.k, needed), 0.0);
            }
        }

        if value < self.min_value() {
            self.put_min(value);
        }
        if value > self.max_value() {
            self.put_max(value);
        }
        let mut accessor = DoublesAccessor::wrap(self, true);
        accessor
            .set(bb_count, value)
            .expect("update forms accept payload writes");

        if fills_base_buffer {
            let mut rng = self.rng;
            propagate_carry(self, &mut rng, 0, None).expect("capacity was reserved above");
            self.rng = rng;
        }
        self.put_n(n + 1);
        Ok(())
    }

    /// Returns the normalized rank of `value`: the fraction of the stream
    /// less than or equal to it. Returns NaN for an empty sketch.
    ///
    /// # Errors
    ///
    /// `NaN` input is an argument error.
    pub fn rank(&self, value: f64) -> Result<f64, Error> {
        if value.is_nan() {
            return Err(Error::invalid_argument("rank of NaN is undefined"));
        }
        let n = self.n();
        if n == 0 {
            return Ok(f64::NAN);
        }
        let mut weight: u64 = 0;
        for item in self.window_array(0, false) {
            if item <= value {
                weight += 1;
            }
        }
        let bit_pattern = self.bit_pattern();
        for level in 0..compute_total_levels(bit_pattern) {
            if (bit_pattern >> level) & 1 == 1 {
                let level_weight = 1u64 << (level + 1);
                for item in self.window_array(level + 1, false) {
                    if item <= value {
                        weight += level_weight;
                    }
                }
            }
        }
        Ok(weight as f64 / n as f64)
    }

    /// Returns the approximate quantile at normalized rank `fraction`.
    ///
    /// `fraction` 0 returns the minimum and 1 the maximum. For an empty
    /// sketch those sentinels are `+inf` and `-inf`, and every interior
    /// rank is NaN.
    ///
    /// # Errors
    ///
    /// `fraction` outside `[0.0, 1.0]` is an argument error.
    pub fn quantile(&self, fraction: f64) -> Result<f64, Error> {
        check_fraction(fraction)?;
        if fraction == 0.0 {
            return Ok(self.min_value());
        }
        if fraction == 1.0 {
            return Ok(self.max_value());
        }
        if self.is_empty() {
            return Ok(f64::NAN);
        }
        let view = self.sorted_view();
        Ok(view.quantile(fraction))
    }

    /// Returns quantiles for a batch of normalized ranks, preserving the
    /// input order.
    ///
    /// # Errors
    ///
    /// Any fraction outside `[0.0, 1.0]` is an argument error.
    pub fn quantiles(&self, fractions: &[f64]) -> Result<Vec<f64>, Error> {
        for fraction in fractions {
            check_fraction(*fraction)?;
        }
        if self.is_empty() {
            return Ok(fractions
                .iter()
                .map(|&q| {
                    if q == 0.0 {
                        self.min_value()
                    } else if q == 1.0 {
                        self.max_value()
                    } else {
                        f64::NAN
                    }
                })
                .collect());
        }
        let view = self.sorted_view();
        Ok(fractions
            .iter()
            .map(|&q| {
                if q == 0.0 {
                    self.min_value()
                } else if q == 1.0 {
                    self.max_value()
                } else {
                    view.quantile(q)
                }
            })
            .collect())
    }

    /// Returns the cumulative distribution at each split point, plus a
    /// final 1.0 bucket; the result has `split_points.len() + 1` entries.
    ///
    /// # Errors
    ///
    /// Split points must be strictly increasing finite values (argument
    /// error otherwise); querying an empty sketch is a state error.
    pub fn cdf(&self, split_points: &[f64]) -> Result<Vec<f64>, Error> {
        check_split_points(split_points)?;
        if self.is_empty() {
            return Err(Error::invalid_state("cdf of an empty sketch is undefined"));
        }
        let mut buckets = Vec::with_capacity(split_points.len() + 1);
        for point in split_points {
            buckets.push(self.rank(*point)?);
        }
        buckets.push(1.0);
        Ok(buckets)
    }

    /// Returns the probability mass between consecutive split points; the
    /// result has `split_points.len() + 1` entries.
    ///
    /// # Errors
    ///
    /// Same contract as [`cdf`](Self::cdf).
    pub fn pmf(&self, split_points: &[f64]) -> Result<Vec<f64>, Error> {
        let mut buckets = self.cdf(split_points)?;
        for i in (1..buckets.len()).rev() {
            buckets[i] -= buckets[i - 1];
        }
        Ok(buckets)
    }

    /// Serialize to a self-contained byte image.
    ///
    /// `compact` packs retained items densely and marks the image
    /// read-only; otherwise the updatable layout with full-width windows is
    /// written. `ordered` sorts the base buffer into the image.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sketches_core::memory::Memory;
    /// # use sketches_core::quantiles::DoublesSketch;
    /// let sketch = DoublesSketch::builder().build();
    /// let bytes = sketch.to_byte_array(true, true);
    /// assert_eq!(bytes.len(), 8);
    /// let restored = DoublesSketch::heapify(&Memory::from_bytes(bytes)).unwrap();
    /// assert!(restored.is_empty());
    /// ```
    pub fn to_byte_array(&self, compact: bool, ordered: bool) -> Vec<u8> {
        let empty = self.is_empty();
        let mut flags = 0u8;
        if empty {
            flags |= FLAG_EMPTY;
        }
        if ordered {
            flags |= FLAG_ORDERED;
        }
        if compact {
            flags |= FLAG_COMPACT | FLAG_READ_ONLY;
        }

        if empty && compact {
            let mut mem = Memory::new_heap(EMPTY_COMPACT_SIZE_BYTES);
            self.prefix(PREAMBLE_LONGS_EMPTY_COMPACT, flags)
                .encode(&mut mem, 0)
                .expect("image sized for the preamble");
            return mem.into_bytes();
        }

        let k = self.k as usize;
        let n = self.n();
        let size = if compact {
            compact_storage_bytes(self.k, n)
        } else {
            updatable_storage_bytes(self.k, n)
        };
        let mut mem = Memory::new_heap(size);
        self.prefix(PREAMBLE_LONGS_FULL, flags)
            .encode(&mut mem, 0)
            .expect("image sized for the preamble");
        mem.put_u64(N_LONG, n).expect("image sized for the preamble");
        mem.put_f64(MIN_DOUBLE, self.min_value())
            .expect("image sized for the preamble");
        mem.put_f64(MAX_DOUBLE, self.max_value())
            .expect("image sized for the preamble");

        let bb_count = self.base_buffer_count();
        let mut offset = COMBINED_BUFFER;
        if bb_count > 0 {
            let mut base = self.window_array(0, false);
            if ordered {
                base.sort_unstable_by(f64::total_cmp);
            }
            mem.put_f64_array(offset, &base)
                .expect("image sized for the payload");
        }
        offset += 8 * if compact { bb_count } else { 2 * k };

        let bit_pattern = self.bit_pattern();
        for level in 0..compute_total_levels(bit_pattern) {
            let populated = (bit_pattern >> level) & 1 == 1;
            if compact {
                if populated {
                    let items = self.window_array(level + 1, false);
                    mem.put_f64_array(offset, &items)
                        .expect("image sized for the payload");
                    offset += 8 * k;
                }
            } else {
                let items = self.window_array(level + 1, true);
                if !items.is_empty() {
                    mem.put_f64_array(offset, &items)
                        .expect("image sized for the payload");
                }
                offset += 8 * k;
            }
        }
        mem.into_bytes()
    }

    /// Produce a read-only compact sketch on the heap. The source sketch is
    /// unmodified. Compacting a compact sketch reproduces it.
    pub fn compact(&self) -> DoublesSketch<'static> {
        let image = self.to_byte_array(true, true);
        DoublesSketch::wrap(Memory::from_bytes(image).into_read_only())
            .expect("self-produced image is valid")
    }

    /// Write a compact image into `dst` and return a read-only sketch over
    /// it. The source sketch is unmodified.
    ///
    /// # Errors
    ///
    /// A read-only or undersized destination is a state error.
    pub fn compact_into<'b>(&self, mut dst: Memory<'b>) -> Result<DoublesSketch<'b>, Error> {
        let image = self.to_byte_array(true, true);
        if dst.is_read_only() {
            return Err(Error::invalid_state("compact destination is read-only"));
        }
        if dst.capacity() < image.len() {
            return Err(Error::invalid_state("destination too small for compact image")
                .with_context("required", image.len())
                .with_context("capacity", dst.capacity()));
        }
        dst.put_bytes(0, &image)?;
        DoublesSketch::wrap(dst.into_read_only())
    }

    // ---- crate-internal plumbing -------------------------------------

    pub(crate) fn is_compact_layout(&self) -> bool {
        matches!(&self.repr, DoublesRepr::Image(img) if img.compact)
    }

    pub(crate) fn payload_get(&self, index: usize) -> f64 {
        match &self.repr {
            DoublesRepr::Heap(h) => h.combined[index],
            DoublesRepr::Direct(mem) => mem
                .get_f64(COMBINED_BUFFER + 8 * index)
                .expect("payload within validated capacity"),
            DoublesRepr::Image(img) => img
                .mem
                .get_f64(COMBINED_BUFFER + 8 * index)
                .expect("payload within validated capacity"),
        }
    }

    pub(crate) fn payload_set(&mut self, index: usize, value: f64) -> Result<(), Error> {
        match &mut self.repr {
            DoublesRepr::Heap(h) => {
                h.combined[index] = value;
                Ok(())
            }
            DoublesRepr::Direct(mem) => mem.put_f64(COMBINED_BUFFER + 8 * index, value),
            DoublesRepr::Image(_) => {
                Err(Error::invalid_state("cannot write into a read-only sketch"))
            }
        }
    }

    /// Copy out one window. `full_size` only affects updatable layouts.
    pub(crate) fn window_array(&self, window: usize, full_size: bool) -> Vec<f64> {
        let (offset, num_items) = window_spec(self, window, full_size);
        (0..num_items)
            .map(|i| self.payload_get(offset + i))
            .collect()
    }

    pub(crate) fn put_n(&mut self, n: u64) {
        match &mut self.repr {
            DoublesRepr::Heap(h) => h.n = n,
            DoublesRepr::Direct(mem) => {
                mem.put_u64(N_LONG, n).expect("region holds the preamble");
                if n > 0 {
                    let flags = mem.get_u8(FLAGS_BYTE).expect("region holds the preamble");
                    mem.put_u8(FLAGS_BYTE, flags & !FLAG_EMPTY)
                        .expect("region holds the preamble");
                }
            }
            DoublesRepr::Image(_) => unreachable!("read-only sketches are never mutated"),
        }
    }

    pub(crate) fn put_min(&mut self, value: f64) {
        match &mut self.repr {
            DoublesRepr::Heap(h) => h.min = value,
            DoublesRepr::Direct(mem) => {
                mem.put_f64(MIN_DOUBLE, value).expect("region holds the preamble");
            }
            DoublesRepr::Image(_) => unreachable!("read-only sketches are never mutated"),
        }
    }

    pub(crate) fn put_max(&mut self, value: f64) {
        match &mut self.repr {
            DoublesRepr::Heap(h) => h.max = value,
            DoublesRepr::Direct(mem) => {
                mem.put_f64(MAX_DOUBLE, value).expect("region holds the preamble");
            }
            DoublesRepr::Image(_) => unreachable!("read-only sketches are never mutated"),
        }
    }

    /// Make room for levels `0..levels`. Heap sketches grow; direct
    /// sketches verify the region instead.
    pub(crate) fn ensure_levels_capacity(&mut self, levels: usize) -> Result<(), Error> {
        let k = self.k as usize;
        let needed_items = 2 * k + levels * k;
        match &mut self.repr {
            DoublesRepr::Heap(h) => {
                if h.combined.len() < needed_items {
                    h.combined.resize(needed_items, 0.0);
                }
                Ok(())
            }
            DoublesRepr::Direct(mem) => {
                let needed_bytes = COMBINED_BUFFER + 8 * needed_items;
                if mem.capacity() < needed_bytes {
                    return Err(Error::invalid_argument(
                        "memory region too small for sketch growth",
                    )
                    .with_context("required", needed_bytes)
                    .with_context("capacity", mem.capacity()));
                }
                Ok(())
            }
            DoublesRepr::Image(_) => {
                Err(Error::invalid_state("cannot grow a read-only sketch"))
            }
        }
    }

    /// Copy this sketch into a fresh heap update sketch.
    pub(crate) fn to_heap_copy(&self) -> DoublesSketch<'static> {
        match &self.repr {
            DoublesRepr::Heap(h) => DoublesSketch {
                k: self.k,
                rng: XorShift64::default(),
                repr: DoublesRepr::Heap(h.clone()),
            },
            DoublesRepr::Direct(mem) => {
                DoublesSketch::heapify(&mem.as_read_only()).expect("live image is valid")
            }
            DoublesRepr::Image(img) => {
                DoublesSketch::heapify(&img.mem.as_read_only()).expect("live image is valid")
            }
        }
    }

    pub(crate) fn rng_mut(&mut self) -> &mut XorShift64 {
        &mut self.rng
    }

    fn prefix(&self, pre_longs: u8, flags: u8) -> PreamblePrefix {
        PreamblePrefix {
            pre_longs,
            ser_ver: SERIAL_VERSION,
            family_id: Family::QUANTILES.id,
            flags,
            short_field: self.k,
            seed_hash: 0,
        }
    }

    fn sorted_view(&self) -> SortedDoublesView {
        let mut sources: Vec<(Vec<f64>, u64)> = Vec::new();
        let mut base = self.window_array(0, false);
        base.sort_unstable_by(f64::total_cmp);
        if !base.is_empty() {
            sources.push((base, 1));
        }
        let bit_pattern = self.bit_pattern();
        for level in 0..compute_total_levels(bit_pattern) {
            if (bit_pattern >> level) & 1 == 1 {
                sources.push((self.window_array(level + 1, false), 1u64 << (level + 1)));
            }
        }
        SortedDoublesView::merge(sources, self.n())
    }
}

/// All retained items merged into one sorted, weighted stream.
struct SortedDoublesView {
    items: Vec<f64>,
    cum_weights: Vec<u64>,
    n: u64,
}

struct MergeCursor {
    value: f64,
    source: usize,
}

impl PartialEq for MergeCursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeCursor {}

impl PartialOrd for MergeCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the smallest value first.
        other
            .value
            .total_cmp(&self.value)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl SortedDoublesView {
    /// Merge already-sorted sources lazily through a min-heap of cursors.
    fn merge(sources: Vec<(Vec<f64>, u64)>, n: u64) -> Self {
        let retained: usize = sources.iter().map(|(items, _)| items.len()).sum();
        let mut items = Vec::with_capacity(retained);
        let mut cum_weights = Vec::with_capacity(retained);
        let mut positions = vec![0usize; sources.len()];
        let mut heap = BinaryHeap::with_capacity(sources.len());

        for (source, (source_items, _)) in sources.iter().enumerate() {
            if let Some(&value) = source_items.first() {
                heap.push(MergeCursor { value, source });
            }
        }

        let mut running = 0u64;
        while let Some(MergeCursor { value, source }) = heap.pop() {
            running += sources[source].1;
            items.push(value);
            cum_weights.push(running);
            positions[source] += 1;
            if let Some(&next) = sources[source].0.get(positions[source]) {
                heap.push(MergeCursor {
                    value: next,
                    source,
                });
            }
        }
        debug_assert_eq!(running, n, "cumulative weight must equal n");

        Self {
            items,
            cum_weights,
            n,
        }
    }

    fn quantile(&self, fraction: f64) -> f64 {
        let target = ((fraction * self.n as f64).ceil() as u64).clamp(1, self.n);
        let index = self.cum_weights.partition_point(|&w| w < target);
        self.items[index.min(self.items.len() - 1)]
    }
}

/// Carry a full base buffer (`size_k_buf` = None) or a sorted `k`-item
/// buffer from a merge into the levels, starting at `starting_level`.
///
/// The target is the lowest unpopulated level at or above the start; every
/// populated level below it is merged in and halved, one random coin flip
/// per halving. The caller advances `n` afterwards, which flips the bit
/// pattern to match the carry.
pub(crate) fn propagate_carry(
    sketch: &mut DoublesSketch<'_>,
    rng: &mut XorShift64,
    starting_level: usize,
    size_k_buf: Option<&[f64]>,
) -> Result<(), Error> {
    let k = sketch.k() as usize;
    let bit_pattern = sketch.bit_pattern();
    let ending = lowest_zero_bit_starting_at(bit_pattern, starting_level as u8) as usize;
    sketch.ensure_levels_capacity(ending + 1)?;

    let mut accessor = DoublesAccessor::wrap(sketch, true);
    match size_k_buf {
        None => {
            accessor.set_window(0);
            accessor.sort()?;
            let base = accessor.get_array(0, accessor.num_items());
            let halved = zip_half(&base, rng);
            accessor.set_window(ending + 1);
            accessor.put_array(&halved, 0)?;
        }
        Some(buf) => {
            debug_assert_eq!(buf.len(), k, "carry buffer must hold k items");
            accessor.set_window(ending + 1);
            accessor.put_array(buf, 0)?;
        }
    }

    for level in starting_level..ending {
        accessor.set_window(level + 1);
        let lower = accessor.get_array(0, k);
        accessor.set_window(ending + 1);
        let upper = accessor.get_array(0, k);
        let merged = merge_sorted(&lower, &upper);
        let halved = zip_half(&merged, rng);
        accessor.put_array(&halved, 0)?;
    }
    Ok(())
}

/// Keep every other item of a sorted buffer, the starting parity chosen by
/// a fair coin.
pub(crate) fn zip_half(sorted: &[f64], rng: &mut XorShift64) -> Vec<f64> {
    debug_assert!(sorted.len() % 2 == 0, "zip input must have even length");
    let offset = rng.next_bool() as usize;
    (0..sorted.len() / 2).map(|i| sorted[2 * i + offset]).collect()
}

/// Keep every `stride`-th item of a sorted buffer, the starting phase
/// chosen uniformly. Used when downsampling a larger-k level.
pub(crate) fn zip_with_stride(sorted: &[f64], stride: usize, rng: &mut XorShift64) -> Vec<f64> {
    debug_assert!(sorted.len() % stride == 0, "stride must divide the input");
    let phase = (rng.next_u64() % stride as u64) as usize;
    (0..sorted.len() / stride)
        .map(|i| sorted[stride * i + phase])
        .collect()
}

/// Merge two sorted buffers into one sorted buffer.
pub(crate) fn merge_sorted(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] <= b[j] {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

fn check_fraction(fraction: f64) -> Result<(), Error> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(Error::invalid_argument(format!(
            "fraction must be in [0.0, 1.0], got {fraction}"
        )));
    }
    Ok(())
}

fn check_split_points(split_points: &[f64]) -> Result<(), Error> {
    for point in split_points {
        if !point.is_finite() {
            return Err(Error::invalid_argument(format!(
                "split points must be finite, got {point}"
            )));
        }
    }
    for pair in split_points.windows(2) {
        if pair[0] >= pair[1] {
            return Err(Error::invalid_argument(
                "split points must be strictly increasing",
            ));
        }
    }
    Ok(())
}

struct ImageMeta {
    k: u16,
    n: u64,
    min: f64,
    max: f64,
    compact: bool,
}

/// The ordered decode contract: capacity, serial version, family,
/// preamble/flags consistency, endianness, the empty-flag invariant, and
/// finally the payload capacity.
fn validate_image(mem: &Memory<'_>) -> Result<ImageMeta, Error> {
    let prefix = PreamblePrefix::decode(mem, 0)?;
    prefix.validate(&Family::QUANTILES)?;

    let empty = prefix.has_flags(FLAG_EMPTY);
    let compact = prefix.has_flags(FLAG_COMPACT);
    if compact && !prefix.has_flags(FLAG_READ_ONLY) {
        return Err(Error::invalid_argument(
            "compact images must be flagged read-only",
        ));
    }
    let k = prefix.short_field;
    check_k(k)?;

    if prefix.pre_longs == PREAMBLE_LONGS_EMPTY_COMPACT {
        if !(empty && compact) {
            return Err(Error::invalid_argument(
                "a one-long preamble is only valid for the empty compact form",
            ));
        }
        return Ok(ImageMeta {
            k,
            n: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            compact: true,
        });
    }

    if empty && compact {
        return Err(Error::invalid_argument(
            "empty compact images must use a one-long preamble",
        ));
    }
    if mem.capacity() < COMBINED_BUFFER {
        return Err(Error::insufficient_data("n/min/max preamble")
            .with_context("capacity", mem.capacity()));
    }
    let n = mem.get_u64(N_LONG)?;
    if empty != (n == 0) {
        return Err(Error::invalid_argument("empty flag inconsistent with N")
            .with_context("n", n)
            .with_context("empty", empty));
    }
    let min = mem.get_f64(MIN_DOUBLE)?;
    let max = mem.get_f64(MAX_DOUBLE)?;
    if n > 0 && !(min <= max) {
        return Err(Error::invalid_argument(format!(
            "min/max corrupt: min {min}, max {max}"
        )));
    }
    let required = if compact {
        compact_storage_bytes(k, n)
    } else {
        updatable_storage_bytes(k, n)
    };
    if mem.capacity() < required {
        return Err(Error::invalid_argument("capacity below computed payload size")
            .with_context("required", required)
            .with_context("capacity", mem.capacity()));
    }
    Ok(ImageMeta {
        k,
        n,
        min,
        max,
        compact,
    })
}

/// Builder for [`DoublesSketch`].
#[derive(Debug)]
pub struct DoublesSketchBuilder {
    k: u16,
    random_seed: Option<u64>,
}

impl Default for DoublesSketchBuilder {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            random_seed: None,
        }
    }
}

impl DoublesSketchBuilder {
    /// Set the accuracy parameter k.
    ///
    /// # Panics
    ///
    /// Panics if k is odd or outside `[2, 32768]`.
    pub fn k(mut self, k: u16) -> Self {
        check_k(k).unwrap_or_else(|e| panic!("{e}"));
        self.k = k;
        self
    }

    /// Seed the sketch-local generator driving compaction coin flips, so
    /// tests can replay a stream deterministically.
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    fn rng(&self) -> XorShift64 {
        match self.random_seed {
            Some(seed) => XorShift64::seeded(seed),
            None => XorShift64::default(),
        }
    }

    /// Build a heap update sketch.
    pub fn build(self) -> DoublesSketch<'static> {
        let rng = self.rng();
        let combined = vec![0.0f64; base_buffer_alloc_items(self.k, 0)];
        DoublesSketch {
            k: self.k,
            rng,
            repr: DoublesRepr::Heap(HeapDoubles {
                n: 0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                combined,
            }),
        }
    }

    /// Build a direct update sketch over a caller-supplied region. The
    /// region is initialized with an empty updatable image and must hold at
    /// least `updatable_storage_bytes(k, 0)` bytes.
    ///
    /// # Errors
    ///
    /// A read-only region is a state error; an undersized region is an
    /// argument error.
    pub fn build_direct<'a>(self, mut mem: Memory<'a>) -> Result<DoublesSketch<'a>, Error> {
        if mem.is_read_only() {
            return Err(Error::invalid_state("direct sketches need writable memory"));
        }
        let required = updatable_storage_bytes(self.k, 0);
        if mem.capacity() < required {
            return Err(Error::invalid_argument("memory region too small for k")
                .with_context("required", required)
                .with_context("capacity", mem.capacity()));
        }
        PreamblePrefix {
            pre_longs: PREAMBLE_LONGS_FULL,
            ser_ver: SERIAL_VERSION,
            family_id: Family::QUANTILES.id,
            flags: FLAG_EMPTY,
            short_field: self.k,
            seed_hash: 0,
        }
        .encode(&mut mem, 0)?;
        mem.put_u64(N_LONG, 0)?;
        mem.put_f64(MIN_DOUBLE, f64::INFINITY)?;
        mem.put_f64(MAX_DOUBLE, f64::NEG_INFINITY)?;
        let rng = self.rng();
        Ok(DoublesSketch {
            k: self.k,
            rng,
            repr: DoublesRepr::Direct(mem),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_half_parities() {
        let sorted: Vec<f64> = (0..8).map(f64::from).collect();
        let mut rng = XorShift64::seeded(1);
        let halved = zip_half(&sorted, &mut rng);
        assert_eq!(halved.len(), 4);
        let even: Vec<f64> = vec![0.0, 2.0, 4.0, 6.0];
        let odd: Vec<f64> = vec![1.0, 3.0, 5.0, 7.0];
        assert!(halved == even || halved == odd);
    }

    #[test]
    fn test_merge_sorted() {
        let merged = merge_sorted(&[1.0, 3.0, 5.0], &[2.0, 3.0, 8.0]);
        assert_eq!(merged, vec![1.0, 2.0, 3.0, 3.0, 5.0, 8.0]);
    }

    #[test]
    fn test_zip_with_stride() {
        let sorted: Vec<f64> = (0..8).map(f64::from).collect();
        let mut rng = XorShift64::seeded(3);
        let down = zip_with_stride(&sorted, 4, &mut rng);
        assert_eq!(down.len(), 2);
        assert_eq!(down[1] - down[0], 4.0);
    }

    #[test]
    fn test_sorted_view_quantile() {
        // Level items outweigh base-buffer items.
        let view = SortedDoublesView::merge(
            vec![(vec![5.0], 1), (vec![1.0, 9.0], 2)],
            5,
        );
        assert_eq!(view.items, vec![1.0, 5.0, 9.0]);
        assert_eq!(view.cum_weights, vec![2, 3, 5]);
        assert_eq!(view.quantile(0.2), 1.0);
        assert_eq!(view.quantile(0.6), 5.0);
        assert_eq!(view.quantile(0.99), 9.0);
    }

    #[test]
    fn test_derived_bit_pattern_after_updates() {
        let mut sketch = DoublesSketch::builder().k(4).random_seed(11).build();
        for i in 0..13 {
            sketch.update(i as f64).unwrap();
        }
        assert_eq!(sketch.n(), 13);
        assert_eq!(sketch.bit_pattern(), 1);
        assert_eq!(sketch.base_buffer_count(), 5);
        assert_eq!(sketch.num_retained(), 9);
    }

    #[test]
    fn test_update_nan_leaves_state() {
        let mut sketch = DoublesSketch::builder().k(8).build();
        sketch.update(2.0).unwrap();
        let err = sketch.update(f64::NAN).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
        assert_eq!(sketch.n(), 1);
        assert_eq!(sketch.min_value(), 2.0);
        assert_eq!(sketch.max_value(), 2.0);
    }
}
