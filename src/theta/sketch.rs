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

//! Update-form theta sketch.

use std::hash::Hash;

use super::compact::CompactThetaSketch;
use super::hash_table::starting_theta;
use super::hash_table::ThetaHashTable;
use super::serialization::max_update_sketch_bytes;
use super::serialization::CUR_COUNT_INT;
use super::serialization::HASH_SIZE_BYTES;
use super::serialization::PREAMBLE_LONGS_EMPTY;
use super::serialization::PREAMBLE_LONGS_ESTIMATION;
use super::serialization::PREAMBLE_LONGS_EXACT;
use super::serialization::PREAMBLE_LONGS_UPDATE;
use super::serialization::P_FLOAT;
use super::serialization::THETA_LONG;
use super::serialization::UPDATE_DATA_START;
use super::serialization::UPDATE_LG_ARR_BYTE;
use super::serialization::UPDATE_LG_RF_BYTE;
use super::serialization::UPDATE_P_FLOAT;
use super::serialization::UPDATE_THETA_LONG;
use super::ThetaSketchView;
use super::DEFAULT_LG_NOM_LONGS;
use super::MAX_LG_NOM_LONGS;
use super::MAX_THETA;
use super::MIN_LG_NOM_LONGS;
use crate::codec::preamble::FLAG_COMPACT;
use crate::codec::preamble::FLAG_EMPTY;
use crate::codec::preamble::FLAG_ORDERED;
use crate::codec::preamble::FLAG_READ_ONLY;
use crate::codec::preamble::SERIAL_VERSION;
use crate::codec::Family;
use crate::codec::PreamblePrefix;
use crate::common::canonical_double;
use crate::common::ResizeFactor;
use crate::error::Error;
use crate::hash::compute_seed_hash;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::memory::Memory;

/// Mutable theta sketch for building from input data.
///
/// # Examples
///
/// ```
/// # use sketches_core::theta::{ThetaSketch, ThetaSketchView};
/// let mut sketch = ThetaSketch::builder().lg_nom_longs(12).build();
/// sketch.update("apple");
/// sketch.update("banana");
/// sketch.update("apple");
/// assert_eq!(sketch.estimate(), 2.0);
/// ```
#[derive(Debug)]
pub struct ThetaSketch<'a> {
    table: ThetaHashTable<'a>,
}

impl ThetaSketch<'static> {
    /// Create a new builder.
    pub fn builder() -> ThetaSketchBuilder {
        ThetaSketchBuilder::default()
    }

    /// Rebuild a heap update sketch from a serialized image, updatable or
    /// compact, using the default seed.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed image, an unsupported serial
    /// version, or a seed-hash mismatch.
    pub fn heapify(mem: &Memory<'_>) -> Result<ThetaSketch<'static>, Error> {
        Self::heapify_with_seed(mem, DEFAULT_UPDATE_SEED)
    }

    /// Rebuild a heap update sketch from a serialized image with the seed
    /// the image was built with.
    pub fn heapify_with_seed(mem: &Memory<'_>, seed: u64) -> Result<ThetaSketch<'static>, Error> {
        let prefix = PreamblePrefix::decode(mem, 0)?;
        if prefix.family_id == Family::QUICKSELECT.id {
            let meta = validate_update_image(mem, seed)?;
            let entries = mem.get_u64_array(
                UPDATE_DATA_START,
                1usize << meta.lg_arr_longs,
            )?;
            let table = rebuild_table(
                meta.lg_nom_longs,
                meta.resize_factor,
                meta.p,
                seed,
                meta.theta,
                meta.empty,
                entries.into_iter().filter(|&h| h != 0),
            )?;
            return Ok(ThetaSketch { table });
        }

        // Compact image: only images serialized from an update sketch
        // carry the nominal size needed to rebuild one.
        let compact = CompactThetaSketch::heapify_with_seed(mem, seed)?;
        let lg_nom_longs = prefix.short_field as u8;
        if prefix.short_field == 0 || !(MIN_LG_NOM_LONGS..=MAX_LG_NOM_LONGS).contains(&lg_nom_longs)
        {
            return Err(Error::invalid_argument(
                "compact image carries no nominal size; heapify it as a compact sketch",
            ));
        }
        let table = rebuild_table(
            lg_nom_longs,
            ResizeFactor::X8,
            compact.sampling_probability(),
            seed,
            compact.theta64(),
            compact.is_empty(),
            compact.retained_hashes().into_iter(),
        )?;
        Ok(ThetaSketch { table })
    }
}

impl<'a> ThetaSketch<'a> {
    /// View an updatable image in place as a direct update sketch, using
    /// the default seed. Further updates mutate the region.
    ///
    /// # Errors
    ///
    /// Returns an error for read-only memory, a compact image, or any
    /// decode-contract violation.
    pub fn wrap(mem: Memory<'a>) -> Result<ThetaSketch<'a>, Error> {
        Self::wrap_with_seed(mem, DEFAULT_UPDATE_SEED)
    }

    /// View an updatable image in place with an explicit seed.
    pub fn wrap_with_seed(mem: Memory<'a>, seed: u64) -> Result<ThetaSketch<'a>, Error> {
        if mem.is_read_only() {
            return Err(Error::invalid_state(
                "update sketches need writable memory; wrap compact images instead",
            ));
        }
        let meta = validate_update_image(&mem, seed)?;
        let table = ThetaHashTable::wrap_parts(
            meta.lg_arr_longs,
            meta.lg_nom_longs,
            meta.resize_factor,
            meta.p,
            meta.theta,
            seed,
            meta.empty,
            meta.cur_count,
            mem,
        )?;
        Ok(ThetaSketch { table })
    }

    /// Update the sketch with a hashable value.
    ///
    /// For `f32`/`f64` values, use `update_f32`/`update_f64` instead so
    /// equal-comparing doubles hash identically.
    pub fn update<T: Hash>(&mut self, value: T) {
        let hash = self.table.hash(value);
        self.table.try_insert_hash(hash);
    }

    /// Update the sketch with an f64 value.
    pub fn update_f64(&mut self, value: f64) {
        self.update(canonical_double(value));
    }

    /// Update the sketch with an f32 value.
    pub fn update_f32(&mut self, value: f32) {
        self.update_f64(value as f64);
    }

    /// Reduce the retained set to the nominal count if it exceeds it.
    pub fn trim(&mut self) {
        self.table.trim();
    }

    /// Reset the sketch to its freshly built state.
    pub fn reset(&mut self) {
        self.table.reset();
    }

    /// Log2 of the nominal entry count.
    pub fn lg_nom_longs(&self) -> u8 {
        self.table.lg_nom_size()
    }

    /// The configured up-front sampling probability.
    pub fn sampling_probability(&self) -> f32 {
        self.table.sampling_probability()
    }

    /// Returns true if the cache lives in a caller-supplied region.
    pub fn is_direct(&self) -> bool {
        self.table.is_direct()
    }

    /// Returns true if this sketch is backed by the same region as `mem`.
    pub fn is_same_resource(&self, mem: &Memory<'_>) -> bool {
        self.table.is_same_resource(mem)
    }

    /// Iterate the retained hashes in cache order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.table.iter()
    }

    /// Serialize to a compact image; see
    /// [`CompactThetaSketch`](super::CompactThetaSketch) for the layout.
    pub fn to_byte_array(&self, ordered: bool) -> Vec<u8> {
        let empty = self.is_empty();
        let theta = self.theta64();
        let num_entries = self.num_retained();

        let pre_longs = if theta < MAX_THETA {
            PREAMBLE_LONGS_ESTIMATION
        } else if empty {
            PREAMBLE_LONGS_EMPTY
        } else {
            PREAMBLE_LONGS_EXACT
        };

        let mut flags = FLAG_COMPACT | FLAG_READ_ONLY;
        if empty {
            flags |= FLAG_EMPTY;
        }
        if ordered {
            flags |= FLAG_ORDERED;
        }

        let data_start = pre_longs as usize * 8;
        let mut mem = Memory::new_heap(data_start + num_entries * HASH_SIZE_BYTES);
        PreamblePrefix {
            pre_longs,
            ser_ver: SERIAL_VERSION,
            family_id: Family::COMPACT.id,
            flags,
            short_field: self.lg_nom_longs() as u16,
            seed_hash: self.seed_hash(),
        }
        .encode(&mut mem, 0)
        .expect("image sized for the preamble");

        if pre_longs >= PREAMBLE_LONGS_EXACT {
            mem.put_u32(CUR_COUNT_INT, num_entries as u32)
                .expect("image sized for the preamble");
            mem.put_u32(P_FLOAT, self.sampling_probability().to_bits())
                .expect("image sized for the preamble");
        }
        if pre_longs >= PREAMBLE_LONGS_ESTIMATION {
            mem.put_u64(THETA_LONG, theta)
                .expect("image sized for the preamble");
        }

        let mut entries = self.retained_hashes();
        if ordered {
            entries.sort_unstable();
        }
        mem.put_u64_array(data_start, &entries)
            .expect("image sized for the payload");
        mem.into_bytes()
    }

    /// Serialize to an updatable image that [`wrap`](Self::wrap) can
    /// mutate in place: the full preamble plus the cache grown to its
    /// maximum footprint.
    pub fn to_byte_array_updatable(&self) -> Vec<u8> {
        let mut mem = Memory::new_heap(max_update_sketch_bytes(self.lg_nom_longs()));
        write_update_preamble(
            &mut mem,
            self.lg_nom_longs(),
            self.table.lg_cur_size(),
            self.table.resize_factor(),
            self.sampling_probability(),
            self.seed_hash(),
            self.theta64(),
            self.num_retained(),
            self.is_empty(),
        );
        let slots = self.table.raw_slots();
        mem.put_u64_array(UPDATE_DATA_START, &slots)
            .expect("image sized for the cache");
        mem.into_bytes()
    }

    /// Produce a read-only compact sketch on the heap. The source sketch
    /// is unmodified.
    pub fn compact(&self, ordered: bool) -> CompactThetaSketch<'static> {
        let mut entries = self.retained_hashes();
        if ordered {
            entries.sort_unstable();
        }
        CompactThetaSketch::from_sketch_parts(
            entries,
            self.theta64(),
            self.seed_hash(),
            ordered,
            self.is_empty(),
            self.sampling_probability(),
            self.lg_nom_longs() as u16,
        )
    }

    /// Write a compact image into `dst` and return a read-only sketch over
    /// it. The source sketch is unmodified.
    ///
    /// # Errors
    ///
    /// A read-only or undersized destination is a state error.
    pub fn compact_into<'b>(
        &self,
        mut dst: Memory<'b>,
        ordered: bool,
    ) -> Result<CompactThetaSketch<'b>, Error> {
        let image = self.to_byte_array(ordered);
        if dst.is_read_only() {
            return Err(Error::invalid_state("compact destination is read-only"));
        }
        if dst.capacity() < image.len() {
            return Err(Error::invalid_state("destination too small for compact image")
                .with_context("required", image.len())
                .with_context("capacity", dst.capacity()));
        }
        dst.put_bytes(0, &image)?;
        CompactThetaSketch::wrap_with_seed_hash(dst.into_read_only(), self.seed_hash())
    }
}

impl ThetaSketchView for ThetaSketch<'_> {
    fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn is_ordered(&self) -> bool {
        false
    }

    fn seed_hash(&self) -> u16 {
        self.table.seed_hash()
    }

    fn theta64(&self) -> u64 {
        self.table.theta()
    }

    fn num_retained(&self) -> usize {
        self.table.num_retained()
    }

    fn retained_hashes(&self) -> Vec<u64> {
        self.table.iter().collect()
    }
}

struct UpdateImageMeta {
    lg_nom_longs: u8,
    lg_arr_longs: u8,
    resize_factor: ResizeFactor,
    p: f32,
    theta: u64,
    cur_count: usize,
    empty: bool,
}

fn validate_update_image(mem: &Memory<'_>, seed: u64) -> Result<UpdateImageMeta, Error> {
    let prefix = PreamblePrefix::decode(mem, 0)?;
    prefix.validate(&Family::QUICKSELECT)?;
    if prefix.has_flags(FLAG_COMPACT) || prefix.has_flags(FLAG_READ_ONLY) {
        return Err(Error::invalid_argument(
            "image is compact or read-only, not an updatable sketch",
        ));
    }
    debug_assert_eq!(prefix.pre_longs, PREAMBLE_LONGS_UPDATE);

    let expected_seed_hash = compute_seed_hash(seed);
    if prefix.seed_hash != expected_seed_hash {
        return Err(Error::seed_hash_mismatch(expected_seed_hash, prefix.seed_hash));
    }

    let lg_nom_longs = prefix.short_field as u8;
    if prefix.short_field > u8::MAX as u16
        || !(MIN_LG_NOM_LONGS..=MAX_LG_NOM_LONGS).contains(&lg_nom_longs)
    {
        return Err(Error::invalid_argument(format!(
            "lgNomLongs must be in [{MIN_LG_NOM_LONGS}, {MAX_LG_NOM_LONGS}], got {}",
            prefix.short_field
        )));
    }

    if mem.capacity() < UPDATE_DATA_START {
        return Err(Error::insufficient_data("updatable preamble")
            .with_context("capacity", mem.capacity()));
    }
    let cur_count = mem.get_u32(CUR_COUNT_INT)? as usize;
    let lg_arr_longs = mem.get_u8(UPDATE_LG_ARR_BYTE)?;
    let lg_rf = mem.get_u8(UPDATE_LG_RF_BYTE)?;
    let p = f32::from_bits(mem.get_u32(UPDATE_P_FLOAT)?);
    let theta = mem.get_u64(UPDATE_THETA_LONG)?;

    let resize_factor = ResizeFactor::from_lg_value(lg_rf).ok_or_else(|| {
        Error::invalid_argument(format!("invalid log2 resize factor {lg_rf}"))
    })?;
    if lg_arr_longs == 0 || lg_arr_longs > lg_nom_longs + 1 {
        return Err(Error::invalid_argument(format!(
            "lgArrLongs {lg_arr_longs} out of range for lgNomLongs {lg_nom_longs}"
        )));
    }
    if !(p > 0.0 && p <= 1.0) {
        return Err(Error::invalid_argument(format!(
            "sampling probability must be in (0.0, 1.0], got {p}"
        )));
    }
    if theta == 0 || theta > MAX_THETA {
        return Err(Error::invalid_argument(format!("theta {theta} out of range")));
    }
    let empty = prefix.has_flags(FLAG_EMPTY);
    if empty && cur_count != 0 {
        return Err(Error::invalid_argument(
            "empty flag inconsistent with retained count",
        )
        .with_context("cur_count", cur_count));
    }
    if mem.capacity() < max_update_sketch_bytes(lg_nom_longs) {
        return Err(Error::invalid_argument("capacity below the full cache footprint")
            .with_context("required", max_update_sketch_bytes(lg_nom_longs))
            .with_context("capacity", mem.capacity()));
    }
    Ok(UpdateImageMeta {
        lg_nom_longs,
        lg_arr_longs,
        resize_factor,
        p,
        theta,
        cur_count,
        empty,
    })
}

#[allow(clippy::too_many_arguments)]
fn write_update_preamble(
    mem: &mut Memory<'_>,
    lg_nom_longs: u8,
    lg_arr_longs: u8,
    resize_factor: ResizeFactor,
    p: f32,
    seed_hash: u16,
    theta: u64,
    cur_count: usize,
    empty: bool,
) {
    PreamblePrefix {
        pre_longs: PREAMBLE_LONGS_UPDATE,
        ser_ver: SERIAL_VERSION,
        family_id: Family::QUICKSELECT.id,
        flags: if empty { FLAG_EMPTY } else { 0 },
        short_field: lg_nom_longs as u16,
        seed_hash,
    }
    .encode(mem, 0)
    .expect("region holds the preamble");
    mem.put_u32(CUR_COUNT_INT, cur_count as u32)
        .expect("region holds the preamble");
    mem.put_u8(UPDATE_LG_ARR_BYTE, lg_arr_longs)
        .expect("region holds the preamble");
    mem.put_u8(UPDATE_LG_RF_BYTE, resize_factor.lg_value())
        .expect("region holds the preamble");
    mem.put_u32(UPDATE_P_FLOAT, p.to_bits())
        .expect("region holds the preamble");
    mem.put_u64(UPDATE_THETA_LONG, theta)
        .expect("region holds the preamble");
}

/// Build a heap table from decoded image state, re-inserting every entry.
fn rebuild_table(
    lg_nom_longs: u8,
    resize_factor: ResizeFactor,
    p: f32,
    seed: u64,
    theta: u64,
    empty: bool,
    entries: impl Iterator<Item = u64>,
) -> Result<ThetaHashTable<'static>, Error> {
    let mut table = ThetaHashTable::new(lg_nom_longs, resize_factor, p, seed);
    table.set_theta(theta);
    for hash in entries {
        if hash >= theta {
            return Err(Error::invalid_argument(
                "retained hash at or above theta, image is corrupt",
            ));
        }
        table.try_insert_hash(hash);
    }
    table.set_empty(empty);
    Ok(table)
}

/// Builder for [`ThetaSketch`].
#[derive(Debug)]
pub struct ThetaSketchBuilder {
    lg_nom_longs: u8,
    resize_factor: ResizeFactor,
    sampling_probability: f32,
    seed: u64,
}

impl Default for ThetaSketchBuilder {
    fn default() -> Self {
        Self {
            lg_nom_longs: DEFAULT_LG_NOM_LONGS,
            resize_factor: ResizeFactor::X8,
            sampling_probability: 1.0,
            seed: DEFAULT_UPDATE_SEED,
        }
    }
}

impl ThetaSketchBuilder {
    /// Set log2 of the nominal entry count.
    ///
    /// # Panics
    ///
    /// Panics if the value is outside `[4, 26]`.
    pub fn lg_nom_longs(mut self, lg_nom_longs: u8) -> Self {
        assert!(
            (MIN_LG_NOM_LONGS..=MAX_LG_NOM_LONGS).contains(&lg_nom_longs),
            "lgNomLongs must be in [{MIN_LG_NOM_LONGS}, {MAX_LG_NOM_LONGS}], got {lg_nom_longs}"
        );
        self.lg_nom_longs = lg_nom_longs;
        self
    }

    /// Set the cache growth factor.
    pub fn resize_factor(mut self, factor: ResizeFactor) -> Self {
        self.resize_factor = factor;
        self
    }

    /// Set the up-front sampling probability.
    ///
    /// # Panics
    ///
    /// Panics if the value is outside `(0.0, 1.0]`.
    pub fn sampling_probability(mut self, probability: f32) -> Self {
        assert!(
            probability > 0.0 && probability <= 1.0,
            "sampling probability must be in (0.0, 1.0], got {probability}"
        );
        self.sampling_probability = probability;
        self
    }

    /// Set the hash seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build a heap sketch.
    pub fn build(self) -> ThetaSketch<'static> {
        ThetaSketch {
            table: ThetaHashTable::new(
                self.lg_nom_longs,
                self.resize_factor,
                self.sampling_probability,
                self.seed,
            ),
        }
    }

    /// Build a direct sketch whose cache lives in the supplied region. The
    /// region is initialized with an empty updatable image and must hold
    /// [`max_update_sketch_bytes`] for the configured `lg_nom_longs`.
    ///
    /// # Errors
    ///
    /// A read-only region is a state error; an undersized region is an
    /// argument error.
    pub fn build_direct<'a>(self, mut mem: Memory<'a>) -> Result<ThetaSketch<'a>, Error> {
        if mem.is_read_only() {
            return Err(Error::invalid_state("direct sketches need writable memory"));
        }
        let required = max_update_sketch_bytes(self.lg_nom_longs);
        if mem.capacity() < required {
            return Err(Error::invalid_argument("memory region too small for lgNomLongs")
                .with_context("required", required)
                .with_context("capacity", mem.capacity()));
        }
        write_update_preamble(
            &mut mem,
            self.lg_nom_longs,
            0, // lgArrLongs is mirrored in by the table below
            self.resize_factor,
            self.sampling_probability,
            compute_seed_hash(self.seed),
            starting_theta(self.sampling_probability),
            0,
            true,
        );
        let table = ThetaHashTable::new_direct(
            self.lg_nom_longs,
            self.resize_factor,
            self.sampling_probability,
            self.seed,
            mem,
        );
        Ok(ThetaSketch { table })
    }
}
