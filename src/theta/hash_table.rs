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

use std::hash::Hash;

use super::serialization::CUR_COUNT_INT;
use super::serialization::UPDATE_DATA_START;
use super::serialization::UPDATE_LG_ARR_BYTE;
use super::serialization::UPDATE_THETA_LONG;
use super::MAX_THETA;
use crate::codec::preamble::FLAG_EMPTY;
use crate::codec::preamble::FLAGS_BYTE;
use crate::common::ResizeFactor;
use crate::error::Error;
use crate::hash::compute_seed_hash;
use crate::hash::MurmurHash3X64128;
use crate::memory::Memory;

/// Minimum log2 cache size.
pub(crate) const MIN_LG_ARR_LONGS: u8 = 5;

/// Resize threshold while the cache is still below full size.
const RESIZE_THRESHOLD: f64 = 0.5;

/// Rebuild threshold once the cache has grown to full size.
pub(crate) const REBUILD_THRESHOLD: f64 = 15.0 / 16.0;

/// Stride hash bits for open-address probing.
const STRIDE_HASH_BITS: u8 = 7;

/// Stride mask.
const STRIDE_MASK: u64 = (1 << STRIDE_HASH_BITS) - 1;

#[derive(Debug)]
enum Slots<'a> {
    Heap(Vec<u64>),
    /// Cache slots live in a caller-supplied updatable image, starting at
    /// the fixed data offset.
    Direct(Memory<'a>),
}

impl Slots<'_> {
    fn get(&self, index: usize) -> u64 {
        match self {
            Slots::Heap(v) => v[index],
            Slots::Direct(mem) => mem
                .get_u64(UPDATE_DATA_START + 8 * index)
                .expect("slot within validated capacity"),
        }
    }

    fn set(&mut self, index: usize, value: u64) {
        match self {
            Slots::Heap(v) => v[index] = value,
            Slots::Direct(mem) => mem
                .put_u64(UPDATE_DATA_START + 8 * index, value)
                .expect("slot within validated capacity"),
        }
    }
}

/// Open-addressed cache of 64-bit hashes for theta sketches.
///
/// The cache holds `2^lg_cur_size` slots, zero meaning vacant. It grows by
/// the resize factor until it reaches `2^(lg_nom_size + 1)`; beyond that,
/// crossing the load threshold triggers a rebuild that selects the
/// nominal-count-th smallest hash as the new theta and evicts everything at
/// or above it. Slots live on the heap or in a caller-supplied region whose
/// preamble mirrors the table state, so the region is a live updatable
/// image at all times.
#[derive(Debug)]
pub(crate) struct ThetaHashTable<'a> {
    lg_cur_size: u8,
    lg_nom_size: u8,
    resize_factor: ResizeFactor,
    sampling_probability: f32,
    hash_seed: u64,
    is_empty: bool,
    theta: u64,
    num_retained: usize,
    slots: Slots<'a>,
}

impl ThetaHashTable<'static> {
    /// Create a heap table.
    pub fn new(
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        hash_seed: u64,
    ) -> Self {
        let lg_cur_size = starting_sub_multiple(
            lg_nom_size + 1,
            MIN_LG_ARR_LONGS,
            resize_factor.lg_value(),
        );
        Self::from_raw_parts(
            lg_cur_size,
            lg_nom_size,
            resize_factor,
            sampling_probability,
            starting_theta(sampling_probability),
            hash_seed,
            true,
        )
    }

    /// Create a heap table with explicit state. `lg_cur_size` of 0 makes a
    /// slotless table, which set operations use as a placeholder.
    ///
    /// # Panics
    ///
    /// Panics if `lg_cur_size > lg_nom_size + 1`.
    pub fn from_raw_parts(
        lg_cur_size: u8,
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        theta: u64,
        hash_seed: u64,
        is_empty: bool,
    ) -> Self {
        assert!(
            lg_cur_size <= lg_nom_size + 1,
            "lg_cur_size must be <= lg_nom_size + 1, got lg_cur_size={lg_cur_size}, lg_nom_size={lg_nom_size}"
        );
        let size = if lg_cur_size > 0 { 1usize << lg_cur_size } else { 0 };
        Self {
            lg_cur_size,
            lg_nom_size,
            resize_factor,
            sampling_probability,
            hash_seed,
            is_empty,
            theta,
            num_retained: 0,
            slots: Slots::Heap(vec![0u64; size]),
        }
    }
}

impl<'a> ThetaHashTable<'a> {
    /// Create a direct table over a zero-initialized region. The caller has
    /// validated the capacity and written the preamble.
    pub fn new_direct(
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        hash_seed: u64,
        mem: Memory<'a>,
    ) -> Self {
        let lg_cur_size = starting_sub_multiple(
            lg_nom_size + 1,
            MIN_LG_ARR_LONGS,
            resize_factor.lg_value(),
        );
        let mut table = Self {
            lg_cur_size,
            lg_nom_size,
            resize_factor,
            sampling_probability,
            hash_seed,
            is_empty: true,
            theta: starting_theta(sampling_probability),
            num_retained: 0,
            slots: Slots::Direct(mem),
        };
        for i in 0..table.size() {
            table.slots.set(i, 0);
        }
        table.sync_image();
        table
    }

    /// Reassemble a direct table from a wrapped updatable image whose
    /// fields the caller has decoded and validated.
    pub fn wrap_parts(
        lg_cur_size: u8,
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        theta: u64,
        hash_seed: u64,
        is_empty: bool,
        num_retained: usize,
        mem: Memory<'a>,
    ) -> Result<Self, Error> {
        let table = Self {
            lg_cur_size,
            lg_nom_size,
            resize_factor,
            sampling_probability,
            hash_seed,
            is_empty,
            theta,
            num_retained,
            slots: Slots::Direct(mem),
        };
        let mut live = 0usize;
        for i in 0..table.size() {
            let slot = table.slots.get(i);
            if slot != 0 {
                if slot >= table.theta {
                    return Err(Error::invalid_argument(
                        "cache entry at or above theta, image is corrupt",
                    ));
                }
                live += 1;
            }
        }
        if live != num_retained {
            return Err(Error::invalid_argument(
                "retained count does not match live cache entries",
            )
            .with_context("stored", num_retained)
            .with_context("counted", live));
        }
        Ok(table)
    }

    fn size(&self) -> usize {
        if self.lg_cur_size > 0 {
            1usize << self.lg_cur_size
        } else {
            0
        }
    }

    /// Hash a value with the table seed, reduced to the 63-bit range the
    /// theta screen operates on.
    pub fn hash<T: Hash>(&self, value: T) -> u64 {
        let mut hasher = MurmurHash3X64128::with_seed(self.hash_seed);
        value.hash(&mut hasher);
        let (h1, _) = hasher.finish128();
        h1 >> 1
    }

    /// Find the slot index for `key`: either its current slot or the vacant
    /// slot where it belongs. `None` means the probe wrapped around.
    fn find_slot(&self, key: u64) -> Option<usize> {
        let size = self.size();
        if size == 0 {
            return None;
        }
        let mask = size - 1;
        let stride = Self::stride(key, self.lg_cur_size);
        let mut index = (key as usize) & mask;
        let first = index;
        loop {
            let probe = self.slots.get(index);
            if probe == 0 || probe == key {
                return Some(index);
            }
            index = (index + stride) & mask;
            if index == first {
                return None;
            }
        }
    }

    /// Returns true if `hash` is currently retained.
    pub fn contains_hash(&self, hash: u64) -> bool {
        match self.find_slot(hash) {
            Some(index) => self.slots.get(index) == hash,
            None => false,
        }
    }

    /// Insert a pre-screened 63-bit hash. A zero hash is ignored (vacant
    /// sentinel), as is anything at or above theta. Returns true if the
    /// hash was newly inserted.
    pub fn try_insert_hash(&mut self, hash: u64) -> bool {
        if hash == 0 || hash >= self.theta {
            return false;
        }
        self.is_empty = false;

        let Some(index) = self.find_slot(hash) else {
            unreachable!("resize keeps the cache below full, a vacant slot always exists");
        };
        if self.slots.get(index) == hash {
            self.sync_image();
            return false;
        }
        self.slots.set(index, hash);
        self.num_retained += 1;

        if self.num_retained > self.capacity_threshold() {
            if self.lg_cur_size <= self.lg_nom_size {
                self.resize();
            } else {
                self.rebuild();
            }
        }
        self.sync_image();
        true
    }

    fn capacity_threshold(&self) -> usize {
        let fraction = if self.lg_cur_size <= self.lg_nom_size {
            RESIZE_THRESHOLD
        } else {
            REBUILD_THRESHOLD
        };
        (fraction * self.size() as f64) as usize
    }

    /// Grow the cache by the resize factor and rehash every live entry.
    fn resize(&mut self) {
        let new_lg = std::cmp::min(
            self.lg_cur_size + self.resize_factor.lg_value(),
            self.lg_nom_size + 1,
        );
        let entries = self.drain_entries();
        self.rehash_into(new_lg, &entries);
    }

    /// Select the nominal-count-th smallest hash as the new theta, evict
    /// everything at or above it, and rehash the survivors.
    fn rebuild(&mut self) {
        let nominal = 1usize << self.lg_nom_size;
        let mut entries = self.drain_entries();
        debug_assert!(entries.len() > nominal, "rebuild requires an over-full cache");
        let (lesser, kth, _) = entries.select_nth_unstable(nominal);
        self.theta = *kth;
        let survivors = lesser.to_vec();
        self.rehash_into(self.lg_cur_size, &survivors);
        debug_assert_eq!(self.num_retained, nominal);
    }

    fn drain_entries(&mut self) -> Vec<u64> {
        let mut entries = Vec::with_capacity(self.num_retained);
        for i in 0..self.size() {
            let slot = self.slots.get(i);
            if slot != 0 {
                entries.push(slot);
            }
        }
        entries
    }

    fn rehash_into(&mut self, new_lg: u8, entries: &[u64]) {
        self.lg_cur_size = new_lg;
        match &mut self.slots {
            Slots::Heap(v) => {
                v.clear();
                v.resize(1usize << new_lg, 0);
            }
            Slots::Direct(_) => {
                // The region was sized for the maximum cache at creation.
                for i in 0..(1usize << new_lg) {
                    self.slots.set(i, 0);
                }
            }
        }
        self.num_retained = 0;
        for &entry in entries {
            let Some(index) = self.find_slot(entry) else {
                unreachable!("fresh cache cannot be full while rehashing");
            };
            debug_assert_eq!(self.slots.get(index), 0, "entries are distinct");
            self.slots.set(index, entry);
            self.num_retained += 1;
        }
    }

    /// Reduce the retained set to the nominal count if it exceeds it.
    pub fn trim(&mut self) {
        if self.num_retained > (1usize << self.lg_nom_size) {
            self.rebuild();
            self.sync_image();
        }
    }

    /// Return the table to its freshly built state.
    pub fn reset(&mut self) {
        let lg_cur = starting_sub_multiple(
            self.lg_nom_size + 1,
            MIN_LG_ARR_LONGS,
            self.resize_factor.lg_value(),
        );
        match &mut self.slots {
            Slots::Heap(v) => {
                v.clear();
                v.resize(1usize << lg_cur, 0);
            }
            Slots::Direct(_) => {
                for i in 0..(1usize << lg_cur.max(self.lg_cur_size)) {
                    self.slots.set(i, 0);
                }
            }
        }
        self.lg_cur_size = lg_cur;
        self.num_retained = 0;
        self.theta = starting_theta(self.sampling_probability);
        self.is_empty = true;
        self.sync_image();
    }

    /// Mirror the hot fields into the backing image so a direct region is
    /// always a decodable updatable sketch.
    fn sync_image(&mut self) {
        let (count, lg_cur, theta, empty) = (
            self.num_retained as u32,
            self.lg_cur_size,
            self.theta,
            self.is_empty,
        );
        if let Slots::Direct(mem) = &mut self.slots {
            mem.put_u32(CUR_COUNT_INT, count).expect("region holds the preamble");
            mem.put_u8(UPDATE_LG_ARR_BYTE, lg_cur).expect("region holds the preamble");
            mem.put_u64(UPDATE_THETA_LONG, theta).expect("region holds the preamble");
            let flags = mem.get_u8(FLAGS_BYTE).expect("region holds the preamble");
            let flags = if empty { flags | FLAG_EMPTY } else { flags & !FLAG_EMPTY };
            mem.put_u8(FLAGS_BYTE, flags).expect("region holds the preamble");
        }
    }

    /// Number of retained hashes.
    pub fn num_retained(&self) -> usize {
        self.num_retained
    }

    /// Current theta threshold.
    pub fn theta(&self) -> u64 {
        self.theta
    }

    /// Lower the theta threshold. Entries already stored are untouched;
    /// callers filter on read.
    pub fn set_theta(&mut self, theta: u64) {
        self.theta = theta;
        self.sync_image();
    }

    /// Logical emptiness of the source set.
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    pub fn set_empty(&mut self, empty: bool) {
        self.is_empty = empty;
        self.sync_image();
    }

    /// Iterate the retained hashes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.size())
            .map(|i| self.slots.get(i))
            .filter(|&h| h != 0)
    }

    pub fn lg_nom_size(&self) -> u8 {
        self.lg_nom_size
    }

    pub fn lg_cur_size(&self) -> u8 {
        self.lg_cur_size
    }

    pub fn resize_factor(&self) -> ResizeFactor {
        self.resize_factor
    }

    pub fn sampling_probability(&self) -> f32 {
        self.sampling_probability
    }

    /// The 16-bit fingerprint of the update seed.
    pub fn seed_hash(&self) -> u16 {
        compute_seed_hash(self.hash_seed)
    }

    /// Returns true if the cache slots live in a caller-supplied region.
    pub fn is_direct(&self) -> bool {
        matches!(self.slots, Slots::Direct(_))
    }

    /// Returns true if the cache slots live in `mem`.
    pub fn is_same_resource(&self, mem: &Memory<'_>) -> bool {
        match &self.slots {
            Slots::Heap(_) => false,
            Slots::Direct(m) => m.is_same_resource(mem),
        }
    }

    /// Raw cache contents, vacant slots included, for updatable
    /// serialization.
    pub fn raw_slots(&self) -> Vec<u64> {
        (0..self.size()).map(|i| self.slots.get(i)).collect()
    }

    /// Smallest cache lg size whose rebuild threshold admits `count`
    /// entries.
    pub fn lg_size_from_count_for_rebuild(count: usize, threshold: f64) -> u8 {
        let mut lg = MIN_LG_ARR_LONGS;
        while ((1usize << lg) as f64 * threshold) < count as f64 {
            lg += 1;
        }
        lg
    }

    fn stride(key: u64, lg_size: u8) -> usize {
        (2 * ((key >> lg_size) & STRIDE_MASK) + 1) as usize
    }
}

/// Compute the initial lg size: the smallest start that reaches the target
/// in whole resize-factor steps without dropping below the minimum.
fn starting_sub_multiple(lg_target: u8, lg_min: u8, lg_resize_factor: u8) -> u8 {
    if lg_target <= lg_min {
        lg_min
    } else if lg_resize_factor == 0 {
        lg_target
    } else {
        ((lg_target - lg_min) % lg_resize_factor) + lg_min
    }
}

/// Initial theta for an up-front sampling probability.
pub(crate) fn starting_theta(sampling_probability: f32) -> u64 {
    if sampling_probability < 1.0 {
        (MAX_THETA as f64 * sampling_probability as f64) as u64
    } else {
        MAX_THETA
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::DEFAULT_UPDATE_SEED;

    fn insert_value(table: &mut ThetaHashTable<'_>, value: impl Hash) -> bool {
        let hash = table.hash(value);
        table.try_insert_hash(hash)
    }

    #[test]
    fn test_new_table() {
        let table = ThetaHashTable::new(8, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);
        assert_eq!(
            table.lg_cur_size(),
            starting_sub_multiple(9, MIN_LG_ARR_LONGS, 3)
        );
        assert_eq!(table.theta(), MAX_THETA);
        assert_eq!(table.num_retained(), 0);
        assert!(table.is_empty());
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn test_insert_and_duplicates() {
        let mut table = ThetaHashTable::new(5, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);

        assert!(insert_value(&mut table, "test_value"));
        assert_eq!(table.num_retained(), 1);
        assert!(!table.is_empty());

        assert!(!insert_value(&mut table, "test_value"));
        assert_eq!(table.num_retained(), 1);
    }

    #[test]
    fn test_screened_insert_keeps_empty() {
        let mut table = ThetaHashTable::new(8, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);
        table.set_theta(1);
        assert!(!insert_value(&mut table, "screened"));
        assert_eq!(table.num_retained(), 0);
        assert!(table.is_empty());
        assert!(!table.try_insert_hash(0));
        assert!(table.is_empty());
    }

    #[test]
    fn test_resize_by_factor() {
        let mut table = ThetaHashTable::new(8, ResizeFactor::X2, 1.0, DEFAULT_UPDATE_SEED);
        assert_eq!(table.size(), 32);

        // Crossing half of 32 slots forces a resize.
        let mut inserted = 0;
        for i in 0..20 {
            if insert_value(&mut table, format!("value_{i}")) {
                inserted += 1;
            }
        }
        assert_eq!(table.num_retained(), inserted);
        assert_eq!(table.size(), 64);
    }

    #[test]
    fn test_rebuild_lowers_theta_and_caps_count() {
        let mut table = ThetaHashTable::new(5, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);
        for i in 0..200 {
            insert_value(&mut table, format!("value_{i}"));
        }
        assert!(table.theta() < MAX_THETA);
        assert!(table.iter().all(|h| h < table.theta()));

        table.trim();
        assert!(table.num_retained() <= 32);
    }

    #[test]
    fn test_rebuild_keeps_smallest() {
        let mut table = ThetaHashTable::new(5, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);
        let mut hashes = Vec::new();
        let mut i = 0u64;
        while table.theta() == MAX_THETA {
            let hash = table.hash(i);
            if table.try_insert_hash(hash) {
                hashes.push(hash);
            }
            i += 1;
        }
        hashes.sort_unstable();
        let kth = hashes[32];
        assert_eq!(table.theta(), kth);
        assert!(table.iter().all(|h| h < kth));
    }

    #[test]
    fn test_reset() {
        let mut table = ThetaHashTable::new(8, ResizeFactor::X8, 0.5, DEFAULT_UPDATE_SEED);
        let initial_theta = table.theta();
        assert_eq!(initial_theta, (MAX_THETA as f64 * 0.5) as u64);

        for i in 0..100 {
            insert_value(&mut table, i);
        }
        assert!(!table.is_empty());

        table.reset();
        assert!(table.is_empty());
        assert_eq!(table.num_retained(), 0);
        assert_eq!(table.theta(), initial_theta);
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn test_contains_hash() {
        let mut table = ThetaHashTable::new(6, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);
        let hash = table.hash("present");
        table.try_insert_hash(hash);
        assert!(table.contains_hash(hash));
        assert!(!table.contains_hash(hash ^ 1));
    }

    #[test]
    fn test_lg_size_from_count() {
        assert_eq!(
            ThetaHashTable::lg_size_from_count_for_rebuild(0, REBUILD_THRESHOLD),
            MIN_LG_ARR_LONGS
        );
        let lg = ThetaHashTable::lg_size_from_count_for_rebuild(1000, REBUILD_THRESHOLD);
        assert!((1usize << lg) as f64 * REBUILD_THRESHOLD >= 1000.0);
        assert!((1usize << (lg - 1)) as f64 * REBUILD_THRESHOLD < 1000.0);
    }

    #[test]
    fn test_starting_sub_multiple() {
        assert_eq!(starting_sub_multiple(9, 5, 0), 9);
        assert_eq!(starting_sub_multiple(9, 5, 3), 6);
        assert_eq!(starting_sub_multiple(13, 5, 3), 7);
        assert_eq!(starting_sub_multiple(4, 5, 1), 5);
    }
}
