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

//! Compact theta sketch: the immutable, densely packed form.
//!
//! A compact sketch either owns its retained hashes on the heap or is a
//! read-only view over a serialized image in caller memory. The byte image
//! of a wrapped sketch round-trips bit for bit.

use super::serialization::CUR_COUNT_INT;
use super::serialization::DEFAULT_P_FLOAT_BITS;
use super::serialization::HASH_SIZE_BYTES;
use super::serialization::PREAMBLE_LONGS_EMPTY;
use super::serialization::PREAMBLE_LONGS_ESTIMATION;
use super::serialization::PREAMBLE_LONGS_EXACT;
use super::serialization::P_FLOAT;
use super::serialization::THETA_LONG;
use super::ThetaSketchView;
use super::MAX_THETA;
use crate::codec::preamble::FLAG_COMPACT;
use crate::codec::preamble::FLAG_EMPTY;
use crate::codec::preamble::FLAG_ORDERED;
use crate::codec::preamble::FLAG_READ_ONLY;
use crate::codec::preamble::SERIAL_VERSION;
use crate::codec::Family;
use crate::codec::PreamblePrefix;
use crate::error::Error;
use crate::hash::compute_seed_hash;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::memory::Memory;

/// A compact, immutable theta sketch.
///
/// Unlike [`ThetaSketch`](super::ThetaSketch) this sketch cannot be
/// updated; it supports estimation, set operations, and serialization.
///
/// # Examples
///
/// ```
/// use sketches_core::memory::Memory;
/// use sketches_core::theta::{CompactThetaSketch, ThetaSketch, ThetaSketchView};
///
/// let mut sketch = ThetaSketch::builder().build();
/// sketch.update("apple");
/// sketch.update("banana");
///
/// let bytes = sketch.to_byte_array(true);
/// let restored = CompactThetaSketch::heapify(&Memory::from_bytes(bytes)).unwrap();
/// assert_eq!(restored.estimate(), 2.0);
/// ```
#[derive(Debug)]
pub struct CompactThetaSketch<'a> {
    repr: CompactRepr<'a>,
}

#[derive(Debug)]
enum CompactRepr<'a> {
    Heap(HeapCompact),
    Direct { mem: Memory<'a>, meta: CompactMeta },
}

#[derive(Debug, Clone)]
struct HeapCompact {
    theta: u64,
    entries: Vec<u64>,
    seed_hash: u16,
    empty: bool,
    ordered: bool,
    p: f32,
    lg_nom_longs: u16,
}

#[derive(Debug, Clone, Copy)]
struct CompactMeta {
    data_start: usize,
    num_entries: usize,
    theta: u64,
    seed_hash: u16,
    empty: bool,
    ordered: bool,
    p: f32,
    image_bytes: usize,
}

impl CompactThetaSketch<'static> {
    /// Build a heap compact sketch from set-operation results.
    pub(crate) fn from_parts(
        entries: Vec<u64>,
        theta: u64,
        seed_hash: u16,
        ordered: bool,
        empty: bool,
    ) -> Self {
        Self::from_sketch_parts(
            entries,
            theta,
            seed_hash,
            ordered,
            empty,
            f32::from_bits(DEFAULT_P_FLOAT_BITS),
            0,
        )
    }

    /// Build a heap compact sketch carrying the source sketch's sampling
    /// probability and nominal size, so an update sketch can be rebuilt
    /// from its image.
    pub(crate) fn from_sketch_parts(
        entries: Vec<u64>,
        theta: u64,
        seed_hash: u16,
        ordered: bool,
        empty: bool,
        p: f32,
        lg_nom_longs: u16,
    ) -> Self {
        Self {
            repr: CompactRepr::Heap(HeapCompact {
                theta,
                entries,
                seed_hash,
                empty,
                ordered,
                p,
                lg_nom_longs,
            }),
        }
    }

    /// Rebuild a heap compact sketch from an image, validating the stored
    /// seed hash against the default seed.
    pub fn heapify(mem: &Memory<'_>) -> Result<CompactThetaSketch<'static>, Error> {
        Self::heapify_with_seed(mem, DEFAULT_UPDATE_SEED)
    }

    /// Rebuild a heap compact sketch from an image with an explicit seed.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed image or a seed-hash mismatch. A
    /// stored seed hash of 0 is accepted unvalidated.
    pub fn heapify_with_seed(
        mem: &Memory<'_>,
        seed: u64,
    ) -> Result<CompactThetaSketch<'static>, Error> {
        let meta = validate_compact_image(mem, Some(compute_seed_hash(seed)))?;
        let entries = mem.get_u64_array(meta.data_start, meta.num_entries)?;
        let prefix = PreamblePrefix::decode(mem, 0)?;
        Ok(Self::from_sketch_parts(
            entries,
            meta.theta,
            meta.seed_hash,
            meta.ordered,
            meta.empty,
            meta.p,
            prefix.short_field,
        ))
    }
}

impl<'a> CompactThetaSketch<'a> {
    /// View a compact image in place, validating the stored seed hash
    /// against the default seed. The view is read-only regardless of the
    /// region's mutability.
    pub fn wrap(mem: Memory<'a>) -> Result<CompactThetaSketch<'a>, Error> {
        Self::wrap_with_seed(mem, DEFAULT_UPDATE_SEED)
    }

    /// View a compact image in place with an explicit seed.
    pub fn wrap_with_seed(mem: Memory<'a>, seed: u64) -> Result<CompactThetaSketch<'a>, Error> {
        Self::wrap_with_seed_hash(mem, compute_seed_hash(seed))
    }

    /// View a compact image in place, validating against a known seed
    /// hash.
    pub(crate) fn wrap_with_seed_hash(
        mem: Memory<'a>,
        expected_seed_hash: u16,
    ) -> Result<CompactThetaSketch<'a>, Error> {
        let meta = validate_compact_image(&mem, Some(expected_seed_hash))?;
        Ok(Self {
            repr: CompactRepr::Direct {
                mem: mem.into_read_only(),
                meta,
            },
        })
    }

    /// Serialize to the compact image. A wrapped sketch reproduces its
    /// backing image byte for byte.
    pub fn to_byte_array(&self) -> Vec<u8> {
        match &self.repr {
            CompactRepr::Direct { mem, meta } => mem.as_slice()[..meta.image_bytes].to_vec(),
            CompactRepr::Heap(heap) => {
                let pre_longs = if heap.theta < MAX_THETA {
                    PREAMBLE_LONGS_ESTIMATION
                } else if heap.empty {
                    PREAMBLE_LONGS_EMPTY
                } else {
                    PREAMBLE_LONGS_EXACT
                };
                let mut flags = FLAG_COMPACT | FLAG_READ_ONLY;
                if heap.empty {
                    flags |= FLAG_EMPTY;
                }
                if heap.ordered {
                    flags |= FLAG_ORDERED;
                }
                let data_start = pre_longs as usize * 8;
                let mut mem =
                    Memory::new_heap(data_start + heap.entries.len() * HASH_SIZE_BYTES);
                PreamblePrefix {
                    pre_longs,
                    ser_ver: SERIAL_VERSION,
                    family_id: Family::COMPACT.id,
                    flags,
                    short_field: heap.lg_nom_longs,
                    seed_hash: heap.seed_hash,
                }
                .encode(&mut mem, 0)
                .expect("image sized for the preamble");
                if pre_longs >= PREAMBLE_LONGS_EXACT {
                    mem.put_u32(CUR_COUNT_INT, heap.entries.len() as u32)
                        .expect("image sized for the preamble");
                    mem.put_u32(P_FLOAT, heap.p.to_bits())
                        .expect("image sized for the preamble");
                }
                if pre_longs >= PREAMBLE_LONGS_ESTIMATION {
                    mem.put_u64(THETA_LONG, heap.theta)
                        .expect("image sized for the preamble");
                }
                mem.put_u64_array(data_start, &heap.entries)
                    .expect("image sized for the payload");
                mem.into_bytes()
            }
        }
    }

    /// The sampling probability recorded in the image.
    pub fn sampling_probability(&self) -> f32 {
        match &self.repr {
            CompactRepr::Heap(heap) => heap.p,
            CompactRepr::Direct { meta, .. } => meta.p,
        }
    }

    /// Returns true if this sketch is a view over caller memory.
    pub fn is_direct(&self) -> bool {
        matches!(&self.repr, CompactRepr::Direct { .. })
    }

    /// Returns true if this sketch is backed by the same region as `mem`.
    pub fn is_same_resource(&self, other: &Memory<'_>) -> bool {
        match &self.repr {
            CompactRepr::Heap(_) => false,
            CompactRepr::Direct { mem, .. } => mem.is_same_resource(other),
        }
    }

    /// Iterate the retained hashes.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.num_retained()).map(move |i| self.entry(i))
    }

    fn entry(&self, index: usize) -> u64 {
        match &self.repr {
            CompactRepr::Heap(heap) => heap.entries[index],
            CompactRepr::Direct { mem, meta } => mem
                .get_u64(meta.data_start + 8 * index)
                .expect("entry within validated capacity"),
        }
    }
}

impl ThetaSketchView for CompactThetaSketch<'_> {
    fn is_empty(&self) -> bool {
        match &self.repr {
            CompactRepr::Heap(heap) => heap.empty,
            CompactRepr::Direct { meta, .. } => meta.empty,
        }
    }

    fn is_ordered(&self) -> bool {
        match &self.repr {
            CompactRepr::Heap(heap) => heap.ordered,
            CompactRepr::Direct { meta, .. } => meta.ordered,
        }
    }

    fn seed_hash(&self) -> u16 {
        match &self.repr {
            CompactRepr::Heap(heap) => heap.seed_hash,
            CompactRepr::Direct { meta, .. } => meta.seed_hash,
        }
    }

    fn theta64(&self) -> u64 {
        match &self.repr {
            CompactRepr::Heap(heap) => heap.theta,
            CompactRepr::Direct { meta, .. } => meta.theta,
        }
    }

    fn num_retained(&self) -> usize {
        match &self.repr {
            CompactRepr::Heap(heap) => heap.entries.len(),
            CompactRepr::Direct { meta, .. } => meta.num_entries,
        }
    }

    fn retained_hashes(&self) -> Vec<u64> {
        self.iter().collect()
    }
}

/// Decode and validate a compact image in contract order. Passing an
/// expected seed hash enforces it, except against a stored hash of 0.
fn validate_compact_image(
    mem: &Memory<'_>,
    expected_seed_hash: Option<u16>,
) -> Result<CompactMeta, Error> {
    let prefix = PreamblePrefix::decode(mem, 0)?;
    prefix.validate(&Family::COMPACT)?;
    if !prefix.has_flags(FLAG_COMPACT | FLAG_READ_ONLY) {
        return Err(Error::invalid_argument(
            "compact images must carry the compact and read-only flags",
        ));
    }
    let empty = prefix.has_flags(FLAG_EMPTY);
    let ordered = prefix.has_flags(FLAG_ORDERED);

    if let Some(expected) = expected_seed_hash {
        if prefix.seed_hash != 0 && prefix.seed_hash != expected {
            return Err(Error::seed_hash_mismatch(expected, prefix.seed_hash));
        }
    }
    let seed_hash = prefix.seed_hash;

    let (num_entries, p, theta) = match prefix.pre_longs {
        PREAMBLE_LONGS_EMPTY => {
            if !empty {
                return Err(Error::invalid_argument(
                    "a one-long preamble is only valid for empty sketches",
                ));
            }
            (0usize, 1.0f32, MAX_THETA)
        }
        PREAMBLE_LONGS_EXACT | PREAMBLE_LONGS_ESTIMATION => {
            let data_start = prefix.pre_longs as usize * 8;
            if mem.capacity() < data_start {
                return Err(Error::insufficient_data("compact preamble")
                    .with_context("capacity", mem.capacity()));
            }
            let num_entries = mem.get_u32(CUR_COUNT_INT)? as usize;
            let p = f32::from_bits(mem.get_u32(P_FLOAT)?);
            let theta = if prefix.pre_longs == PREAMBLE_LONGS_ESTIMATION {
                mem.get_u64(THETA_LONG)?
            } else {
                MAX_THETA
            };
            (num_entries, p, theta)
        }
        other => {
            return Err(Error::invalid_argument(format!(
                "invalid compact preamble longs {other}"
            )));
        }
    };

    if prefix.pre_longs == PREAMBLE_LONGS_EXACT && empty {
        return Err(Error::invalid_argument(
            "empty exact-mode sketches use a one-long preamble",
        ));
    }
    if empty && num_entries != 0 {
        return Err(Error::invalid_argument("empty flag inconsistent with count")
            .with_context("count", num_entries));
    }
    if !(p > 0.0 && p <= 1.0) {
        return Err(Error::invalid_argument(format!(
            "sampling probability must be in (0.0, 1.0], got {p}"
        )));
    }
    if theta == 0 || theta > MAX_THETA {
        return Err(Error::invalid_argument(format!("theta {theta} out of range")));
    }

    let data_start = prefix.pre_longs as usize * 8;
    let image_bytes = data_start + num_entries * HASH_SIZE_BYTES;
    if mem.capacity() < image_bytes {
        return Err(Error::invalid_argument("capacity below computed payload size")
            .with_context("required", image_bytes)
            .with_context("capacity", mem.capacity()));
    }

    Ok(CompactMeta {
        data_start,
        num_entries,
        theta,
        seed_hash,
        empty,
        ordered,
        p,
        image_bytes,
    })
}
