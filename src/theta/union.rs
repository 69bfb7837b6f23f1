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

use super::hash_table::ThetaHashTable;
use super::CompactThetaSketch;
use super::ThetaSketchView;
use super::DEFAULT_LG_NOM_LONGS;
use super::MAX_LG_NOM_LONGS;
use super::MAX_THETA;
use super::MIN_LG_NOM_LONGS;
use crate::common::ResizeFactor;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;

/// Stateful union operator for theta sketches.
///
/// The union absorbs the retained hashes of every operand into an internal
/// cache, tracking the minimum theta seen. The result keeps at most the
/// nominal count of smallest hashes, lowering theta further if needed.
///
/// # Examples
///
/// ```
/// use sketches_core::theta::{ThetaSketch, ThetaSketchView, ThetaUnion};
///
/// let mut a = ThetaSketch::builder().build();
/// let mut b = ThetaSketch::builder().build();
/// for i in 0..1000 {
///     a.update(i);
///     b.update(i + 500);
/// }
///
/// let mut union = ThetaUnion::new_with_default_seed(12);
/// union.update(&a).unwrap();
/// union.update(&b).unwrap();
/// let result = union.result(true);
/// assert_eq!(result.estimate(), 1500.0);
/// ```
#[derive(Debug)]
pub struct ThetaUnion {
    table: ThetaHashTable<'static>,
    union_theta: u64,
}

impl ThetaUnion {
    /// Creates a union with the given nominal size and seed.
    ///
    /// # Panics
    ///
    /// Panics if `lg_nom_longs` is outside `[4, 26]`.
    pub fn new(lg_nom_longs: u8, seed: u64) -> Self {
        assert!(
            (MIN_LG_NOM_LONGS..=MAX_LG_NOM_LONGS).contains(&lg_nom_longs),
            "lgNomLongs must be in [{MIN_LG_NOM_LONGS}, {MAX_LG_NOM_LONGS}], got {lg_nom_longs}"
        );
        Self {
            table: ThetaHashTable::new(lg_nom_longs, ResizeFactor::X8, 1.0, seed),
            union_theta: MAX_THETA,
        }
    }

    /// Creates a union with the default seed.
    pub fn new_with_default_seed(lg_nom_longs: u8) -> Self {
        Self::new(lg_nom_longs, DEFAULT_UPDATE_SEED)
    }

    /// Absorb a sketch into the union.
    ///
    /// # Errors
    ///
    /// Returns an argument error if the operand was hashed with an
    /// incompatible seed.
    pub fn update<S: ThetaSketchView>(&mut self, sketch: &S) -> Result<(), Error> {
        if sketch.is_empty() {
            return Ok(());
        }
        if sketch.seed_hash() != self.table.seed_hash() {
            return Err(Error::seed_hash_mismatch(
                self.table.seed_hash(),
                sketch.seed_hash(),
            ));
        }
        self.union_theta = self.union_theta.min(sketch.theta64());
        for hash in sketch.retained_hashes() {
            if hash < self.union_theta {
                self.table.try_insert_hash(hash);
            }
        }
        Ok(())
    }

    /// Returns the union result as a compact sketch.
    pub fn result(&self, ordered: bool) -> CompactThetaSketch<'static> {
        let mut theta = self.union_theta.min(self.table.theta());
        let mut hashes: Vec<u64> = self.table.iter().filter(|&h| h < theta).collect();
        let nominal = 1usize << self.table.lg_nom_size();
        if hashes.len() > nominal {
            let (lesser, kth, _) = hashes.select_nth_unstable(nominal);
            theta = *kth;
            let mut trimmed = lesser.to_vec();
            std::mem::swap(&mut hashes, &mut trimmed);
        }
        if ordered {
            hashes.sort_unstable();
        }
        CompactThetaSketch::from_parts(
            hashes,
            theta,
            self.table.seed_hash(),
            ordered,
            self.table.is_empty(),
        )
    }

    /// Return the union to its initial state.
    pub fn reset(&mut self) {
        self.table.reset();
        self.union_theta = MAX_THETA;
    }
}

impl Default for ThetaUnion {
    fn default() -> Self {
        Self::new_with_default_seed(DEFAULT_LG_NOM_LONGS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theta::ThetaSketch;

    #[test]
    fn test_union_of_empties_is_empty() {
        let a = ThetaSketch::builder().build();
        let b = ThetaSketch::builder().build();
        let mut union = ThetaUnion::default();
        union.update(&a).unwrap();
        union.update(&b).unwrap();
        let result = union.result(true);
        assert!(result.is_empty());
        assert_eq!(result.estimate(), 0.0);
    }

    #[test]
    fn test_union_deduplicates() {
        let mut a = ThetaSketch::builder().build();
        let mut b = ThetaSketch::builder().build();
        for i in 0..100 {
            a.update(i);
            b.update(i);
        }
        let mut union = ThetaUnion::default();
        union.update(&a).unwrap();
        union.update(&b).unwrap();
        assert_eq!(union.result(true).estimate(), 100.0);
    }

    #[test]
    fn test_union_seed_mismatch() {
        let mut odd = ThetaSketch::builder().seed(777).build();
        odd.update("x");
        let mut union = ThetaUnion::default();
        assert!(union.update(&odd).is_err());
    }

    #[test]
    fn test_result_trims_to_nominal() {
        let mut sketch = ThetaSketch::builder().lg_nom_longs(10).build();
        for i in 0..100_000 {
            sketch.update(i);
        }
        let mut union = ThetaUnion::new_with_default_seed(4);
        union.update(&sketch).unwrap();
        let result = union.result(true);
        assert!(result.num_retained() <= 16);
        let hashes = result.retained_hashes();
        assert!(hashes.windows(2).all(|w| w[0] < w[1]));
        assert!(hashes.iter().all(|&h| h < result.theta64()));
    }
}
