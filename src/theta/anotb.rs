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
use super::hash_table::REBUILD_THRESHOLD;
use super::CompactThetaSketch;
use super::ThetaSketchView;
use super::MAX_THETA;
use crate::common::ResizeFactor;
use crate::error::Error;
use crate::hash::compute_seed_hash;
use crate::hash::DEFAULT_UPDATE_SEED;

/// Set-difference operator: the items of A that are not in B.
///
/// The result keeps the hashes of A below `min(thetaA, thetaB)` that do
/// not appear in B, with that minimum as its theta.
///
/// # Examples
///
/// ```
/// use sketches_core::theta::{ThetaAnotB, ThetaSketch, ThetaSketchView};
///
/// let mut a = ThetaSketch::builder().build();
/// let mut b = ThetaSketch::builder().build();
/// for i in 0..1000 {
///     a.update(i);
/// }
/// for i in 500..1000 {
///     b.update(i);
/// }
/// let result = ThetaAnotB::new_with_default_seed()
///     .compute(&a, &b, true)
///     .unwrap();
/// assert_eq!(result.estimate(), 500.0);
/// ```
#[derive(Debug)]
pub struct ThetaAnotB {
    seed_hash: u16,
}

impl ThetaAnotB {
    /// Creates an operator for the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed_hash: compute_seed_hash(seed),
        }
    }

    /// Creates an operator with the default seed.
    pub fn new_with_default_seed() -> Self {
        Self::new(DEFAULT_UPDATE_SEED)
    }

    /// Compute A-and-not-B as a compact sketch.
    ///
    /// # Errors
    ///
    /// Returns an argument error if either operand was hashed with an
    /// incompatible seed.
    pub fn compute<A, B>(
        &self,
        a: &A,
        b: &B,
        ordered: bool,
    ) -> Result<CompactThetaSketch<'static>, Error>
    where
        A: ThetaSketchView,
        B: ThetaSketchView,
    {
        for (name, empty, seed_hash) in [
            ("A", a.is_empty(), a.seed_hash()),
            ("B", b.is_empty(), b.seed_hash()),
        ] {
            if !empty && seed_hash != self.seed_hash {
                return Err(Error::seed_hash_mismatch(self.seed_hash, seed_hash)
                    .with_context("operand", name));
            }
        }

        let theta = a.theta64().min(b.theta64());

        let mut hashes: Vec<u64> = if b.num_retained() == 0 {
            a.retained_hashes().into_iter().filter(|&h| h < theta).collect()
        } else {
            let lg_size = ThetaHashTable::lg_size_from_count_for_rebuild(
                b.num_retained(),
                REBUILD_THRESHOLD,
            );
            let mut b_table = ThetaHashTable::from_raw_parts(
                lg_size,
                lg_size - 1,
                ResizeFactor::X1,
                1.0,
                MAX_THETA,
                0,
                false,
            );
            for hash in b.retained_hashes() {
                b_table.try_insert_hash(hash);
            }
            a.retained_hashes()
                .into_iter()
                .filter(|&h| h < theta && !b_table.contains_hash(h))
                .collect()
        };

        if ordered {
            hashes.sort_unstable();
        }
        Ok(CompactThetaSketch::from_parts(
            hashes,
            theta,
            self.seed_hash,
            ordered,
            a.is_empty(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theta::ThetaSketch;

    #[test]
    fn test_b_empty_gives_a() {
        let mut a = ThetaSketch::builder().build();
        for i in 0..100 {
            a.update(i);
        }
        let b = ThetaSketch::builder().build();
        let result = ThetaAnotB::new_with_default_seed()
            .compute(&a, &b, true)
            .unwrap();
        assert_eq!(result.estimate(), 100.0);
    }

    #[test]
    fn test_a_empty_gives_empty() {
        let a = ThetaSketch::builder().build();
        let mut b = ThetaSketch::builder().build();
        b.update("x");
        let result = ThetaAnotB::new_with_default_seed()
            .compute(&a, &b, true)
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.estimate(), 0.0);
    }

    #[test]
    fn test_subset_subtraction() {
        let mut a = ThetaSketch::builder().build();
        let mut b = ThetaSketch::builder().build();
        for i in 0..200 {
            a.update(i);
        }
        for i in 150..400 {
            b.update(i);
        }
        let result = ThetaAnotB::new_with_default_seed()
            .compute(&a, &b, true)
            .unwrap();
        assert_eq!(result.estimate(), 150.0);
    }

    #[test]
    fn test_seed_mismatch() {
        let mut a = ThetaSketch::builder().seed(42).build();
        a.update("x");
        let b = ThetaSketch::builder().build();
        assert!(ThetaAnotB::new_with_default_seed()
            .compute(&a, &b, true)
            .is_err());
    }
}
