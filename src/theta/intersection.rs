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

/// Stateful intersection operator for theta sketches.
///
/// The operator accumulates the running minimum theta and the set of
/// hashes common to every operand so far. Before the first
/// [`update`](Self::update) the result is undefined, standing for the
/// conceptual universe set; use [`has_result`](Self::has_result) to check.
#[derive(Debug)]
pub struct ThetaIntersection {
    seed_hash: u16,
    theta: u64,
    empty: bool,
    /// `None` until the first operand arrives.
    retained: Option<Vec<u64>>,
}

impl ThetaIntersection {
    /// Creates a new intersection operator for the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed_hash: compute_seed_hash(seed),
            theta: MAX_THETA,
            empty: false,
            retained: None,
        }
    }

    /// Creates a new intersection operator with the default seed.
    pub fn new_with_default_seed() -> Self {
        Self::new(DEFAULT_UPDATE_SEED)
    }

    /// Narrow the intersection by another sketch.
    ///
    /// # Errors
    ///
    /// Returns an argument error on a seed-hash mismatch, or when the
    /// operand is corrupt: its hash list disagrees with its retained
    /// count, or it carries duplicate or zero hashes. A failed update
    /// leaves the operator unchanged.
    pub fn update<S: ThetaSketchView>(&mut self, sketch: &S) -> Result<(), Error> {
        if !sketch.is_empty() && sketch.seed_hash() != self.seed_hash {
            return Err(Error::seed_hash_mismatch(self.seed_hash, sketch.seed_hash()));
        }

        let operand = sketch.retained_hashes();
        if operand.len() != sketch.num_retained() {
            return Err(Error::invalid_argument(
                "operand hash list disagrees with its retained count",
            )
            .with_context("claimed", sketch.num_retained())
            .with_context("actual", operand.len()));
        }

        let new_empty = self.empty || sketch.is_empty();
        let new_theta = if new_empty {
            MAX_THETA
        } else {
            self.theta.min(sketch.theta64())
        };

        // Everything the operand can contribute lies below the new theta;
        // an ordered operand lets the screen stop at the first overflow.
        let candidates: Vec<u64> = if sketch.is_ordered() {
            let cut = operand.partition_point(|&h| h < new_theta);
            operand[..cut].to_vec()
        } else {
            operand.into_iter().filter(|&h| h < new_theta).collect()
        };

        // Stage the operand in a probe table. Building it also vets the
        // operand: a zero or repeated hash cannot come from a well-formed
        // sketch.
        let operand_table = if candidates.is_empty() {
            None
        } else {
            let lg_size = ThetaHashTable::lg_size_from_count_for_rebuild(
                candidates.len(),
                REBUILD_THRESHOLD,
            );
            let mut table = ThetaHashTable::from_raw_parts(
                lg_size,
                lg_size - 1,
                ResizeFactor::X1,
                1.0,
                MAX_THETA,
                0,
                false,
            );
            for &hash in &candidates {
                if !table.try_insert_hash(hash) {
                    return Err(Error::invalid_argument(
                        "duplicate or zero hash in operand, possibly corrupted input sketch",
                    ));
                }
            }
            Some(table)
        };

        let survivors = match (self.retained.take(), operand_table) {
            // First operand: adopt its screened hashes outright.
            (None, _) => candidates,
            // One side is empty, so is the overlap.
            (Some(_), None) => Vec::new(),
            (Some(current), Some(table)) => current
                .into_iter()
                .filter(|&h| h < new_theta && table.contains_hash(h))
                .collect(),
        };

        // An exact-mode result with nothing retained is provably the
        // empty set.
        self.empty = new_empty || (survivors.is_empty() && new_theta == MAX_THETA);
        self.theta = new_theta;
        self.retained = Some(survivors);
        Ok(())
    }

    /// Returns whether this operator has received at least one update.
    pub fn has_result(&self) -> bool {
        self.retained.is_some()
    }

    /// Returns the intersection result as a compact sketch.
    ///
    /// # Panics
    ///
    /// Panics if called before the first [`update`](Self::update).
    pub fn result(&self, ordered: bool) -> CompactThetaSketch<'static> {
        let retained = self
            .retained
            .as_ref()
            .expect("ThetaIntersection::result() called before first update()");
        let mut hashes = retained.clone();
        if ordered {
            hashes.sort_unstable();
        }
        CompactThetaSketch::from_parts(hashes, self.theta, self.seed_hash, ordered, self.empty)
    }
}
