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

//! Theta sketch for distinct counting.
//!
//! A theta sketch retains the set of input hashes that fall below a moving
//! threshold theta. While theta is at its maximum the count is exact; once
//! the cache fills past its nominal capacity, theta drops to the
//! nominal-count-th smallest hash and the sketch becomes a uniform sample
//! of the distinct inputs, giving the unbiased estimate
//! `retained / theta`. Sketches combine under union, intersection, and
//! difference through their retained hash sets alone.
//!
//! # Usage
//!
//! ```rust
//! # use sketches_core::theta::{ThetaSketch, ThetaSketchView};
//! let mut sketch = ThetaSketch::builder().lg_nom_longs(12).build();
//! for i in 0..100 {
//!     sketch.update(i);
//! }
//! assert_eq!(sketch.estimate(), 100.0);
//! ```

mod anotb;
mod compact;
pub(crate) mod hash_table;
mod intersection;
pub(crate) mod serialization;
mod sketch;
mod union;

pub use anotb::ThetaAnotB;
pub use compact::CompactThetaSketch;
pub use intersection::ThetaIntersection;
pub use serialization::max_update_sketch_bytes;
pub use sketch::ThetaSketch;
pub use sketch::ThetaSketchBuilder;
pub use union::ThetaUnion;

use crate::common::binomial_bounds;
use crate::common::NumStdDev;

/// Maximum theta: the full 63-bit hash range.
pub const MAX_THETA: u64 = i64::MAX as u64;

/// Default log2 nominal entries.
pub const DEFAULT_LG_NOM_LONGS: u8 = 12;

/// Minimum log2 nominal entries.
pub const MIN_LG_NOM_LONGS: u8 = 4;

/// Maximum log2 nominal entries.
pub const MAX_LG_NOM_LONGS: u8 = 26;

/// Read-side view shared by update and compact theta sketches.
///
/// The estimators are defined once here over the accessor methods, so
/// every form of sketch answers them identically.
pub trait ThetaSketchView {
    /// Returns true if the sketch has retained nothing and never saw a
    /// hash below its threshold.
    fn is_empty(&self) -> bool;

    /// Returns true if the retained hashes are sorted ascending.
    fn is_ordered(&self) -> bool;

    /// The 16-bit fingerprint of the update seed.
    fn seed_hash(&self) -> u16;

    /// The raw 63-bit theta threshold.
    fn theta64(&self) -> u64;

    /// Number of retained hashes.
    fn num_retained(&self) -> usize;

    /// The retained hashes, copied out.
    fn retained_hashes(&self) -> Vec<u64>;

    /// Theta as a fraction of the hash range.
    fn theta(&self) -> f64 {
        self.theta64() as f64 / MAX_THETA as f64
    }

    /// Returns true if estimates are scaled by 1/theta rather than exact.
    fn is_estimation_mode(&self) -> bool {
        self.theta64() < MAX_THETA && !self.is_empty()
    }

    /// The unbiased cardinality estimate.
    fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.num_retained() as f64 / self.theta()
    }

    /// The approximate lower bound at the given confidence.
    fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::lower_bound(self.num_retained() as u64, self.theta(), num_std_dev)
            .expect("theta is in (0, 1] in estimation mode")
    }

    /// The approximate upper bound at the given confidence.
    fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::upper_bound(
            self.num_retained() as u64,
            self.theta(),
            num_std_dev,
            self.is_empty(),
        )
        .expect("theta is in (0, 1] in estimation mode")
    }
}
