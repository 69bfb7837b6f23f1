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

//! Doubles quantiles sketch.
//!
//! A mergeable, one-pass summary of a stream of `f64` values supporting
//! approximate rank, quantile, PMF, and CDF queries. Incoming values land
//! in an unsorted base buffer of up to `2k` items; a full base buffer is
//! sorted and carried into a sequence of sorted `k`-item levels, where the
//! items of level `L` each represent `2^(L+1)` stream items. The level
//! occupancy is exactly the binary representation of `⌊N / 2k⌋`, so the
//! whole structure is derivable from `N` alone. Every carry step keeps a
//! uniformly random half of the merged pair, which is the source of the
//! sketch's unbiasedness.
//!
//! The rank error is controlled by `k`: roughly `1.7 / k` with high
//! confidence.
//!
//! # Usage
//!
//! ```rust
//! # use sketches_core::quantiles::DoublesSketch;
//! let mut sketch = DoublesSketch::builder().k(128).build();
//! for i in 0..10_000 {
//!     sketch.update(i as f64).unwrap();
//! }
//! let median = sketch.quantile(0.5).unwrap();
//! assert!((median - 5000.0).abs() < 200.0);
//! ```

mod accessor;
pub(crate) mod helper;
pub(crate) mod serialization;
mod sketch;
mod union;

pub use sketch::DoublesSketch;
pub use sketch::DoublesSketchBuilder;
pub use union::DoublesUnion;

pub use helper::compact_storage_bytes;
pub use helper::normalized_rank_error;
pub use helper::updatable_storage_bytes;

/// Default value of parameter k.
pub const DEFAULT_K: u16 = 128;
/// Minimum value of parameter k.
pub const MIN_K: u16 = 2;
/// Maximum value of parameter k.
pub const MAX_K: u16 = 32768;
