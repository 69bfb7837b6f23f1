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

//! Mergeable streaming sketches over bounded memory.
//!
//! Two sketch families are provided:
//!
//! * [`quantiles`] — the Doubles sketch, a mergeable summary of a stream of
//!   `f64` values supporting approximate rank, quantile, PMF, and CDF
//!   queries with a deterministic error bound parameterized by `k`.
//! * [`theta`] — the Theta sketch, a mergeable bottom-k summary of distinct
//!   items supporting union, intersection, and difference, with unbiased
//!   cardinality estimates and confidence bounds.
//!
//! Both families share a little-endian binary preamble ([`codec`]) and read
//! and write their images through the same positional accessor
//! ([`memory::Memory`]), whether the bytes live on the heap or in a
//! caller-supplied region.
//!
//! # Usage
//!
//! ```rust
//! use sketches_core::quantiles::DoublesSketch;
//! use sketches_core::theta::{ThetaSketch, ThetaSketchView};
//!
//! let mut qs = DoublesSketch::builder().k(128).build();
//! for i in 0..1000 {
//!     qs.update(i as f64).unwrap();
//! }
//! let median = qs.quantile(0.5).unwrap();
//! assert!((median - 500.0).abs() < 20.0);
//!
//! let mut ts = ThetaSketch::builder().lg_nom_longs(12).build();
//! for i in 0..1000 {
//!     ts.update(i);
//! }
//! assert!((ts.estimate() - 1000.0).abs() < 50.0);
//! ```

pub mod codec;
pub mod common;
pub mod error;
pub mod hash;
pub mod memory;
pub mod quantiles;
pub mod theta;
