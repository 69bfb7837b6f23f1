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

use googletest::assert_that;
use googletest::prelude::near;
use sketches_core::quantiles::DoublesSketch;
use sketches_core::quantiles::DoublesUnion;

fn filled(k: u16, range: std::ops::Range<u64>, seed: u64) -> DoublesSketch<'static> {
    let mut sketch = DoublesSketch::builder().k(k).random_seed(seed).build();
    for i in range {
        sketch.update(i as f64).unwrap();
    }
    sketch
}

// With every input fitting in base buffers, a union is exact and order
// cannot matter.
#[test]
fn test_small_union_is_exact_and_commutative() {
    let a = filled(128, 0..100, 1);
    let b = filled(128, 100..200, 2);

    let mut ab = DoublesUnion::new(128);
    ab.update_sketch(&a).unwrap();
    ab.update_sketch(&b).unwrap();

    let mut ba = DoublesUnion::new(128);
    ba.update_sketch(&b).unwrap();
    ba.update_sketch(&a).unwrap();

    let ra = ab.result();
    let rb = ba.result();
    assert_eq!(ra.n(), 200);
    assert_eq!(rb.n(), 200);
    for q in [0.0, 0.25, 0.5, 0.75, 1.0] {
        assert_eq!(ra.quantile(q).unwrap(), rb.quantile(q).unwrap());
    }
    // 200 items fit in the 256-slot base buffer, so ranks are exact.
    assert_eq!(ra.quantile(0.5).unwrap(), 99.0);
}

#[test]
fn test_union_tracks_n_and_extremes() {
    let a = filled(64, 0..5_000, 3);
    let b = filled(64, 5_000..9_000, 4);
    let c = filled(64, 9_000..10_000, 5);

    let mut union = DoublesUnion::new(64);
    for sketch in [&a, &b, &c] {
        union.update_sketch(sketch).unwrap();
    }
    let result = union.result();
    assert_eq!(result.n(), 10_000);
    assert_eq!(result.min_value(), 0.0);
    assert_eq!(result.max_value(), 9_999.0);
    let tolerance = result.rank_error() * 10_000.0;
    assert_that!(result.quantile(0.5).unwrap(), near(5_000.0, tolerance));
}

#[test]
fn test_union_with_raw_values() {
    let mut union = DoublesUnion::new(128);
    for i in 0..1_000 {
        union.update(i as f64).unwrap();
    }
    let sketch = filled(128, 1_000..2_000, 6);
    union.update_sketch(&sketch).unwrap();
    let result = union.result();
    assert_eq!(result.n(), 2_000);
    assert_eq!(result.max_value(), 1_999.0);
}

#[test]
fn test_downsampling_union_larger_k_source() {
    let fine = filled(256, 0..20_000, 7);
    let coarse = filled(64, 20_000..30_000, 8);

    let mut union = DoublesUnion::new(64);
    union.update_sketch(&fine).unwrap();
    union.update_sketch(&coarse).unwrap();
    let result = union.result();
    assert_eq!(result.k(), 64);
    assert_eq!(result.n(), 30_000);
    let tolerance = result.rank_error() * 30_000.0 * 1.5;
    assert_that!(result.quantile(0.5).unwrap(), near(15_000.0, tolerance));
}

#[test]
fn test_union_rejects_unalignable_k() {
    let a = filled(96, 0..1_000, 9);
    let mut union = DoublesUnion::new(64);
    assert!(union.update_sketch(&a).is_err());
}

#[test]
fn test_union_of_compact_inputs() {
    let a = filled(128, 0..3_000, 10).compact();
    let b = filled(128, 3_000..6_000, 11).compact();

    let mut union = DoublesUnion::new(128);
    union.update_sketch(&a).unwrap();
    union.update_sketch(&b).unwrap();
    let result = union.result();
    assert_eq!(result.n(), 6_000);
    assert_eq!(result.min_value(), 0.0);
    assert_eq!(result.max_value(), 5_999.0);
}

#[test]
fn test_result_compact_is_frozen() {
    let a = filled(128, 0..100, 12);
    let mut union = DoublesUnion::new(128);
    union.update_sketch(&a).unwrap();
    let mut compact = union.result_compact();
    assert!(compact.is_compact());
    assert!(compact.update(1.0).is_err());
}
