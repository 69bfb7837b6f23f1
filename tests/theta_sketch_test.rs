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
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;
use sketches_core::common::NumStdDev;
use sketches_core::theta::ThetaSketch;
use sketches_core::theta::ThetaSketchView;

#[test]
fn test_empty() {
    let sketch = ThetaSketch::builder().lg_nom_longs(12).build();
    assert!(sketch.is_empty());
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::Two), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::Two), 0.0);
    assert_eq!(sketch.num_retained(), 0);
}

#[test]
fn test_single_item_is_exact() {
    let mut sketch = ThetaSketch::builder().build();
    sketch.update("lonely");
    assert_eq!(sketch.estimate(), 1.0);
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.lower_bound(NumStdDev::Two), 1.0);
    assert_eq!(sketch.upper_bound(NumStdDev::Two), 1.0);
}

#[test]
fn test_update_various_types() {
    let mut sketch = ThetaSketch::builder().lg_nom_longs(12).build();
    sketch.update("string");
    sketch.update(42i64);
    sketch.update(42u64);
    sketch.update_f64(3.15);
    sketch.update_f64(3.15);
    sketch.update_f32(3.25);
    sketch.update_f32(3.25);
    sketch.update([1u8, 2, 3]);
    assert!(!sketch.is_empty());
    assert_eq!(sketch.estimate(), 6.0);
}

#[test]
fn test_ten_thousand_distinct() {
    let mut sketch = ThetaSketch::builder().lg_nom_longs(12).build();
    for i in 1..=10_000 {
        sketch.update(i);
    }
    assert!(sketch.is_estimation_mode());
    let estimate = sketch.estimate();
    assert_that!(estimate, ge(10_000.0 * 0.96));
    assert_that!(estimate, le(10_000.0 * 1.04));
}

#[test]
fn test_bounds_bracket_truth() {
    let mut sketch = ThetaSketch::builder().lg_nom_longs(12).build();
    let truth = 100_000.0;
    for i in 0..100_000 {
        sketch.update(i);
    }
    assert_that!(sketch.lower_bound(NumStdDev::Two), le(truth));
    assert_that!(sketch.upper_bound(NumStdDev::Two), ge(truth));
    assert_that!(
        sketch.lower_bound(NumStdDev::Three),
        le(sketch.lower_bound(NumStdDev::One))
    );
    assert_that!(
        sketch.upper_bound(NumStdDev::Three),
        ge(sketch.upper_bound(NumStdDev::One))
    );
}

#[test]
fn test_insertion_order_does_not_matter_in_exact_mode() {
    let mut forward = ThetaSketch::builder().lg_nom_longs(12).build();
    let mut backward = ThetaSketch::builder().lg_nom_longs(12).build();
    for i in 0..1_000 {
        forward.update(i);
    }
    for i in (0..1_000).rev() {
        backward.update(i);
    }
    assert_eq!(forward.estimate(), backward.estimate());
    let mut fw = forward.retained_hashes();
    let mut bw = backward.retained_hashes();
    fw.sort_unstable();
    bw.sort_unstable();
    assert_eq!(fw, bw);
}

#[test]
fn test_insertion_order_in_estimation_mode() {
    let mut forward = ThetaSketch::builder().lg_nom_longs(6).build();
    let mut backward = ThetaSketch::builder().lg_nom_longs(6).build();
    for i in 0..50_000 {
        forward.update(i);
    }
    for i in (0..50_000).rev() {
        backward.update(i);
    }
    let truth = 50_000.0;
    assert_that!(forward.estimate(), near(truth, 0.35 * truth));
    assert_that!(backward.estimate(), near(truth, 0.35 * truth));
}

#[test]
fn test_sampling_probability_screens_updates() {
    let mut sketch = ThetaSketch::builder()
        .lg_nom_longs(12)
        .sampling_probability(0.25)
        .build();
    assert!(sketch.theta() < 1.0);
    for i in 0..10_000 {
        sketch.update(i);
    }
    // Roughly a quarter of the hashes survive the initial screen.
    let retained = sketch.num_retained() as f64;
    assert_that!(retained, near(2_500.0, 300.0));
    assert_that!(sketch.estimate(), near(10_000.0, 800.0));
}

#[test]
fn test_iter_matches_retained() {
    let mut sketch = ThetaSketch::builder().lg_nom_longs(12).build();
    for i in 0..100 {
        sketch.update(i);
    }
    assert_eq!(sketch.iter().count(), sketch.num_retained());
    assert!(sketch.iter().all(|h| h != 0 && h < sketch.theta64()));
}
