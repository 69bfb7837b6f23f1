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
use sketches_core::memory::Memory;
use sketches_core::theta::CompactThetaSketch;
use sketches_core::theta::ThetaAnotB;
use sketches_core::theta::ThetaIntersection;
use sketches_core::theta::ThetaSketch;
use sketches_core::theta::ThetaSketchView;
use sketches_core::theta::ThetaUnion;

fn filled(range: std::ops::Range<u64>) -> ThetaSketch<'static> {
    let mut sketch = ThetaSketch::builder().lg_nom_longs(12).build();
    for i in range {
        sketch.update(i);
    }
    sketch
}

#[test]
fn test_union_of_overlapping_streams() {
    let a = filled(0..10_000);
    let b = filled(5_000..15_000);

    let mut union = ThetaUnion::new_with_default_seed(12);
    union.update(&a).unwrap();
    union.update(&b).unwrap();
    let result = union.result(true);
    let truth = 15_000.0;
    assert_that!(result.estimate(), near(truth, 0.04 * truth));
}

#[test]
fn test_union_is_order_insensitive() {
    let a = filled(0..8_000);
    let b = filled(4_000..12_000);

    let mut ab = ThetaUnion::new_with_default_seed(12);
    ab.update(&a).unwrap();
    ab.update(&b).unwrap();

    let mut ba = ThetaUnion::new_with_default_seed(12);
    ba.update(&b).unwrap();
    ba.update(&a).unwrap();

    assert_eq!(ab.result(true).estimate(), ba.result(true).estimate());
    assert_eq!(
        ab.result(true).retained_hashes(),
        ba.result(true).retained_hashes()
    );
}

// Scenario: A covers 1..=10_000, B covers 5_001..=15_000, so the true
// overlap is 5_000.
#[test]
fn test_intersection_estimate() {
    let a = filled(1..10_001);
    let b = filled(5_001..15_001);

    let mut intersection = ThetaIntersection::new_with_default_seed();
    intersection.update(&a).unwrap();
    intersection.update(&b).unwrap();
    let result = intersection.result(true);
    assert_that!(result.estimate(), near(5_000.0, 0.04 * 5_000.0));
}

#[test]
fn test_inclusion_exclusion_consistency() {
    let a = filled(0..6_000);
    let b = filled(3_000..9_000);

    let mut union = ThetaUnion::new_with_default_seed(12);
    union.update(&a).unwrap();
    union.update(&b).unwrap();
    let union_est = union.result(true).estimate();

    let mut intersection = ThetaIntersection::new_with_default_seed();
    intersection.update(&a).unwrap();
    intersection.update(&b).unwrap();
    let inter_est = intersection.result(true).estimate();

    let a_not_b = ThetaAnotB::new_with_default_seed()
        .compute(&a, &b, true)
        .unwrap()
        .estimate();
    let b_not_a = ThetaAnotB::new_with_default_seed()
        .compute(&b, &a, true)
        .unwrap()
        .estimate();

    // |A ∪ B| = |A \ B| + |B \ A| + |A ∩ B| within sampling noise.
    let reassembled = a_not_b + b_not_a + inter_est;
    assert_that!(reassembled, near(union_est, 0.05 * union_est));
}

#[test]
fn test_anotb_against_compact_operands() {
    let a = filled(0..2_000).compact(true);
    let b_update = filled(1_000..2_000);
    let b = CompactThetaSketch::heapify(&Memory::from_bytes(b_update.to_byte_array(true))).unwrap();

    let result = ThetaAnotB::new_with_default_seed()
        .compute(&a, &b, true)
        .unwrap();
    assert_eq!(result.estimate(), 1_000.0);
}

#[test]
fn test_set_op_results_serialize() {
    let a = filled(0..3_000);
    let b = filled(1_500..4_500);

    let mut union = ThetaUnion::new_with_default_seed(12);
    union.update(&a).unwrap();
    union.update(&b).unwrap();
    let result = union.result(true);

    let bytes = result.to_byte_array();
    let restored = CompactThetaSketch::heapify(&Memory::from_bytes(bytes)).unwrap();
    assert_eq!(restored.estimate(), result.estimate());
    assert_eq!(restored.retained_hashes(), result.retained_hashes());
    assert!(restored.is_ordered());
}

#[test]
fn test_mixed_seed_operands_rejected() {
    let mut odd = ThetaSketch::builder().seed(31337).build();
    odd.update("x");
    let normal = filled(0..10);

    let mut union = ThetaUnion::new_with_default_seed(12);
    assert!(union.update(&odd).is_err());

    let mut intersection = ThetaIntersection::new_with_default_seed();
    intersection.update(&normal).unwrap();
    assert!(intersection.update(&odd).is_err());

    assert!(ThetaAnotB::new_with_default_seed()
        .compute(&odd, &normal, true)
        .is_err());
}

#[test]
fn test_union_absorbs_estimation_mode_operands() {
    let mut small = ThetaSketch::builder().lg_nom_longs(5).build();
    for i in 0..20_000 {
        small.update(i);
    }
    assert!(small.is_estimation_mode());

    let mut union = ThetaUnion::new_with_default_seed(12);
    union.update(&small).unwrap();
    let result = union.result(true);
    assert!(result.theta64() <= small.theta64());
    assert_that!(result.estimate(), near(20_000.0, 0.35 * 20_000.0));
}
