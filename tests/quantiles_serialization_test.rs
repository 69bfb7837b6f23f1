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
use sketches_core::error::ErrorKind;
use sketches_core::memory::Memory;
use sketches_core::quantiles::updatable_storage_bytes;
use sketches_core::quantiles::DoublesSketch;

fn filled_sketch(k: u16, n: u64, seed: u64) -> DoublesSketch<'static> {
    let mut sketch = DoublesSketch::builder().k(k).random_seed(seed).build();
    for i in 0..n {
        sketch.update(i as f64).unwrap();
    }
    sketch
}

#[test]
fn test_heapify_preserves_state() {
    let sketch = filled_sketch(32, 10_000, 11);
    let image = Memory::from_bytes(sketch.to_byte_array(false, false));
    let restored = DoublesSketch::heapify(&image).unwrap();

    assert_eq!(restored.k(), sketch.k());
    assert_eq!(restored.n(), sketch.n());
    assert_eq!(restored.min_value(), sketch.min_value());
    assert_eq!(restored.max_value(), sketch.max_value());
    assert_eq!(restored.bit_pattern(), sketch.bit_pattern());
    assert_eq!(restored.num_retained(), sketch.num_retained());
    for q in [0.01, 0.25, 0.5, 0.75, 0.99] {
        assert_eq!(
            restored.quantile(q).unwrap(),
            sketch.quantile(q).unwrap()
        );
    }
}

#[test]
fn test_compact_image_round_trip_is_byte_exact() {
    let sketch = filled_sketch(64, 5_000, 13);
    let bytes = sketch.to_byte_array(true, true);
    let wrapped = DoublesSketch::wrap(Memory::from_bytes(bytes.clone())).unwrap();
    assert_eq!(wrapped.to_byte_array(true, true), bytes);
}

#[test]
fn test_compact_is_idempotent() {
    let sketch = filled_sketch(16, 1_000, 17);
    let once = sketch.compact();
    let twice = once.compact();
    assert_eq!(
        once.to_byte_array(true, true),
        twice.to_byte_array(true, true)
    );
}

#[test]
fn test_empty_round_trip() {
    let sketch = DoublesSketch::builder().k(256).build();
    let bytes = sketch.to_byte_array(true, true);
    assert_eq!(bytes.len(), 8);

    let wrapped = DoublesSketch::wrap(Memory::from_bytes(bytes)).unwrap();
    assert!(wrapped.is_empty());
    assert_eq!(wrapped.k(), 256);
    assert_eq!(wrapped.n(), 0);
    assert_eq!(wrapped.min_value(), f64::INFINITY);
    assert_eq!(wrapped.max_value(), f64::NEG_INFINITY);
}

#[test]
fn test_heapified_copy_accepts_updates() {
    let sketch = filled_sketch(128, 1_000, 19);
    let image = Memory::from_bytes(sketch.to_byte_array(true, true));
    let mut restored = DoublesSketch::heapify(&image).unwrap();
    for i in 1_000..2_000 {
        restored.update(i as f64).unwrap();
    }
    assert_eq!(restored.n(), 2_000);
    assert_eq!(restored.min_value(), 0.0);
    assert_eq!(restored.max_value(), 1_999.0);
    let tolerance = restored.rank_error() * 2_000.0;
    assert_that!(restored.quantile(0.5).unwrap(), near(1_000.0, tolerance));
}

#[test]
fn test_direct_sketch_matches_heap_sketch() {
    let k = 32u16;
    let n = 10_000u64;
    let mut region = vec![0u8; updatable_storage_bytes(k, 4 * n)];
    let mut direct = DoublesSketch::builder()
        .k(k)
        .random_seed(23)
        .build_direct(Memory::writable_wrap(&mut region))
        .unwrap();
    assert!(direct.is_direct());

    let mut heap = DoublesSketch::builder().k(k).random_seed(23).build();
    for i in 0..n {
        direct.update(i as f64).unwrap();
        heap.update(i as f64).unwrap();
    }
    assert_eq!(direct.n(), heap.n());
    assert_eq!(
        direct.to_byte_array(true, true),
        heap.to_byte_array(true, true)
    );
}

#[test]
fn test_direct_region_is_wrappable_midstream() {
    let k = 16u16;
    let mut region = vec![0u8; updatable_storage_bytes(k, 100_000)];
    let mut direct = DoublesSketch::builder()
        .k(k)
        .build_direct(Memory::writable_wrap(&mut region))
        .unwrap();
    for i in 0..777 {
        direct.update(i as f64).unwrap();
    }
    drop(direct);

    // The region itself is a live updatable image.
    let reread = DoublesSketch::wrap(Memory::read_only_wrap(&region)).unwrap();
    assert_eq!(reread.n(), 777);
    assert_eq!(reread.min_value(), 0.0);
    assert_eq!(reread.max_value(), 776.0);
}

#[test]
fn test_direct_growth_failure_leaves_sketch_usable() {
    let k = 8u16;
    // Room for the base buffer but no levels.
    let mut region = vec![0u8; updatable_storage_bytes(k, 0)];
    let mut direct = DoublesSketch::builder()
        .k(k)
        .build_direct(Memory::writable_wrap(&mut region))
        .unwrap();
    for i in 0..(2 * k as u64 - 1) {
        direct.update(i as f64).unwrap();
    }
    let err = direct.update(99.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(direct.n(), 2 * k as u64 - 1);
    assert_eq!(direct.max_value(), (2 * k as u64 - 2) as f64);
}

#[test]
fn test_compact_into_destination() {
    let sketch = filled_sketch(16, 300, 29);
    let needed = sketch.to_byte_array(true, true).len();

    let mut small = vec![0u8; needed - 8];
    let err = sketch
        .compact_into(Memory::writable_wrap(&mut small))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let mut region = vec![0u8; needed];
    let compacted = sketch
        .compact_into(Memory::writable_wrap(&mut region))
        .unwrap();
    assert!(compacted.is_compact());
    assert_eq!(compacted.n(), 300);
    drop(compacted);
    assert_eq!(region, sketch.to_byte_array(true, true));
}

#[test]
fn test_decode_rejects_malformed_images() {
    let sketch = filled_sketch(32, 500, 31);
    let good = sketch.to_byte_array(true, true);

    // Truncated below the preamble.
    assert!(DoublesSketch::heapify(&Memory::from_bytes(good[..4].to_vec())).is_err());

    // Wrong serial version.
    let mut bad = good.clone();
    bad[1] = 2;
    assert!(DoublesSketch::heapify(&Memory::from_bytes(bad)).is_err());

    // Wrong family.
    let mut bad = good.clone();
    bad[2] = 3;
    assert!(DoublesSketch::heapify(&Memory::from_bytes(bad)).is_err());

    // Big-endian flag set.
    let mut bad = good.clone();
    bad[3] |= 1;
    assert!(DoublesSketch::heapify(&Memory::from_bytes(bad)).is_err());

    // Empty flag contradicting a non-zero N.
    let mut bad = good.clone();
    bad[3] |= 4;
    assert!(DoublesSketch::heapify(&Memory::from_bytes(bad)).is_err());

    // Capacity below the payload.
    let truncated = good[..good.len() - 8].to_vec();
    assert!(DoublesSketch::heapify(&Memory::from_bytes(truncated)).is_err());
}
