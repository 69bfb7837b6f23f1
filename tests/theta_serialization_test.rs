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

use sketches_core::error::ErrorKind;
use sketches_core::memory::Memory;
use sketches_core::theta::max_update_sketch_bytes;
use sketches_core::theta::CompactThetaSketch;
use sketches_core::theta::ThetaSketch;
use sketches_core::theta::ThetaSketchView;

fn filled(lg_nom_longs: u8, n: u64) -> ThetaSketch<'static> {
    let mut sketch = ThetaSketch::builder().lg_nom_longs(lg_nom_longs).build();
    for i in 0..n {
        sketch.update(i);
    }
    sketch
}

#[test]
fn test_compact_round_trip_exact_mode() {
    let sketch = filled(12, 1_000);
    let bytes = sketch.to_byte_array(true);
    let restored = CompactThetaSketch::heapify(&Memory::from_bytes(bytes)).unwrap();
    assert_eq!(restored.num_retained(), sketch.num_retained());
    assert_eq!(restored.theta64(), sketch.theta64());
    assert_eq!(restored.estimate(), sketch.estimate());

    let mut expected = sketch.retained_hashes();
    expected.sort_unstable();
    assert_eq!(restored.retained_hashes(), expected);
}

#[test]
fn test_compact_round_trip_estimation_mode() {
    let sketch = filled(5, 10_000);
    assert!(sketch.is_estimation_mode());
    let bytes = sketch.to_byte_array(true);
    let restored = CompactThetaSketch::heapify(&Memory::from_bytes(bytes)).unwrap();
    assert_eq!(restored.theta64(), sketch.theta64());
    assert_eq!(restored.num_retained(), sketch.num_retained());
    assert!(restored.is_estimation_mode());
}

#[test]
fn test_empty_compact_image_is_one_long() {
    let sketch = ThetaSketch::builder().lg_nom_longs(10).build();
    let bytes = sketch.to_byte_array(true);
    assert_eq!(bytes.len(), 8);
    let restored = CompactThetaSketch::heapify(&Memory::from_bytes(bytes)).unwrap();
    assert!(restored.is_empty());
    assert_eq!(restored.estimate(), 0.0);
}

#[test]
fn test_wrapped_compact_is_byte_exact() {
    let sketch = filled(6, 5_000);
    let bytes = sketch.to_byte_array(true);
    let wrapped = CompactThetaSketch::wrap(Memory::from_bytes(bytes.clone())).unwrap();
    assert_eq!(wrapped.to_byte_array(), bytes);
    assert_eq!(wrapped.estimate(), sketch.estimate());
}

#[test]
fn test_update_sketch_rebuilds_from_compact_image() {
    let sketch = filled(12, 2_000);
    let image = Memory::from_bytes(sketch.to_byte_array(true));
    let mut rebuilt = ThetaSketch::heapify(&image).unwrap();
    assert_eq!(rebuilt.estimate(), sketch.estimate());

    for i in 2_000..4_000 {
        rebuilt.update(i);
    }
    assert_eq!(rebuilt.estimate(), 4_000.0);
}

#[test]
fn test_updatable_image_round_trip() {
    let sketch = filled(8, 3_000);
    let image = Memory::from_bytes(sketch.to_byte_array_updatable());
    let rebuilt = ThetaSketch::heapify(&image).unwrap();
    assert_eq!(rebuilt.estimate(), sketch.estimate());
    assert_eq!(rebuilt.theta64(), sketch.theta64());
    assert_eq!(rebuilt.num_retained(), sketch.num_retained());
}

#[test]
fn test_wrap_updatable_image_and_continue() {
    let sketch = filled(8, 1_000);
    let mut image = sketch.to_byte_array_updatable();
    {
        let mut wrapped = ThetaSketch::wrap(Memory::writable_wrap(&mut image)).unwrap();
        assert!(wrapped.is_direct());
        for i in 1_000..2_000 {
            wrapped.update(i);
        }
    }
    // The mutations landed in the image; re-wrap and compare against a
    // heap sketch that saw the identical stream.
    let rewrapped = ThetaSketch::wrap(Memory::writable_wrap(&mut image)).unwrap();
    let reference = filled(8, 2_000);
    assert_eq!(rewrapped.estimate(), reference.estimate());
    assert_eq!(rewrapped.num_retained(), reference.num_retained());
}

#[test]
fn test_direct_sketch_matches_heap() {
    let lg = 7u8;
    let mut region = vec![0u8; max_update_sketch_bytes(lg)];
    let mut direct = ThetaSketch::builder()
        .lg_nom_longs(lg)
        .build_direct(Memory::writable_wrap(&mut region))
        .unwrap();
    let mut heap = ThetaSketch::builder().lg_nom_longs(lg).build();
    for i in 0..50_000 {
        direct.update(i);
        heap.update(i);
    }
    assert_eq!(direct.estimate(), heap.estimate());
    assert_eq!(direct.theta64(), heap.theta64());
    assert_eq!(direct.num_retained(), heap.num_retained());
    assert_eq!(direct.to_byte_array(true), heap.to_byte_array(true));
}

#[test]
fn test_direct_region_too_small() {
    let lg = 10u8;
    let mut region = vec![0u8; max_update_sketch_bytes(lg) - 1];
    let err = ThetaSketch::builder()
        .lg_nom_longs(lg)
        .build_direct(Memory::writable_wrap(&mut region))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_wrap_rejects_read_only_updatable_image() {
    let sketch = filled(8, 100);
    let image = sketch.to_byte_array_updatable();
    let err = ThetaSketch::wrap(Memory::read_only_wrap(&image)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_decode_rejects_malformed_images() {
    let sketch = filled(9, 1_000);
    let good = sketch.to_byte_array(true);

    // Unsupported serial version.
    let mut bad = good.clone();
    bad[1] = 1;
    assert!(CompactThetaSketch::heapify(&Memory::from_bytes(bad)).is_err());

    // Unknown family for a compact decoder.
    let mut bad = good.clone();
    bad[2] = 8;
    assert!(CompactThetaSketch::heapify(&Memory::from_bytes(bad)).is_err());

    // Big-endian flag.
    let mut bad = good.clone();
    bad[3] |= 1;
    assert!(CompactThetaSketch::heapify(&Memory::from_bytes(bad)).is_err());

    // Count beyond the image.
    let truncated = good[..good.len() - 8].to_vec();
    assert!(CompactThetaSketch::heapify(&Memory::from_bytes(truncated)).is_err());
}

#[test]
fn test_seed_round_trip() {
    let seed = 0xDEAD_BEEF_CAFEu64;
    let mut sketch = ThetaSketch::builder().lg_nom_longs(10).seed(seed).build();
    for i in 0..500 {
        sketch.update(i);
    }
    let bytes = sketch.to_byte_array(true);

    // The default seed cannot decode it.
    assert!(CompactThetaSketch::heapify(&Memory::from_bytes(bytes.clone())).is_err());

    let restored =
        CompactThetaSketch::heapify_with_seed(&Memory::from_bytes(bytes), seed).unwrap();
    assert_eq!(restored.estimate(), 500.0);
}
