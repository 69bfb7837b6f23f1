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

use super::helper::check_k;
use super::helper::compute_total_levels;
use super::sketch::propagate_carry;
use super::sketch::zip_with_stride;
use super::sketch::DoublesSketch;
use super::DEFAULT_K;
use crate::error::Error;

/// Stateful union operator for doubles sketches.
///
/// The union holds an internal heap sketch whose `k` never exceeds the
/// configured maximum and drops to the smallest `k` among the inputs, so
/// the result carries the accuracy of the coarsest operand. Inputs with a
/// larger `k` are downsampled level by level; the ratio between the two
/// `k` values must be a power of two.
///
/// # Examples
///
/// ```
/// # use sketches_core::quantiles::{DoublesSketch, DoublesUnion};
/// let mut a = DoublesSketch::builder().k(128).build();
/// let mut b = DoublesSketch::builder().k(128).build();
/// for i in 0..500 {
///     a.update(i as f64).unwrap();
///     b.update((500 + i) as f64).unwrap();
/// }
/// let mut union = DoublesUnion::new(128);
/// union.update_sketch(&a).unwrap();
/// union.update_sketch(&b).unwrap();
/// let merged = union.result();
/// assert_eq!(merged.n(), 1000);
/// assert_eq!(merged.min_value(), 0.0);
/// assert_eq!(merged.max_value(), 999.0);
/// ```
#[derive(Debug)]
pub struct DoublesUnion {
    max_k: u16,
    gadget: Option<DoublesSketch<'static>>,
}

impl Default for DoublesUnion {
    fn default() -> Self {
        Self::new(DEFAULT_K)
    }
}

impl DoublesUnion {
    /// Creates a union whose result never uses a `k` above `max_k`.
    ///
    /// # Panics
    ///
    /// Panics if `max_k` is odd or outside `[2, 32768]`.
    pub fn new(max_k: u16) -> Self {
        check_k(max_k).unwrap_or_else(|e| panic!("{e}"));
        Self {
            max_k,
            gadget: None,
        }
    }

    /// The configured maximum k.
    pub fn max_k(&self) -> u16 {
        self.max_k
    }

    /// Returns true if the union has absorbed no items.
    pub fn is_empty(&self) -> bool {
        self.gadget.as_ref().map_or(true, DoublesSketch::is_empty)
    }

    /// Feed a raw value into the union.
    pub fn update(&mut self, value: f64) -> Result<(), Error> {
        let max_k = self.max_k;
        self.gadget
            .get_or_insert_with(|| DoublesSketch::builder().k(max_k).build())
            .update(value)
    }

    /// Absorb another sketch into the union.
    ///
    /// # Errors
    ///
    /// Returns an argument error if the two `k` values cannot be aligned
    /// (not divisible, or a non-power-of-two ratio).
    pub fn update_sketch(&mut self, other: &DoublesSketch<'_>) -> Result<(), Error> {
        let Some(gadget_k) = self.gadget.as_ref().map(DoublesSketch::k) else {
            let target_k = self.max_k.min(other.k());
            if other.is_empty() {
                self.gadget = Some(DoublesSketch::builder().k(target_k).build());
            } else if other.k() <= self.max_k {
                self.gadget = Some(other.to_heap_copy());
            } else {
                check_downsample_ratio(other.k(), target_k)?;
                let mut fresh = DoublesSketch::builder().k(target_k).build();
                downsampling_merge_into(other, &mut fresh)?;
                self.gadget = Some(fresh);
            }
            return Ok(());
        };

        if other.is_empty() {
            return Ok(());
        }
        if other.k() == gadget_k {
            let gadget = self.gadget.as_mut().expect("gadget exists");
            return merge_into(other, gadget);
        }
        if other.k() > gadget_k {
            check_downsample_ratio(other.k(), gadget_k)?;
            let gadget = self.gadget.as_mut().expect("gadget exists");
            return downsampling_merge_into(other, gadget);
        }

        // The incoming sketch is coarser: rebuild the internal sketch at
        // the smaller k, then absorb both.
        check_downsample_ratio(gadget_k, other.k())?;
        let old = self.gadget.take().expect("gadget exists");
        let mut fresh = DoublesSketch::builder().k(other.k()).build();
        if !old.is_empty() {
            downsampling_merge_into(&old, &mut fresh)?;
        }
        merge_into(other, &mut fresh)?;
        self.gadget = Some(fresh);
        Ok(())
    }

    /// Returns the union result as a heap update sketch. The union keeps
    /// its state and can absorb more inputs afterwards.
    pub fn result(&self) -> DoublesSketch<'static> {
        match &self.gadget {
            Some(gadget) => gadget.to_heap_copy(),
            None => DoublesSketch::builder().k(self.max_k).build(),
        }
    }

    /// Returns the union result as a read-only compact sketch.
    pub fn result_compact(&self) -> DoublesSketch<'static> {
        match &self.gadget {
            Some(gadget) => gadget.compact(),
            None => DoublesSketch::builder().k(self.max_k).build().compact(),
        }
    }
}

fn check_downsample_ratio(src_k: u16, dst_k: u16) -> Result<(), Error> {
    if src_k % dst_k != 0 || !(src_k / dst_k).is_power_of_two() {
        return Err(Error::invalid_argument(format!(
            "cannot downsample k {src_k} into k {dst_k}: ratio must be a power of two"
        )));
    }
    Ok(())
}

/// Merge `src` into `tgt`, both with the same k: base-buffer items are
/// re-fed one by one, then each populated source level is carried into the
/// target at its own level.
fn merge_into(src: &DoublesSketch<'_>, tgt: &mut DoublesSketch<'static>) -> Result<(), Error> {
    debug_assert_eq!(src.k(), tgt.k(), "merge requires equal k");
    merge_min_max(src, tgt);
    for value in src.window_array(0, false) {
        tgt.update(value)?;
    }
    let k = src.k() as u64;
    let bit_pattern = src.bit_pattern();
    for level in 0..compute_total_levels(bit_pattern) {
        if (bit_pattern >> level) & 1 == 1 {
            let buf = src.window_array(level + 1, false);
            let mut rng = *tgt.rng_mut();
            propagate_carry(tgt, &mut rng, level, Some(&buf))?;
            *tgt.rng_mut() = rng;
            tgt.put_n(tgt.n() + (k << (level + 1)));
        }
    }
    Ok(())
}

/// Merge a finer `src` (larger k) into `tgt`: each source level is zipped
/// down by the k ratio with a random phase, which lifts it `log2(ratio)`
/// levels in the target.
fn downsampling_merge_into(
    src: &DoublesSketch<'_>,
    tgt: &mut DoublesSketch<'static>,
) -> Result<(), Error> {
    check_downsample_ratio(src.k(), tgt.k())?;
    let ratio = (src.k() / tgt.k()) as usize;
    let lg_ratio = ratio.trailing_zeros() as usize;

    merge_min_max(src, tgt);
    for value in src.window_array(0, false) {
        tgt.update(value)?;
    }
    let src_k = src.k() as u64;
    let bit_pattern = src.bit_pattern();
    for level in 0..compute_total_levels(bit_pattern) {
        if (bit_pattern >> level) & 1 == 1 {
            let buf = src.window_array(level + 1, false);
            let mut rng = *tgt.rng_mut();
            let down = zip_with_stride(&buf, ratio, &mut rng);
            propagate_carry(tgt, &mut rng, level + lg_ratio, Some(&down))?;
            *tgt.rng_mut() = rng;
            tgt.put_n(tgt.n() + (src_k << (level + 1)));
        }
    }
    Ok(())
}

fn merge_min_max(src: &DoublesSketch<'_>, tgt: &mut DoublesSketch<'static>) {
    if src.min_value() < tgt.min_value() {
        tgt.put_min(src.min_value());
    }
    if src.max_value() > tgt.max_value() {
        tgt.put_max(src.max_value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_union_result() {
        let union = DoublesUnion::new(64);
        assert!(union.is_empty());
        let result = union.result();
        assert!(result.is_empty());
        assert_eq!(result.k(), 64);
    }

    #[test]
    fn test_downsample_ratio_check() {
        assert!(check_downsample_ratio(256, 128).is_ok());
        assert!(check_downsample_ratio(512, 128).is_ok());
        assert!(check_downsample_ratio(128, 128).is_ok());
        assert!(check_downsample_ratio(192, 128).is_err());
    }

    #[test]
    fn test_smaller_k_rebuilds_gadget() {
        let mut big = DoublesSketch::builder().k(256).random_seed(5).build();
        for i in 0..2000 {
            big.update(i as f64).unwrap();
        }
        let mut small = DoublesSketch::builder().k(128).random_seed(7).build();
        for i in 2000..3000 {
            small.update(i as f64).unwrap();
        }

        let mut union = DoublesUnion::new(256);
        union.update_sketch(&big).unwrap();
        union.update_sketch(&small).unwrap();
        let result = union.result();
        assert_eq!(result.k(), 128);
        assert_eq!(result.n(), 3000);
        assert_eq!(result.min_value(), 0.0);
        assert_eq!(result.max_value(), 2999.0);
    }
}
