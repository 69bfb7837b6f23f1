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

//! Binary image offsets and constants for theta sketches.
//!
//! The shared 8-byte prefix is defined in [`crate::codec::preamble`].
//!
//! Compact images (family COMPACT) continue with:
//!
//! ```text
//! bytes  8-11  curCount          iff preLongs >= 2
//! bytes 12-15  p (f32 bits)      iff preLongs >= 2
//! bytes 16-23  thetaLong         iff preLongs >= 3
//! then         curCount retained hashes
//! ```
//!
//! Updatable images (family QUICKSELECT) use preLongs = 4:
//!
//! ```text
//! bytes  8-11  curCount
//! byte  12     lgArrLongs
//! byte  13     lgResizeFactor
//! bytes 16-19  p (f32 bits)
//! bytes 24-31  thetaLong
//! bytes 32-    cache of 2^lgArrLongs slots
//! ```

/// Preamble longs for an empty compact sketch in exact mode.
pub const PREAMBLE_LONGS_EMPTY: u8 = 1;

/// Preamble longs for a non-empty compact sketch in exact mode.
pub const PREAMBLE_LONGS_EXACT: u8 = 2;

/// Preamble longs for a compact sketch carrying theta.
pub const PREAMBLE_LONGS_ESTIMATION: u8 = 3;

/// Preamble longs for an updatable image.
pub const PREAMBLE_LONGS_UPDATE: u8 = 4;

/// Byte offset of the retained-hash count.
pub const CUR_COUNT_INT: usize = 8;

/// Byte offset of the sampling probability in compact images.
pub const P_FLOAT: usize = 12;

/// Byte offset of theta in compact images.
pub const THETA_LONG: usize = 16;

/// Byte offset of lgArrLongs in updatable images.
pub const UPDATE_LG_ARR_BYTE: usize = 12;

/// Byte offset of the log2 resize factor in updatable images.
pub const UPDATE_LG_RF_BYTE: usize = 13;

/// Byte offset of the sampling probability in updatable images.
pub const UPDATE_P_FLOAT: usize = 16;

/// Byte offset of theta in updatable images.
pub const UPDATE_THETA_LONG: usize = 24;

/// Byte offset of the cache in updatable images.
pub const UPDATE_DATA_START: usize = 32;

/// Size of a single hash entry in bytes.
pub const HASH_SIZE_BYTES: usize = 8;

/// Bit pattern of p = 1.0 as an f32, written when no sampling applies.
pub const DEFAULT_P_FLOAT_BITS: u32 = 0x3F80_0000;

/// Bytes a direct update sketch region must provide: the updatable
/// preamble plus a cache grown to its maximum of `2^(lgNomLongs + 1)`
/// slots.
pub fn max_update_sketch_bytes(lg_nom_longs: u8) -> usize {
    UPDATE_DATA_START + HASH_SIZE_BYTES * (1usize << (lg_nom_longs + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_update_sketch_bytes() {
        assert_eq!(max_update_sketch_bytes(4), 32 + 8 * 32);
        assert_eq!(max_update_sketch_bytes(12), 32 + 8 * 8192);
    }

    #[test]
    fn test_default_p_bits() {
        assert_eq!(f32::from_bits(DEFAULT_P_FLOAT_BITS), 1.0);
    }
}
