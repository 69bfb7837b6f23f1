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

use std::hash::Hasher;

const C1: u64 = 0x87c37b91114253d5;
const C2: u64 = 0x4cf5ab62276655a7;

/// MurmurHash3 x64 128-bit variant with a 64-bit seed.
///
/// Theta sketches need the full 64-bit seed space; published crate
/// implementations only accept 32-bit seeds, so the algorithm is carried
/// here. For seed 0 the output matches the reference implementation
/// bit-for-bit.
pub fn murmur_hash3_x64_128(bytes: &[u8], seed: u64) -> (u64, u64) {
    let mut h1 = seed;
    let mut h2 = seed;
    let len = bytes.len();

    let mut chunks = bytes.chunks_exact(16);
    for block in &mut chunks {
        let k1 = u64::from_le_bytes(block[0..8].try_into().expect("block is 16 bytes"));
        let k2 = u64::from_le_bytes(block[8..16].try_into().expect("block is 16 bytes"));

        h1 ^= mix_k1(k1);
        h1 = h1.rotate_left(27).wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dce729);

        h2 ^= mix_k2(k2);
        h2 = h2.rotate_left(31).wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x38495ab5);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u64;
        let mut k2 = 0u64;
        for (i, &b) in tail.iter().enumerate() {
            if i < 8 {
                k1 |= (b as u64) << (8 * i);
            } else {
                k2 |= (b as u64) << (8 * (i - 8));
            }
        }
        h1 ^= mix_k1(k1);
        h2 ^= mix_k2(k2);
    }

    h1 ^= len as u64;
    h2 ^= len as u64;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    (h1, h2)
}

fn mix_k1(mut k1: u64) -> u64 {
    k1 = k1.wrapping_mul(C1);
    k1 = k1.rotate_left(31);
    k1.wrapping_mul(C2)
}

fn mix_k2(mut k2: u64) -> u64 {
    k2 = k2.wrapping_mul(C2);
    k2 = k2.rotate_left(33);
    k2.wrapping_mul(C1)
}

fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51afd7ed558ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
    k ^= k >> 33;
    k
}

/// A [`std::hash::Hasher`] adapter over [`murmur_hash3_x64_128`].
///
/// Bytes are buffered and hashed in one pass at finish time; sketch update
/// keys are small, so no streaming state is kept.
#[derive(Debug)]
pub struct MurmurHash3X64128 {
    seed: u64,
    buffer: Vec<u8>,
}

impl MurmurHash3X64128 {
    /// Creates a hasher with the given 64-bit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            buffer: Vec::with_capacity(16),
        }
    }

    /// Returns both 64-bit halves of the 128-bit hash.
    pub fn finish128(&self) -> (u64, u64) {
        murmur_hash3_x64_128(&self.buffer, self.seed)
    }
}

impl Hasher for MurmurHash3X64128 {
    fn finish(&self) -> u64 {
        self.finish128().0
    }

    fn write(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_vectors() {
        // remainder > 8
        let key = "The quick brown fox jumps over the lazy dog";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0xe34bbc7bbc071b6c);
        assert_eq!(h2, 0x7a433ca9c49a9347);

        // change one bit
        let key = "The quick brown fox jumps over the lazy eog";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0x362108102c62d1c9);
        assert_eq!(h2, 0x3285cd100292b305);

        // test a remainder < 8
        let key = "The quick brown fox jumps over the lazy dogdogdog";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0x9c8205300e612fc4);
        assert_eq!(h2, 0xcbc0af6136aa3df9);

        // test a remainder = 8
        let key = "The quick brown fox jumps over the lazy1";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0xe3301a827e5cdfe3);
        assert_eq!(h2, 0xbdbf05f8da0f0392);

        // test a remainder = 0
        let key = "The quick brown fox jumps over t";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0xdf6af91bb29bdacf);
        assert_eq!(h2, 0x91a341c58df1f3a6);
    }

    #[test]
    fn test_matches_mur3_crate() {
        for key in [&b"a"[..], b"0123456789abcdef", b"theta sketches", b""] {
            assert_eq!(murmur_hash3_x64_128(key, 0), mur3::murmurhash3_x64_128(key, 0));
        }
    }

    #[test]
    fn test_seed_changes_output() {
        let key = b"payload";
        assert_ne!(
            murmur_hash3_x64_128(key, 9001),
            murmur_hash3_x64_128(key, 9002)
        );
        // Seeds beyond 32 bits must matter.
        assert_ne!(
            murmur_hash3_x64_128(key, 1),
            murmur_hash3_x64_128(key, 1 << 40)
        );
    }

    #[test]
    fn test_hasher_adapter() {
        let mut hasher = MurmurHash3X64128::with_seed(7);
        hasher.write(b"split ");
        hasher.write(b"input");
        assert_eq!(hasher.finish128(), murmur_hash3_x64_128(b"split input", 7));
    }
}
