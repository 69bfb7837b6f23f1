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

//! Hashing for theta sketches.

mod murmurhash;

pub use murmurhash::murmur_hash3_x64_128;
pub use murmurhash::MurmurHash3X64128;

/// The seed used when none is configured. A sketch hashed with one seed
/// cannot be combined with a sketch hashed with another.
pub const DEFAULT_UPDATE_SEED: u64 = 9001;

/// Computes the 16-bit fingerprint of an update seed. Compact images carry
/// this fingerprint, not the seed itself, so readers can detect mixing
/// sketches with incompatible hash functions.
pub fn compute_seed_hash(seed: u64) -> u16 {
    let (h1, _) = murmur_hash3_x64_128(&seed.to_le_bytes(), 0);
    (h1 & 0xFFFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_hash_is_stable() {
        assert_eq!(compute_seed_hash(DEFAULT_UPDATE_SEED), compute_seed_hash(9001));
        assert_ne!(compute_seed_hash(DEFAULT_UPDATE_SEED), compute_seed_hash(9002));
        assert_ne!(compute_seed_hash(DEFAULT_UPDATE_SEED), 0);
    }
}
