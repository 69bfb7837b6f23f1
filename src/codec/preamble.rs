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

//! The 8-byte preamble prefix shared by every sketch image.
//!
//! Layout, byte offsets relative to the start of the image:
//!
//! ```text
//! byte 0    preLongs     number of 8-byte preamble longs
//! byte 1    serVer       current = 3
//! byte 2    familyID
//! byte 3    flags        BIG_ENDIAN | READ_ONLY | EMPTY | COMPACT | ORDERED
//! bytes 4-5 k (doubles) or lgNomLongs (theta), little-endian
//! bytes 6-7 seedHash (theta) or 0 (doubles)
//! ```
//!
//! Encode and decode are pure functions of `(memory, offset)` and are
//! idempotent.

use crate::codec::family::Family;
use crate::error::Error;
use crate::memory::Memory;

/// Byte offset of the preamble-longs count.
pub const PREAMBLE_LONGS_BYTE: usize = 0;
/// Byte offset of the serial version.
pub const SER_VER_BYTE: usize = 1;
/// Byte offset of the family id.
pub const FAMILY_BYTE: usize = 2;
/// Byte offset of the flags byte.
pub const FLAGS_BYTE: usize = 3;
/// Byte offset of the 16-bit short field (k or lgNomLongs).
pub const SHORT_FIELD_SHORT: usize = 4;
/// Byte offset of the 16-bit seed hash.
pub const SEED_HASH_SHORT: usize = 6;

/// The serial version this core encodes and the only one it decodes.
pub const SERIAL_VERSION: u8 = 3;

/// Flag: the image was written big-endian. Always 0 on encode; set on
/// decode it is a fatal error, images are never byte-swapped.
pub const FLAG_BIG_ENDIAN: u8 = 1 << 0;
/// Flag: the image is read-only.
pub const FLAG_READ_ONLY: u8 = 1 << 1;
/// Flag: the sketch is empty.
pub const FLAG_EMPTY: u8 = 1 << 2;
/// Flag: the image is in compact form.
pub const FLAG_COMPACT: u8 = 1 << 3;
/// Flag: the compact payload is sorted ascending.
pub const FLAG_ORDERED: u8 = 1 << 4;

/// The decoded (or to-be-encoded) shared preamble prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreamblePrefix {
    /// Number of 8-byte preamble longs.
    pub pre_longs: u8,
    /// Serial version.
    pub ser_ver: u8,
    /// Family id byte.
    pub family_id: u8,
    /// Flags byte.
    pub flags: u8,
    /// k for doubles images, lgNomLongs for theta images.
    pub short_field: u16,
    /// Seed hash for theta images, 0 for doubles images.
    pub seed_hash: u16,
}

impl PreamblePrefix {
    /// Write the prefix at `offset`. Rewriting the same prefix is a no-op
    /// on the image bytes.
    pub fn encode(&self, mem: &mut Memory<'_>, offset: usize) -> Result<(), Error> {
        mem.put_u8(offset + PREAMBLE_LONGS_BYTE, self.pre_longs)?;
        mem.put_u8(offset + SER_VER_BYTE, self.ser_ver)?;
        mem.put_u8(offset + FAMILY_BYTE, self.family_id)?;
        mem.put_u8(offset + FLAGS_BYTE, self.flags)?;
        mem.put_u16(offset + SHORT_FIELD_SHORT, self.short_field)?;
        mem.put_u16(offset + SEED_HASH_SHORT, self.seed_hash)?;
        Ok(())
    }

    /// Read the prefix at `offset`.
    pub fn decode(mem: &Memory<'_>, offset: usize) -> Result<Self, Error> {
        if mem.capacity() < offset + 8 {
            return Err(Error::invalid_argument("image capacity below preamble minimum")
                .with_context("capacity", mem.capacity())
                .with_context("required", offset + 8));
        }
        Ok(Self {
            pre_longs: mem.get_u8(offset + PREAMBLE_LONGS_BYTE)?,
            ser_ver: mem.get_u8(offset + SER_VER_BYTE)?,
            family_id: mem.get_u8(offset + FAMILY_BYTE)?,
            flags: mem.get_u8(offset + FLAGS_BYTE)?,
            short_field: mem.get_u16(offset + SHORT_FIELD_SHORT)?,
            seed_hash: mem.get_u16(offset + SEED_HASH_SHORT)?,
        })
    }

    /// Returns true if the given flag bits are all set.
    pub fn has_flags(&self, mask: u8) -> bool {
        self.flags & mask == mask
    }

    /// Validate the prefix for the expected family, in the order the decode
    /// contract demands: serial version, family, preamble-longs range, then
    /// the endian flag.
    pub fn validate(&self, family: &Family) -> Result<(), Error> {
        if self.ser_ver != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(SERIAL_VERSION, self.ser_ver));
        }
        family.validate_id(self.family_id)?;
        family.validate_pre_longs(self.pre_longs)?;
        if self.has_flags(FLAG_BIG_ENDIAN) {
            return Err(Error::invalid_argument(
                "image is flagged big-endian; this host decodes little-endian images only",
            ));
        }
        Ok(())
    }
}
