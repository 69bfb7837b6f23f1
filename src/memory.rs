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

//! Positional little-endian memory accessor.
//!
//! [`Memory`] presents the same typed get/put contract over three kinds of
//! backing region: a heap-owned byte vector, a caller-supplied mutable
//! region, and a caller-supplied read-only region. Sketch update, query,
//! and serialization code all address bytes through this one interface, so
//! an image is handled identically wherever its bytes live.
//!
//! All multi-byte accessors are little-endian. Out-of-bounds access is an
//! argument error; writing through a read-only view is a state error.

use crate::error::Error;

enum Region<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a [u8]),
    BorrowedMut(&'a mut [u8]),
}

/// A positional byte region, heap-owned or caller-supplied.
pub struct Memory<'a> {
    region: Region<'a>,
    read_only: bool,
}

impl Memory<'static> {
    /// Create a zeroed heap-backed region of the given capacity.
    pub fn new_heap(capacity: usize) -> Self {
        Self {
            region: Region::Owned(vec![0u8; capacity]),
            read_only: false,
        }
    }

    /// Take ownership of an existing byte vector.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            region: Region::Owned(bytes),
            read_only: false,
        }
    }
}

impl<'a> Memory<'a> {
    /// Wrap a caller-supplied mutable region. The region is not owned and
    /// must outlive the view.
    pub fn writable_wrap(region: &'a mut [u8]) -> Self {
        Self {
            region: Region::BorrowedMut(region),
            read_only: false,
        }
    }

    /// Wrap a caller-supplied region read-only.
    pub fn read_only_wrap(region: &'a [u8]) -> Self {
        Self {
            region: Region::Borrowed(region),
            read_only: true,
        }
    }

    /// Return a read-only view of this region.
    pub fn as_read_only(&self) -> Memory<'_> {
        Memory {
            region: Region::Borrowed(self.as_slice()),
            read_only: true,
        }
    }

    /// Capacity of the region in bytes.
    pub fn capacity(&self) -> usize {
        self.as_slice().len()
    }

    /// Returns true if the region is not a heap allocation owned by this view.
    pub fn is_direct(&self) -> bool {
        !matches!(self.region, Region::Owned(_))
    }

    /// Returns true if writes through this view are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Two views alias iff they wrap the same underlying region with the
    /// same offset and capacity.
    pub fn is_same_resource(&self, other: &Memory<'_>) -> bool {
        let a = self.as_slice();
        let b = other.as_slice();
        std::ptr::eq(a.as_ptr(), b.as_ptr()) && a.len() == b.len()
    }

    /// Borrow the entire region.
    pub fn as_slice(&self) -> &[u8] {
        match &self.region {
            Region::Owned(v) => v.as_slice(),
            Region::Borrowed(s) => s,
            Region::BorrowedMut(s) => s,
        }
    }

    /// Consume the view, marking it read-only from here on.
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Consume the view and return the bytes, copying if the region is not
    /// owned.
    pub fn into_bytes(self) -> Vec<u8> {
        match self.region {
            Region::Owned(v) => v,
            Region::Borrowed(s) => s.to_vec(),
            Region::BorrowedMut(s) => s.to_vec(),
        }
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), Error> {
        let capacity = self.capacity();
        if offset.checked_add(len).map_or(true, |end| end > capacity) {
            return Err(Error::invalid_argument("access out of bounds")
                .with_context("offset", offset)
                .with_context("len", len)
                .with_context("capacity", capacity));
        }
        Ok(())
    }

    fn writable(&mut self, offset: usize, len: usize) -> Result<&mut [u8], Error> {
        if self.read_only {
            return Err(Error::invalid_state("write through a read-only memory view"));
        }
        self.check_bounds(offset, len)?;
        let slice = match &mut self.region {
            Region::Owned(v) => v.as_mut_slice(),
            Region::BorrowedMut(s) => s,
            Region::Borrowed(_) => unreachable!("read-only regions are rejected above"),
        };
        Ok(&mut slice[offset..offset + len])
    }

    /// Read a byte at the offset.
    pub fn get_u8(&self, offset: usize) -> Result<u8, Error> {
        self.check_bounds(offset, 1)?;
        Ok(self.as_slice()[offset])
    }

    /// Read a little-endian u16 at the offset.
    pub fn get_u16(&self, offset: usize) -> Result<u16, Error> {
        self.check_bounds(offset, 2)?;
        let s = &self.as_slice()[offset..offset + 2];
        Ok(u16::from_le_bytes([s[0], s[1]]))
    }

    /// Read a little-endian u32 at the offset.
    pub fn get_u32(&self, offset: usize) -> Result<u32, Error> {
        self.check_bounds(offset, 4)?;
        let s = &self.as_slice()[offset..offset + 4];
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    /// Read a little-endian u64 at the offset.
    pub fn get_u64(&self, offset: usize) -> Result<u64, Error> {
        self.check_bounds(offset, 8)?;
        let s = &self.as_slice()[offset..offset + 8];
        let mut buf = [0u8; 8];
        buf.copy_from_slice(s);
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a little-endian f64 at the offset.
    pub fn get_f64(&self, offset: usize) -> Result<f64, Error> {
        Ok(f64::from_bits(self.get_u64(offset)?))
    }

    /// Write a byte at the offset.
    pub fn put_u8(&mut self, offset: usize, value: u8) -> Result<(), Error> {
        self.writable(offset, 1)?[0] = value;
        Ok(())
    }

    /// Write a little-endian u16 at the offset.
    pub fn put_u16(&mut self, offset: usize, value: u16) -> Result<(), Error> {
        self.writable(offset, 2)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Write a little-endian u32 at the offset.
    pub fn put_u32(&mut self, offset: usize, value: u32) -> Result<(), Error> {
        self.writable(offset, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Write a little-endian u64 at the offset.
    pub fn put_u64(&mut self, offset: usize, value: u64) -> Result<(), Error> {
        self.writable(offset, 8)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Write a little-endian f64 at the offset.
    pub fn put_f64(&mut self, offset: usize, value: f64) -> Result<(), Error> {
        self.put_u64(offset, value.to_bits())
    }

    /// Copy `count` little-endian f64 values starting at the offset.
    pub fn get_f64_array(&self, offset: usize, count: usize) -> Result<Vec<f64>, Error> {
        self.check_bounds(offset, count * 8)?;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(self.get_f64(offset + i * 8)?);
        }
        Ok(out)
    }

    /// Write f64 values little-endian starting at the offset.
    pub fn put_f64_array(&mut self, offset: usize, values: &[f64]) -> Result<(), Error> {
        self.check_bounds(offset, values.len() * 8)?;
        for (i, v) in values.iter().enumerate() {
            self.put_f64(offset + i * 8, *v)?;
        }
        Ok(())
    }

    /// Copy `count` little-endian u64 values starting at the offset.
    pub fn get_u64_array(&self, offset: usize, count: usize) -> Result<Vec<u64>, Error> {
        self.check_bounds(offset, count * 8)?;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(self.get_u64(offset + i * 8)?);
        }
        Ok(out)
    }

    /// Write u64 values little-endian starting at the offset.
    pub fn put_u64_array(&mut self, offset: usize, values: &[u64]) -> Result<(), Error> {
        self.check_bounds(offset, values.len() * 8)?;
        for (i, v) in values.iter().enumerate() {
            self.put_u64(offset + i * 8, *v)?;
        }
        Ok(())
    }

    /// Write a byte slice starting at the offset.
    pub fn put_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
        self.writable(offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Copy a byte range from this view into another view.
    pub fn copy_to(
        &self,
        src_offset: usize,
        dst: &mut Memory<'_>,
        dst_offset: usize,
        len: usize,
    ) -> Result<(), Error> {
        self.check_bounds(src_offset, len)?;
        let src: Vec<u8> = self.as_slice()[src_offset..src_offset + len].to_vec();
        dst.writable(dst_offset, len)?.copy_from_slice(&src);
        Ok(())
    }
}

impl std::fmt::Debug for Memory<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("capacity", &self.capacity())
            .field("direct", &self.is_direct())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}
