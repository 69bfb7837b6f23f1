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

//! Binary image offsets and constants for doubles sketches.
//!
//! The shared 8-byte prefix is defined in [`crate::codec::preamble`]; a
//! non-empty doubles image continues with:
//!
//! ```text
//! bytes  8-15  N
//! bytes 16-23  min
//! bytes 24-31  max
//! bytes 32-    payload: base buffer, then levels in ascending order
//! ```

/// Preamble longs of the 8-byte empty compact image.
pub const PREAMBLE_LONGS_EMPTY_COMPACT: u8 = 1;

/// Preamble longs of every other doubles image.
pub const PREAMBLE_LONGS_FULL: u8 = 2;

/// Byte offset of the stream length N.
pub const N_LONG: usize = 8;

/// Byte offset of the minimum value.
pub const MIN_DOUBLE: usize = 16;

/// Byte offset of the maximum value.
pub const MAX_DOUBLE: usize = 24;

/// Byte offset of the payload (base buffer, then levels).
pub const COMBINED_BUFFER: usize = 32;

/// Size of the empty compact image.
pub const EMPTY_COMPACT_SIZE_BYTES: usize = 8;
