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

//! Utilities shared by both sketch families.

pub mod binomial_bounds;
mod random;

pub use random::RandomSource;
pub use random::XorShift64;

/// Number of standard deviations for confidence bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumStdDev {
    /// One standard deviation, roughly 68% confidence.
    One,
    /// Two standard deviations, roughly 95% confidence.
    Two,
    /// Three standard deviations, roughly 99% confidence.
    Three,
}

impl NumStdDev {
    /// The number of standard deviations as an integer.
    pub fn value(self) -> u8 {
        match self {
            NumStdDev::One => 1,
            NumStdDev::Two => 2,
            NumStdDev::Three => 3,
        }
    }
}

/// Hash-table growth step for theta update sketches. The log2 value is the
/// number of doublings applied per resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFactor {
    /// No incremental growth; start at full size.
    X1,
    /// Double on each resize.
    X2,
    /// Quadruple on each resize.
    X4,
    /// Grow eightfold on each resize.
    X8,
}

impl ResizeFactor {
    /// The log2 growth step.
    pub fn lg_value(self) -> u8 {
        match self {
            ResizeFactor::X1 => 0,
            ResizeFactor::X2 => 1,
            ResizeFactor::X4 => 2,
            ResizeFactor::X8 => 3,
        }
    }

    /// Reconstruct a resize factor from its log2 growth step.
    pub fn from_lg_value(lg: u8) -> Option<Self> {
        match lg {
            0 => Some(ResizeFactor::X1),
            1 => Some(ResizeFactor::X2),
            2 => Some(ResizeFactor::X4),
            3 => Some(ResizeFactor::X8),
            _ => None,
        }
    }
}

/// Canonicalize a double for hashing: all zeros collapse to +0.0 and all
/// NaN payloads collapse to the canonical NaN, so equal-comparing doubles
/// hash identically.
pub fn canonical_double(value: f64) -> i64 {
    let canonical = if value == 0.0 {
        0.0
    } else if value.is_nan() {
        f64::NAN
    } else {
        value
    };
    canonical.to_bits() as i64
}
