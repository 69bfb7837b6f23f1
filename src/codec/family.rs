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

use crate::error::Error;

/// Defines the various families of sketch and set operation classes.
///
/// A family defines a set of classes that share fundamental algorithms and
/// behaviors. The classes within a family may still differ by how they are
/// stored and accessed.
pub struct Family {
    /// The byte ID for this family.
    pub id: u8,
    /// The name for this family.
    pub name: &'static str,
    /// The minimum preamble size for this family in longs (8-byte integers).
    pub min_pre_longs: u8,
    /// The maximum preamble size for this family in longs (8-byte integers).
    pub max_pre_longs: u8,
}

impl Family {
    /// The Alpha theta update sketch family.
    pub const ALPHA: Family = Family {
        id: 1,
        name: "ALPHA",
        min_pre_longs: 3,
        max_pre_longs: 3,
    };

    /// The QuickSelect theta update sketch family.
    pub const QUICKSELECT: Family = Family {
        id: 2,
        name: "QUICKSELECT",
        min_pre_longs: 4,
        max_pre_longs: 4,
    };

    /// The compact theta sketch family.
    pub const COMPACT: Family = Family {
        id: 3,
        name: "COMPACT",
        min_pre_longs: 1,
        max_pre_longs: 3,
    };

    /// The doubles quantiles sketch family.
    pub const QUANTILES: Family = Family {
        id: 8,
        name: "QUANTILES",
        min_pre_longs: 1,
        max_pre_longs: 2,
    };

    /// The tuple sketch family.
    pub const TUPLE: Family = Family {
        id: 9,
        name: "TUPLE",
        min_pre_longs: 1,
        max_pre_longs: 3,
    };
}

impl Family {
    /// Validate a decoded family byte against this family.
    pub fn validate_id(&self, family_id: u8) -> Result<(), Error> {
        if family_id != self.id {
            Err(Error::invalid_family(self.id, family_id, self.name))
        } else {
            Ok(())
        }
    }

    /// Validate a decoded preamble-longs byte against this family's range.
    pub fn validate_pre_longs(&self, pre_longs: u8) -> Result<(), Error> {
        if pre_longs < self.min_pre_longs || pre_longs > self.max_pre_longs {
            Err(Error::invalid_argument(format!(
                "preamble longs for {} must be in [{}, {}], got {}",
                self.name, self.min_pre_longs, self.max_pre_longs, pre_longs
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(Family::QUANTILES.validate_id(8).is_ok());
        assert!(Family::QUANTILES.validate_id(3).is_err());
        assert!(Family::COMPACT.validate_id(3).is_ok());
    }

    #[test]
    fn test_validate_pre_longs() {
        assert!(Family::COMPACT.validate_pre_longs(1).is_ok());
        assert!(Family::COMPACT.validate_pre_longs(3).is_ok());
        assert!(Family::COMPACT.validate_pre_longs(4).is_err());
        assert!(Family::QUICKSELECT.validate_pre_longs(3).is_err());
    }
}
