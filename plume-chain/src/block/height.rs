use std::fmt;
use std::ops::{Add, Sub};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

/// The length of the chain back to the genesis block.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Height(pub u32);

impl Height {
    /// The height of the genesis block.
    pub const MIN: Height = Height(0);

    /// Returns the height `rhs` blocks below this one, or `None` below
    /// genesis.
    pub fn checked_sub(self, rhs: u32) -> Option<Height> {
        self.0.checked_sub(rhs).map(Height)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Height {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Height").field(&self.0).finish()
    }
}

impl Add<u32> for Height {
    type Output = Height;

    fn add(self, rhs: u32) -> Height {
        Height(self.0 + rhs)
    }
}

impl Sub<u32> for Height {
    type Output = Height;

    fn sub(self, rhs: u32) -> Height {
        Height(self.0 - rhs)
    }
}
