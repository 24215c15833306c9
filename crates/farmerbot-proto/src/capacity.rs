//! Resource capacity vectors and the arithmetic used for claims.

use serde::{Deserialize, Serialize};

/// One gibibyte in bytes.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Converts a size expressed in GiB to bytes.
#[must_use]
pub const fn gib_to_bytes(gib: u64) -> u64 {
    gib.saturating_mul(GIB)
}

/// A four-dimensional resource vector.
///
/// `cru` is in cores; `mru`, `sru` and `hru` are in bytes. All arithmetic
/// saturates: additions cap at `u64::MAX`, subtractions floor at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Compute units (cores).
    pub cru: u64,
    /// Memory in bytes.
    pub mru: u64,
    /// SSD storage in bytes.
    pub sru: u64,
    /// HDD storage in bytes.
    pub hru: u64,
}

impl Capacity {
    /// The zero capacity.
    pub const ZERO: Self = Self {
        cru: 0,
        mru: 0,
        sru: 0,
        hru: 0,
    };

    /// Adds another capacity component-wise.
    pub fn add(&mut self, other: Self) {
        self.cru = self.cru.saturating_add(other.cru);
        self.mru = self.mru.saturating_add(other.mru);
        self.sru = self.sru.saturating_add(other.sru);
        self.hru = self.hru.saturating_add(other.hru);
    }

    /// Returns the component-wise difference, floored at zero.
    #[must_use]
    pub fn subtract(&self, other: Self) -> Self {
        Self {
            cru: self.cru.saturating_sub(other.cru),
            mru: self.mru.saturating_sub(other.mru),
            sru: self.sru.saturating_sub(other.sru),
            hru: self.hru.saturating_sub(other.hru),
        }
    }

    /// Returns true if every component is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cru == 0 && self.mru == 0 && self.sru == 0 && self.hru == 0
    }

    /// Returns true if every component is at least as large as `req`.
    #[must_use]
    pub const fn can_contain(&self, req: &Self) -> bool {
        self.cru >= req.cru && self.mru >= req.mru && self.sru >= req.sru && self.hru >= req.hru
    }

    /// Sums the four components into a single scalar.
    ///
    /// Used by fleet balancing, where utilisation is computed over the sum
    /// of all dimensions rather than per dimension.
    #[must_use]
    pub fn sum(&self) -> u128 {
        u128::from(self.cru) + u128::from(self.mru) + u128::from(self.sru) + u128::from(self.hru)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(cru: u64, mru: u64, sru: u64, hru: u64) -> Capacity {
        Capacity { cru, mru, sru, hru }
    }

    #[test]
    fn add_is_componentwise() {
        let mut a = cap(1, 2, 3, 4);
        a.add(cap(10, 20, 30, 40));
        assert_eq!(a, cap(11, 22, 33, 44));
    }

    #[test]
    fn add_saturates() {
        let mut a = cap(u64::MAX, 0, 0, 0);
        a.add(cap(1, 0, 0, 0));
        assert_eq!(a.cru, u64::MAX);
    }

    #[test]
    fn subtract_floors_at_zero() {
        let a = cap(5, 5, 5, 5);
        let result = a.subtract(cap(10, 3, 5, 0));
        assert_eq!(result, cap(0, 2, 0, 5));
    }

    #[test]
    fn is_empty() {
        assert!(Capacity::ZERO.is_empty());
        assert!(!cap(0, 0, 0, 1).is_empty());
    }

    #[test]
    fn can_contain_requires_every_dimension() {
        let total = cap(4, 8, 8, 8);
        assert!(total.can_contain(&cap(4, 8, 8, 8)));
        assert!(total.can_contain(&cap(1, 1, 1, 1)));
        assert!(!total.can_contain(&cap(5, 1, 1, 1)));
        assert!(!total.can_contain(&cap(1, 1, 1, 9)));
    }

    #[test]
    fn gib_conversion() {
        assert_eq!(gib_to_bytes(1), 1_073_741_824);
        assert_eq!(gib_to_bytes(0), 0);
    }
}
