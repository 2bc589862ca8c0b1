//! Inclusive address ranges.

use crate::address::{common_prefix_groups, Address, AddressFamily};
use crate::error::AddressError;
use std::fmt;

/// Inclusive interval of allocatable addresses.
///
/// Both ends share one family and `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    start: Address,
    end: Address,
}

impl AddressRange {
    /// Create a range, rejecting mixed families and reversed bounds.
    pub fn new(start: Address, end: Address) -> Result<Self, AddressError> {
        if start.family() != end.family() {
            return Err(AddressError::FamilyMismatch(
                start.to_string(),
                end.to_string(),
            ));
        }

        if start > end {
            return Err(AddressError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }

        Ok(Self { start, end })
    }

    /// Parse both bounds from text.
    pub fn parse(start: &str, end: &str) -> Result<Self, AddressError> {
        Self::new(Address::parse(start)?, Address::parse(end)?)
    }

    /// The inclusive range covered by a CIDR block such as `fc00::/120`.
    pub fn from_cidr(cidr: &str) -> Result<Self, AddressError> {
        let (addr, len) = cidr
            .split_once('/')
            .ok_or_else(|| AddressError::InvalidRange(format!("'{}' is not a CIDR", cidr)))?;

        let addr = Address::parse(addr)?;
        let family = addr.family();
        let len: u32 = len
            .parse()
            .map_err(|_| AddressError::InvalidRange(format!("bad prefix length in '{}'", cidr)))?;

        if len > family.bits() {
            return Err(AddressError::InvalidRange(format!(
                "prefix length {} exceeds {} bits",
                len,
                family.bits()
            )));
        }

        let width = family.group_bits();
        let max = family.group_max();
        let mut low = Vec::with_capacity(family.group_count());
        let mut high = Vec::with_capacity(family.group_count());

        for (i, group) in addr.groups().iter().enumerate() {
            let offset = i as u32 * width;
            let kept = len.saturating_sub(offset).min(width);
            let mask = if kept == 0 {
                0
            } else {
                (max << (width - kept)) & max
            };
            low.push(group & mask);
            high.push((group & mask) | (!mask & max));
        }

        Self::new(
            Address::new(family, &low)?,
            Address::new(family, &high)?,
        )
    }

    /// First address of the range. Never issued itself; it seeds the cursor.
    pub fn start(&self) -> Address {
        self.start
    }

    /// Last issuable address.
    pub fn end(&self) -> Address {
        self.end
    }

    pub fn family(&self) -> AddressFamily {
        self.start.family()
    }

    /// True iff `start <= addr <= end` and `addr` is of the range's family.
    pub fn contains(&self, addr: &Address) -> bool {
        addr.family() == self.family() && self.start <= *addr && *addr <= self.end
    }

    /// Prefix shared by both bounds, for diagnostics.
    pub fn common_prefix(&self) -> Vec<String> {
        common_prefix_groups(&self.start, &self.end)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
