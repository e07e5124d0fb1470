//! Ranges the manager has actually linked into its free list.
//!
//! Linking widens the list's span to cover everything from the lowest base to
//! the highest ceiling, gaps included. The gaps are reserved memory (or no
//! memory at all), so the span alone can tell neither which later memory-map
//! entries are new nor which freed addresses really belong to the list.

use kernel_memory_addresses::MemoryAddress;

/// Number of ranges a manager can track, bootstrap range included.
pub const MAX_LINKED_REGIONS: usize = 64;

/// One linked range, `[start, end)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    pub start: MemoryAddress,
    pub end: MemoryAddress,
}

impl Region {
    const EMPTY: Self = Self {
        start: MemoryAddress::new(0),
        end: MemoryAddress::new(0),
    };

    #[must_use]
    pub fn contains(&self, addr: MemoryAddress) -> bool {
        self.start <= addr && addr < self.end
    }
}

/// How a candidate range relates to the linked ones.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Collision {
    /// Lies entirely within a linked range.
    Covered,
    /// Crosses the start of a linked range.
    StraddlesStart,
    /// Crosses the end of a linked range.
    StraddlesEnd,
}

/// Fixed-capacity set of linked ranges, in link order.
pub struct LinkedRegions {
    regions: [Region; MAX_LINKED_REGIONS],
    len: usize,
}

impl LinkedRegions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: [Region::EMPTY; MAX_LINKED_REGIONS],
            len: 0,
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Region] {
        &self.regions[..self.len]
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.len == MAX_LINKED_REGIONS
    }

    /// Record `[start, end)`. Returns `false` if there is no room left.
    pub fn push(&mut self, start: MemoryAddress, end: MemoryAddress) -> bool {
        if self.is_full() {
            return false;
        }
        self.regions[self.len] = Region { start, end };
        self.len += 1;
        true
    }

    /// The first collision of `[start, end)` with a linked range, if any.
    #[must_use]
    pub fn collision(&self, start: MemoryAddress, end: MemoryAddress) -> Option<Collision> {
        self.as_slice().iter().find_map(|r| {
            if start >= r.start && end <= r.end {
                Some(Collision::Covered)
            } else if start < r.start && end > r.start {
                Some(Collision::StraddlesStart)
            } else if start < r.end && end > r.end {
                Some(Collision::StraddlesEnd)
            } else {
                None
            }
        })
    }

    #[must_use]
    pub fn contains(&self, addr: MemoryAddress) -> bool {
        self.as_slice().iter().any(|r| r.contains(addr))
    }

    /// Whether every byte of `[start, end)` lies in linked ranges.
    ///
    /// Adjacent ranges may be crossed.
    #[must_use]
    pub fn covers(&self, start: MemoryAddress, end: MemoryAddress) -> bool {
        let mut cursor = start;
        while cursor < end {
            match self.as_slice().iter().find(|r| r.contains(cursor)) {
                Some(r) => cursor = r.end,
                None => return false,
            }
        }
        true
    }
}

impl Default for LinkedRegions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(v: u64) -> MemoryAddress {
        MemoryAddress::new(v)
    }

    fn regions(ranges: &[(u64, u64)]) -> LinkedRegions {
        let mut r = LinkedRegions::new();
        for &(start, end) in ranges {
            assert!(r.push(addr(start), addr(end)));
        }
        r
    }

    #[test]
    fn collisions_are_judged_per_range() {
        let r = regions(&[(0x10000, 0x14000), (0x2000, 0x4000)]);

        assert_eq!(r.collision(addr(0x6000), addr(0x8000)), None);
        assert_eq!(r.collision(addr(0x4000), addr(0x10000)), None);
        assert_eq!(r.collision(addr(0x10000), addr(0x14000)), Some(Collision::Covered));
        assert_eq!(r.collision(addr(0x3000), addr(0x4000)), Some(Collision::Covered));
        assert_eq!(r.collision(addr(0xE000), addr(0x12000)), Some(Collision::StraddlesStart));
        assert_eq!(r.collision(addr(0x13000), addr(0x16000)), Some(Collision::StraddlesEnd));
        assert_eq!(r.collision(addr(0x1000), addr(0x20000)), Some(Collision::StraddlesStart));
    }

    #[test]
    fn gaps_are_not_contained() {
        let r = regions(&[(0x2000, 0x4000), (0x6000, 0x8000)]);
        assert!(r.contains(addr(0x2000)));
        assert!(r.contains(addr(0x7FFF)));
        assert!(!r.contains(addr(0x4000)));
        assert!(!r.contains(addr(0x5000)));
        assert!(!r.contains(addr(0x8000)));
    }

    #[test]
    fn coverage_crosses_adjacent_ranges_only() {
        let r = regions(&[(0x4000, 0x6000), (0x2000, 0x4000), (0x8000, 0x9000)]);
        assert!(r.covers(addr(0x2000), addr(0x6000)));
        assert!(r.covers(addr(0x3000), addr(0x5000)));
        assert!(!r.covers(addr(0x5000), addr(0x9000)));
        assert!(!r.covers(addr(0x1000), addr(0x3000)));
        assert!(r.covers(addr(0x8000), addr(0x8000)));
    }

    #[test]
    fn capacity_is_fixed() {
        let mut r = LinkedRegions::new();
        for i in 0..MAX_LINKED_REGIONS as u64 {
            assert!(r.push(addr(i * 0x2000), addr(i * 0x2000 + 0x1000)));
        }
        assert!(r.is_full());
        assert!(!r.push(addr(0xF000_0000), addr(0xF000_1000)));
        assert_eq!(r.as_slice().len(), MAX_LINKED_REGIONS);
    }
}
