/*!
Counts unique IPv4 address space across overlapping announcements.

The counter keeps a sorted list of disjoint inclusive `[lo, hi]` ranges;
adding a prefix merges it with every range it overlaps or touches, so the
list stays coalesced and the unique-address count is a plain sum.
*/
use crate::models::Prefix;

/// Sorted, coalesced list of disjoint IPv4 address ranges.
///
/// IPv6 prefixes are ignored by [`add`](IpCounter::add); address-space
/// accounting is an IPv4 concern here.
#[derive(Debug, Default, Clone)]
pub struct IpCounter {
    ranges: Vec<(u32, u32)>,
}

impl IpCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the address block of an IPv4 prefix.
    pub fn add(&mut self, pfx: &Prefix) {
        if let Some((lo, hi)) = pfx.v4_range() {
            self.add_range(lo, hi);
        }
    }

    /// Adds an inclusive address range, merging with any range it overlaps
    /// or touches.
    pub fn add_range(&mut self, lo: u32, hi: u32) {
        debug_assert!(lo <= hi);
        // first range that could merge with or follow [lo, hi]
        let start = self.ranges.partition_point(|r| (r.1 as u64) + 1 < lo as u64);

        if start == self.ranges.len() || (hi as u64) + 1 < self.ranges[start].0 as u64 {
            self.ranges.insert(start, (lo, hi));
            return;
        }

        let merged_lo = lo.min(self.ranges[start].0);
        let mut merged_hi = hi;
        let mut end = start;
        while end < self.ranges.len() && self.ranges[end].0 as u64 <= (hi as u64) + 1 {
            merged_hi = merged_hi.max(self.ranges[end].1);
            end += 1;
        }
        self.ranges.splice(start..end, std::iter::once((merged_lo, merged_hi)));
    }

    /// Number of unique addresses covered.
    pub fn ip_count(&self) -> u64 {
        self.ranges
            .iter()
            .map(|(lo, hi)| (*hi as u64) - (*lo as u64) + 1)
            .sum()
    }

    /// How many of `pfx`'s addresses are already covered, and whether the
    /// prefix lies strictly inside a single existing range.
    pub fn overlap(&self, pfx: &Prefix) -> (u64, bool) {
        let Some((lo, hi)) = pfx.v4_range() else {
            return (0, false);
        };
        let mut count = 0u64;
        let mut more_specific = false;
        for (rlo, rhi) in &self.ranges {
            if *rlo > hi {
                break;
            }
            if *rhi < lo {
                continue;
            }
            let int_lo = lo.max(*rlo);
            let int_hi = hi.min(*rhi);
            count += (int_hi as u64) - (int_lo as u64) + 1;
            if *rlo <= lo && hi <= *rhi && (*rlo < lo || hi < *rhi) {
                more_specific = true;
            }
        }
        (count, more_specific)
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}
