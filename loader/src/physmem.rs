//! Physical memory bookkeeping for placing things the record points to.
//!
//! Arithmetic is checked: the inputs come from firmware and kernel images,
//! and a wrapped address would hand the kernel a pointer into the wrong
//! memory.

use core::cmp::{max, min};

use arrayvec::ArrayVec;
use itertools::put_back;
use itertools::structs::PutBack;

pub const PAGE_SIZE: u64 = 4096;

/// Most entries a [`Map`] holds. Firmware maps are far smaller in practice.
pub const MAP_CAPACITY: usize = 128;

#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Debug, Hash)]
pub struct Address(u64);

impl Address {
    pub const fn from_raw(val: u64) -> Address {
        Address(val)
    }

    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn checked_offset(&self, length: Length) -> Option<Address> {
        self.0.checked_add(length.0).map(Address)
    }

    /// Returns the first address at or below `self` aligned to `alignment`,
    /// which must be a power of two.
    pub fn align_down(&self, alignment: u64) -> Address {
        Address(self.0 & !(alignment - 1))
    }

    /// Returns the first address at or above `self` aligned to `alignment`,
    /// which must be a power of two. `None` if that is past `u64::MAX`.
    pub fn align_up(&self, alignment: u64) -> Option<Address> {
        self.0
            .checked_add(alignment - 1)
            .map(|x| Address(x & !(alignment - 1)))
    }
}

#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Debug, Hash)]
pub struct Length(u64);

impl Length {
    pub const fn from_raw(val: u64) -> Length {
        Length(val)
    }

    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Rounds up to a multiple of `alignment`, a power of two.
    pub fn align_up(&self, alignment: u64) -> Option<Length> {
        Address(self.0).align_up(alignment).map(|a| Length(a.0))
    }
}

/// A non-empty range of physical memory that does not wrap around.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub struct Extent {
    address: Address,
    length: Length,
}

impl Extent {
    pub fn new(address: Address, length: Length) -> Option<Extent> {
        if length.0 == 0 || address.checked_offset(length).is_none() {
            None
        } else {
            Some(Extent { address, length })
        }
    }

    /// The extent `[start, end)`. `None` if it would be empty.
    pub fn from_bounds(start: Address, end: Address) -> Option<Extent> {
        if end <= start {
            return None;
        }
        Extent::new(start, Length(end.0 - start.0))
    }

    /// Panics on an empty or wrapping extent. For tests and constants.
    pub fn from_raw(address: u64, length: u64) -> Extent {
        match Self::new(Address(address), Length(length)) {
            Some(extent) => extent,
            None => panic!("invalid extent {:#x}+{:#x}", address, length),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn length(&self) -> Length {
        self.length
    }

    /// The first address past the extent.
    pub fn end_address(&self) -> Address {
        Address(self.address.0 + self.length.0)
    }

    pub fn last_address(&self) -> Address {
        Address(self.address.0 + (self.length.0 - 1))
    }

    pub fn contains(&self, other: &Extent) -> bool {
        self.address <= other.address && other.last_address() <= self.last_address()
    }

    pub fn has_overlap(&self, other: &Extent) -> bool {
        self.address <= other.last_address() && other.address <= self.last_address()
    }

    /// The part of `self` left of `other`.
    pub fn left_difference(&self, other: &Extent) -> Option<Extent> {
        if self.address >= other.address {
            return None;
        }
        let end = min(self.last_address().0, other.address.0 - 1);
        Extent::new(self.address, Length(end - self.address.0 + 1))
    }

    /// The part of `self` right of `other`.
    pub fn right_difference(&self, other: &Extent) -> Option<Extent> {
        if self.last_address() <= other.last_address() {
            return None;
        }
        let start = max(self.address.0, other.last_address().0 + 1);
        Extent::new(Address(start), Length(self.last_address().0 - start + 1))
    }

    /// The largest sub-extent with both ends aligned to `alignment`.
    pub fn shrink_to_alignment(&self, alignment: u64) -> Option<Extent> {
        let start = self.address.align_up(alignment)?;
        let end = self.end_address().align_down(alignment);
        Extent::from_bounds(start, end)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryType {
    /// Free for the loader to place things in, and for the kernel afterwards.
    Available,
    /// Holds loader or firmware data the kernel may reclaim after reading it.
    BootData,
    /// ACPI tables, reclaimable once parsed.
    Acpi,
    /// Cannot be used.
    Reserved,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MapEntry {
    pub extent: Extent,
    pub mem_type: MemoryType,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("memory map has more than {max} entries", max = MAP_CAPACITY)]
pub struct MapFull;

/// The machine's physical memory, sorted by address.
#[derive(Clone, Debug)]
pub struct Map {
    entries: ArrayVec<MapEntry, MAP_CAPACITY>,
}

impl Map {
    /// Entries may come in any order but must not overlap.
    pub fn from_entries<T: IntoIterator<Item = MapEntry>>(src: T) -> Result<Map, MapFull> {
        let mut entries = ArrayVec::new();
        for entry in src {
            entries.try_push(entry).map_err(|_| MapFull)?;
        }
        entries.sort_unstable_by_key(|e: &MapEntry| e.extent.address());
        Ok(Map { entries })
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn iter_type(&self, mem_type: MemoryType) -> impl Iterator<Item = Extent> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.mem_type == mem_type)
            .map(|e| e.extent)
    }

    /// Whether `extent` lies entirely inside one available entry.
    pub fn is_available(&self, extent: &Extent) -> bool {
        self.iter_type(MemoryType::Available)
            .any(|e| e.contains(extent))
    }
}

/// Removes `holes` from `blocks`, splitting blocks where a hole falls in the
/// middle. Both inputs must be sorted by address and free of overlaps.
pub fn reserve<T, U>(blocks: T, holes: U) -> impl Iterator<Item = Extent>
where
    T: IntoIterator<Item = Extent>,
    U: IntoIterator<Item = Extent>,
{
    ReserveIter {
        blocks: put_back(blocks),
        holes: put_back(holes),
    }
    .flatten()
}

struct ReserveIter<I1: Iterator, I2: Iterator> {
    blocks: PutBack<I1>,
    holes: PutBack<I2>,
}

impl<I1, I2> Iterator for ReserveIter<I1, I2>
where
    I1: Iterator<Item = Extent>,
    I2: Iterator<Item = Extent>,
{
    type Item = Option<Extent>;

    fn next(&mut self) -> Option<Option<Extent>> {
        let block = self.blocks.next()?;

        // Holes entirely before `block` can't touch it or anything after it.
        let hole = loop {
            match self.holes.next() {
                Some(hole) if hole.last_address() < block.address() => continue,
                Some(hole) => break hole,
                None => return Some(Some(block)),
            }
        };

        if block.last_address() < hole.address() {
            self.holes.put_back(hole);
            return Some(Some(block));
        }

        // The hole intersects the block. What's right of it may meet the next
        // hole; otherwise the hole may reach into the next block.
        match block.right_difference(&hole) {
            Some(right) => self.blocks.put_back(right),
            None => self.holes.put_back(hole),
        }

        Some(block.left_difference(&hole))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::vec::Vec;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn align() {
        assert_eq!(Address::from_raw(0).align_up(4096), Some(Address::from_raw(0)));
        assert_eq!(
            Address::from_raw(1).align_up(4096),
            Some(Address::from_raw(4096))
        );
        assert_eq!(Address::from_raw(4097).align_down(4096), Address::from_raw(4096));
        assert_eq!(Address::from_raw(u64::MAX).align_up(4096), None);
        assert_eq!(Length::from_raw(1).align_up(4096), Some(Length::from_raw(4096)));
    }

    #[test]
    fn extent_construction() {
        assert_eq!(Extent::new(Address::from_raw(5), Length::from_raw(0)), None);
        assert_eq!(
            Extent::new(Address::from_raw(u64::MAX), Length::from_raw(2)),
            None
        );
        assert_eq!(
            Extent::from_bounds(Address::from_raw(8), Address::from_raw(8)),
            None
        );
        assert_eq!(
            Extent::from_bounds(Address::from_raw(8), Address::from_raw(12)),
            Some(Extent::from_raw(8, 4))
        );
        assert_eq!(Extent::from_raw(0, 4).last_address(), Address::from_raw(3));
    }

    #[test]
    fn containment_and_overlap() {
        let outer = Extent::from_raw(0x1000, 0x4000);
        assert!(outer.contains(&Extent::from_raw(0x1000, 0x4000)));
        assert!(outer.contains(&Extent::from_raw(0x2000, 0x1000)));
        assert!(!outer.contains(&Extent::from_raw(0x4000, 0x2000)));

        assert!(outer.has_overlap(&Extent::from_raw(0x4fff, 1)));
        assert!(!outer.has_overlap(&Extent::from_raw(0x5000, 1)));
        assert!(!outer.has_overlap(&Extent::from_raw(0, 0x1000)));
    }

    #[test]
    fn differences() {
        let block = Extent::from_raw(10, 10);
        assert_eq!(
            block.left_difference(&Extent::from_raw(12, 6)),
            Some(Extent::from_raw(10, 2))
        );
        assert_eq!(
            block.right_difference(&Extent::from_raw(12, 6)),
            Some(Extent::from_raw(18, 2))
        );
        assert_eq!(block.left_difference(&Extent::from_raw(5, 10)), None);
        assert_eq!(block.right_difference(&Extent::from_raw(15, 10)), None);
        assert_eq!(
            block.left_difference(&Extent::from_raw(20, 10)),
            Some(block)
        );
    }

    #[test]
    fn shrink() {
        assert_eq!(
            Extent::from_raw(1, 8191).shrink_to_alignment(4096),
            Some(Extent::from_raw(4096, 4096))
        );
        assert_eq!(Extent::from_raw(1, 8190).shrink_to_alignment(4096), None);
    }

    #[test]
    fn map_sorts_and_checks_capacity() {
        let map = Map::from_entries([
            MapEntry {
                extent: Extent::from_raw(0x10_0000, 0x10_0000),
                mem_type: MemoryType::Available,
            },
            MapEntry {
                extent: Extent::from_raw(0, 0x9_F000),
                mem_type: MemoryType::Available,
            },
        ])
        .unwrap();
        assert_eq!(map.entries()[0].extent.address(), Address::from_raw(0));
        assert!(map.is_available(&Extent::from_raw(0x10_0000, 0x1000)));
        assert!(!map.is_available(&Extent::from_raw(0x9_E000, 0x2000)));

        let too_many = (0..=MAP_CAPACITY as u64).map(|i| MapEntry {
            extent: Extent::from_raw(i * 0x1000, 0x1000),
            mem_type: MemoryType::Reserved,
        });
        assert_eq!(Map::from_entries(too_many).unwrap_err(), MapFull);
    }

    #[test]
    fn reserve_splits_blocks() {
        let result: Vec<_> = reserve(
            [
                Extent::from_raw(0, 5),
                Extent::from_raw(7, 2),
                Extent::from_raw(10, 10),
                Extent::from_raw(25, 5),
                Extent::from_raw(35, 10),
            ],
            [
                Extent::from_raw(0, 3),
                Extent::from_raw(6, 4),
                Extent::from_raw(12, 4),
                Extent::from_raw(27, 3),
                Extent::from_raw(32, 4),
                Extent::from_raw(44, 2),
            ],
        )
        .collect();

        assert_eq!(
            result,
            [
                Extent::from_raw(3, 2),
                Extent::from_raw(10, 2),
                Extent::from_raw(16, 4),
                Extent::from_raw(25, 2),
                Extent::from_raw(36, 8)
            ]
        );
    }

    #[test]
    fn reserve_one_hole_over_many_blocks() {
        let result: Vec<_> = reserve(
            [
                Extent::from_raw(4, 2),
                Extent::from_raw(10, 5),
                Extent::from_raw(38, 4),
            ],
            [Extent::from_raw(5, 35)],
        )
        .collect();

        assert_eq!(result, [Extent::from_raw(4, 1), Extent::from_raw(40, 2)]);
    }

    proptest! {
        #[test]
        fn reserve_leaves_no_hole_bytes(
            starts in proptest::collection::btree_set(0u64..64, 1..8),
            hole_start in 0u64..80,
            hole_len in 1u64..40,
        ) {
            // Disjoint blocks of length 4 at multiples of 8.
            let blocks: Vec<_> = starts.iter().map(|s| Extent::from_raw(s * 8, 4)).collect();
            let hole = Extent::from_raw(hole_start, hole_len);

            let result: Vec<_> = reserve(blocks.iter().copied(), [hole]).collect();

            for extent in &result {
                prop_assert!(!extent.has_overlap(&hole));
                prop_assert!(blocks.iter().any(|b| b.contains(extent)));
            }
            let kept: u64 = result.iter().map(|e| e.length().as_raw()).sum();
            let removed: u64 = blocks
                .iter()
                .filter(|b| b.has_overlap(&hole))
                .map(|b| {
                    let start = max(b.address().as_raw(), hole.address().as_raw());
                    let end = min(b.end_address().as_raw(), hole.end_address().as_raw());
                    end - start
                })
                .sum();
            prop_assert_eq!(kept + removed, 4 * blocks.len() as u64);
        }
    }
}
