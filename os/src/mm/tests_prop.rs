#![cfg(test)]
//! Property tests for area placement: non-aliasing, exact hints and the
//! ordering invariants of a memory set under random mmap/munmap.

use super::{Backing, MapPermission, MemorySet, PhysMemory, Sharing, VPNRange, VirtAddr};
use crate::config::{MMAP_BASE, MMAP_TOP, PAGE_SIZE};
use crate::error::VmError;
use alloc::vec::Vec;
use proptest::prelude::*;

fn space() -> MemorySet {
    let memory = PhysMemory::new(64);
    let window = VPNRange::new(
        VirtAddr::from(MMAP_BASE).floor(),
        VirtAddr::from(MMAP_TOP).floor(),
    );
    MemorySet::new_bare(&memory, window).unwrap()
}

fn arb_perm() -> impl Strategy<Value = MapPermission> {
    (0u8..8).prop_map(MapPermission::from_bits_truncate)
}

fn anon(ms: &mut MemorySet, hint: usize, pages: usize, perm: MapPermission) -> Result<usize, VmError> {
    ms.mmap(hint, pages * PAGE_SIZE, perm, Sharing::Private, Backing::Anonymous, 0)
}

fn assert_well_formed(ms: &MemorySet) -> Result<(), TestCaseError> {
    let bounds: Vec<(usize, usize)> = ms.areas().map(|a| (a.start_va().0, a.end_va().0)).collect();
    for (start, end) in bounds.iter() {
        prop_assert!(start % PAGE_SIZE == 0 && end % PAGE_SIZE == 0 && start < end);
    }
    for pair in bounds.windows(2) {
        prop_assert!(pair[0].1 <= pair[1].0, "areas overlap: {:?}", pair);
    }
    for area in ms.areas() {
        for vpn in area.resident_pages() {
            let va = VirtAddr::from(vpn).0;
            prop_assert!(area.start_va().0 <= va && va < area.end_va().0);
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn consecutive_mappings_never_alias(a in 1usize..16, b in 1usize..16, pa in arb_perm(), pb in arb_perm()) {
        let mut ms = space();
        let first = anon(&mut ms, 0, a, pa).unwrap();
        let second = anon(&mut ms, 0, b, pb).unwrap();
        prop_assert!(first + a * PAGE_SIZE <= second || second + b * PAGE_SIZE <= first);
        prop_assert!(first >= MMAP_BASE && second >= MMAP_BASE);
    }

    #[test]
    fn fixed_hint_is_honoured(page in 1usize..0x4000, pages in 1usize..32) {
        let mut ms = space();
        let hint = page * PAGE_SIZE;
        prop_assert_eq!(anon(&mut ms, hint, pages, MapPermission::R), Ok(hint));
        prop_assert_eq!(anon(&mut ms, hint, 1, MapPermission::R), Err(VmError::Conflict));
    }

    #[test]
    fn unaligned_lengths_always_fail(len in 1usize..0x10_0000, perm in arb_perm(), hint in prop_oneof![Just(0usize), Just(0x00f0_0000usize)]) {
        prop_assume!(len % PAGE_SIZE != 0);
        let mut ms = space();
        prop_assert_eq!(
            ms.mmap(hint, len, perm, Sharing::Private, Backing::Anonymous, 0),
            Err(VmError::InvalidArgument)
        );
        prop_assert_eq!(ms.areas().count(), 0);
    }

    #[test]
    fn random_mmap_munmap_keeps_areas_ordered(ops in proptest::collection::vec((any::<bool>(), 0usize..24, 1usize..6, arb_perm()), 1..40)) {
        let mut ms = space();
        let base = 0x0100_0000;
        for (map, page, pages, perm) in ops {
            let addr = base + page * PAGE_SIZE;
            if map {
                let _ = anon(&mut ms, addr, pages, perm);
            } else {
                let _ = ms.munmap(addr, pages * PAGE_SIZE);
            }
            assert_well_formed(&ms)?;
        }
    }
}
