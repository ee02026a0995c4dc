//! Demand paging: faulting pages in from the executable, LRU eviction to
//! swap, and contents surviving a round trip through the swap file.

mod common;

use kernel::{
    machine::{Exception, PhysPage},
    param::PAGE_SIZE,
    vm,
};

#[test]
fn code_pages_fault_in_from_the_executable() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        // Two pages of recognizable code bytes.
        let code: Vec<u8> = (0..2 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        common::install_noff(ctx, "/prog", &code, &[], 0);
        let space = common::attach_space(ctx, "/prog");
        assert!(space.num_pages() >= 2);

        // Nothing is resident until touched.
        assert_eq!(space.page_entry(0).page, PhysPage::NotAssigned);

        let machine = ctx.kernel().machine();
        for (i, expected) in code.iter().enumerate().take(2 * PAGE_SIZE) {
            let byte = loop {
                match machine.read_mem(i as u32, 1) {
                    Ok(value) => break value as u8,
                    Err(Exception::PageFault(addr)) => {
                        vm::handle_page_fault(ctx, addr).unwrap();
                    }
                    Err(other) => panic!("unexpected exception {:?}", other),
                }
            };
            assert_eq!(byte, *expected, "byte {}", i);
        }
        assert!(space.page_entry(0).is_valid() || space.page_entry(0).page == PhysPage::InSwap);
    });
}

#[test]
fn lru_eviction_picks_the_coldest_page() {
    // Four frames, so the fifth resident page forces an eviction.
    let kernel = common::boot_with_pages(4);
    kernel.run(|ctx| {
        common::install_noff(ctx, "/prog", &[], &[], 5 * PAGE_SIZE as u32);
        let space = common::attach_space(ctx, "/prog");
        assert!(space.num_pages() >= 5);

        let machine = ctx.kernel().machine();
        // Touch pages 0..3 and give each one a distinct first byte.
        for vpn in 0..4u32 {
            vm::update_tlb(ctx, &space, vpn).unwrap();
            machine
                .write_mem(vpn * PAGE_SIZE as u32, 1, 0xa0 + vpn)
                .unwrap();
        }
        // Re-touch 0, making 1 the least recently used.
        vm::update_tlb(ctx, &space, 0).unwrap();
        // Page 5 needs a frame; page 1 must be the victim.
        vm::update_tlb(ctx, &space, 4).unwrap();

        assert_eq!(space.page_entry(1).page, PhysPage::InSwap);
        assert!(space.page_entry(0).is_valid());
        assert!(space.page_entry(2).is_valid());
        assert!(space.page_entry(3).is_valid());
        assert!(space.page_entry(4).is_valid());

        // Faulting page 1 back in reloads the written contents from swap,
        // even though other pages were loaded in between.
        let byte = loop {
            match machine.read_mem(PAGE_SIZE as u32, 1) {
                Ok(value) => break value as u8,
                Err(Exception::PageFault(addr)) => {
                    vm::handle_page_fault(ctx, addr).unwrap();
                }
                Err(other) => panic!("unexpected exception {:?}", other),
            }
        };
        assert_eq!(byte, 0xa1);
        assert!(space.page_entry(1).is_valid());
    });
}

#[test]
fn eviction_keeps_frame_accounting_consistent() {
    let kernel = common::boot_with_pages(4);
    kernel.run(|ctx| {
        common::install_noff(ctx, "/prog", &[], &[], 8 * PAGE_SIZE as u32);
        let space = common::attach_space(ctx, "/prog");
        assert!(space.num_pages() >= 8);

        for vpn in 0..8u32 {
            vm::update_tlb(ctx, &space, vpn).unwrap();
        }
        // Every frame is owned exactly once.
        assert_eq!(ctx.kernel().coremap().lock().len(), 4);
        assert_eq!(ctx.kernel().frames().lock().count_set(), 4);
    });
}

#[test]
fn destroying_a_space_releases_everything() {
    let kernel = common::boot_with_pages(8);
    kernel.run(|ctx| {
        common::install_noff(ctx, "/prog", &[], &[], 4 * PAGE_SIZE as u32);
        let space = common::attach_space(ctx, "/prog");
        for vpn in 0..4u32 {
            vm::update_tlb(ctx, &space, vpn).unwrap();
        }
        assert!(ctx.kernel().frames().lock().count_set() > 0);

        ctx.thread().take_space();
        space.destroy(ctx);
        assert_eq!(ctx.kernel().frames().lock().count_set(), 0);
        assert!(ctx.kernel().coremap().lock().is_empty());
        // The swap file is gone and the disk is whole again.
        assert!(ctx.kernel().fs().check(ctx));
        assert!(ctx.kernel().fs().open(ctx, "/swap.0").is_err());
    });
}

#[test]
fn faults_past_the_space_are_rejected() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        common::install_noff(ctx, "/prog", &[], &[], PAGE_SIZE as u32);
        let space = common::attach_space(ctx, "/prog");
        let way_out = (space.num_pages() as u32 + 10) * PAGE_SIZE as u32;
        assert!(vm::handle_page_fault(ctx, way_out).is_err());
    });
}
