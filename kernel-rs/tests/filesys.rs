//! File system scenarios: create/read-back, deferred delete, directory
//! trees, extension across the indirect boundary, and the consistency
//! check against hand-made corruption.

mod common;

use kernel::{
    error::KernelError,
    fs::FileHeader,
    param::{FREE_MAP_SECTOR, NUM_DIRECT, NUM_SECTORS, SECTOR_SIZE},
};

use rand::{Rng, SeedableRng};

/// Sectors used by a freshly formatted disk: two headers plus one data
/// sector each for the bitmap and the root directory.
const FORMAT_SECTORS: usize = 4;

#[test]
fn format_leaves_a_consistent_disk() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let free_map = ctx.kernel().fs().free_map(ctx).unwrap();
        assert_eq!(free_map.count_set(), FORMAT_SECTORS);
        assert!(ctx.kernel().fs().check(ctx));
    });
}

#[test]
fn create_write_read_back() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        fs.create(ctx, "/a", 0).unwrap();

        let file = fs.open(ctx, "/a").unwrap();
        assert_eq!(file.write(ctx, b"hello"), 5);
        fs.close(ctx, &file);

        let file = fs.open(ctx, "/a").unwrap();
        assert_eq!(file.length(ctx), 5);
        let mut buf = [0u8; 5];
        assert_eq!(file.read(ctx, &mut buf), 5);
        assert_eq!(&buf, b"hello");
        fs.close(ctx, &file);

        assert!(fs.check(ctx));
    });
}

#[test]
fn removing_an_open_file_is_deferred() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        let baseline = fs.free_map(ctx).unwrap().count_clear();

        fs.create(ctx, "/b", 0).unwrap();
        let h1 = fs.open(ctx, "/b").unwrap();
        h1.write(ctx, b"doomed");

        // The remove itself succeeds, but the data lives on for h1.
        fs.remove(ctx, "/b").unwrap();
        assert_eq!(fs.open(ctx, "/b").err(), Some(KernelError::Busy));

        // Last close reclaims everything.
        fs.close(ctx, &h1);
        assert_eq!(fs.free_map(ctx).unwrap().count_clear(), baseline);
        assert!(fs.check(ctx));

        // The name is free again.
        fs.create(ctx, "/b", 0).unwrap();
        assert!(fs.open(ctx, "/b").is_ok());
    });
}

#[test]
fn directory_tree_create_and_remove() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        let baseline = fs.free_map(ctx).unwrap().count_clear();

        fs.make_dir(ctx, "/d").unwrap();
        fs.create(ctx, "/d/x", 0).unwrap();
        fs.create(ctx, "/d/y", 0).unwrap();

        let x = fs.open(ctx, "/d/x").unwrap();
        x.write(ctx, b"payload");
        fs.close(ctx, &x);

        // A name can repeat across directories but not within one.
        assert_eq!(
            fs.create(ctx, "/d/x", 0).err(),
            Some(KernelError::AlreadyExists)
        );
        fs.create(ctx, "/x", 0).unwrap();
        fs.remove(ctx, "/x").unwrap();

        fs.remove_dir(ctx, "/d").unwrap();
        assert_eq!(fs.open(ctx, "/d/x").err(), Some(KernelError::NotFound));
        assert_eq!(fs.free_map(ctx).unwrap().count_clear(), baseline);
        assert!(fs.check(ctx));
    });
}

#[test]
fn root_cannot_be_removed() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        assert_eq!(
            ctx.kernel().fs().remove_dir(ctx, "/").err(),
            Some(KernelError::BadPath)
        );
    });
}

#[test]
fn extension_across_the_indirect_boundary() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        let before_create = fs.free_map(ctx).unwrap().count_clear();

        // Exactly the direct table's worth of data.
        let direct_bytes = (NUM_DIRECT * SECTOR_SIZE) as u32;
        fs.create(ctx, "/big", direct_bytes).unwrap();
        let after_create = fs.free_map(ctx).unwrap().count_clear();
        assert_eq!(before_create - after_create, 1 + NUM_DIRECT);

        let file = fs.open(ctx, "/big").unwrap();
        assert_eq!(file.length(ctx), direct_bytes);

        // Growing by 33 sectors forces one level-1 block and two level-2
        // blocks on top of the 33 data sectors.
        let extra = (33 * SECTOR_SIZE) as u32;
        fs.expand(ctx, file.sector(), extra).unwrap();
        let after_extend = fs.free_map(ctx).unwrap().count_clear();
        assert_eq!(after_create - after_extend, 33 + 1 + 2);
        assert_eq!(file.length(ctx), direct_bytes + extra);

        // A round trip through the second level-2 block is lossless.
        let offset = ((NUM_DIRECT + 32) * SECTOR_SIZE) as u32;
        let payload = [0xabu8; SECTOR_SIZE];
        assert_eq!(file.write_at(ctx, &payload, offset), SECTOR_SIZE);
        let mut read_back = [0u8; SECTOR_SIZE];
        assert_eq!(file.read_at(ctx, &mut read_back, offset), SECTOR_SIZE);
        assert_eq!(read_back[..], payload[..]);

        // Every reachable byte maps to a sector marked allocated.
        let header = FileHeader::fetch_from(ctx, file.sector());
        let free_map = fs.free_map(ctx).unwrap();
        for offset in (0..file.length(ctx)).step_by(SECTOR_SIZE) {
            let sector = header.byte_to_sector(ctx, offset).expect("mapped byte");
            assert!(free_map.test(sector));
        }

        fs.close(ctx, &file);
        assert!(fs.check(ctx));
    });
}

#[test]
fn create_remove_cycles_restore_the_bitmap() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        let baseline = fs.free_map(ctx).unwrap().count_clear();

        for round in 0..3 {
            fs.make_dir(ctx, "/dir").unwrap();
            for (i, size) in [0u32, 100, 5000, 20_000].iter().enumerate() {
                let path = format!("/dir/f{}", i);
                fs.create(ctx, &path, *size).unwrap();
            }
            fs.create(ctx, "/top", 777).unwrap();
            fs.remove(ctx, "/top").unwrap();
            fs.remove_dir(ctx, "/dir").unwrap();

            assert_eq!(
                fs.free_map(ctx).unwrap().count_clear(),
                baseline,
                "leak after round {}",
                round
            );
            assert!(fs.check(ctx));
        }
    });
}

#[test]
fn random_payload_round_trips() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

        fs.create(ctx, "/blob", 0).unwrap();
        let file = fs.open(ctx, "/blob").unwrap();

        let mut payload = vec![0u8; 3000];
        rng.fill(payload.as_mut_slice());
        assert_eq!(file.write_at(ctx, &payload, 0), payload.len());

        let mut read_back = vec![0u8; payload.len()];
        assert_eq!(file.read_at(ctx, &mut read_back, 0), payload.len());
        assert_eq!(read_back, payload);

        // Unaligned overwrites land exactly where asked. Bounds keep every
        // write inside the existing payload, so the model never grows.
        for _ in 0..16 {
            let at = rng.gen_range(0..2500usize);
            let len = rng.gen_range(1..300usize);
            let mut chunk = vec![0u8; len];
            rng.fill(chunk.as_mut_slice());
            assert_eq!(file.write_at(ctx, &chunk, at as u32), len);
            payload[at..at + len].copy_from_slice(&chunk);

            let mut whole = vec![0u8; payload.len()];
            assert_eq!(file.read_at(ctx, &mut whole, 0), payload.len());
            assert_eq!(whole, payload);
        }

        fs.close(ctx, &file);
        assert!(fs.check(ctx));
    });
}

#[test]
fn fsck_spots_a_stray_bitmap_bit() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        assert!(fs.check(ctx));

        // Mark an unreachable sector straight in the bitmap's data sector.
        let header = FileHeader::fetch_from(ctx, FREE_MAP_SECTOR);
        let data_sector = header.byte_to_sector(ctx, 0).unwrap();
        let mut raw = [0u8; SECTOR_SIZE];
        ctx.kernel().disk().read_sector(ctx, data_sector, &mut raw);
        raw[(NUM_SECTORS / 8) - 1] |= 0x80;
        ctx.kernel().disk().write_sector(ctx, data_sector, &raw);

        assert!(!fs.check(ctx));
    });
}

#[test]
fn failed_allocation_leaves_disk_untouched() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        let baseline = fs.free_map(ctx).unwrap().count_clear();

        // Far more than the disk holds.
        let huge = (NUM_SECTORS * SECTOR_SIZE) as u32;
        assert_eq!(fs.create(ctx, "/huge", huge).err(), Some(KernelError::NoSpace));
        assert_eq!(fs.open(ctx, "/huge").err(), Some(KernelError::NotFound));
        assert_eq!(fs.free_map(ctx).unwrap().count_clear(), baseline);
        assert!(fs.check(ctx));
    });
}

#[test]
fn name_collisions_and_missing_files() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        fs.create(ctx, "/dup", 0).unwrap();
        assert_eq!(fs.create(ctx, "/dup", 0).err(), Some(KernelError::AlreadyExists));
        assert_eq!(fs.make_dir(ctx, "/dup").err(), Some(KernelError::AlreadyExists));
        assert_eq!(fs.open(ctx, "/nope").err(), Some(KernelError::NotFound));
        assert_eq!(fs.remove(ctx, "/nope").err(), Some(KernelError::NotFound));
        assert_eq!(
            fs.create(ctx, "/nodir/x", 0).err(),
            Some(KernelError::NotFound)
        );
        assert_eq!(
            fs.create(ctx, "/waytoolongname", 0).err(),
            Some(KernelError::BadPath)
        );
    });
}

#[test]
fn files_wider_than_the_sector_cache_survive() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        fs.create(ctx, "/wide", 0).unwrap();
        let file = fs.open(ctx, "/wide").unwrap();

        // 100 data sectors: well past the cache's 64 entries, so the write
        // forces evictions and the read-back proves the write-backs landed.
        let payload: Vec<u8> = (0..100 * SECTOR_SIZE).map(|i| (i % 241) as u8).collect();
        assert_eq!(file.write_at(ctx, &payload, 0), payload.len());
        let mut read_back = vec![0u8; payload.len()];
        assert_eq!(file.read_at(ctx, &mut read_back, 0), payload.len());
        assert_eq!(read_back, payload);

        fs.close(ctx, &file);
        assert!(fs.check(ctx));
    });
}

#[test]
fn seek_positions_are_per_handle() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let fs = ctx.kernel().fs();
        fs.create(ctx, "/seek", 0).unwrap();
        let writer = fs.open(ctx, "/seek").unwrap();
        writer.write(ctx, b"0123456789");

        let reader = fs.open(ctx, "/seek").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(ctx, &mut buf), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(reader.read(ctx, &mut buf), 4);
        assert_eq!(&buf, b"4567");
        reader.seek(1);
        assert_eq!(reader.read(ctx, &mut buf), 4);
        assert_eq!(&buf, b"1234");

        fs.close(ctx, &writer);
        fs.close(ctx, &reader);
    });
}
