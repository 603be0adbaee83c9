mod common;

use bbnand::fs::{CandidateStatus, InodeTableOffset, select_filesystem_block};
use bbnand::geometry::{MIN_IMAGE_SIZE, NUM_FS_BLOCKS};
use bbnand::{Nand, NandConfig, NandError};
use common::{FsBlockBuilder, erased_image, put_fs_block};

fn newer_corrupt_older_valid() -> Vec<u8> {
    let mut image = erased_image();
    let a = FsBlockBuilder::new(10)
        .inode(0, "newer", "sys", 1, 0x100, 1)
        .corrupt_checksum()
        .build();
    let b = FsBlockBuilder::new(9).inode(0, "older", "sys", 1, 0x100, 1).build();
    put_fs_block(&mut image, 3, &a);
    put_fs_block(&mut image, 7, &b);
    image
}

#[test]
fn test_checked_selection_prefers_valid_block() {
    let image = newer_corrupt_older_valid();
    let selection = select_filesystem_block(&image, false, InodeTableOffset::Standard).unwrap();

    assert_eq!(selection.block.seqno(), 9);
    assert_eq!(selection.block.candidate.slot, 7);
    assert!(!selection.recovered_from_corruption());
    assert_eq!(selection.block.inodes().unwrap()[0].name, "older.sys");
}

#[test]
fn test_skip_checksum_selects_newest_block() {
    let image = newer_corrupt_older_valid();
    let selection = select_filesystem_block(&image, true, InodeTableOffset::Standard).unwrap();

    assert_eq!(selection.block.seqno(), 10);
    assert_eq!(selection.block.candidate.slot, 3);
    assert!(selection.recovered_from_corruption());
    assert_eq!(selection.block.inodes().unwrap()[0].name, "newer.sys");
}

#[test]
fn test_every_candidate_is_reported() {
    let image = newer_corrupt_older_valid();
    let selection = select_filesystem_block(&image, false, InodeTableOffset::Standard).unwrap();

    assert_eq!(selection.candidates.len(), NUM_FS_BLOCKS);
    assert_eq!(selection.candidates[3].status, CandidateStatus::BadChecksum);
    assert_eq!(selection.candidates[7].status, CandidateStatus::Valid);
    assert_eq!(selection.candidates[0].status, CandidateStatus::NoMagic);
    assert_ne!(selection.candidates[3].sum, 0xCAD7);
    assert_eq!(selection.candidates[7].sum, 0xCAD7);
}

#[test]
fn test_highest_sequence_wins() {
    let mut image = erased_image();
    for (slot, seqno) in [(0, 5), (1, 100), (2, 99), (15, 7)] {
        put_fs_block(&mut image, slot, &FsBlockBuilder::new(seqno).build());
    }
    let selection = select_filesystem_block(&image, false, InodeTableOffset::Standard).unwrap();
    assert_eq!(selection.block.candidate.slot, 1);
    assert_eq!(selection.block.seqno(), 100);
}

#[test]
fn test_equal_sequence_prefers_lower_slot() {
    let mut image = erased_image();
    put_fs_block(&mut image, 4, &FsBlockBuilder::new(8).build());
    put_fs_block(&mut image, 2, &FsBlockBuilder::new(8).build());
    let selection = select_filesystem_block(&image, false, InodeTableOffset::Standard).unwrap();
    assert_eq!(selection.block.candidate.slot, 2);
}

#[test]
fn test_link_block_is_never_selected() {
    let mut image = erased_image();
    put_fs_block(&mut image, 2, &FsBlockBuilder::new(5).build());
    put_fs_block(&mut image, 3, &FsBlockBuilder::new(6).link_block().build());

    for skip_checksum in [false, true] {
        let selection =
            select_filesystem_block(&image, skip_checksum, InodeTableOffset::Standard).unwrap();
        assert_eq!(selection.block.candidate.slot, 2);
        assert_eq!(selection.block.seqno(), 5);
        assert!(selection.block.footer().unwrap().is_filesystem());
        assert_eq!(selection.candidates[3].status, CandidateStatus::LinkBlock);
        assert_eq!(selection.candidates[3].seqno, 6);
    }
}

#[test]
fn test_link_blocks_alone_are_not_a_filesystem() {
    let mut image = erased_image();
    put_fs_block(&mut image, 0, &FsBlockBuilder::new(1).link_block().build());

    assert!(matches!(
        select_filesystem_block(&image, true, InodeTableOffset::Standard),
        Err(NandError::NoValidFilesystemBlock { candidates: 16 })
    ));
}

#[test]
fn test_only_corrupt_blocks_fail_without_skip() {
    let mut image = erased_image();
    put_fs_block(&mut image, 0, &FsBlockBuilder::new(1).corrupt_checksum().build());

    assert!(matches!(
        select_filesystem_block(&image, false, InodeTableOffset::Standard),
        Err(NandError::NoValidFilesystemBlock { candidates: 16 })
    ));
    assert!(select_filesystem_block(&image, true, InodeTableOffset::Standard).is_ok());
}

#[test]
fn test_erased_image_has_no_candidate_even_with_skip() {
    let image = erased_image();
    assert!(matches!(
        select_filesystem_block(&image, true, InodeTableOffset::Standard),
        Err(NandError::NoValidFilesystemBlock { .. })
    ));
}

#[test]
fn test_short_image_marks_missing_slots() {
    let mut image = vec![0xFFu8; MIN_IMAGE_SIZE];
    put_fs_block(&mut image, 0, &FsBlockBuilder::new(1).build());

    let selection = select_filesystem_block(&image, false, InodeTableOffset::Standard).unwrap();
    assert_eq!(selection.block.candidate.slot, 0);
    assert!(
        selection.candidates[1..]
            .iter()
            .all(|c| c.status == CandidateStatus::Missing)
    );
}

#[test]
fn test_engine_surfaces_corruption_recovery() {
    let image = newer_corrupt_older_valid();

    let checked = Nand::open(image.clone(), NandConfig::default()).unwrap();
    assert!(!checked.recovered_from_corruption());
    assert_eq!(checked.selected_candidate().seqno, 9);

    let skipped = Nand::open(image, NandConfig::new().with_skip_checksum(true)).unwrap();
    assert!(skipped.recovered_from_corruption());
    assert_eq!(skipped.selected_candidate().seqno, 10);
    assert!(skipped.describe(false, false).contains("failed its checksum"));
}
