use cbin::{
    Archive, ArchiveBuilder, ArchiveError, BuilderOptions, GameRecord, GameResult, MoveToken,
};
use std::fs;
use tempfile::tempdir;

fn fixture_game(i: usize) -> GameRecord {
    GameRecord {
        white: format!("white{}", i),
        black: format!("black{}", i),
        event: "Interzonal".to_string(),
        site: "Palma".to_string(),
        date: "1970.11.09".to_string(),
        eco: "A04".to_string(),
        result: GameResult::WhiteWins,
        moves: (0..24).map(|m| MoveToken(m + i as u32)).collect(),
        tags: Vec::new(),
    }
}

fn archive_bytes(games: usize, target_block_size: usize) -> Vec<u8> {
    let mut builder = ArchiveBuilder::with_options(BuilderOptions {
        target_block_size,
        ..BuilderOptions::default()
    })
    .unwrap();
    for i in 0..games {
        builder.add_game(&fixture_game(i)).unwrap();
    }
    let mut bytes = Vec::new();
    builder.finish(&mut bytes).unwrap();
    bytes
}

#[test]
fn altered_magic_fails_to_open() {
    let mut bytes = archive_bytes(3, 1 << 20);
    bytes[0] ^= 0xff;
    match Archive::from_bytes(bytes) {
        Err(ArchiveError::BadMagic { .. }) => {}
        Err(other) => panic!("expected BadMagic, got {}", other),
        Ok(_) => panic!("corrupted magic must not open"),
    }
}

#[test]
fn future_version_fails_to_open() {
    let mut bytes = archive_bytes(3, 1 << 20);
    bytes[4..6].copy_from_slice(&7u16.to_le_bytes());
    match Archive::from_bytes(bytes) {
        Err(ArchiveError::UnsupportedVersion { found: 7 }) => {}
        Err(other) => panic!("expected UnsupportedVersion, got {}", other),
        Ok(_) => panic!("unknown version must not open"),
    }
}

#[test]
fn out_of_range_index_is_typed() {
    let archive = Archive::from_bytes(archive_bytes(4, 1 << 20)).unwrap();
    match archive.get(4) {
        Err(ArchiveError::OutOfRange { index: 4, game_count: 4 }) => {}
        other => panic!("expected OutOfRange, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn truncated_last_block_leaves_earlier_blocks_readable() {
    // enough games over a small target to force several blocks
    let bytes = archive_bytes(40, 512);
    let full = Archive::from_bytes(bytes.clone()).unwrap();
    assert!(full.block_count() >= 3);
    let last_block = full.block_count() - 1;
    let first_in_last = full.first_game_of_block(last_block);

    let dir = tempdir().unwrap();
    let path = dir.path().join("cut.cbin");
    fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

    let archive = Archive::open(&path).unwrap();
    // every block before the damage still decodes
    for k in 0..first_in_last {
        archive.get(k).unwrap();
    }
    match archive.get(first_in_last) {
        Err(ArchiveError::TruncatedArchive { .. }) => {}
        other => panic!("expected TruncatedArchive, got {:?}", other.map(|_| ())),
    }

    // iteration reports the broken block once and ends cleanly
    let mut ok = 0u64;
    let mut truncated = 0;
    for item in archive.iter() {
        match item {
            Ok(_) => ok += 1,
            Err(ArchiveError::TruncatedArchive { .. }) => truncated += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(ok, first_in_last);
    assert_eq!(truncated, 1);
}

#[test]
fn corrupt_length_prefix_is_reported_per_block() {
    let bytes = archive_bytes(40, 512);
    let full = Archive::from_bytes(bytes.clone()).unwrap();
    let target = full.descriptors()[1];

    let mut bad = bytes;
    let at = target.offset as usize;
    bad[at..at + 8].copy_from_slice(&(target.payload_len() + 3).to_le_bytes());

    let archive = Archive::from_bytes(bad).unwrap();
    archive.get(0).unwrap();
    match archive.get(full.first_game_of_block(1)) {
        Err(ArchiveError::CorruptBlock { block: 1, .. }) => {}
        other => panic!("expected CorruptBlock, got {:?}", other.map(|_| ())),
    }
    // blocks after the bad one are still addressable
    archive.get(full.first_game_of_block(2)).unwrap();
}

#[test]
fn dangling_dedup_reference_is_per_game() {
    let bytes = archive_bytes(2, 1 << 20);
    let archive = Archive::from_bytes(bytes.clone()).unwrap();
    let block0 = archive.descriptors()[0];

    // the first record starts right behind the block's length prefix and
    // opens with its white id
    let mut bad = bytes;
    let white_at = (block0.offset + 8) as usize;
    bad[white_at..white_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());

    let archive = Archive::from_bytes(bad).unwrap();
    let first = archive.get(0).unwrap();
    match first.white() {
        Err(ArchiveError::DanglingDedupReference { id: u32::MAX, .. }) => {}
        other => panic!("expected DanglingDedupReference, got {:?}", other.map(|_| ())),
    }
    // the rest of the same record still resolves
    assert_eq!(first.black().unwrap(), "black0");
    // and the neighbouring game is untouched
    assert_eq!(archive.get(1).unwrap().white().unwrap(), "white1");
}

#[test]
fn open_missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    match Archive::open(&dir.path().join("absent.cbin")) {
        Err(ArchiveError::Io { path, .. }) => {
            assert!(path.ends_with("absent.cbin"));
        }
        other => panic!("expected Io, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn metadata_cut_short_is_truncation() {
    let bytes = archive_bytes(3, 1 << 20);
    match Archive::from_bytes(bytes[..12].to_vec()) {
        Err(ArchiveError::TruncatedArchive { .. }) => {}
        other => panic!("expected TruncatedArchive, got {:?}", other.map(|_| ())),
    }
}
