use std::io::Read;

use common::Error;
use pretty_assertions::assert_eq;
use proptest::collection::vec;
use proptest::prelude::*;
use protocol::Record;
use tempfile::TempDir;

use crate::store::LEN_WIDTH;
use crate::{decode_record, Log, LogConfig};

fn small_segments() -> LogConfig {
    // Room for a handful of short records per segment, to force rollover.
    LogConfig::builder()
        .max_store_bytes(128)
        .max_index_bytes(128)
        .build()
}

#[test]
fn offsets_are_contiguous_from_initial() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig::builder().initial_offset(5).build();
    let log = Log::open(dir.path(), config).unwrap();

    for i in 0..10u64 {
        let offset = log.append(&mut Record::new(b"value".to_vec())).unwrap();
        assert_eq!(offset, 5 + i);
    }
    assert_eq!(log.lowest_offset(), 5);
    assert_eq!(log.highest_offset(), 14);
}

#[test]
fn read_out_of_range() {
    let dir = TempDir::new().unwrap();
    let log = Log::open(dir.path(), LogConfig::default()).unwrap();
    log.append(&mut Record::new(b"only".to_vec())).unwrap();

    assert!(matches!(log.read(1), Err(Error::OffsetOutOfRange(1))));
}

#[test]
fn rollover_starts_at_previous_next_offset() {
    let dir = TempDir::new().unwrap();
    let log = Log::open(dir.path(), small_segments()).unwrap();

    for _ in 0..32 {
        log.append(&mut Record::new(b"0123456789".to_vec())).unwrap();
    }

    // Every offset is still readable across the segment boundaries.
    for offset in 0..32u64 {
        let record = log.read(offset).unwrap();
        assert_eq!(record.offset, offset);
        assert_eq!(record.value, b"0123456789");
    }
    assert!(dir.path().read_dir().unwrap().count() > 2, "expected rollover");
}

#[test]
fn restart_preserves_records_and_offsets() {
    let dir = TempDir::new().unwrap();

    {
        let log = Log::open(dir.path(), small_segments()).unwrap();
        for i in 0..20u64 {
            log.append(&mut Record::new(format!("record-{i}").into_bytes()))
                .unwrap();
        }
        log.close().unwrap();
    }

    let log = Log::open(dir.path(), small_segments()).unwrap();
    assert_eq!(log.lowest_offset(), 0);
    assert_eq!(log.highest_offset(), 19);

    for i in 0..20u64 {
        let record = log.read(i).unwrap();
        assert_eq!(record.value, format!("record-{i}").into_bytes());
    }

    // Appends continue where the log left off.
    let offset = log.append(&mut Record::new(b"next".to_vec())).unwrap();
    assert_eq!(offset, 20);
}

#[test]
fn truncate_removes_whole_segments_below() {
    let dir = TempDir::new().unwrap();
    let log = Log::open(dir.path(), small_segments()).unwrap();

    for _ in 0..32 {
        log.append(&mut Record::new(b"0123456789".to_vec())).unwrap();
    }

    log.truncate(10).unwrap();

    let lowest = log.lowest_offset();
    assert!(lowest > 0, "first segment should be gone");
    assert!(matches!(log.read(0), Err(Error::OffsetOutOfRange(0))));

    // Offsets in surviving segments are still readable.
    for offset in lowest..=log.highest_offset() {
        log.read(offset).unwrap();
    }
    assert_eq!(log.highest_offset(), 31);
}

#[test]
fn truncate_everything_keeps_an_active_segment() {
    let dir = TempDir::new().unwrap();
    let log = Log::open(dir.path(), small_segments()).unwrap();

    for _ in 0..8 {
        log.append(&mut Record::new(b"0123456789".to_vec())).unwrap();
    }
    let highest = log.highest_offset();
    log.truncate(highest).unwrap();

    let offset = log.append(&mut Record::new(b"after".to_vec())).unwrap();
    assert_eq!(offset, highest + 1);
}

#[test]
fn reader_streams_every_frame_in_order() {
    let dir = TempDir::new().unwrap();
    let log = Log::open(dir.path(), small_segments()).unwrap();

    for i in 0..12u64 {
        log.append(&mut Record::new(format!("entry-{i}").into_bytes()))
            .unwrap();
    }

    let mut bytes = Vec::new();
    log.reader().read_to_end(&mut bytes).unwrap();

    // Walk the stitched stream frame by frame.
    let mut at = 0usize;
    let mut offset = 0u64;
    while at < bytes.len() {
        let mut len_buf = [0u8; LEN_WIDTH as usize];
        len_buf.copy_from_slice(&bytes[at..at + LEN_WIDTH as usize]);
        let len = u64::from_be_bytes(len_buf) as usize;
        at += LEN_WIDTH as usize;

        let record = decode_record(&bytes[at..at + len]).unwrap();
        assert_eq!(record.offset, offset);
        assert_eq!(record.value, format!("entry-{offset}").into_bytes());
        at += len;
        offset += 1;
    }
    assert_eq!(offset, 12);
}

#[test]
fn reset_to_restarts_the_offset_space() {
    let dir = TempDir::new().unwrap();
    let log = Log::open(dir.path(), LogConfig::default()).unwrap();

    log.append(&mut Record::new(b"old".to_vec())).unwrap();
    log.reset_to(42).unwrap();

    assert!(matches!(log.read(0), Err(Error::OffsetOutOfRange(0))));
    let offset = log.append(&mut Record::new(b"new".to_vec())).unwrap();
    assert_eq!(offset, 42);
    assert_eq!(log.lowest_offset(), 42);
}

#[test]
fn zero_limits_fall_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        max_store_bytes: 0,
        max_index_bytes: 0,
        initial_offset: 0,
    };
    let log = Log::open(dir.path(), config).unwrap();

    // A maxed-from-the-start segment would roll over on every append.
    for i in 0..4u64 {
        assert_eq!(log.append(&mut Record::new(b"v".to_vec())).unwrap(), i);
    }
    assert_eq!(dir.path().read_dir().unwrap().count(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reopen_round_trips_arbitrary_records(
        values in vec(vec(any::<u8>(), 0..64), 1..24),
    ) {
        let dir = TempDir::new().unwrap();

        {
            let log = Log::open(dir.path(), small_segments()).unwrap();
            for value in &values {
                log.append(&mut Record::new(value.clone())).unwrap();
            }
            log.close().unwrap();
        }

        let log = Log::open(dir.path(), small_segments()).unwrap();
        prop_assert_eq!(log.highest_offset(), values.len() as u64 - 1);
        for (i, value) in values.iter().enumerate() {
            let record = log.read(i as u64).unwrap();
            prop_assert_eq!(&record.value, value);
        }
    }
}
