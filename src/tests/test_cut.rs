use pretty_assertions::assert_eq;

use crate::segment::name::is_valid_seq;
use crate::segment::name::parse_segment_file_name;
use crate::tests::context::TestContext;
use crate::verify;
use crate::BackendKind;
use crate::Entry;
use crate::HardState;
use crate::Snapshot;
use crate::WalError;

fn st(term: u64, commit: u64) -> HardState {
    HardState {
        term,
        vote: 0,
        commit,
    }
}

/// Fills segments past the size threshold and checks the rollover: canonical
/// successor names, a CRC chain that survives the boundary, and a replay
/// that sees every entry.
#[test]
fn test_cut_rolls_to_new_segments() -> Result<(), WalError> {
    let mut ctx = TestContext::new()?;
    ctx.config.segment_size_bytes = Some(512);

    let data = [7u8; 100];

    {
        let mut w = ctx.create_wal(b"meta")?;
        for i in 1..=8u64 {
            w.save(st(1, 0), vec![Entry::new(1, i, data.as_slice())])?;
        }
        w.close()?;
    }

    let names = ctx.list_dir()?;
    assert!(names.len() >= 2, "expected cuts, got {:?}", names);
    assert!(is_valid_seq(&names));

    // First indexes are positioned one past the predecessor's last entry,
    // so they never decrease.
    let mut prev_first = 0;
    for name in &names {
        let (_seq, first_index) = parse_segment_file_name(name)?;
        assert!(first_index >= prev_first);
        assert!(first_index <= 9, "first index within the written range");
        prev_first = first_index;
    }

    // Replay crosses every segment boundary on one CRC chain.
    verify(ctx.arc_config(), Snapshot::default())?;

    let mut w = ctx.open_wal(Snapshot::default())?;
    let (metadata, state, entries) = w.read_all()?;

    assert_eq!(b"meta".to_vec(), metadata);
    assert_eq!(st(1, 0), state);
    assert_eq!(8, entries.len());
    for (i, e) in entries.iter().enumerate() {
        assert_eq!(Entry::new(1, i as u64 + 1, data.as_slice()), *e);
    }

    assert_eq!(names.len(), w.locks.len());

    // Appending keeps working in the newest segment.
    w.save(st(1, 0), vec![Entry::new(1, 9, b"tail")])?;
    w.close()?;

    Ok(())
}

#[test]
fn test_release_lock_to() -> Result<(), WalError> {
    let mut ctx = TestContext::new()?;
    ctx.config.segment_size_bytes = Some(512);

    {
        let mut w = ctx.create_wal(b"m")?;
        let data = [7u8; 100];
        for i in 1..=8u64 {
            w.save(st(1, 0), vec![Entry::new(1, i, data.as_slice())])?;
        }
        w.close()?;
    }

    let names = ctx.list_dir()?;
    assert!(names.len() >= 3, "expected several segments, got {:?}", names);

    let (_seq, newest_first) = parse_segment_file_name(names.last().unwrap())?;

    let mut w = ctx.open_wal(Snapshot::default())?;
    w.read_all()?;
    assert_eq!(names.len(), w.locks.len());

    // Releasing below index 1 keeps everything: segment 0 covers it.
    w.release_lock_to(1)?;
    assert_eq!(names.len(), w.locks.len());

    // Releasing to the newest segment's first index keeps that segment
    // and the one before it, which still covers the range below.
    w.release_lock_to(newest_first)?;
    assert_eq!(2, w.locks.len());
    let (_seq, kept_first) = parse_segment_file_name(&w.locks[0].file_name())?;
    assert!(kept_first < newest_first);

    // Releasing past the log keeps only the tail.
    w.release_lock_to(u64::MAX)?;
    assert_eq!(1, w.locks.len());

    w.close()?;

    // The released files stayed on disk; only the locks are gone.
    assert_eq!(names, ctx.list_dir()?);

    Ok(())
}

#[test]
fn test_pool_backend_roundtrip() -> Result<(), WalError> {
    let mut ctx = TestContext::new()?;
    ctx.config.backend = Some(BackendKind::Pool);

    {
        let mut w = ctx.create_wal(b"pool")?;
        w.save(
            st(1, 0),
            vec![Entry::new(1, 1, b"x"), Entry::new(1, 2, b"y")],
        )?;
        w.close()?;
    }

    let mut w = ctx.open_wal(Snapshot::default())?;
    let (metadata, state, entries) = w.read_all()?;

    assert_eq!(b"pool".to_vec(), metadata);
    assert_eq!(st(1, 0), state);
    assert_eq!(
        vec![Entry::new(1, 1, b"x"), Entry::new(1, 2, b"y")],
        entries
    );

    w.save(st(2, 1), vec![Entry::new(2, 3, b"z")])?;
    w.close()?;

    let mut w = ctx.open_wal(Snapshot::default())?;
    let (_metadata, state, entries) = w.read_all()?;
    assert_eq!(st(2, 1), state);
    assert_eq!(3, entries.len());

    w.close()?;
    Ok(())
}

#[test]
fn test_pool_backend_cut() -> Result<(), WalError> {
    let mut ctx = TestContext::new()?;
    ctx.config.segment_size_bytes = Some(512);
    ctx.config.backend = Some(BackendKind::Pool);

    {
        let mut w = ctx.create_wal(b"pool")?;
        let data = [9u8; 100];
        for i in 1..=6u64 {
            w.save(st(1, 0), vec![Entry::new(1, i, data.as_slice())])?;
        }
        w.close()?;
    }

    let names = ctx.list_dir()?;
    assert!(names.len() >= 2, "expected cuts, got {:?}", names);

    verify(ctx.arc_config(), Snapshot::default())?;

    let mut w = ctx.open_wal(Snapshot::default())?;
    let (_metadata, _state, entries) = w.read_all()?;
    assert_eq!(6, entries.len());

    w.close()?;
    Ok(())
}
