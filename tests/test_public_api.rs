//! End-to-end lifecycle tests through the public API only.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use segwal::Config;
use segwal::Entry;
use segwal::HardState;
use segwal::Snapshot;
use segwal::Wal;
use segwal::WalError;

fn test_config(dir: &tempfile::TempDir) -> Arc<Config> {
    let path = dir.path().join("wal");
    Arc::new(Config {
        dir: path.to_str().unwrap().to_string(),
        segment_size_bytes: Some(32 * 1024),
        ..Default::default()
    })
}

#[test]
fn test_full_lifecycle() -> Result<(), WalError> {
    let temp_dir = tempfile::tempdir().map_err(WalError::Io)?;
    let config = test_config(&temp_dir);

    let state = HardState {
        term: 1,
        vote: 0,
        commit: 0,
    };

    {
        let mut w = Wal::create(config.clone(), b"app=v1".to_vec())?;
        w.save(
            state,
            vec![Entry::new(1, 1, b"x"), Entry::new(1, 2, b"y")],
        )?;
        w.close()?;
    }

    segwal::verify(config.clone(), Snapshot::default())?;

    {
        let mut w = Wal::open(config.clone(), Snapshot::default())?;
        let (metadata, got_state, entries) = w.read_all()?;

        assert_eq!(b"app=v1".to_vec(), metadata);
        assert_eq!(state, got_state);
        assert_eq!(
            vec![Entry::new(1, 1, b"x"), Entry::new(1, 2, b"y")],
            entries
        );

        w.save_snapshot(Snapshot { index: 2, term: 1 })?;
        w.close()?;
    }

    // Replay anchored at the saved snapshot skips the covered entries.
    {
        let mut w = Wal::open(config.clone(), Snapshot { index: 2, term: 1 })?;
        let (_metadata, got_state, entries) = w.read_all()?;

        assert_eq!(state, got_state);
        assert!(entries.is_empty());
        w.close()?;
    }

    // A wrong term for a known snapshot index is an operator error.
    {
        let mut w = Wal::open(config, Snapshot { index: 2, term: 2 })?;
        let res = w.read_all();
        assert!(matches!(res, Err(WalError::SnapshotMismatch { .. })));
    }

    Ok(())
}
