use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::SyncSender;
use std::thread::JoinHandle;

use log::info;

use crate::file_lock::LockedFile;
use crate::segment::preallocate;

/// Keeps one preallocated, locked, zeroed temp segment ready at all times,
/// so a segment cut never stalls on allocation.
///
/// The producer thread runs one allocation ahead and parks on a rendezvous
/// channel until the consumer takes the file. Dropping the pipeline shuts
/// the producer down and removes the temp file nobody consumed.
#[derive(Debug)]
pub(crate) struct FilePipeline {
    rx: Option<Receiver<Result<LockedFile, io::Error>>>,
    handle: Option<JoinHandle<()>>,
}

impl FilePipeline {
    pub(crate) fn new(dir: PathBuf, size: u64) -> Self {
        let (tx, rx) = mpsc::sync_channel(0);

        let handle = std::thread::Builder::new()
            .name("wal_file_pipeline".to_string())
            .spawn(move || Self::run(dir, size, tx))
            .expect("Failed to start file pipeline thread");

        Self {
            rx: Some(rx),
            handle: Some(handle),
        }
    }

    /// Takes the ready temp segment, blocking while the producer finishes
    /// it.
    pub(crate) fn open(&mut self) -> Result<LockedFile, io::Error> {
        let Some(rx) = self.rx.as_ref() else {
            return Err(io::Error::other("file pipeline is closed"));
        };

        rx.recv()
            .map_err(|_| io::Error::other("file pipeline worker is gone"))?
    }

    fn run(dir: PathBuf, size: u64, tx: SyncSender<Result<LockedFile, io::Error>>) {
        let mut count: u64 = 0;

        loop {
            let res = Self::alloc(&dir, size, count);
            count += 1;
            let failed = res.is_err();

            if let Err(mpsc::SendError(unsent)) = tx.send(res) {
                // Consumer is gone; remove the temp file nobody will take.
                if let Ok(lf) = unsent {
                    let path = lf.path().to_path_buf();
                    drop(lf);
                    let _ = fs::remove_file(path);
                }
                info!("file pipeline closed");
                return;
            }

            if failed {
                return;
            }
        }
    }

    /// Creates, locks, preallocates and zeroes the next temp segment.
    fn alloc(dir: &Path, size: u64, count: u64) -> Result<LockedFile, io::Error> {
        // Alternate between two names: by the time a name recurs, the
        // previously handed-out temp file has been renamed or removed.
        let path = dir.join(format!("{}.tmp", count % 2));
        if path.exists() {
            fs::remove_file(&path)?;
        }

        let lf = LockedFile::create(&path)?;
        preallocate(lf.file(), size)?;

        Ok(lf)
    }
}

impl Drop for FilePipeline {
    fn drop(&mut self) {
        // Dropping the receiver fails the producer's pending send, which
        // triggers its cleanup and exit.
        self.rx.take();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;

    use crate::segment::pipeline::FilePipeline;

    #[test]
    fn test_pipeline_produces_preallocated_segments() -> Result<(), io::Error> {
        let temp_dir = tempfile::tempdir()?;
        let dir = temp_dir.path().to_path_buf();

        let mut fp = FilePipeline::new(dir.clone(), 4096);

        let first = fp.open()?;
        assert_eq!("0.tmp", first.file_name());
        assert_eq!(4096, first.file().metadata()?.len());

        // The consumer renames the temp file away, as a segment cut does.
        let renamed = dir.join("renamed.wal");
        fs::rename(first.path(), &renamed)?;
        drop(first);

        let second = fp.open()?;
        assert_eq!("1.tmp", second.file_name());
        drop(second);

        drop(fp);

        // The producer removed its in-flight temp file on shutdown; the
        // files already handed out stay behind.
        assert!(!dir.join("0.tmp").exists());
        assert!(dir.join("1.tmp").exists());
        assert!(renamed.exists());

        Ok(())
    }
}
