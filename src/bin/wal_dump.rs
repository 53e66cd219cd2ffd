use std::sync::Arc;

use clap::Parser;
use segwal::Config;
use segwal::Snapshot;
use segwal::Wal;
use segwal::WalError;

#[derive(Clone, Debug, PartialEq, Eq, clap::Parser)]
#[clap(about = "dump the records of a WAL directory", author)]
pub struct Args {
    #[arg(value_name = "DIR")]
    dir: String,

    /// Index of the snapshot replay starts from.
    #[arg(long, default_value_t = 0)]
    index: u64,

    /// Term of the snapshot replay starts from.
    #[arg(long, default_value_t = 0)]
    term: u64,
}

fn main() -> Result<(), WalError> {
    let args = Args::parse();

    let config = Arc::new(Config::new(&args.dir));
    let snap = Snapshot {
        index: args.index,
        term: args.term,
    };

    let mut w = Wal::open_for_read(config, snap)?;
    let (metadata, state, entries) = w.read_all()?;

    println!("metadata: {:?}", String::from_utf8_lossy(&metadata));
    println!("hard state: {}", state);
    println!("entries: {}", entries.len());
    for e in &entries {
        println!("  index {:>8} term {:>4}: {} bytes", e.index, e.term, e.data.len());
    }

    w.close()?;
    Ok(())
}
