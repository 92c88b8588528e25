//! Feeder CLI binary
//!
//! Run with:
//! ```bash
//! cargo run -p gridmill-feeder --bin feeder -- --table ./worktab --seed seed.json
//! ```

use clap::Parser;
use gridmill_feeder::{FeederConfig, FeederService, SeedFile};
use gridmill_sched::MemDb;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gridmill-feeder")]
#[command(about = "Keep the shared work table stocked with unsent results")]
struct Args {
    /// Path of the shared work table file
    #[arg(long, default_value = "./worktab")]
    table: PathBuf,

    /// Number of slots in the table
    #[arg(long, default_value = "100")]
    capacity: u32,

    /// Unsent results fetched per database query
    #[arg(long, default_value = "100")]
    batch_size: usize,

    /// Delay between fill passes, in milliseconds
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Extra sleep after a pass that loaded nothing, in milliseconds
    #[arg(long, default_value = "5000")]
    idle_backoff_ms: u64,

    /// Directory watched for `quit` and `reread_db` trigger files
    #[arg(long, default_value = ".")]
    trigger_dir: PathBuf,

    /// JSON file of workunits/results/hosts to preload into the
    /// in-memory database
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Run one fill pass and exit
    #[arg(long)]
    one_shot: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gridmill_feeder=info".parse()?))
        .init();

    let args = Args::parse();

    let db = MemDb::new();
    if let Some(path) = &args.seed {
        SeedFile::load(path)?.apply(&db);
    }

    let config = FeederConfig {
        table_path: args.table,
        capacity: args.capacity,
        batch_size: args.batch_size,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        idle_backoff: Duration::from_millis(args.idle_backoff_ms),
        trigger_dir: args.trigger_dir,
    };

    let mut service = FeederService::new(config, db)?;
    if args.one_shot {
        let loaded = service.fill_pass()?;
        println!("Loaded {loaded} slots");
        return Ok(());
    }
    service.run().await
}
