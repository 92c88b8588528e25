//! Feeder for the shared scheduler work table
//!
//! This crate provides a polling service that:
//! 1. Creates the memory-mapped work table at startup
//! 2. Enumerates unsent results from the database by id cursor
//! 3. Loads them into empty table slots for schedulers to hand out
//! 4. Obeys `quit` / `reread_db` trigger files
//!
//! ## Usage
//!
//! ```no_run
//! use gridmill_feeder::{FeederConfig, FeederService};
//! use gridmill_sched::MemDb;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut service = FeederService::new(FeederConfig::default(), MemDb::new())?;
//!     service.run().await
//! }
//! ```

mod config;
mod service;

pub use config::FeederConfig;
pub use service::{FeederService, SeedFile};
