//! gridmill-sched: scheduler work-matching engine
//!
//! Matches queued results to requesting hosts out of a shared,
//! memory-mapped work table that a separate feeder process keeps full.
//! The flow for one request:
//!
//! 1. Serialize per-host via an advisory file lock ([`hostlock`]).
//! 2. Attach to the work table, verifying its recorded layout against this
//!    binary's compiled constants ([`table`]).
//! 3. Scan the table twice, previously-bounced slots first, checking out
//!    candidate slots and committing the Unsent -> InProgress transition
//!    in the database ([`matcher`]).
//!
//! The database itself sits behind the [`db::SchedDb`] trait; [`db::MemDb`]
//! backs tests and seed harnesses.

pub mod config;
pub mod db;
pub mod error;
pub mod hostlock;
pub mod matcher;
pub mod request;
pub mod table;
pub mod types;

pub use config::SchedConfig;
pub use db::{MemDb, SchedDb};
pub use error::{Result, SchedError};
pub use matcher::{Matcher, RejectReason};
pub use request::{handle_request, AssignedWork, ClientAppVersion, UserMessage, WorkReply, WorkRequest};
pub use table::{SlotState, TableLock, WorkTable};
pub use types::{App, AppVersion, Catalog, Host, ResultRow, ServerState, Workunit};
