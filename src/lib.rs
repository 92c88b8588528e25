//! gridmill: volunteer-computing middleware
//!
//! Umbrella crate re-exporting the subsystems:
//! - [`crypt`]: fixed-layout RSA keys, hex envelopes, signing and
//!   verification
//! - [`sched`]: the scheduler's work-matching engine over a shared,
//!   memory-mapped work table
//! - [`feeder`]: the service that keeps that table stocked

pub use gridmill_crypt as crypt;
pub use gridmill_feeder as feeder;
pub use gridmill_sched as sched;
