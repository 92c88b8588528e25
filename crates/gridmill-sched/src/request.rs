//! Scheduler request/reply records and the per-request pipeline
//!
//! XML transport is owned by an external utility; these are the parsed
//! forms. `handle_request` is what a CGI-style request process runs after
//! authentication: take the per-host lock, attach the shared table, run the
//! matching engine, and always produce a reply. A bad request or a missing
//! database yields a retryable message, never a crashed process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SchedConfig;
use crate::db::SchedDb;
use crate::error::{Result, SchedError};
use crate::hostlock;
use crate::matcher::Matcher;
use crate::table::WorkTable;
use crate::types::{Catalog, ResultRow, Workunit};

/// An app version the client compiled itself (anonymous platform).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAppVersion {
    pub app_name: String,
    pub version_num: u32,
}

/// One scheduler RPC, parsed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkRequest {
    pub hostid: u64,
    pub userid: u64,
    pub platform: String,
    /// Core client version, major*100 + minor.
    pub core_client_version: u32,
    /// Seconds of work the client wants.
    pub work_req_seconds: f64,
    /// Free disk the client reports, bytes.
    pub disk_available: f64,
    /// Client runs self-compiled apps; match against its capability list.
    #[serde(default)]
    pub anonymous_platform: bool,
    #[serde(default)]
    pub client_app_versions: Vec<ClientAppVersion>,
    /// Workunit names for results the host already holds.
    #[serde(default)]
    pub wus_on_host: Vec<String>,
}

/// Free-text message for the user, with a priority tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub priority: String,
    pub body: String,
}

impl UserMessage {
    pub fn low(body: impl Into<String>) -> Self {
        Self {
            priority: "low".into(),
            body: body.into(),
        }
    }

    pub fn high(body: impl Into<String>) -> Self {
        Self {
            priority: "high".into(),
            body: body.into(),
        }
    }
}

/// One committed assignment in a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedWork {
    pub workunit: Workunit,
    pub result: ResultRow,
    /// Published app version to run it with; zero for anonymous platform.
    pub app_version_id: u64,
}

/// The scheduler's answer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkReply {
    pub results: Vec<AssignedWork>,
    pub messages: Vec<UserMessage>,
    /// Seconds the client should wait before the next RPC.
    pub request_delay: f64,
    /// Distinct rejection reasons seen while scanning, for diagnostics.
    #[serde(default)]
    pub reasons: Vec<crate::matcher::RejectReason>,
}

/// Attempts before giving up on the per-host lock.
const HOST_LOCK_ATTEMPTS: u32 = 3;
const HOST_LOCK_DELAY: Duration = Duration::from_millis(100);

/// Process one authenticated work request end to end.
///
/// Infallible by design: every failure path degrades to a reply the client
/// can act on.
pub fn handle_request(
    db: &dyn SchedDb,
    catalog: &Catalog,
    config: &SchedConfig,
    request: &WorkRequest,
) -> WorkReply {
    match handle_request_inner(db, catalog, config, request) {
        Ok(reply) => reply,
        Err(SchedError::LockConflict { .. }) | Err(SchedError::Timeout { .. }) => {
            tracing::warn!(hostid = request.hostid, "concurrent RPC for host, deferring");
            WorkReply {
                messages: vec![UserMessage::low(
                    "Another scheduler request for this host is in progress; try again shortly",
                )],
                request_delay: 60.0,
                ..Default::default()
            }
        }
        Err(e) => {
            tracing::error!(hostid = request.hostid, error = %e, "request failed, reporting project down");
            WorkReply {
                messages: vec![UserMessage::high(
                    "Project is temporarily unavailable; please try again later",
                )],
                request_delay: config.maintenance_delay,
                ..Default::default()
            }
        }
    }
}

fn handle_request_inner(
    db: &dyn SchedDb,
    catalog: &Catalog,
    config: &SchedConfig,
    request: &WorkRequest,
) -> Result<WorkReply> {
    let _host_lock = hostlock::acquire(
        &config.lock_dir,
        request.hostid,
        HOST_LOCK_ATTEMPTS,
        HOST_LOCK_DELAY,
    )?;

    let Some(host) = db.host(request.hostid)? else {
        tracing::warn!(hostid = request.hostid, "unknown host in request");
        return Ok(WorkReply {
            messages: vec![UserMessage::low("This host is not registered with the project")],
            request_delay: config.retry_delay,
            ..Default::default()
        });
    };

    let mut table = WorkTable::attach(&config.table_path)?;
    let matcher = Matcher::new(db, catalog, config);
    matcher.send_work(&mut table, request, &host)
}
