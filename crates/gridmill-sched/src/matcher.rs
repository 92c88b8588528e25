//! Work matching engine
//!
//! One invocation per scheduler request. Two full passes over the shared
//! table: pass 1 retries slots other hosts found infeasible, pass 2 takes
//! anything PRESENT. Each candidate slot is CHECKED_OUT under the table
//! lock, evaluated without it, then either committed (slot goes EMPTY and
//! the database row flips Unsent -> InProgress after a confirming re-read)
//! or restored to PRESENT. A slot is never left CHECKED_OUT across loop
//! iterations.
//!
//! Infeasibility is data, not an error: feasibility failures bump the
//! slot's counter and are aggregated into one message when the reply ends
//! up empty. Deduplication and core-version failures are the client's
//! circumstance, not the workunit's, and do not bump the counter.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::SchedConfig;
use crate::db::SchedDb;
use crate::error::Result;
use crate::request::{AssignedWork, UserMessage, WorkReply, WorkRequest};
use crate::table::{SlotState, WorkTable};
use crate::types::{Host, ResultRow, ServerState, Workunit};

/// Floor applied to a host's reported memory, so zero-reporting hosts are
/// not infeasible for everything.
const MIN_HOST_MEMORY: f64 = 32.0 * 1024.0 * 1024.0;

/// Floor applied to the measured FLOP rate.
const MIN_HOST_FPOPS: f64 = 1.0e6;

/// Floor applied to the active fraction.
const MIN_ACTIVE_FRAC: f64 = 0.1;

/// Why a slot could not be sent to this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RejectReason {
    NoAppVersion,
    InsufficientDisk,
    InsufficientMemory,
    SlowHost,
    HomogeneousRedundancy,
    OutdatedClient,
    QuotaExceeded,
}

impl RejectReason {
    pub fn message(self) -> &'static str {
        match self {
            RejectReason::NoAppVersion => "no app version is available for your platform",
            RejectReason::InsufficientDisk => "insufficient disk space",
            RejectReason::InsufficientMemory => "insufficient memory",
            RejectReason::SlowHost => "your host is too slow to finish work before its deadline",
            RejectReason::HomogeneousRedundancy => {
                "work is reserved for hosts of a matching OS/CPU class"
            }
            RejectReason::OutdatedClient => "your core client is too old; please upgrade",
            RejectReason::QuotaExceeded => "daily result quota exceeded",
        }
    }
}

/// Estimated wall-clock seconds for this host to finish the workunit.
pub fn estimated_wallclock(wu: &Workunit, host: &Host) -> f64 {
    let fpops = host.p_fpops.max(MIN_HOST_FPOPS);
    let active = host.active_frac.max(MIN_ACTIVE_FRAC);
    (wu.rsc_fpops_est / fpops) / active
}

/// Outcome of evaluating one slot against one request.
enum Decision {
    Send {
        app_version_id: u64,
        est_seconds: f64,
    },
    Reject {
        reason: Option<RejectReason>,
        count_infeasible: bool,
    },
}

/// Mutable scan bookkeeping for one request.
struct ScanCtx {
    seconds_left: f64,
    disk_left: f64,
    quota_left: u32,
    /// Workunits already chosen for this reply.
    wus_in_reply: HashSet<u64>,
    reasons: HashSet<RejectReason>,
    assigned: Vec<AssignedWork>,
}

impl ScanCtx {
    fn new(request: &WorkRequest, host: &Host, config: &SchedConfig) -> Self {
        Self {
            seconds_left: request.work_req_seconds,
            disk_left: request.disk_available,
            quota_left: config
                .daily_result_quota
                .saturating_sub(host.nresults_today),
            wus_in_reply: HashSet::new(),
            reasons: HashSet::new(),
            assigned: Vec::new(),
        }
    }

    fn done(&self, config: &SchedConfig) -> bool {
        self.seconds_left <= 0.0
            || self.disk_left <= 0.0
            || self.assigned.len() >= config.max_results_per_reply
            || self.quota_left == 0
    }
}

pub struct Matcher<'a> {
    db: &'a dyn SchedDb,
    catalog: &'a crate::types::Catalog,
    config: &'a SchedConfig,
}

impl<'a> Matcher<'a> {
    pub fn new(
        db: &'a dyn SchedDb,
        catalog: &'a crate::types::Catalog,
        config: &'a SchedConfig,
    ) -> Self {
        Self {
            db,
            catalog,
            config,
        }
    }

    /// Run both passes and build the reply.
    pub fn send_work(
        &self,
        table: &mut WorkTable,
        request: &WorkRequest,
        host: &Host,
    ) -> Result<WorkReply> {
        let mut ctx = ScanCtx::new(request, host, self.config);

        if ctx.quota_left == 0 {
            ctx.reasons.insert(RejectReason::QuotaExceeded);
        } else {
            self.scan_pass(table, &mut ctx, request, host, true)?;
            if !ctx.done(self.config) {
                self.scan_pass(table, &mut ctx, request, host, false)?;
            }
        }

        let sent = ctx.assigned.len();
        if sent > 0 {
            let mut updated = host.clone();
            updated.nresults_today += sent as u32;
            self.db.update_host(&updated)?;
        }

        tracing::info!(
            hostid = host.id,
            sent,
            reasons = ?ctx.reasons,
            "work request processed"
        );

        let mut reply = WorkReply {
            results: ctx.assigned,
            ..Default::default()
        };
        let mut reasons: Vec<RejectReason> = ctx.reasons.into_iter().collect();
        reasons.sort();
        if reply.results.is_empty() {
            let mut body = String::from("No work sent");
            for reason in &reasons {
                body.push_str("; ");
                body.push_str(reason.message());
            }
            reply.messages.push(UserMessage::low(body));
            reply.request_delay = self.config.retry_delay;
        }
        reply.reasons = reasons;
        Ok(reply)
    }

    /// One pass over the table. Pass 1 (`infeasible_only`) visits only
    /// slots some other host already bounced.
    fn scan_pass(
        &self,
        table: &mut WorkTable,
        ctx: &mut ScanCtx,
        request: &WorkRequest,
        host: &Host,
        infeasible_only: bool,
    ) -> Result<()> {
        for i in 0..table.capacity() {
            if ctx.done(self.config) {
                break;
            }

            // Check out the slot, copying its records, in one short
            // critical section.
            let taken = {
                let guard = table.lock()?;
                if table.slot_state(&guard, i)? != SlotState::Present {
                    None
                } else if infeasible_only && table.infeasible_count(&guard, i)? == 0 {
                    None
                } else {
                    table.set_slot_state(&guard, i, SlotState::CheckedOut)?;
                    Some(table.read_slot(&guard, i)?)
                }
            };
            let Some((wu, res)) = taken else {
                continue;
            };

            match self.evaluate(&wu, request, host, ctx)? {
                Decision::Send {
                    app_version_id,
                    est_seconds,
                } => {
                    self.commit(table, i, &wu, &res, request, host, ctx, app_version_id, est_seconds)?;
                }
                Decision::Reject {
                    reason,
                    count_infeasible,
                } => {
                    if let Some(r) = reason {
                        ctx.reasons.insert(r);
                    }
                    let guard = table.lock()?;
                    table.set_slot_state(&guard, i, SlotState::Present)?;
                    if count_infeasible {
                        table.bump_infeasible(&guard, i)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The per-slot decision sequence; short-circuits on the first failing
    /// check.
    fn evaluate(
        &self,
        wu: &Workunit,
        request: &WorkRequest,
        host: &Host,
        ctx: &ScanCtx,
    ) -> Result<Decision> {
        // Disk, against the running budget.
        if wu.rsc_disk_bound > ctx.disk_left {
            return Ok(Decision::Reject {
                reason: Some(RejectReason::InsufficientDisk),
                count_infeasible: true,
            });
        }

        // One result per workunit per reply, and nothing the host
        // already holds. Not the workunit's fault: no counter bump.
        if ctx.wus_in_reply.contains(&wu.id) || request.wus_on_host.iter().any(|n| n == &wu.name) {
            return Ok(Decision::Reject {
                reason: None,
                count_infeasible: false,
            });
        }

        // Memory and deadline feasibility.
        if wu.rsc_memory_bound > host.m_nbytes.max(MIN_HOST_MEMORY) {
            return Ok(Decision::Reject {
                reason: Some(RejectReason::InsufficientMemory),
                count_infeasible: true,
            });
        }
        let est_seconds = estimated_wallclock(wu, host);
        if est_seconds > wu.delay_bound {
            return Ok(Decision::Reject {
                reason: Some(RejectReason::SlowHost),
                count_infeasible: true,
            });
        }

        // App version resolution.
        let app_version_id = if request.anonymous_platform {
            let app = self.catalog.app(wu.appid);
            let capable = app.is_some_and(|app| {
                request
                    .client_app_versions
                    .iter()
                    .any(|v| v.app_name == app.name)
            });
            if !capable {
                return Ok(Decision::Reject {
                    reason: Some(RejectReason::NoAppVersion),
                    count_infeasible: true,
                });
            }
            0
        } else {
            match self.catalog.best_version(wu.appid, &request.platform) {
                Some(av) => {
                    // Core client compatibility. A client-upgrade
                    // issue, not a workunit issue: no counter bump.
                    if av.min_core_version > request.core_client_version {
                        return Ok(Decision::Reject {
                            reason: Some(RejectReason::OutdatedClient),
                            count_infeasible: false,
                        });
                    }
                    av.id
                }
                None => {
                    return Ok(Decision::Reject {
                        reason: Some(RejectReason::NoAppVersion),
                        count_infeasible: true,
                    });
                }
            }
        };

        // Optional one-result-per-user-per-workunit.
        if self.config.one_result_per_user_per_wu
            && self.db.count_user_results(wu.id, request.userid)? > 0
        {
            return Ok(Decision::Reject {
                reason: None,
                count_infeasible: true,
            });
        }

        // Optional homogeneous redundancy.
        if self.config.homogeneous_redundancy {
            for other_id in self.db.hosts_with_result(wu.id)? {
                if other_id == host.id {
                    continue;
                }
                if let Some(other) = self.db.host(other_id)? {
                    if !host.same_hr_class(&other) {
                        return Ok(Decision::Reject {
                            reason: Some(RejectReason::HomogeneousRedundancy),
                            count_infeasible: true,
                        });
                    }
                }
            }
        }

        Ok(Decision::Send {
            app_version_id,
            est_seconds,
        })
    }

    /// Commit one assignment: release the slot, confirm the row is still
    /// Unsent, stamp and persist it, then account the budgets.
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        table: &mut WorkTable,
        index: u32,
        wu: &Workunit,
        res: &ResultRow,
        request: &WorkRequest,
        host: &Host,
        ctx: &mut ScanCtx,
        app_version_id: u64,
        est_seconds: f64,
    ) -> Result<()> {
        // Release the slot first, regardless of outcome, so the feeder can
        // refill it.
        {
            let guard = table.lock()?;
            table.clear_slot(&guard, index)?;
        }

        // Re-read: another process may have sent this result already.
        let Some(mut row) = self.db.result(res.id)? else {
            tracing::warn!(result = res.id, "cached result vanished from database");
            return Ok(());
        };
        if row.state() != Some(ServerState::Unsent) {
            tracing::info!(
                result = row.id,
                state = row.server_state,
                "lost send race, skipping"
            );
            return Ok(());
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        row.set_state(ServerState::InProgress);
        row.hostid = host.id;
        row.userid = request.userid;
        row.sent_time = now;
        row.report_deadline = now + wu.delay_bound as u64;
        self.db.update_result(&row)?;

        ctx.seconds_left -= est_seconds;
        ctx.disk_left -= wu.rsc_disk_bound;
        ctx.quota_left = ctx.quota_left.saturating_sub(1);
        ctx.wus_in_reply.insert(wu.id);

        tracing::info!(
            result = row.id,
            workunit = wu.id,
            hostid = host.id,
            deadline = row.report_deadline,
            "sent result"
        );

        ctx.assigned.push(AssignedWork {
            workunit: wu.clone(),
            result: row,
            app_version_id,
        });
        Ok(())
    }
}
