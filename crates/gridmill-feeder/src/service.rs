//! Feeder service loop
//!
//! Keeps the shared work table stocked with unsent results. Each pass
//! walks the table, and for every EMPTY slot pulls the next unsent result
//! off the database cursor, skipping any result already cached in another
//! slot. When the cursor runs dry it restarts from zero once per pass, so
//! results inserted behind it are not orphaned.
//!
//! Operators steer a running feeder through trigger files: `quit` shuts it
//! down after the current pass, `reread_db` discards every cached slot and
//! restarts enumeration (used after mass database edits, e.g. cancelling
//! workunits).

use std::collections::VecDeque;
use std::path::Path;

use tokio::time::interval;
use tracing::{debug, info, warn};

use gridmill_sched::table::WorkTable;
use gridmill_sched::types::{ResultRow, Workunit};
use gridmill_sched::{Result, SchedDb, SlotState};

use crate::config::FeederConfig;

/// What a trigger-file check told us to do.
#[derive(Debug, PartialEq, Eq)]
enum Trigger {
    None,
    Quit,
    RereadDb,
}

pub struct FeederService<D> {
    config: FeederConfig,
    db: D,
    table: WorkTable,
    /// Highest result id handed out by the enumeration.
    cursor: u64,
}

impl<D: SchedDb> FeederService<D> {
    /// Create the shared table and stamp its header. Any scheduler attached
    /// to an older file will fail its layout check and must be restarted.
    pub fn new(config: FeederConfig, db: D) -> Result<Self> {
        let table = WorkTable::create(&config.table_path, config.capacity)?;
        info!(
            path = %config.table_path.display(),
            capacity = config.capacity,
            "Feeder initialized work table"
        );
        Ok(Self {
            config,
            db,
            table,
            cursor: 0,
        })
    }

    /// One fill pass. Returns the number of slots loaded.
    ///
    /// Database queries run with the table lock dropped; the lock is held
    /// only for the check/copy moments, so schedulers never stall behind
    /// the enumeration query.
    pub fn fill_pass(&mut self) -> Result<usize> {
        let mut loaded = 0;
        let mut restarted = false;
        let mut batch: VecDeque<ResultRow> = VecDeque::new();

        'slots: for i in 0..self.table.capacity() {
            {
                let guard = self.table.lock()?;
                if self.table.slot_state(&guard, i)? != SlotState::Empty {
                    continue;
                }
            }

            loop {
                let Some((wu, row)) = self.next_candidate(&mut batch, &mut restarted)? else {
                    break 'slots;
                };

                // Relock to fill. The slot was EMPTY when we looked; only
                // this process fills slots, but re-check rather than
                // assume.
                let guard = self.table.lock()?;
                if self.table.contains_result(&guard, row.id)? {
                    continue;
                }
                if self.table.slot_state(&guard, i)? != SlotState::Empty {
                    batch.push_front(row);
                    continue 'slots;
                }
                self.table.write_slot(&guard, i, &wu, &row)?;
                debug!(slot = i, result = row.id, workunit = wu.id, "loaded slot");
                loaded += 1;
                break;
            }
        }
        Ok(loaded)
    }

    /// Pull the next (workunit, result) candidate off the enumeration,
    /// refilling the batch from the database as needed. Never called with
    /// the table lock held.
    fn next_candidate(
        &mut self,
        batch: &mut VecDeque<ResultRow>,
        restarted: &mut bool,
    ) -> Result<Option<(Workunit, ResultRow)>> {
        loop {
            if let Some(row) = batch.pop_front() {
                match self.db.workunit(row.workunitid)? {
                    Some(wu) => return Ok(Some((wu, row))),
                    None => {
                        warn!(
                            result = row.id,
                            workunit = row.workunitid,
                            "unsent result references missing workunit, skipping"
                        );
                        continue;
                    }
                }
            }
            let next = self.db.unsent_results(self.cursor, self.config.batch_size)?;
            match next.last() {
                Some(last) => self.cursor = last.id,
                None => {
                    // Enumeration exhausted. Restart once per pass to pick
                    // up results inserted behind the cursor.
                    if *restarted || self.cursor == 0 {
                        return Ok(None);
                    }
                    self.cursor = 0;
                    *restarted = true;
                }
            }
            batch.extend(next);
        }
    }

    /// Discard every cached slot and restart enumeration from scratch.
    pub fn reread_db(&mut self) -> Result<()> {
        let guard = self.table.lock()?;
        for i in 0..self.table.capacity() {
            self.table.clear_slot(&guard, i)?;
        }
        drop(guard);
        self.cursor = 0;
        info!("cleared work table, re-enumerating from the database");
        Ok(())
    }

    /// Run until a `quit` trigger appears.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Starting feeder service"
        );
        let mut poll = interval(self.config.poll_interval);
        loop {
            poll.tick().await;

            match self.check_triggers()? {
                Trigger::Quit => {
                    info!("quit trigger received, shutting down");
                    return Ok(());
                }
                Trigger::RereadDb => self.reread_db()?,
                Trigger::None => {}
            }

            let loaded = self.fill_pass()?;
            if loaded == 0 {
                tokio::time::sleep(self.config.idle_backoff).await;
            } else {
                info!(loaded, "fill pass complete");
            }
        }
    }

    fn check_triggers(&self) -> Result<Trigger> {
        if consume_trigger(&self.config.trigger_dir.join("quit"))? {
            return Ok(Trigger::Quit);
        }
        if consume_trigger(&self.config.trigger_dir.join("reread_db"))? {
            return Ok(Trigger::RereadDb);
        }
        Ok(Trigger::None)
    }

    pub fn table(&self) -> &WorkTable {
        &self.table
    }

    pub fn db(&self) -> &D {
        &self.db
    }
}

/// If the trigger file exists, remove it and report true. Removal makes
/// each trigger one-shot.
fn consume_trigger(path: &Path) -> Result<bool> {
    if path.exists() {
        std::fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Database rows to preload, for bring-up without a SQL backend.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub workunits: Vec<Workunit>,
    #[serde(default)]
    pub results: Vec<ResultRow>,
    #[serde(default)]
    pub hosts: Vec<gridmill_sched::Host>,
}

impl SeedFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn apply(self, db: &gridmill_sched::MemDb) {
        let (nw, nr, nh) = (self.workunits.len(), self.results.len(), self.hosts.len());
        for wu in self.workunits {
            db.insert_workunit(wu);
        }
        for row in self.results {
            db.insert_result(row);
        }
        for host in self.hosts {
            db.insert_host(host);
        }
        info!(workunits = nw, results = nr, hosts = nh, "seeded database");
    }
}
