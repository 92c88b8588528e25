//! Database interface
//!
//! The SQL layer is an external collaborator: this trait is its contract as
//! the scheduler sees it, an integer-keyed CRUD store plus the handful of
//! queries the matching engine needs. [`MemDb`] implements it in memory for
//! tests and the feeder's seed harness. All failures surface as the opaque
//! [`SchedError::Database`] variant.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, SchedError};
use crate::types::{Host, ResultRow, ServerState, Workunit};

pub trait SchedDb: Send + Sync {
    fn workunit(&self, id: u64) -> Result<Option<Workunit>>;

    fn result(&self, id: u64) -> Result<Option<ResultRow>>;

    fn update_result(&self, row: &ResultRow) -> Result<()>;

    fn host(&self, id: u64) -> Result<Option<Host>>;

    fn update_host(&self, host: &Host) -> Result<()>;

    /// Unsent results with id greater than `after_id`, ascending, at most
    /// `limit`. The id cursor makes the enumeration restartable.
    fn unsent_results(&self, after_id: u64, limit: usize) -> Result<Vec<ResultRow>>;

    /// How many results of this workunit are assigned to this user, in any
    /// state past Unsent.
    fn count_user_results(&self, workunitid: u64, userid: u64) -> Result<u64>;

    /// Hosts currently holding a sent or in-progress result of this
    /// workunit.
    fn hosts_with_result(&self, workunitid: u64) -> Result<Vec<u64>>;
}

/// A shared handle is as good as the store itself; lets the feeder and a
/// scheduler run against one in-memory database.
impl<D: SchedDb + ?Sized> SchedDb for Arc<D> {
    fn workunit(&self, id: u64) -> Result<Option<Workunit>> {
        (**self).workunit(id)
    }

    fn result(&self, id: u64) -> Result<Option<ResultRow>> {
        (**self).result(id)
    }

    fn update_result(&self, row: &ResultRow) -> Result<()> {
        (**self).update_result(row)
    }

    fn host(&self, id: u64) -> Result<Option<Host>> {
        (**self).host(id)
    }

    fn update_host(&self, host: &Host) -> Result<()> {
        (**self).update_host(host)
    }

    fn unsent_results(&self, after_id: u64, limit: usize) -> Result<Vec<ResultRow>> {
        (**self).unsent_results(after_id, limit)
    }

    fn count_user_results(&self, workunitid: u64, userid: u64) -> Result<u64> {
        (**self).count_user_results(workunitid, userid)
    }

    fn hosts_with_result(&self, workunitid: u64) -> Result<Vec<u64>> {
        (**self).hosts_with_result(workunitid)
    }
}

/// In-memory [`SchedDb`] backed by mutex-guarded maps.
#[derive(Default)]
pub struct MemDb {
    inner: Mutex<MemDbInner>,
}

#[derive(Default)]
struct MemDbInner {
    workunits: BTreeMap<u64, Workunit>,
    results: BTreeMap<u64, ResultRow>,
    hosts: BTreeMap<u64, Host>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_workunit(&self, wu: Workunit) {
        self.lock().workunits.insert(wu.id, wu);
    }

    pub fn insert_result(&self, row: ResultRow) {
        self.lock().results.insert(row.id, row);
    }

    pub fn insert_host(&self, host: Host) {
        self.lock().hosts.insert(host.id, host);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemDbInner> {
        // A poisoned map means a panicking test, not corrupt data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SchedDb for MemDb {
    fn workunit(&self, id: u64) -> Result<Option<Workunit>> {
        Ok(self.lock().workunits.get(&id).cloned())
    }

    fn result(&self, id: u64) -> Result<Option<ResultRow>> {
        Ok(self.lock().results.get(&id).cloned())
    }

    fn update_result(&self, row: &ResultRow) -> Result<()> {
        let mut inner = self.lock();
        if !inner.results.contains_key(&row.id) {
            return Err(SchedError::Database(format!(
                "result {} does not exist",
                row.id
            )));
        }
        inner.results.insert(row.id, row.clone());
        Ok(())
    }

    fn host(&self, id: u64) -> Result<Option<Host>> {
        Ok(self.lock().hosts.get(&id).cloned())
    }

    fn update_host(&self, host: &Host) -> Result<()> {
        let mut inner = self.lock();
        if !inner.hosts.contains_key(&host.id) {
            return Err(SchedError::Database(format!(
                "host {} does not exist",
                host.id
            )));
        }
        inner.hosts.insert(host.id, host.clone());
        Ok(())
    }

    fn unsent_results(&self, after_id: u64, limit: usize) -> Result<Vec<ResultRow>> {
        let inner = self.lock();
        Ok(inner
            .results
            .range(after_id + 1..)
            .filter(|(_, r)| r.state() == Some(ServerState::Unsent))
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn count_user_results(&self, workunitid: u64, userid: u64) -> Result<u64> {
        let inner = self.lock();
        Ok(inner
            .results
            .values()
            .filter(|r| {
                r.workunitid == workunitid
                    && r.userid == userid
                    && r.state() != Some(ServerState::Unsent)
            })
            .count() as u64)
    }

    fn hosts_with_result(&self, workunitid: u64) -> Result<Vec<u64>> {
        let inner = self.lock();
        Ok(inner
            .results
            .values()
            .filter(|r| {
                r.workunitid == workunitid
                    && matches!(
                        r.state(),
                        Some(ServerState::InProgress) | Some(ServerState::Over)
                    )
            })
            .map(|r| r.hostid)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsent(id: u64, wuid: u64) -> ResultRow {
        ResultRow {
            id,
            workunitid: wuid,
            name: format!("wu_{wuid}_{id}"),
            ..Default::default()
        }
    }

    #[test]
    fn test_unsent_cursor_is_restartable() {
        let db = MemDb::new();
        for id in 1..=5 {
            db.insert_result(unsent(id, id));
        }
        let mut sent = db.result(3).unwrap().unwrap();
        sent.set_state(ServerState::InProgress);
        db.update_result(&sent).unwrap();

        let first = db.unsent_results(0, 2).unwrap();
        assert_eq!(first.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        let next = db.unsent_results(2, 10).unwrap();
        assert_eq!(next.iter().map(|r| r.id).collect::<Vec<_>>(), vec![4, 5]);
        // Restart from zero sees the full set again.
        assert_eq!(db.unsent_results(0, 10).unwrap().len(), 4);
    }

    #[test]
    fn test_update_missing_result_is_database_error() {
        let db = MemDb::new();
        let err = db.update_result(&unsent(7, 7)).unwrap_err();
        assert!(matches!(err, SchedError::Database(_)));
    }

    #[test]
    fn test_hosts_with_result_filters_state() {
        let db = MemDb::new();
        let mut a = unsent(1, 42);
        a.hostid = 100;
        a.set_state(ServerState::InProgress);
        let mut b = unsent(2, 42);
        b.hostid = 200;
        let mut c = unsent(3, 42);
        c.hostid = 300;
        c.set_state(ServerState::Over);
        db.insert_result(a);
        db.insert_result(b);
        db.insert_result(c);

        let mut hosts = db.hosts_with_result(42).unwrap();
        hosts.sort();
        assert_eq!(hosts, vec![100, 300]);
    }

    #[test]
    fn test_count_user_results() {
        let db = MemDb::new();
        let mut r = unsent(1, 9);
        r.userid = 55;
        r.set_state(ServerState::InProgress);
        db.insert_result(r);
        db.insert_result(unsent(2, 9));

        assert_eq!(db.count_user_results(9, 55).unwrap(), 1);
        assert_eq!(db.count_user_results(9, 56).unwrap(), 0);
    }
}
