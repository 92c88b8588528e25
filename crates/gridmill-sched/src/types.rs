//! Domain records shared by the scheduler and feeder
//!
//! These mirror the database rows the scheduler actually touches. The
//! database owns them; the shared work table holds cached copies.

use serde::{Deserialize, Serialize};

/// Result lifecycle as recorded in the database.
///
/// The matching engine is the sole writer of the Unsent -> InProgress
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Inactive,
    Unsent,
    InProgress,
    Over,
}

impl ServerState {
    pub fn as_u32(self) -> u32 {
        match self {
            ServerState::Inactive => 1,
            ServerState::Unsent => 2,
            ServerState::InProgress => 4,
            ServerState::Over => 5,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(ServerState::Inactive),
            2 => Some(ServerState::Unsent),
            4 => Some(ServerState::InProgress),
            5 => Some(ServerState::Over),
            _ => None,
        }
    }
}

/// Validation outcome bookkeeping on a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ValidateState {
    #[default]
    Init,
    Valid,
    Invalid,
}

/// A unit of computation to distribute, with resource estimates and a
/// deadline policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Workunit {
    pub id: u64,
    pub appid: u64,
    pub name: String,
    /// Estimated FLOPs to complete.
    pub rsc_fpops_est: f64,
    /// Hard FLOP bound before the client aborts.
    pub rsc_fpops_bound: f64,
    /// Peak working-set bound, bytes.
    pub rsc_memory_bound: f64,
    /// Peak disk usage bound, bytes.
    pub rsc_disk_bound: f64,
    /// Max seconds from send to report deadline.
    pub delay_bound: f64,
    pub need_validate: bool,
    /// Next time the transitioner should look at this workunit.
    pub transition_time: u64,
    /// File/redundancy descriptor blob, opaque here beyond its size limit.
    pub xml_doc: String,
}

/// One host's attempt at a workunit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: u64,
    pub workunitid: u64,
    pub name: String,
    pub server_state: u32,
    pub validate_state: ValidateState,
    pub hostid: u64,
    pub userid: u64,
    pub sent_time: u64,
    pub report_deadline: u64,
}

impl Default for ServerState {
    fn default() -> Self {
        ServerState::Unsent
    }
}

impl Default for ResultRow {
    fn default() -> Self {
        Self {
            id: 0,
            workunitid: 0,
            name: String::new(),
            server_state: ServerState::Unsent.as_u32(),
            validate_state: ValidateState::Init,
            hostid: 0,
            userid: 0,
            sent_time: 0,
            report_deadline: 0,
        }
    }
}

impl ResultRow {
    pub fn state(&self) -> Option<ServerState> {
        ServerState::from_u32(self.server_state)
    }

    pub fn set_state(&mut self, s: ServerState) {
        self.server_state = s.as_u32();
    }
}

/// Volunteer host descriptor, as last reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Host {
    pub id: u64,
    /// Total RAM, bytes.
    pub m_nbytes: f64,
    /// Measured floating-point rate, FLOPS.
    pub p_fpops: f64,
    /// Fraction of wall time the client is allowed to compute.
    pub active_frac: f64,
    pub os_name: String,
    pub p_vendor: String,
    /// Results sent today, against the daily quota.
    pub nresults_today: u32,
}

impl Host {
    /// Homogeneous-redundancy equivalence: same OS and CPU vendor class.
    pub fn same_hr_class(&self, other: &Host) -> bool {
        self.os_name == other.os_name && self.p_vendor == other.p_vendor
    }
}

/// A deployed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct App {
    pub id: u64,
    pub name: String,
}

/// A published build of an application for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppVersion {
    pub id: u64,
    pub appid: u64,
    pub platform: String,
    pub version_num: u32,
    /// Oldest core client this build works with.
    pub min_core_version: u32,
}

/// The published apps and versions, loaded once at process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub apps: Vec<App>,
    pub app_versions: Vec<AppVersion>,
}

impl Catalog {
    pub fn app(&self, appid: u64) -> Option<&App> {
        self.apps.iter().find(|a| a.id == appid)
    }

    /// Latest published version of `appid` for `platform`.
    pub fn best_version(&self, appid: u64, platform: &str) -> Option<&AppVersion> {
        self.app_versions
            .iter()
            .filter(|v| v.appid == appid && v.platform == platform)
            .max_by_key(|v| v.version_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_state_codec() {
        for s in [
            ServerState::Inactive,
            ServerState::Unsent,
            ServerState::InProgress,
            ServerState::Over,
        ] {
            assert_eq!(ServerState::from_u32(s.as_u32()), Some(s));
        }
        assert_eq!(ServerState::from_u32(99), None);
    }

    #[test]
    fn test_best_version_picks_latest() {
        let catalog = Catalog {
            apps: vec![App {
                id: 1,
                name: "setiathome".into(),
            }],
            app_versions: vec![
                AppVersion {
                    id: 10,
                    appid: 1,
                    platform: "x86_64-pc-linux-gnu".into(),
                    version_num: 410,
                    min_core_version: 400,
                },
                AppVersion {
                    id: 11,
                    appid: 1,
                    platform: "x86_64-pc-linux-gnu".into(),
                    version_num: 512,
                    min_core_version: 500,
                },
            ],
        };
        let best = catalog.best_version(1, "x86_64-pc-linux-gnu").unwrap();
        assert_eq!(best.version_num, 512);
        assert!(catalog.best_version(1, "windows_x86_64").is_none());
    }

    #[test]
    fn test_hr_class() {
        let linux_amd = Host {
            os_name: "Linux".into(),
            p_vendor: "AuthenticAMD".into(),
            ..Default::default()
        };
        let linux_amd2 = linux_amd.clone();
        let win_intel = Host {
            os_name: "Windows".into(),
            p_vendor: "GenuineIntel".into(),
            ..Default::default()
        };
        assert!(linux_amd.same_hr_class(&linux_amd2));
        assert!(!linux_amd.same_hr_class(&win_intel));
    }
}
