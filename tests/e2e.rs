//! End-to-end tests for the work distribution pipeline
//!
//! Exercises the full flow: sign workunit payloads with a project key,
//! feed them into the shared table, serve a scheduler request, and verify
//! the delivered payload on the "client" side.

use std::sync::Arc;
use std::time::Duration;

use gridmill::crypt::{bridge, sign};
use gridmill::sched::{
    handle_request, Catalog, Host, MemDb, ResultRow, SchedConfig, SchedDb, ServerState, Workunit,
};
use gridmill::sched::types::{App, AppVersion};
use gridmill_feeder::{FeederConfig, FeederService};

const PLATFORM: &str = "x86_64-pc-linux-gnu";

fn catalog() -> Catalog {
    Catalog {
        apps: vec![App {
            id: 1,
            name: "gridmill_demo".into(),
        }],
        app_versions: vec![AppVersion {
            id: 10,
            appid: 1,
            platform: PLATFORM.into(),
            version_num: 100,
            min_core_version: 1,
        }],
    }
}

fn seed(db: &MemDb, id: u64, xml_doc: &str) {
    db.insert_workunit(Workunit {
        id,
        appid: 1,
        name: format!("wu_{id}"),
        rsc_fpops_est: 1.0e12,
        rsc_fpops_bound: 1.0e13,
        rsc_memory_bound: 64.0 * 1024.0 * 1024.0,
        rsc_disk_bound: 10.0 * 1024.0 * 1024.0,
        delay_bound: 86400.0,
        xml_doc: xml_doc.into(),
        ..Default::default()
    });
    db.insert_result(ResultRow {
        id,
        workunitid: id,
        name: format!("wu_{id}_0"),
        ..Default::default()
    });
}

fn host(id: u64) -> Host {
    Host {
        id,
        m_nbytes: 4.0e9,
        p_fpops: 2.0e9,
        active_frac: 0.9,
        os_name: "Linux".into(),
        p_vendor: "AuthenticAMD".into(),
        nresults_today: 0,
    }
}

fn request(hostid: u64) -> gridmill::sched::WorkRequest {
    gridmill::sched::WorkRequest {
        hostid,
        userid: 42,
        platform: PLATFORM.into(),
        core_client_version: 700,
        work_req_seconds: 7200.0,
        disk_available: 1.0e9,
        ..Default::default()
    }
}

#[test]
fn test_signed_work_distribution_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let (private_key, public_key) = bridge::generate_keypair(512).unwrap();

    // Project side: sign each workunit's descriptor before queueing it.
    let db = Arc::new(MemDb::new());
    let mut signatures = Vec::new();
    for id in 1..=3u64 {
        let xml = format!("<file_info><name>input_{id}</name></file_info>");
        signatures.push(sign::sign_string_to_hex(&private_key, &xml).unwrap());
        seed(&db, id, &xml);
    }
    db.insert_host(host(5));

    // Feeder stocks the shared table.
    let feeder_config = FeederConfig {
        table_path: dir.path().join("worktab"),
        capacity: 8,
        batch_size: 2,
        trigger_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let mut feeder = FeederService::new(feeder_config, db.clone()).unwrap();
    assert_eq!(feeder.fill_pass().unwrap(), 3);

    // Scheduler serves a client request out of the table.
    let config = SchedConfig {
        table_path: dir.path().join("worktab"),
        lock_dir: dir.path().join("locks"),
        max_results_per_reply: 2,
        ..Default::default()
    };
    let reply = handle_request(db.as_ref(), &catalog(), &config, &request(5));
    assert_eq!(reply.results.len(), 2);

    // Client side: every delivered descriptor verifies against the
    // project's public key.
    let key_text = public_key.encode_hex();
    for assigned in &reply.results {
        assert_eq!(assigned.result.state(), Some(ServerState::InProgress));
        assert_eq!(assigned.result.hostid, 5);
        let sig = &signatures[(assigned.workunit.id - 1) as usize];
        assert!(sign::verify_string2(&key_text, &assigned.workunit.xml_doc, sig).unwrap());
        // A forged payload does not.
        let forged = assigned.workunit.xml_doc.replace("input", "OUTPUT");
        assert!(!sign::verify_string2(&key_text, &forged, sig).unwrap());
    }

    // Database state and quota accounting reflect the sends.
    assert_eq!(db.host(5).unwrap().unwrap().nresults_today, 2);
    let unsent: Vec<u64> = db
        .unsent_results(0, 10)
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(unsent.len(), 1);

    // The feeder backfills the two emptied slots with nothing new to
    // offer, and a second request drains the last result.
    assert_eq!(feeder.fill_pass().unwrap(), 0);
    let reply = handle_request(db.as_ref(), &catalog(), &config, &request(5));
    assert_eq!(reply.results.len(), 1);
}

#[test]
fn test_empty_table_yields_retryable_reply() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(MemDb::new());
    db.insert_host(host(5));

    let feeder_config = FeederConfig {
        table_path: dir.path().join("worktab"),
        capacity: 4,
        trigger_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let mut feeder = FeederService::new(feeder_config, db.clone()).unwrap();
    assert_eq!(feeder.fill_pass().unwrap(), 0);

    let config = SchedConfig {
        table_path: dir.path().join("worktab"),
        lock_dir: dir.path().join("locks"),
        ..Default::default()
    };
    let reply = handle_request(db.as_ref(), &catalog(), &config, &request(5));
    assert!(reply.results.is_empty());
    assert!(!reply.messages.is_empty());
    assert_eq!(reply.request_delay, config.retry_delay);
}

#[test]
fn test_key_files_round_trip_through_signing() {
    let dir = tempfile::tempdir().unwrap();
    let (private_key, public_key) = bridge::generate_keypair(512).unwrap();
    let priv_path = dir.path().join("upload_private");
    let pub_path = dir.path().join("upload_public");
    private_key.write_file(&priv_path).unwrap();
    public_key.write_file(&pub_path).unwrap();

    let data_path = dir.path().join("payload.bin");
    std::fs::write(&data_path, b"deterministic payload contents").unwrap();

    let loaded_priv = gridmill::crypt::FixedPrivateKey::read_file(&priv_path).unwrap();
    let loaded_pub = gridmill::crypt::FixedPublicKey::read_file(&pub_path).unwrap();
    let signature = sign::sign_file(&loaded_priv, &data_path).unwrap();
    assert!(sign::verify_file(&loaded_pub, &data_path, &signature).unwrap());

    std::fs::write(&data_path, b"deterministic payload contents!").unwrap();
    assert!(!sign::verify_file(&loaded_pub, &data_path, &signature).unwrap());
}

#[tokio::test]
async fn test_feeder_quit_trigger_stops_service() {
    let dir = tempfile::tempdir().unwrap();
    let feeder_config = FeederConfig {
        table_path: dir.path().join("worktab"),
        capacity: 2,
        poll_interval: Duration::from_millis(10),
        idle_backoff: Duration::from_millis(10),
        trigger_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let mut feeder = FeederService::new(feeder_config, Arc::new(MemDb::new())).unwrap();
    std::fs::write(dir.path().join("quit"), b"").unwrap();

    tokio::time::timeout(Duration::from_secs(5), feeder.run())
        .await
        .expect("feeder did not honor quit trigger")
        .unwrap();
    assert!(!dir.path().join("quit").exists());
}
