//! Log shipping rollout and removal

use console_api::Severity;

use clusterctl::orchestrator::OrchestratorOptions;
use clusterctl::storage::settings::OfflineMissingAgent;
use clusterctl::storage::store::{ConfigStore, Records};

use crate::fakes::{server, Fleet};

const H1: &str = "10.0.2.1";
const H2: &str = "10.0.2.2";
const FILEBEAT: &str = "/usr/bin/filebeat";
const FILEBEAT_YML: &str = "/etc/filebeat/filebeat.yml";
const AGENT: &str = "/usr/local/bin/getfilebeatlog.py";

fn records(offline: bool) -> Records {
    let mut records = Records {
        servers: vec![
            server(2, "gluu-2.example.org", H2, false),
            server(1, "gluu-1.example.org", H1, true),
        ],
        ..Default::default()
    };
    records.settings.offline = offline;
    records
}

fn offline_fleet(policy: OfflineMissingAgent) -> Fleet {
    let options = OrchestratorOptions {
        offline_missing_agent: policy,
        ..Default::default()
    };
    let fleet = Fleet::with_options(records(true), options);
    // only the second host has the agent pre-staged
    fleet.world().put(H2, FILEBEAT, "");
    fleet
}

#[tokio::test]
async fn test_online_rollout_configures_every_host() {
    let fleet = Fleet::new(records(false));
    fleet.world().put(H1, "/opt/gluu-server", "");
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .setup_log_shipping(false, &sink)
        .await
        .unwrap();
    assert!(ok);

    let world = fleet.world();
    assert!(world.position(&format!("connect {}", H1)).unwrap()
        < world.position(&format!("connect {}", H2)).unwrap());
    assert!(world.file(H1, AGENT).is_some());
    assert!(world
        .commands_on(H1)
        .iter()
        .any(|c| c.ends_with("apt-get install -y filebeat")));
    assert!(world.commands_on(H2).iter().any(|c| c == "systemctl start filebeat"));

    let chrooted = world.file(H1, FILEBEAT_YML).unwrap();
    assert!(chrooted.contains("chroot: true"));
    assert!(chrooted.contains("/opt/gluu-server/var/log/apache2/access.log"));
    let plain = world.file(H2, FILEBEAT_YML).unwrap();
    assert!(plain.contains("chroot: false"));
    assert!(!plain.contains("{{"));

    let successes = world.entries(Severity::Success);
    assert!(successes.contains(&(Some(1), "Log shipping configured".to_string())));
    assert!(successes.contains(&(Some(2), "Log shipping configured".to_string())));
    drop(world);

    let servers = fleet.store.servers().await.unwrap();
    assert!(servers.iter().all(|s| s.filebeat));
}

#[tokio::test]
async fn test_installed_agent_is_not_reinstalled_unless_forced() {
    let fleet = Fleet::new(records(false));
    fleet.world().put(H1, FILEBEAT, "");
    fleet.world().put(H2, FILEBEAT, "");
    let sink = fleet.sink();

    assert!(fleet
        .orchestrator
        .setup_log_shipping(false, &sink)
        .await
        .unwrap());
    assert!(!fleet.world().any_command("install -y"));
    assert!(fleet.world().any_command("systemctl restart filebeat"));

    assert!(fleet
        .orchestrator
        .setup_log_shipping(true, &sink)
        .await
        .unwrap());
    assert!(fleet.world().any_command("install -y filebeat"));
}

#[tokio::test]
async fn test_offline_missing_agent_aborts_the_run() {
    let fleet = offline_fleet(OfflineMissingAgent::AbortRun);
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .setup_log_shipping(false, &sink)
        .await
        .unwrap();
    assert!(!ok);

    let world = fleet.world();
    assert_eq!(
        world.entries(Severity::Error),
        vec![(
            Some(1),
            "Filebeat was not installed on this server. Please install and retry".to_string()
        )]
    );
    assert!(world.position(&format!("connect {}", H2)).is_none());
    assert!(!world.any_command("install -y"));
}

#[tokio::test]
async fn test_offline_missing_agent_skips_the_host() {
    let fleet = offline_fleet(OfflineMissingAgent::SkipHost);
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .setup_log_shipping(false, &sink)
        .await
        .unwrap();
    assert!(!ok);

    let world = fleet.world();
    assert_eq!(world.entries(Severity::Error).len(), 1);
    assert!(world.file(H1, FILEBEAT_YML).is_none());
    assert!(world.file(H2, FILEBEAT_YML).is_some());
    drop(world);

    let servers = fleet.store.servers().await.unwrap();
    let by_id = |id: u64| servers.iter().find(|s| s.id == id).unwrap().filebeat;
    assert!(!by_id(1));
    assert!(by_id(2));
}

#[tokio::test]
async fn test_unreachable_host_is_skipped() {
    let fleet = Fleet::new(records(false));
    fleet.world().unreachable.insert(H1.to_string());
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .setup_log_shipping(false, &sink)
        .await
        .unwrap();
    assert!(!ok);
    assert!(fleet.world().file(H2, FILEBEAT_YML).is_some());
}

#[tokio::test]
async fn test_remove_uninstalls_and_clears_output() {
    let fleet = Fleet::new(records(false));
    let sink = fleet.sink();
    assert!(fleet
        .orchestrator
        .setup_log_shipping(false, &sink)
        .await
        .unwrap());

    assert!(fleet.orchestrator.remove_log_shipping(&sink).await.unwrap());

    let world = fleet.world();
    let on_h2 = world.commands_on(H2);
    assert!(on_h2.iter().any(|c| c.ends_with("apt-get remove -y filebeat")));
    assert!(on_h2.iter().any(|c| c == "rm -f /tmp/gluu-filebeat*"));
    drop(world);

    let servers = fleet.store.servers().await.unwrap();
    assert!(servers.iter().all(|s| !s.filebeat));
}

#[tokio::test]
async fn test_rollout_keeps_record_edits_made_during_the_run() {
    let fleet = Fleet::new(records(false));
    fleet.world().on_connect.insert(
        H2.to_string(),
        Box::new(|records| {
            for server in records.servers.iter_mut() {
                server.installed = true;
            }
            records.settings.offline = true;
        }),
    );
    let sink = fleet.sink();

    assert!(fleet
        .orchestrator
        .setup_log_shipping(false, &sink)
        .await
        .unwrap());

    let records = fleet.store.read().await.unwrap();
    assert!(records.settings.offline);
    assert!(records.servers.iter().all(|s| s.installed && s.filebeat));
}
