//! Cache cluster install and uninstall against scripted hosts

use std::time::Duration;

use console_api::{JobState, ProcedureRequest, Severity};

use clusterctl::jobs::runner::JobRunner;
use clusterctl::storage::store::{ConfigStore, Records};

use crate::fakes::{cache_server, server, Fleet};

const A: &str = "10.0.0.1";
const B: &str = "10.0.0.2";
const C: &str = "10.0.1.3";
const D: &str = "10.0.1.4";
const PEM: &str = "/etc/stunnel/redis-server.pem";
const REDIS_CONF: &str = "/etc/redis/redis.conf";
const STUNNEL_CONF: &str = "/etc/stunnel/stunnel.conf";

fn records() -> Records {
    Records {
        servers: vec![
            server(3, "gluu-c.example.org", C, true),
            server(4, "gluu-d.example.org", D, false),
        ],
        cache_servers: vec![
            cache_server(1, "cache-a.example.org", A, true, "secretA"),
            cache_server(2, "cache-b.example.org", B, false, "secretB"),
        ],
        ..Default::default()
    }
}

fn fleet() -> Fleet {
    let fleet = Fleet::new(records());
    {
        let mut world = fleet.world();
        world.put(A, REDIS_CONF, "bind 0.0.0.0\n# requirepass foobared\nport 6379\n");
        world.put(B, REDIS_CONF, "bind 0.0.0.0\n# requirepass foobared\nport 6379\n");
    }
    fleet
}

#[tokio::test]
async fn test_install_runs_phases_in_order() {
    let fleet = fleet();
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .install_cache_cluster(&[3, 4], &[1, 2], &sink)
        .await
        .unwrap();
    assert!(ok);

    let world = fleet.world();
    let at = |prefix: &str| {
        world
            .position(prefix)
            .unwrap_or_else(|| panic!("no event {prefix}"))
    };

    let cert_fetched = at(&format!("get {} {}", A, PEM));
    assert!(at(&format!("connect {}", A)) < cert_fetched);
    assert!(cert_fetched < at(&format!("connect {}", B)));
    assert!(at(&format!("connect {}", B)) < at("step 2"));
    assert!(at("step 2") < at(&format!("connect {}", C)));
    assert!(at(&format!("connect {}", C)) < at("cache_backend"));
    assert!(at("cache_backend") < at(&format!("connect {}", D)));
    assert!(at(&format!("connect {}", D)) < at("step 3"));
    assert!(cert_fetched < at("cache_backend"));
    assert_eq!(world.steps, vec![2, 3]);

    assert_eq!(
        world.cache_backend_calls,
        vec![(
            "gluu-c.example.org".to_string(),
            "REDIS".to_string(),
            "localhost:6379".to_string(),
            "secretA".to_string(),
        )]
    );

    let pem = world.file(A, PEM).unwrap();
    assert_eq!(world.file(B, PEM), Some(pem.clone()));
    assert_eq!(world.file(D, PEM), Some(pem));

    assert!(world
        .file(B, REDIS_CONF)
        .unwrap()
        .contains("\nrequirepass secretB\n"));
    assert!(world
        .file(A, STUNNEL_CONF)
        .unwrap()
        .contains("accept = 10.0.0.1:16379\n"));
    assert!(world
        .file(B, STUNNEL_CONF)
        .unwrap()
        .contains("accept = 10.0.0.2:16379\n"));
    assert!(world
        .file(D, STUNNEL_CONF)
        .unwrap()
        .contains("connect = 10.0.0.1:16379\n"));
    assert!(world.entries(Severity::Error).is_empty());
    drop(world);

    let records = fleet.store.read().await.unwrap();
    assert!(records.servers.iter().all(|s| s.installed));
    assert!(records.cache_servers.iter().all(|c| c.installed));
    assert!(!records.settings.use_ldap_cache);
}

#[tokio::test]
async fn test_install_keeps_record_edits_made_during_the_run() {
    let fleet = fleet();
    fleet.world().on_connect.insert(
        D.to_string(),
        Box::new(|records| {
            records.settings.gluu_version = "4.5.0".to_string();
            records.servers[1].mmr = true;
            records.cache_servers[1].hostname = "cache-b2.example.org".to_string();
        }),
    );
    let sink = fleet.sink();

    assert!(fleet
        .orchestrator
        .install_cache_cluster(&[3, 4], &[1, 2], &sink)
        .await
        .unwrap());

    let records = fleet.store.read().await.unwrap();
    assert_eq!(records.settings.gluu_version, "4.5.0");
    assert!(!records.settings.use_ldap_cache);
    let d = records.servers.iter().find(|s| s.id == 4).unwrap();
    assert!(d.mmr);
    assert!(d.installed);
    assert_eq!(records.cache_servers[1].hostname, "cache-b2.example.org");
    assert!(records.cache_servers[1].installed);
}

#[tokio::test]
async fn test_offline_missing_engine_aborts_without_installing() {
    let mut records = records();
    records.settings.offline = true;
    let fleet = Fleet::new(records);
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .install_cache_cluster(&[3, 4], &[1, 2], &sink)
        .await
        .unwrap();
    assert!(!ok);

    let world = fleet.world();
    let errors = world.entries(Severity::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, Some(1));
    assert!(errors[0].1.contains("Please install Redis Server and retry"));
    assert!(!world.any_command("install -y"));
    assert!(world.steps.is_empty());
    assert!(world.position(&format!("connect {}", B)).is_none());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let fleet = fleet();
    let sink = fleet.sink();
    assert!(fleet
        .orchestrator
        .install_cache_cluster(&[3, 4], &[1, 2], &sink)
        .await
        .unwrap());

    let pem = fleet.world().file(A, PEM).unwrap();
    let redis_conf = fleet.world().file(A, REDIS_CONF).unwrap();
    {
        let mut world = fleet.world();
        world.commands.clear();
        world.events.clear();
    }

    assert!(fleet
        .orchestrator
        .install_cache_cluster(&[3, 4], &[1, 2], &sink)
        .await
        .unwrap());

    let world = fleet.world();
    assert!(!world.any_command("install -y"));
    assert!(!world.any_command("openssl"));
    assert_eq!(world.file(A, PEM), Some(pem));
    assert_eq!(world.file(A, REDIS_CONF), Some(redis_conf));
    assert!(world.position(&format!("put {} {}", A, REDIS_CONF)).is_none());
    assert!(world.position(&format!("put {} {}", B, PEM)).is_none());
    assert!(world.position(&format!("put {} {}", D, PEM)).is_none());
}

#[tokio::test]
async fn test_unreachable_cache_host_stops_the_run() {
    let fleet = fleet();
    fleet.world().unreachable.insert(B.to_string());
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .install_cache_cluster(&[3, 4], &[1, 2], &sink)
        .await
        .unwrap();
    assert!(!ok);

    let world = fleet.world();
    let errors = world.entries(Severity::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, Some(2));
    assert!(errors[0].1.starts_with("SSH connection to server failed"));
    assert!(world.steps.is_empty());
    assert!(world.cache_backend_calls.is_empty());
}

#[tokio::test]
async fn test_directory_failure_does_not_stop_the_run() {
    let fleet = fleet();
    fleet
        .world()
        .directory_down
        .insert("gluu-c.example.org".to_string());
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .install_cache_cluster(&[3, 4], &[1, 2], &sink)
        .await
        .unwrap();
    assert!(ok);

    let world = fleet.world();
    let errors = world.entries(Severity::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.starts_with("Couldn't connect to LDAP"));
    assert_eq!(world.steps, vec![2, 3]);
    assert!(world.position(&format!("connect {}", D)).is_some());
}

#[tokio::test]
async fn test_single_consumer_fetches_certificate_from_primary() {
    let fleet = fleet();
    fleet.world().put(A, PEM, "KEY\nCRT\n");
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .install_cache_cluster(&[4], &[], &sink)
        .await
        .unwrap();
    assert!(ok);

    let world = fleet.world();
    assert_eq!(world.file(D, PEM).as_deref(), Some("KEY\nCRT\n"));
    assert!(world.position(&format!("get {} {}", A, PEM)).unwrap()
        < world.position(&format!("put {} {}", D, PEM)).unwrap());
    assert!(world.cache_backend_calls.is_empty());
}

#[tokio::test]
async fn test_unknown_host_id_is_an_error() {
    let fleet = fleet();
    let sink = fleet.sink();
    assert!(fleet
        .orchestrator
        .install_cache_cluster(&[3], &[9], &sink)
        .await
        .is_err());
}

#[tokio::test]
async fn test_uninstall_disables_services() {
    let fleet = fleet();
    let sink = fleet.sink();
    assert!(fleet
        .orchestrator
        .install_cache_cluster(&[3, 4], &[1, 2], &sink)
        .await
        .unwrap());
    fleet.world().log.clear();

    let ok = fleet
        .orchestrator
        .uninstall_cache_cluster(&[3, 4], &[1, 2], &sink)
        .await
        .unwrap();
    assert!(ok);

    let world = fleet.world();
    let on_a = world.commands_on(A);
    assert!(on_a.iter().any(|c| c == "systemctl stop redis-server"));
    assert!(on_a.iter().any(|c| c == "systemctl disable stunnel4"));
    assert!(!world.any_command("apt-get remove"));
    assert_eq!(world.cache_backend_calls.len(), 2);
    assert_eq!(world.steps, vec![2, 3, 2, 3]);
    drop(world);

    let records = fleet.store.read().await.unwrap();
    assert!(records.servers.iter().all(|s| !s.installed));
    assert!(records.cache_servers.iter().all(|c| !c.installed));
    assert!(records.settings.use_ldap_cache);
}

#[tokio::test]
async fn test_uninstall_tolerates_missing_services() {
    let fleet = fleet();
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .uninstall_cache_cluster(&[4], &[2], &sink)
        .await
        .unwrap();
    assert!(ok);

    let world = fleet.world();
    let infos: Vec<String> = world
        .entries(Severity::Info)
        .into_iter()
        .map(|(_, m)| m)
        .collect();
    assert!(infos.contains(&"Redis Server was not installed.".to_string()));
    assert!(infos.contains(&"Stunnel not installed.".to_string()));
    assert!(world.entries(Severity::Error).is_empty());
    assert!(!world.any_command("systemctl stop"));
}

#[tokio::test]
async fn test_install_through_job_runner() {
    let fleet = fleet();
    let runner = JobRunner::new(fleet.orchestrator.clone(), 2);

    let job_id = runner
        .submit(ProcedureRequest::InstallCacheCluster {
            servers: vec![3, 4],
            cache_servers: vec![1, 2],
        })
        .await
        .unwrap();

    let status = runner
        .wait(job_id, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(status.state, JobState::Succeeded);
    assert_eq!(status.step, 3);
    assert!(status
        .entries
        .iter()
        .any(|e| e.host_id == Some(3) && e.message == "oxCacheConfiguration updated"));

    runner.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_status_reports_every_host_by_address() {
    let fleet = fleet();
    fleet.world().unreachable.insert(D.to_string());

    let status = fleet.orchestrator.cache_status().await.unwrap();

    assert_eq!(status.redis.get(A), Some(&true));
    assert_eq!(status.stunnel.get(B), Some(&true));
    assert_eq!(status.stunnel.get(C), Some(&true));
    assert_eq!(status.redis.get(C), None);
    assert_eq!(status.redis.get(D), Some(&false));
    assert_eq!(status.stunnel.get(D), Some(&false));
    assert!(fleet
        .world()
        .commands_on(B)
        .contains(&"timeout 3 bash -c 'exec 3<>/dev/tcp/10.0.0.2/16379'".to_string()));
}
