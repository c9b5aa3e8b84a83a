//! Replication topology guard, deploy and removal

use console_api::Severity;

use clusterctl::errors::ConsoleError;
use clusterctl::models::server::Server;
use clusterctl::storage::store::{ConfigStore, Records};

use crate::fakes::{server, Fleet};

fn replicating(id: u64, hostname: &str, ip: &str) -> Server {
    let mut s = server(id, hostname, ip, id == 1);
    s.mmr = true;
    s
}

fn fleet() -> Fleet {
    Fleet::new(Records {
        servers: vec![
            replicating(1, "ldap-1.example.org", "10.0.4.1"),
            replicating(2, "ldap-2.example.org", "10.0.4.2"),
            replicating(3, "ldap-3.example.org", "10.0.4.3"),
            server(4, "ldap-4.example.org", "10.0.4.4", false),
        ],
        ..Default::default()
    })
}

#[tokio::test]
async fn test_removal_refused_while_server_is_a_provider() {
    let fleet = fleet();
    fleet.world().providers.insert(
        "ldap-3.example.org".to_string(),
        vec!["ldap-1.example.org".to_string()],
    );

    match fleet.orchestrator.check_removal(1).await {
        Err(ConsoleError::TopologyError(message)) => assert_eq!(
            message,
            "This server is a provider for Ldap Server ldap-3.example.org. \
             Please first remove this server as provider."
        ),
        other => panic!("expected a topology error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_removal_allowed_when_nobody_pulls_from_server() {
    let fleet = fleet();
    fleet.world().providers.insert(
        "ldap-3.example.org".to_string(),
        vec!["ldap-2.example.org".to_string()],
    );

    let notices = fleet.orchestrator.check_removal(1).await.unwrap();
    assert!(notices.is_empty());

    let world = fleet.world();
    assert!(world.position("bind ldap-2.example.org cn=config").is_some());
    assert!(world.position("bind ldap-3.example.org cn=config").is_some());
    assert!(world.position("bind ldap-4.example.org").is_none());
}

#[tokio::test]
async fn test_unreachable_peer_becomes_a_notice() {
    let fleet = fleet();
    fleet
        .world()
        .directory_down
        .insert("ldap-2.example.org".to_string());

    let notices = fleet.orchestrator.check_removal(1).await.unwrap();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("ldap-2.example.org"));
}

#[tokio::test]
async fn test_deploy_adds_every_peer_as_provider() {
    let fleet = fleet();
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .deploy_replication_config(4, &sink)
        .await
        .unwrap();
    assert!(ok);

    let world = fleet.world();
    let added: Vec<&String> = world
        .events
        .iter()
        .filter(|e| e.starts_with("add_provider"))
        .collect();
    assert_eq!(
        added,
        vec![
            "add_provider ldap-4.example.org rid=1",
            "add_provider ldap-4.example.org rid=2",
            "add_provider ldap-4.example.org rid=3",
        ]
    );
    assert_eq!(
        world.providers["ldap-4.example.org"],
        vec!["ldap-1.example.org", "ldap-2.example.org", "ldap-3.example.org"]
    );
    drop(world);

    assert!(fleet.store.server(4).await.unwrap().mmr);
}

#[tokio::test]
async fn test_deploy_skips_existing_providers() {
    let fleet = fleet();
    fleet.world().providers.insert(
        "ldap-4.example.org".to_string(),
        vec!["ldap-2.example.org".to_string()],
    );
    let sink = fleet.sink();

    assert!(fleet
        .orchestrator
        .deploy_replication_config(4, &sink)
        .await
        .unwrap());

    let world = fleet.world();
    let added: Vec<&String> = world
        .events
        .iter()
        .filter(|e| e.starts_with("add_provider"))
        .collect();
    assert_eq!(
        added,
        vec![
            "add_provider ldap-4.example.org rid=1",
            "add_provider ldap-4.example.org rid=3",
        ]
    );
}

#[tokio::test]
async fn test_deploy_fails_when_directory_is_down() {
    let fleet = fleet();
    fleet
        .world()
        .directory_down
        .insert("ldap-4.example.org".to_string());
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .deploy_replication_config(4, &sink)
        .await
        .unwrap();
    assert!(!ok);

    let errors = fleet.world().entries(Severity::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.starts_with("Couldn't connect to LDAP"));
    assert!(!fleet.store.server(4).await.unwrap().mmr);
}

#[tokio::test]
async fn test_remove_drops_providers_and_leaves_topology() {
    let fleet = fleet();
    fleet.world().providers.insert(
        "ldap-2.example.org".to_string(),
        vec!["ldap-1.example.org".to_string()],
    );
    let sink = fleet.sink();

    let ok = fleet
        .orchestrator
        .remove_replication_deployment(2, &sink)
        .await
        .unwrap();
    assert!(ok);

    assert!(!fleet.world().providers.contains_key("ldap-2.example.org"));
    assert!(!fleet.store.server(2).await.unwrap().mmr);
    assert!(fleet.store.server(1).await.unwrap().mmr);
}

#[tokio::test]
async fn test_deploy_skips_peer_without_a_valid_replica_id() {
    let records = Records {
        servers: vec![
            replicating(1, "ldap-1.example.org", "10.0.4.1"),
            replicating(1000, "ldap-k.example.org", "10.0.4.100"),
            server(4, "ldap-4.example.org", "10.0.4.4", false),
        ],
        ..Default::default()
    };
    let fleet = Fleet::new(records);
    let sink = fleet.sink();

    assert!(fleet
        .orchestrator
        .deploy_replication_config(4, &sink)
        .await
        .unwrap());

    let world = fleet.world();
    assert_eq!(
        world.providers["ldap-4.example.org"],
        vec!["ldap-1.example.org"]
    );
    let failures = world.entries(Severity::Fail);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].1.starts_with("Skipping provider ldap-k.example.org"));
}
