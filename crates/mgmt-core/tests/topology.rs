//! Host sessions across disconnects and primary reloads

use mgmt_core::{ControllerState, Domain, SessionState};
use mgmt_test_utils::{
    boot_two_hosts, eventually, exec, failure, request, success, MAIN_GROUP, PRIMARY, SECONDARY,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

async fn secondary_running(domain: &Domain) -> bool {
    let topology = domain.topology();
    eventually(WAIT, || async move {
        topology.state(SECONDARY).ok() == Some(SessionState::Running)
    })
    .await
}

fn has_spare_profile(domain: &Domain) -> bool {
    domain
        .host(SECONDARY)
        .is_some_and(|host| host.tree().read(|root| root.child("profile", "spare").is_some()))
}

#[tokio::test]
async fn boot_registers_secondary() {
    let domain = boot_two_hosts().await;

    assert_eq!(domain.topology().state(SECONDARY).unwrap(), SessionState::Running);
    assert_eq!(domain.controller().state(), ControllerState::Running);
    assert_eq!(domain.connector().connections_opened(), 1);

    let hosts = success(
        &domain
            .execute("monitor", request("/", "read-children-names").with_param("child-type", "host"))
            .await,
    );
    assert_eq!(hosts, json!([PRIMARY, SECONDARY]));

    domain.shutdown().await;
}

#[tokio::test]
async fn reconnect_is_a_no_op_while_running() {
    let domain = boot_two_hosts().await;
    let opened = domain.connector().connections_opened();

    domain.topology().reconnect(SECONDARY).await.unwrap();
    domain.topology().reconnect(SECONDARY).await.unwrap();

    assert_eq!(domain.connector().connections_opened(), opened);
    assert_eq!(domain.topology().state(SECONDARY).unwrap(), SessionState::Running);
    assert!(domain.topology().reconnect("nowhere").await.is_err());

    domain.shutdown().await;
}

#[tokio::test]
async fn dropped_host_resyncs_content_on_reconnect() {
    let domain = boot_two_hosts().await;
    let opened = domain.connector().connections_opened();

    domain.connector().set_available(SECONDARY, false);
    domain.connector().disconnect(SECONDARY);

    // the drop is noticed on the next call
    let description = failure(&exec(&domain, "monitor", "/host=secondary", "read-resource").await);
    assert!(description.starts_with("MGMT0122"), "{description}");
    let topology = domain.topology();
    assert!(
        eventually(WAIT, || async move {
            topology.state(SECONDARY).ok() != Some(SessionState::Running)
        })
        .await
    );

    // changed while the host is away
    success(
        &domain
            .execute("admin", request("/profile=spare", "add").with_param("note", "added offline"))
            .await,
    );
    assert!(!has_spare_profile(&domain));

    domain.connector().set_available(SECONDARY, true);
    assert!(secondary_running(&domain).await);
    assert!(domain.connector().connections_opened() > opened);
    assert!(has_spare_profile(&domain));

    let servers = success(
        &domain
            .execute(
                "monitor",
                request("/host=secondary", "read-children-names").with_param("child-type", "server"),
            )
            .await,
    );
    assert_eq!(servers, json!(["main-three", "other-two"]));

    domain.shutdown().await;
}

#[tokio::test]
async fn operations_are_refused_while_reloading() {
    let domain = boot_two_hosts().await;

    success(&exec(&domain, "admin", "/host=primary", "reload").await);
    assert_eq!(domain.controller().state(), ControllerState::Reloading);
    let description = failure(&exec(&domain, "monitor", "/", "read-resource").await);
    assert!(description.starts_with("MGMT0190"), "{description}");

    assert_eq!(
        domain.controller().wait_until_ready(WAIT).await,
        Some(ControllerState::Running)
    );
    success(&exec(&domain, "monitor", "/", "read-resource").await);

    domain.shutdown().await;
}

#[tokio::test]
async fn secondary_rejoins_after_primary_reload() {
    let domain = boot_two_hosts().await;
    let plan = json!({"rollout-plan": {"in-series": [
        {"server-group": {"main-server-group": {}}},
        {"server-group": {"other-server-group": {}}}
    ]}});
    success(
        &domain
            .execute(
                "admin",
                request("/management-client-content=rollout-plans/rollout-plan=testPlan", "add")
                    .with_param("content", plan),
            )
            .await,
    );
    let opened = domain.connector().connections_opened();

    success(&exec(&domain, "admin", "/host=primary", "reload").await);
    assert_eq!(
        domain.controller().wait_until_ready(WAIT).await,
        Some(ControllerState::Running)
    );
    assert!(secondary_running(&domain).await);
    assert!(domain.connector().connections_opened() > opened);

    let primary_ready = eventually(WAIT, || async {
        let response = domain
            .execute(
                "monitor",
                request("/host=primary", "read-attribute").with_param("name", "host-state"),
            )
            .await;
        response.is_success() && response.result_or_null() == json!("running")
    })
    .await;
    assert!(primary_ready);
    let state = success(
        &domain
            .execute(
                "monitor",
                request("/host=secondary", "read-attribute").with_param("name", "host-state"),
            )
            .await,
    );
    assert_eq!(state, json!("running"));

    // the stored plan survived and drives the next rollout
    let response = domain
        .execute(
            "admin",
            request("/profile=default/subsystem=logging", "write-attribute")
                .with_param("name", "level")
                .with_param("value", "DEBUG")
                .with_rollout(json!({"id": "testPlan"})),
        )
        .await;
    success(&response);
    let report = response.server_groups.unwrap();
    let hosts = &report["steps"][0]["server-groups"][MAIN_GROUP]["host"];
    assert_eq!(hosts[PRIMARY]["outcome"], json!("success"));
    assert_eq!(hosts[SECONDARY]["outcome"], json!("success"));

    domain.shutdown().await;
}

#[tokio::test]
async fn admin_only_reload_leaves_hosts_disconnected() {
    let domain = boot_two_hosts().await;

    let reload = request("/host=primary", "reload").with_param("admin-only", true);
    success(&domain.execute("admin", reload).await);
    assert_eq!(
        domain.controller().wait_until_ready(WAIT).await,
        Some(ControllerState::AdminOnly)
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(domain.topology().state(SECONDARY).unwrap(), SessionState::Disconnected);
    let description = failure(&exec(&domain, "monitor", "/host=secondary", "read-resource").await);
    assert!(description.starts_with("MGMT0122"), "{description}");

    // domain configuration stays manageable
    success(&exec(&domain, "monitor", "/profile=default", "read-resource").await);

    // servers on the primary were stopped
    let running = eventually(WAIT, || async {
        let response = domain
            .execute(
                "monitor",
                request("/host=primary", "read-children-names").with_param("child-type", "server"),
            )
            .await;
        response.is_success() && response.result_or_null() == json!([])
    })
    .await;
    assert!(running);

    domain.topology().reconnect(SECONDARY).await.unwrap();
    assert!(secondary_running(&domain).await);

    domain.shutdown().await;
}
