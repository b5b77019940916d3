//! Address validation and operation visibility through the domain controller

use mgmt_core::OperationRequest;
use mgmt_model::{PathAddress, RELEASE_VERSION};
use mgmt_test_utils::{
    boot_two_hosts, exec, failure, request, success, two_host_builder, VisibilityProbe, PRIMARY,
    SECONDARY,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

fn validate(candidate: impl Into<Value>) -> OperationRequest {
    OperationRequest::new(PathAddress::root(), "validate-address").with_param("value", candidate)
}

#[tokio::test]
async fn validates_existing_and_missing_addresses() {
    let domain = boot_two_hosts().await;

    for valid in [
        "/",
        "/profile=default/subsystem=logging",
        "/server-group=main-server-group",
        "/host=primary/server-config=main-one",
        "/host=primary/server=main-one",
        "/host=*/server-config=*",
    ] {
        let result = success(&domain.execute("monitor", validate(valid)).await);
        assert_eq!(result, json!({"valid": true}), "{valid}");
    }

    let result = success(&domain.execute("monitor", validate("/profile=default/subsystem=missing")).await);
    assert_eq!(result["valid"], json!(false));
    assert_eq!(
        result["problem"],
        json!("MGMT0216: Management resource 'subsystem=missing' not found under '/profile=default'")
    );

    let result = success(&domain.execute("monitor", validate("/nonsense=x")).await);
    assert_eq!(result["valid"], json!(false));
    assert!(result["problem"].as_str().unwrap().starts_with("MGMT0217"));

    domain.shutdown().await;
}

#[tokio::test]
async fn wildcard_validation_stops_at_first_missing_segment() {
    let domain = boot_two_hosts().await;

    let result = success(&domain.execute("monitor", validate("/host=*/server-config=nowhere/x=y")).await);
    assert_eq!(result["valid"], json!(false));
    assert!(result["problem"]
        .as_str()
        .unwrap()
        .contains("'server-config=nowhere' not found under '/host=*'"));

    domain.shutdown().await;
}

#[tokio::test]
async fn remote_host_addresses_are_validated_by_the_host() {
    let domain = boot_two_hosts().await;

    let result = success(&domain.execute("monitor", validate("/host=secondary/server=main-three")).await);
    assert_eq!(result, json!({"valid": true}));

    let result = success(&domain.execute("monitor", validate(json!([{"host": SECONDARY}, {"server": "main-one"}]))).await);
    assert_eq!(result["valid"], json!(false));
    assert!(result["problem"].as_str().unwrap().starts_with("MGMT0216"));

    let result = success(&domain.execute("monitor", validate("/host=nowhere")).await);
    assert_eq!(result["valid"], json!(false));

    domain.shutdown().await;
}

#[tokio::test]
async fn malformed_candidate_is_invalid_not_failed() {
    let domain = boot_two_hosts().await;

    let result = success(&domain.execute("monitor", validate("/host=primary/server")).await);
    assert_eq!(result["valid"], json!(false));
    assert!(result["problem"].as_str().unwrap().starts_with("MGMT0033"));

    domain.shutdown().await;
}

#[tokio::test]
async fn malformed_request_address_fails() {
    let domain = boot_two_hosts().await;

    let response = domain
        .execute_json("admin", &json!({"address": "/profile=", "operation": "read-resource"}))
        .await;
    assert!(failure(&response).starts_with("MGMT0033"));

    let response = exec(&domain, "admin", "/profile=missing", "read-resource").await;
    assert!(failure(&response).starts_with("MGMT0216"));

    domain.shutdown().await;
}

#[tokio::test]
async fn visibility_applies_to_external_callers() {
    let domain = two_host_builder()
        .with_extension(Arc::new(VisibilityProbe))
        .boot()
        .await
        .unwrap();

    for callable in ["public-probe", "hidden-probe", "domain-hidden-probe"] {
        let result = success(&exec(&domain, "monitor", "/", callable).await);
        assert_eq!(result, json!(callable));
    }
    for internal in ["private-probe", "domain-private-probe"] {
        let description = failure(&exec(&domain, "admin", "/", internal).await);
        assert!(description.starts_with("MGMT0031"), "{internal}: {description}");
    }

    let names = success(&exec(&domain, "monitor", "/", "read-operation-names").await);
    let names: Vec<&str> = names.as_array().unwrap().iter().filter_map(Value::as_str).collect();
    assert!(names.contains(&"public-probe"));
    assert!(names.contains(&"read-resource"));
    for hidden in ["hidden-probe", "private-probe", "domain-hidden-probe", "domain-private-probe"] {
        assert!(!names.contains(&hidden), "{hidden} listed");
    }
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);

    let extension = success(&exec(&domain, "monitor", "/extension=visibility-probe", "read-resource").await);
    assert_eq!(extension["module"], json!("visibility-probe"));

    domain.shutdown().await;
}

#[tokio::test]
async fn host_internal_operations_are_not_exposed() {
    let domain = boot_two_hosts().await;

    let description = failure(&exec(&domain, "admin", "/host=primary", "read-host-model").await);
    assert!(description.starts_with("MGMT0030"), "{description}");
    let description = failure(&exec(&domain, "admin", "/", "read-content-digest").await);
    assert!(description.starts_with("MGMT0030"), "{description}");

    let description = failure(&exec(&domain, "admin", "/", "no-such-operation").await);
    assert!(description.starts_with("MGMT0030"), "{description}");

    domain.shutdown().await;
}

#[tokio::test]
async fn version_attributes_are_read_only_integers() {
    let domain = boot_two_hosts().await;

    for address in [
        "/",
        "/host=primary",
        "/host=secondary",
        "/host=primary/server=main-one",
        "/host=secondary/server=main-three",
    ] {
        let resource = success(&exec(&domain, "monitor", address, "read-resource").await);
        assert_eq!(resource["management-major-version"], json!(4), "{address}");
        assert!(resource["management-minor-version"].is_u64(), "{address}");
        assert!(resource["management-micro-version"].is_u64(), "{address}");
        assert_eq!(resource["release-version"], json!(RELEASE_VERSION), "{address}");

        let write = request(address, "write-attribute")
            .with_param("name", "management-major-version")
            .with_param("value", 5);
        let description = failure(&domain.execute("admin", write).await);
        assert!(description.starts_with("MGMT0035"), "{address}: {description}");
    }

    let major = success(
        &domain
            .execute(
                "monitor",
                request("/host=secondary", "read-attribute").with_param("name", "management-major-version"),
            )
            .await,
    );
    assert_eq!(major, json!(4));

    domain.shutdown().await;
}

#[tokio::test]
async fn wildcard_reads_list_each_match() {
    let domain = boot_two_hosts().await;

    let result = success(&exec(&domain, "monitor", "/host=*/server-config=*", "read-resource").await);
    let addresses: Vec<Value> = result
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["address"].clone())
        .collect();
    assert_eq!(
        addresses,
        vec![
            json!([{"host": PRIMARY}, {"server-config": "main-one"}]),
            json!([{"host": PRIMARY}, {"server-config": "other-one"}]),
            json!([{"host": SECONDARY}, {"server-config": "main-three"}]),
            json!([{"host": SECONDARY}, {"server-config": "other-two"}]),
        ]
    );
    assert!(result.as_array().unwrap().iter().all(|item| item["outcome"] == json!("success")));

    domain.shutdown().await;
}
