//! Domain content shared with host controllers
//!
//! Hosts keep a copy of the domain-wide configuration they need to run their
//! servers, including the rollout plans. The copy is compared by digest on
//! every handshake and replaced wholesale when it differs.

use crate::error::ManagementError;
use crate::topology::{DomainContent, TopologyError};
use mgmt_model::{Resource, ResourceTree};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Top-level types copied to every host, in digest order
pub const SYNCED_TYPES: &[&str] = &[
    "extension",
    "path",
    "interface",
    "system-property",
    "profile",
    "socket-binding-group",
    "deployment",
    "server-group",
    "management-client-content",
];

/// Check whether a top-level type belongs to the synced content
#[inline]
#[must_use]
pub fn is_synced_type(key: &str) -> bool {
    SYNCED_TYPES.contains(&key)
}

/// Copy the synced subtrees of `root` into a fresh resource
#[must_use]
pub fn extract(root: &Resource) -> Resource {
    let mut content = Resource::new();
    for key in SYNCED_TYPES {
        for (name, child) in root.children_of(key) {
            content.insert_child(*key, name.as_str(), child.clone());
        }
    }
    content
}

/// Replace the synced subtrees of `root` with `content`
pub fn replace(root: &mut Resource, content: &Resource) {
    for key in SYNCED_TYPES {
        for name in root.child_names(key) {
            root.remove_child(key, &name);
        }
        for (name, child) in content.children_of(key) {
            root.insert_child(*key, name.as_str(), child.clone());
        }
    }
}

/// Hex SHA-256 of the canonical JSON form
///
/// # Errors
/// `ManagementError::Internal` if the content cannot be serialized.
pub fn digest(content: &Resource) -> Result<String, ManagementError> {
    let bytes = serde_json::to_vec(content).map_err(|e| ManagementError::Internal(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Wire form used by `sync-domain-content`
///
/// # Errors
/// `ManagementError::Internal` if the content cannot be serialized.
pub fn to_value(content: &Resource) -> Result<Value, ManagementError> {
    serde_json::to_value(content).map_err(|e| ManagementError::Internal(e.to_string()))
}

/// Parse the `sync-domain-content` payload
///
/// # Errors
/// `ManagementError::InvalidRequest` for a payload that is not a resource.
pub fn from_value(value: &Value) -> Result<Resource, ManagementError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ManagementError::InvalidRequest(format!("invalid resource payload: {e}")))
}

impl DomainContent for ResourceTree {
    fn domain_content(&self) -> Result<(Value, String), TopologyError> {
        let content = self.read(extract);
        let value = to_value(&content).map_err(|e| TopologyError::Content(e.to_string()))?;
        let digest = digest(&content).map_err(|e| TopologyError::Content(e.to_string()))?;
        Ok((value, digest))
    }

    fn register_host(&self, host: &str, model: Resource) {
        self.write(|root| {
            root.insert_child("host", host, model);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn domain() -> Resource {
        Resource::new()
            .with_child("profile", "default", Resource::new().with_attribute("x", 1))
            .with_child(
                "server-group",
                "main-server-group",
                Resource::new().with_attribute("profile", "default"),
            )
            .with_child(
                "management-client-content",
                "rollout-plans",
                Resource::new().protected().with_child(
                    "rollout-plan",
                    "testPlan",
                    Resource::new().with_attribute("content", json!({"rollout-plan": {}})),
                ),
            )
            .with_child("core-service", "management", Resource::new())
            .with_child("host", "primary", Resource::new())
    }

    #[test]
    fn extract_skips_host_and_access_control() {
        let content = extract(&domain());
        assert!(content.child("profile", "default").is_some());
        assert!(content.child("host", "primary").is_none());
        assert!(content.child("core-service", "management").is_none());
        assert!(content
            .child("management-client-content", "rollout-plans")
            .unwrap()
            .is_protected());
    }

    #[test]
    fn replace_then_digest_matches() {
        let source = extract(&domain());
        let mut host_root = Resource::new()
            .with_child("host", "secondary", Resource::new())
            .with_child("profile", "stale", Resource::new());
        assert_ne!(digest(&extract(&host_root)).unwrap(), digest(&source).unwrap());

        replace(&mut host_root, &source);
        assert!(host_root.child("profile", "stale").is_none());
        assert!(host_root.child("host", "secondary").is_some());
        assert_eq!(digest(&extract(&host_root)).unwrap(), digest(&source).unwrap());
    }

    #[test]
    fn content_rollback_keeps_refreshed_mirrors() {
        let tree = ResourceTree::new(domain());
        let before = tree.read(extract);

        tree.write(|root| {
            root.insert_child("profile", "default", Resource::new().with_attribute("x", 2));
        });
        tree.register_host("primary", Resource::new().with_attribute("name", "fresh"));
        tree.write(|root| replace(root, &before));

        assert_eq!(
            tree.read(|root| root.child("profile", "default").and_then(|p| p.attribute("x")).cloned()),
            Some(json!(1))
        );
        assert_eq!(
            tree.read(|root| root.child("host", "primary").and_then(|h| h.attribute("name")).cloned()),
            Some(json!("fresh"))
        );
        assert!(tree.read(|root| root.child("core-service", "management").is_some()));
    }

    #[test]
    fn wire_form_round_trips() {
        let content = extract(&domain());
        let parsed = from_value(&to_value(&content).unwrap()).unwrap();
        assert_eq!(parsed, content);
        assert!(from_value(&json!("nope")).is_err());
    }

    #[test]
    fn register_host_replaces_mirror_in_place() {
        let tree = ResourceTree::new(domain());
        tree.register_host("primary", Resource::new().with_attribute("name", "primary"));
        tree.register_host("secondary", Resource::new());
        assert_eq!(
            tree.read(|root| root.child_names("host")),
            vec!["primary".to_string(), "secondary".to_string()]
        );
        assert_eq!(
            tree.read(|root| root.child("host", "primary").and_then(|h| h.attribute("name")).cloned()),
            Some(json!("primary"))
        );
    }
}
