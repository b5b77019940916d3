//! Topology scope of an address

use mgmt_model::{PathAddress, Resource};
use std::collections::BTreeSet;

/// Hosts and server-groups an address belongs to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetScope {
    /// Not tied to any host or server-group
    #[default]
    Global,
    /// Under `host=<host>`; `server_groups` is set for server resources
    Host {
        host: String,
        server_groups: BTreeSet<String>,
    },
    /// Domain content owned by server-groups
    ServerGroups(BTreeSet<String>),
}

impl TargetScope {
    /// Resolve the scope of `address` against the domain model
    ///
    /// - `host=H/...` is host H; its `server-config=S` and `server=S` subtrees
    ///   also belong to the config's `group`
    /// - `server-group=G/...` is group G
    /// - `profile=P/...`, `socket-binding-group=S/...` and `deployment=D/...`
    ///   belong to the groups using them
    /// - anything else is global
    #[must_use]
    pub fn resolve(model: &Resource, address: &PathAddress) -> Self {
        let Some(first) = address.first() else {
            return Self::Global;
        };
        match first.key() {
            "host" => {
                let host = first.value().to_string();
                let server_groups = address
                    .elements()
                    .get(1)
                    .filter(|e| matches!(e.key(), "server-config" | "server"))
                    .and_then(|e| {
                        model
                            .child("host", &host)
                            .and_then(|h| h.child("server-config", e.value()))
                            .and_then(|config| config.attribute_str("group"))
                    })
                    .map(|group| BTreeSet::from([group.to_string()]))
                    .unwrap_or_default();
                Self::Host {
                    host,
                    server_groups,
                }
            }
            "server-group" => Self::ServerGroups(BTreeSet::from([first.value().to_string()])),
            "profile" | "socket-binding-group" => {
                Self::ServerGroups(groups_referencing(model, first.key(), first.value()))
            }
            "deployment" => Self::ServerGroups(
                model
                    .children_of("server-group")
                    .filter(|(_, group)| group.child("deployment", first.value()).is_some())
                    .map(|(name, _)| name.clone())
                    .collect(),
            ),
            _ => Self::Global,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Check whether the scope belongs to one of `hosts`
    ///
    /// `None` when the scope is not host-bound.
    #[must_use]
    pub fn within_hosts(&self, hosts: &BTreeSet<String>) -> Option<bool> {
        match self {
            Self::Host { host, .. } => Some(hosts.contains(host)),
            _ => None,
        }
    }

    /// Check whether the scope belongs to one of `groups`
    ///
    /// `None` when the scope is not group-bound.
    #[must_use]
    pub fn within_groups(&self, groups: &BTreeSet<String>) -> Option<bool> {
        match self {
            Self::Host { server_groups, .. } if !server_groups.is_empty() => {
                Some(!server_groups.is_disjoint(groups))
            }
            Self::ServerGroups(owners) => Some(!owners.is_disjoint(groups)),
            _ => None,
        }
    }
}

fn groups_referencing(model: &Resource, attribute: &str, value: &str) -> BTreeSet<String> {
    model
        .children_of("server-group")
        .filter(|(_, group)| group.attribute_str(attribute) == Some(value))
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Resource {
        Resource::new()
            .with_child(
                "server-group",
                "main-server-group",
                Resource::new()
                    .with_attribute("profile", "full")
                    .with_attribute("socket-binding-group", "full-sockets")
                    .with_child("deployment", "app.war", Resource::new()),
            )
            .with_child(
                "server-group",
                "other-server-group",
                Resource::new()
                    .with_attribute("profile", "full-ha")
                    .with_attribute("socket-binding-group", "full-sockets"),
            )
            .with_child(
                "host",
                "secondary",
                Resource::new().with_child(
                    "server-config",
                    "server-two",
                    Resource::new().with_attribute("group", "other-server-group"),
                ),
            )
    }

    fn scope(raw: &str) -> TargetScope {
        TargetScope::resolve(&model(), &PathAddress::resolve(raw).unwrap())
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn host_and_server_scopes() {
        assert_eq!(
            scope("/host=secondary"),
            TargetScope::Host {
                host: "secondary".into(),
                server_groups: BTreeSet::new()
            }
        );
        assert_eq!(
            scope("/host=secondary/server=server-two/subsystem=logging"),
            TargetScope::Host {
                host: "secondary".into(),
                server_groups: set(&["other-server-group"])
            }
        );
    }

    #[test]
    fn domain_content_scopes() {
        assert_eq!(scope("/profile=full"), TargetScope::ServerGroups(set(&["main-server-group"])));
        assert_eq!(
            scope("/socket-binding-group=full-sockets"),
            TargetScope::ServerGroups(set(&["main-server-group", "other-server-group"]))
        );
        assert_eq!(
            scope("/deployment=app.war"),
            TargetScope::ServerGroups(set(&["main-server-group"]))
        );
        assert!(scope("/").is_global());
        assert!(scope("/core-service=management").is_global());
    }

    #[test]
    fn membership_checks() {
        let main = set(&["main-server-group"]);
        assert_eq!(scope("/server-group=main-server-group").within_groups(&main), Some(true));
        assert_eq!(scope("/host=secondary/server-config=server-two").within_groups(&main), Some(false));
        assert_eq!(scope("/host=secondary").within_groups(&main), None);
        assert_eq!(scope("/host=secondary").within_hosts(&set(&["primary"])), Some(false));
        assert_eq!(scope("/profile=full").within_hosts(&set(&["primary"])), None);
    }
}
