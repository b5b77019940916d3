//! Resources of the management tree
//!
//! A [`Resource`] holds ordered attributes and ordered children grouped by
//! child type. Its address is derived from its position in the tree.

use crate::address::{PathAddress, PathElement};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

/// Runtime state carried by hosts and servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeState {
    Starting,
    Running,
    Stopping,
    Stopped,
    ReloadRequired,
}

impl RuntimeState {
    /// Wire name (`running`, `reload-required`, ...)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ReloadRequired => "reload-required",
        }
    }

    /// A live process is attached to the resource
    #[inline]
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::ReloadRequired)
    }
}

impl Display for RuntimeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a resource cannot be detached from the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Resource is marked protected
    Protected,
    /// Resource has a live runtime
    Live(RuntimeState),
}

impl Display for Binding {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protected => f.write_str("protected"),
            Self::Live(state) => write!(f, "{state}"),
        }
    }
}

/// Node of the resource tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Resource {
    #[serde(default)]
    attributes: IndexMap<String, Value>,
    #[serde(default)]
    runtime_attributes: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    read_only: BTreeSet<String>,
    #[serde(default)]
    children: IndexMap<String, IndexMap<String, Resource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runtime_state: Option<RuntimeState>,
    #[serde(default)]
    protected: bool,
}

/// Options for rendering a resource as a management value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub recursive: bool,
    pub include_runtime: bool,
}

/// Filter verdict for a resource being rendered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderFilter {
    /// Resource is omitted entirely
    pub hidden: bool,
    /// Attributes omitted from the rendered resource
    pub hidden_attributes: Vec<String>,
}

impl RenderFilter {
    /// Render everything
    #[inline]
    #[must_use]
    pub fn visible() -> Self {
        Self::default()
    }

    /// Omit the resource
    #[inline]
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            hidden: true,
            hidden_attributes: Vec::new(),
        }
    }
}

impl Resource {
    /// Create empty resource
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create resource from attribute map
    #[must_use]
    pub fn from_attributes(attributes: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            attributes: attributes.into_iter().collect(),
            ..Self::default()
        }
    }

    /// With attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// With attribute that `write-attribute` cannot change
    #[must_use]
    pub fn with_read_only_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        let name = name.into();
        self.read_only.insert(name.clone());
        self.attributes.insert(name, value.into());
        self
    }

    /// With runtime attribute
    #[must_use]
    pub fn with_runtime_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.runtime_attributes.insert(name.into(), value.into());
        self
    }

    /// With runtime state
    #[must_use]
    pub fn with_runtime_state(mut self, state: RuntimeState) -> Self {
        self.runtime_state = Some(state);
        self
    }

    /// Mark as protected
    #[must_use]
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    /// Declare a child type so it shows up in reads even when empty
    #[must_use]
    pub fn with_child_type(mut self, key: impl Into<String>) -> Self {
        self.children.entry(key.into()).or_default();
        self
    }

    /// With child resource
    #[must_use]
    pub fn with_child(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        child: Resource,
    ) -> Self {
        self.insert_child(key, name, child);
        self
    }

    #[inline]
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Attribute as string slice
    #[must_use]
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    #[inline]
    #[must_use]
    pub fn attributes(&self) -> &IndexMap<String, Value> {
        &self.attributes
    }

    #[inline]
    #[must_use]
    pub fn runtime_attribute(&self, name: &str) -> Option<&Value> {
        self.runtime_attributes.get(name)
    }

    #[inline]
    #[must_use]
    pub fn runtime_attributes(&self) -> &IndexMap<String, Value> {
        &self.runtime_attributes
    }

    /// Set attribute without read-only checks, returning the previous value
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(name.into(), value)
    }

    /// Set runtime attribute
    pub fn set_runtime_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.runtime_attributes.insert(name.into(), value);
    }

    #[inline]
    #[must_use]
    pub fn is_read_only(&self, name: &str) -> bool {
        self.read_only.contains(name)
    }

    #[inline]
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    #[inline]
    #[must_use]
    pub fn runtime_state(&self) -> Option<RuntimeState> {
        self.runtime_state
    }

    /// Set runtime state
    pub fn set_runtime_state(&mut self, state: RuntimeState) {
        self.runtime_state = Some(state);
    }

    /// Why this resource (alone) cannot be detached
    #[must_use]
    pub fn binding(&self) -> Option<Binding> {
        if self.protected {
            return Some(Binding::Protected);
        }
        self.runtime_state
            .filter(|s| s.is_live())
            .map(Binding::Live)
    }

    /// First binding found in this resource or any descendant
    ///
    /// Returns the relative address of the bound resource.
    #[must_use]
    pub fn find_binding(&self) -> Option<(PathAddress, Binding)> {
        self.find_binding_at(&PathAddress::root())
    }

    fn find_binding_at(&self, here: &PathAddress) -> Option<(PathAddress, Binding)> {
        if let Some(binding) = self.binding() {
            return Some((here.clone(), binding));
        }
        self.children.iter().find_map(|(key, named)| {
            named
                .iter()
                .find_map(|(name, child)| child.find_binding_at(&here.child(key, name)))
        })
    }

    /// Get child by type and name
    #[inline]
    #[must_use]
    pub fn child(&self, key: &str, name: &str) -> Option<&Resource> {
        self.children.get(key).and_then(|named| named.get(name))
    }

    /// Get mutable child by type and name
    #[inline]
    pub fn child_mut(&mut self, key: &str, name: &str) -> Option<&mut Resource> {
        self.children.get_mut(key).and_then(|named| named.get_mut(name))
    }

    /// Children of one type in insertion order
    pub fn children_of<'a>(
        &'a self,
        key: &str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.children.get(key).into_iter().flat_map(IndexMap::iter)
    }

    /// Mutable children of one type
    pub fn children_of_mut<'a>(
        &'a mut self,
        key: &str,
    ) -> impl Iterator<Item = (&'a String, &'a mut Resource)> + 'a {
        self.children
            .get_mut(key)
            .into_iter()
            .flat_map(IndexMap::iter_mut)
    }

    /// Names of children of one type
    #[must_use]
    pub fn child_names(&self, key: &str) -> Vec<String> {
        self.children_of(key).map(|(name, _)| name.clone()).collect()
    }

    /// Declared child types
    pub fn child_types(&self) -> impl Iterator<Item = &String> {
        self.children.keys()
    }

    /// Copy with only the children of the types `keep` accepts
    ///
    /// Other child types stay declared but empty.
    #[must_use]
    pub fn pruned(&self, keep: impl Fn(&str) -> bool) -> Self {
        let children = self
            .children
            .iter()
            .map(|(key, named)| {
                let named = if keep(key) { named.clone() } else { IndexMap::new() };
                (key.clone(), named)
            })
            .collect();
        Self {
            attributes: self.attributes.clone(),
            runtime_attributes: self.runtime_attributes.clone(),
            read_only: self.read_only.clone(),
            children,
            runtime_state: self.runtime_state,
            protected: self.protected,
        }
    }

    /// Check whether a child type is declared
    #[inline]
    #[must_use]
    pub fn has_child_type(&self, key: &str) -> bool {
        self.children.contains_key(key)
    }

    /// Insert or replace child
    pub fn insert_child(
        &mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        child: Resource,
    ) -> Option<Resource> {
        self.children
            .entry(key.into())
            .or_default()
            .insert(name.into(), child)
    }

    /// Detach child (the child type stays declared)
    pub fn remove_child(&mut self, key: &str, name: &str) -> Option<Resource> {
        self.children
            .get_mut(key)
            .and_then(|named| named.shift_remove(name))
    }

    /// Navigate to a descendant (no wildcards)
    #[must_use]
    pub fn navigate(&self, address: &PathAddress) -> Option<&Resource> {
        address
            .iter()
            .try_fold(self, |node, e| node.child(e.key(), e.value()))
    }

    /// Navigate to a mutable descendant (no wildcards)
    pub fn navigate_mut(&mut self, address: &PathAddress) -> Option<&mut Resource> {
        let mut node = self;
        for element in address {
            node = node.child_mut(element.key(), element.value())?;
        }
        Some(node)
    }

    /// Expand wildcards against existing children
    ///
    /// Returns the concrete addresses (relative to `self`) of every resource
    /// selected by `pattern`, in tree order.
    #[must_use]
    pub fn expand(&self, pattern: &PathAddress) -> Vec<PathAddress> {
        let mut current = vec![(PathAddress::root(), self)];
        for element in pattern {
            current = current
                .into_iter()
                .flat_map(|(addr, node)| select_children(node, element, &addr))
                .collect();
            if current.is_empty() {
                break;
            }
        }
        current.into_iter().map(|(addr, _)| addr).collect()
    }

    /// Render as a management value
    #[must_use]
    pub fn render(&self, options: RenderOptions) -> Value {
        self.render_with(&PathAddress::root(), options, &mut |_, _| RenderFilter::visible())
    }

    /// Render as a management value, consulting `filter` for every resource
    ///
    /// `address` is the address of `self`; the filter receives each child's
    /// full address. The filter verdict for `self` is applied to its attributes
    /// only, a hidden root still renders as an empty object.
    pub fn render_with<F>(&self, address: &PathAddress, options: RenderOptions, filter: &mut F) -> Value
    where
        F: FnMut(&PathAddress, &Resource) -> RenderFilter,
    {
        let verdict = filter(address, self);
        self.render_filtered(address, options, &verdict, filter)
    }

    fn render_filtered<F>(
        &self,
        address: &PathAddress,
        options: RenderOptions,
        verdict: &RenderFilter,
        filter: &mut F,
    ) -> Value
    where
        F: FnMut(&PathAddress, &Resource) -> RenderFilter,
    {
        let mut out = Map::new();
        if verdict.hidden {
            return Value::Object(out);
        }

        let hidden = &verdict.hidden_attributes;
        for (name, value) in &self.attributes {
            if !hidden.contains(name) {
                out.insert(name.clone(), value.clone());
            }
        }
        if options.include_runtime {
            if let Some(state) = self.runtime_state {
                out.entry("runtime-state")
                    .or_insert_with(|| Value::String(state.as_str().to_string()));
            }
            for (name, value) in &self.runtime_attributes {
                if !hidden.contains(name) {
                    out.insert(name.clone(), value.clone());
                }
            }
        }

        for (key, named) in &self.children {
            let mut rendered = Map::new();
            for (name, child) in named {
                let child_address = address.child(key, name);
                let child_verdict = filter(&child_address, child);
                if child_verdict.hidden {
                    continue;
                }
                let value = if options.recursive {
                    child.render_filtered(&child_address, options, &child_verdict, filter)
                } else {
                    Value::Null
                };
                rendered.insert(name.clone(), value);
            }
            let value = if rendered.is_empty() {
                Value::Null
            } else {
                Value::Object(rendered)
            };
            out.insert(key.clone(), value);
        }
        Value::Object(out)
    }
}

fn select_children<'a>(
    node: &'a Resource,
    element: &PathElement,
    base: &PathAddress,
) -> Vec<(PathAddress, &'a Resource)> {
    node.children_of(element.key())
        .filter(|(name, _)| element.matches(element.key(), name))
        .map(|(name, child)| (base.child(element.key(), name.as_str()), child))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn host() -> Resource {
        Resource::new()
            .with_attribute("name", "primary")
            .with_runtime_attribute("host-state", "running")
            .with_child(
                "server-config",
                "server-one",
                Resource::new().with_attribute("group", "main-server-group"),
            )
            .with_child(
                "server-config",
                "server-two",
                Resource::new().with_attribute("group", "other-server-group"),
            )
            .with_child_type("interface")
    }

    #[test]
    fn render_non_recursive_lists_child_names() {
        let rendered = host().render(RenderOptions::default());
        assert_eq!(
            rendered,
            json!({
                "name": "primary",
                "server-config": {"server-one": null, "server-two": null},
                "interface": null
            })
        );
    }

    #[test]
    fn render_recursive_with_runtime() {
        let rendered = host().render(RenderOptions {
            recursive: true,
            include_runtime: true,
        });
        assert_eq!(rendered["host-state"], json!("running"));
        assert_eq!(
            rendered["server-config"]["server-one"]["group"],
            json!("main-server-group")
        );
    }

    #[test]
    fn render_with_filter_elides_children_and_attributes() {
        let mut filter = |addr: &PathAddress, _: &Resource| {
            if addr.value_of("server-config") == Some("server-two") {
                RenderFilter::hidden()
            } else if addr.is_empty() {
                RenderFilter {
                    hidden: false,
                    hidden_attributes: vec!["name".to_string()],
                }
            } else {
                RenderFilter::visible()
            }
        };
        let rendered = host().render_with(
            &PathAddress::root(),
            RenderOptions {
                recursive: true,
                include_runtime: false,
            },
            &mut filter,
        );
        assert!(rendered.get("name").is_none());
        assert!(rendered["server-config"].get("server-two").is_none());
        assert!(rendered["server-config"].get("server-one").is_some());
    }

    #[test]
    fn navigate_and_expand() {
        let root = Resource::new().with_child("host", "primary", host());
        let addr = PathAddress::resolve("/host=primary/server-config=server-two").unwrap();
        assert!(root.navigate(&addr).is_some());

        let pattern = PathAddress::resolve("/host=*/server-config=*").unwrap();
        let expanded = root.expand(&pattern);
        assert_eq!(expanded.len(), 2);
        assert_eq!(
            expanded[1].to_string(),
            "/host=primary/server-config=server-two"
        );

        let missing = PathAddress::resolve("/host=nope/server-config=*").unwrap();
        assert!(root.expand(&missing).is_empty());
    }

    #[test]
    fn bindings_found_in_descendants() {
        let mut root = Resource::new().with_child("host", "primary", host());
        assert!(root.find_binding().is_none());

        let addr = PathAddress::resolve("/host=primary/server-config=server-one").unwrap();
        root.navigate_mut(&addr)
            .unwrap()
            .set_runtime_state(RuntimeState::Running);
        let (at, binding) = root.find_binding().unwrap();
        assert_eq!(at, addr);
        assert_eq!(binding, Binding::Live(RuntimeState::Running));

        let stopped = Resource::new().with_runtime_state(RuntimeState::Stopped);
        assert!(stopped.binding().is_none());
        assert_eq!(Resource::new().protected().binding(), Some(Binding::Protected));
    }

    #[test]
    fn pruned_keeps_selected_types() {
        let root = Resource::new()
            .with_attribute("name", "domain")
            .with_child("profile", "default", Resource::new().with_attribute("x", 1))
            .with_child("host", "primary", host());
        let view = root.pruned(|key| key == "host");
        assert_eq!(view.attribute_str("name"), Some("domain"));
        assert!(view.has_child_type("profile"));
        assert!(view.child_names("profile").is_empty());
        assert_eq!(view.child("host", "primary"), root.child("host", "primary"));
    }

    #[test]
    fn remove_child_keeps_type() {
        let mut h = host();
        assert!(h.remove_child("server-config", "server-one").is_some());
        assert!(h.remove_child("server-config", "server-one").is_none());
        assert_eq!(h.child_names("server-config"), vec!["server-two".to_string()]);
    }

    #[test]
    fn serde_round_trip_preserves_structure() {
        let h = host().with_read_only_attribute("management-major-version", 4);
        let value = serde_json::to_value(&h).unwrap();
        let back: Resource = serde_json::from_value(value).unwrap();
        assert_eq!(back, h);
        assert!(back.is_read_only("management-major-version"));
    }
}
