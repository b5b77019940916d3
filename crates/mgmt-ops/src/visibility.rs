//! Operation visibility
//!
//! [`Visibility`] replaces independent private/hidden flags with one closed
//! variant. Call sites only ever ask the two projections:
//! [`Visibility::is_introspectable`] and [`Visibility::is_callable_from`].

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Who is invoking an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallerContext {
    /// Management client talking to the primary
    External,
    /// Primary controller issuing to a host controller
    DomainToHost,
    /// Host controller issuing to one of its servers
    HostToServer,
}

impl CallerContext {
    #[inline]
    #[must_use]
    pub fn is_internal(self) -> bool {
        !matches!(self, Self::External)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::DomainToHost => "domain-to-host",
            Self::HostToServer => "host-to-server",
        }
    }
}

impl Display for CallerContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility classification of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    /// Listed and callable by any authorized caller
    #[default]
    Public,
    /// Callable by any authorized caller, omitted from listings
    Hidden,
    /// Internal hops only (domain-to-host, host-to-server)
    Private,
    /// Hidden one level up: callable, omitted from listings
    DomainHidden,
    /// Primary-to-secondary only
    DomainPrivate,
}

impl Visibility {
    /// Every variant
    pub const ALL: [Self; 5] = [
        Self::Public,
        Self::Hidden,
        Self::Private,
        Self::DomainHidden,
        Self::DomainPrivate,
    ];

    /// Appears in operation listings
    #[inline]
    #[must_use]
    pub fn is_introspectable(self) -> bool {
        matches!(self, Self::Public)
    }

    /// Callable from the given caller context
    #[must_use]
    pub fn is_callable_from(self, caller: CallerContext) -> bool {
        match self {
            Self::Public | Self::Hidden | Self::DomainHidden => true,
            Self::Private => caller.is_internal(),
            Self::DomainPrivate => caller == CallerContext::DomainToHost,
        }
    }

    /// Callable when the only thing known is whether the caller is internal
    ///
    /// An internal caller is taken to be the primary issuing to a host.
    #[inline]
    #[must_use]
    pub fn is_callable_externally(self, caller_is_internal: bool) -> bool {
        let caller = if caller_is_internal {
            CallerContext::DomainToHost
        } else {
            CallerContext::External
        };
        self.is_callable_from(caller)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Hidden => "hidden",
            Self::Private => "private",
            Self::DomainHidden => "domain-hidden",
            Self::DomainPrivate => "domain-private",
        }
    }
}

impl Display for Visibility {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn external_caller_matrix() {
        let ext = CallerContext::External;
        assert!(Visibility::Public.is_callable_from(ext));
        assert!(Visibility::Hidden.is_callable_from(ext));
        assert!(Visibility::DomainHidden.is_callable_from(ext));
        assert!(!Visibility::Private.is_callable_from(ext));
        assert!(!Visibility::DomainPrivate.is_callable_from(ext));
    }

    #[test]
    fn domain_private_needs_domain_hop() {
        assert!(Visibility::DomainPrivate.is_callable_from(CallerContext::DomainToHost));
        assert!(!Visibility::DomainPrivate.is_callable_from(CallerContext::HostToServer));
        assert!(Visibility::Private.is_callable_from(CallerContext::HostToServer));
    }

    #[test]
    fn only_public_is_listed() {
        let listed: Vec<_> = Visibility::ALL
            .into_iter()
            .filter(|v| v.is_introspectable())
            .collect();
        assert_eq!(listed, vec![Visibility::Public]);
    }

    fn any_visibility() -> impl Strategy<Value = Visibility> {
        prop::sample::select(Visibility::ALL.to_vec())
    }

    fn any_caller() -> impl Strategy<Value = CallerContext> {
        prop::sample::select(vec![
            CallerContext::External,
            CallerContext::DomainToHost,
            CallerContext::HostToServer,
        ])
    }

    proptest! {
        #[test]
        fn prop_introspectable_implies_callable(v in any_visibility(), caller in any_caller()) {
            if v.is_introspectable() {
                prop_assert!(v.is_callable_from(caller));
            }
        }

        #[test]
        fn prop_domain_to_host_reaches_everything(v in any_visibility()) {
            prop_assert!(v.is_callable_from(CallerContext::DomainToHost));
        }

        #[test]
        fn prop_bool_projection_agrees(v in any_visibility(), internal in any::<bool>()) {
            let caller = if internal { CallerContext::DomainToHost } else { CallerContext::External };
            prop_assert_eq!(v.is_callable_externally(internal), v.is_callable_from(caller));
        }
    }
}
