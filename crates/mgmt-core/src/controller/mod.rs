//! Domain and host controllers
//!
//! The [`DomainController`] runs on the primary host and is the only entry
//! point for external clients. Every host, the primary included, runs a
//! [`HostController`] that owns its servers; the domain controller reaches
//! them through the [`HostRouter`].

mod domain;
mod host;
mod router;

pub use domain::{ControllerState, DomainController};
pub use host::HostController;
pub use router::HostRouter;
