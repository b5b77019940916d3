//! Domain management plane
//!
//! Controllers executing addressed management operations across a
//! multi-host domain.
//!
//! # Core Concepts
//!
//! - [`DomainController`]: entry point for external clients on the primary
//! - [`HostController`]: owns one host's servers and model
//! - [`RolloutCoordinator`]: applies a server operation across server-groups
//! - [`TopologyManager`]: sessions from the primary to every secondary
//! - [`DomainBuilder`]: assembles an in-process domain from a [`DomainBootstrap`]
//!
//! # Example
//!
//! ```rust,no_run
//! use mgmt_core::{DomainBootstrap, DomainBuilder, OperationRequest};
//! use mgmt_model::PathAddress;
//!
//! # async fn run() -> Result<(), mgmt_core::ManagementError> {
//! let bootstrap = DomainBootstrap::load("domain.toml".as_ref())?;
//! let domain = DomainBuilder::new(bootstrap).boot().await?;
//! let response = domain
//!     .execute("admin", OperationRequest::new(PathAddress::root(), "read-resource"))
//!     .await;
//! println!("{}", response.to_json());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod bootstrap;
pub mod config;
pub mod content;
pub mod controller;
pub mod domain;
pub mod error;
pub mod extension;
pub mod handlers;
pub mod launcher;
pub mod request;
pub mod rollout;
pub mod topology;

pub use bootstrap::DomainBootstrap;
pub use config::{ControllerConfig, DefaultPlan, ReconnectConfig, ReloadConfig, RolloutConfig};
pub use controller::{ControllerState, DomainController, HostController, HostRouter};
pub use domain::{Domain, DomainBuilder};
pub use error::{ErrorKind, ManagementError};
pub use extension::{ConstantHandler, Extension, ExtensionRegistrar, OperationContext, OperationHandler};
pub use launcher::{InMemoryLauncher, LaunchError, ServerLauncher};
pub use request::{OperationHeaders, OperationRequest, OperationResponse, Outcome};
pub use rollout::{RolloutCoordinator, RolloutError, RolloutPlan, RolloutReport, StepPolicy};
pub use topology::{InProcessConnector, SessionState, TopologyError, TopologyManager};
