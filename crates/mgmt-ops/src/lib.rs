//! Operation registry
//!
//! Per-resource-type catalog of management operations with their visibility
//! classification.
//!
//! # Core Concepts
//!
//! - [`Visibility`]: closed classification with explicit projections
//! - [`CallerContext`]: who is invoking (external client or internal hop)
//! - [`OperationDescriptor`]: immutable description registered once per type
//! - [`OperationRegistry`]: thread-safe catalog holding a handler per entry

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod descriptor;
mod registry;
mod visibility;

pub use descriptor::{ActionEffect, OperationDescriptor, ParameterDescriptor, ValueType};
pub use registry::{OperationRegistry, RegisteredOperation, RegistryError, GLOBAL_TYPE};
pub use visibility::{CallerContext, Visibility};
