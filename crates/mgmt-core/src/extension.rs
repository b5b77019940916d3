//! Extension interface
//!
//! Extensions contribute operations to the domain and host controllers.
//! They are linked in and installed through
//! [`DomainBuilder::with_extension`](crate::domain::DomainBuilder::with_extension);
//! nothing is loaded dynamically.

use crate::error::ManagementError;
use crate::request::OperationRequest;
use async_trait::async_trait;
use mgmt_model::ResourceTree;
use mgmt_ops::{CallerContext, OperationDescriptor};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// What a handler sees while executing
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Model of the controller running the handler
    pub tree: Arc<ResourceTree>,
    pub caller: CallerContext,
    /// Host name when running on a host controller
    pub host: Option<String>,
}

/// Handler contributed by an extension
#[async_trait]
pub trait OperationHandler: Send + Sync + Debug {
    /// Execute `request` and produce its result
    async fn execute(
        &self,
        context: &OperationContext,
        request: &OperationRequest,
    ) -> Result<Value, ManagementError>;
}

/// A linked-in bundle of operations
pub trait Extension: Send + Sync + Debug {
    /// Module name, added as `extension=<name>` to the domain model
    fn name(&self) -> &str;

    /// Register the extension's operations
    ///
    /// # Errors
    /// Whatever the extension reports; boot fails with it.
    fn initialize(&self, registrar: &mut ExtensionRegistrar) -> Result<(), ManagementError>;
}

/// Collects the operations of one extension
#[derive(Debug, Default)]
pub struct ExtensionRegistrar {
    operations: Vec<(OperationDescriptor, Arc<dyn OperationHandler>)>,
}

impl ExtensionRegistrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `descriptor`
    pub fn register_operation(
        &mut self,
        descriptor: OperationDescriptor,
        handler: Arc<dyn OperationHandler>,
    ) {
        self.operations.push((descriptor, handler));
    }

    #[must_use]
    pub fn operations(&self) -> &[(OperationDescriptor, Arc<dyn OperationHandler>)] {
        &self.operations
    }

    #[must_use]
    pub fn into_operations(self) -> Vec<(OperationDescriptor, Arc<dyn OperationHandler>)> {
        self.operations
    }
}

/// Handler returning a fixed value
#[derive(Debug, Clone)]
pub struct ConstantHandler(pub Value);

#[async_trait]
impl OperationHandler for ConstantHandler {
    async fn execute(
        &self,
        _context: &OperationContext,
        _request: &OperationRequest,
    ) -> Result<Value, ManagementError> {
        Ok(self.0.clone())
    }
}
