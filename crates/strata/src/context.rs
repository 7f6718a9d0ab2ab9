// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use uuid::Uuid;

/// Per-request data carried through a cache call.
///
/// The correlation id tags every telemetry event the call emits. The tenant, when set,
/// becomes part of generated keys so tenants never share entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    correlation_id: Uuid,
    tenant_id: Option<String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Creates a context with a fresh random correlation id and no tenant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            tenant_id: None,
        }
    }

    /// Replaces the correlation id, typically with one received from an upstream caller.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Scopes the request to a tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Identifier attached to every event emitted for this request.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// The tenant, if one was set.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}
