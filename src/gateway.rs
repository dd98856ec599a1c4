//! Request pipeline: handler lookup, ACL gate, manifest execution.
//!
//! ```text
//! ApiRequest ─► handler(path, method) ─► enabled? ─► anonymous allowed?
//!            ─► DecisionEngine::authorize ─► manifest (AUTH.* filters) ─► ApiResponse
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::acl::capabilities;
use crate::acl::decision::{AuthError, DecisionEngine};
use crate::acl::model::{Method, Requester};
use crate::acl::store::PermissionStore;
use crate::capability::{builtin, CallScope, CapabilityRegistry, RegistryBuilder};
use crate::config::Config;
use crate::manifest::{request_data, ManifestEngine, ManifestError};
use crate::response::{status_message, ApiResponse, DebugInfo, ErrorPayload};

/// An inbound request, after transport and authentication.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Handler path.
    pub path: String,
    /// Request method.
    pub method: Method,
    /// Authenticated caller, or anonymous.
    pub requester: Requester,
    /// Request data (JSON object or null).
    pub data: serde_json::Value,
}

/// Anything that ends a request early.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Handler lookup or authorization failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Manifest compilation or execution failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl GatewayError {
    /// Numeric status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::Auth(e) => e.status(),
            Self::Manifest(e) => e.status(),
        }
    }

    /// Render for the caller; `debug` adds exception details to 500-class errors.
    pub fn payload(&self, debug: bool) -> ErrorPayload {
        let code = self.status();
        let error = match self {
            Self::Manifest(e) => e
                .auth_error()
                .map_or_else(|| e.to_string(), ToString::to_string),
            Self::Auth(e) => e.to_string(),
        };
        ErrorPayload {
            message: status_message(code).to_owned(),
            error,
            code,
            debug: (debug && code >= 500).then(|| DebugInfo::from_error(self)),
        }
    }
}

/// Registry builder with the built-ins and the `AUTH.*` checks for `store`.
///
/// Callers add their business capabilities before building.
pub fn registry_builder(store: Arc<dyn PermissionStore>, config: &Config) -> RegistryBuilder {
    capabilities::register(
        builtin::standard(config.engine.capability_root.clone()),
        store,
        config.acl.admin_group.clone(),
    )
}

/// Gates and runs requests.
#[derive(Debug, Clone)]
pub struct Gateway {
    decisions: DecisionEngine,
    engine: ManifestEngine,
    debug: bool,
}

impl Gateway {
    /// Create a gateway over `store`, running manifests against `registry`.
    pub fn new(store: Arc<dyn PermissionStore>, registry: CapabilityRegistry, config: &Config) -> Self {
        Self {
            decisions: DecisionEngine::new(store, config.acl.enabled),
            engine: ManifestEngine::new(registry),
            debug: config.engine.debug,
        }
    }

    /// The manifest engine.
    pub fn engine(&self) -> &ManifestEngine {
        &self.engine
    }

    /// Run a request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] for a missing or disabled handler, an
    /// authorization failure, or a manifest failure.
    pub fn handle(&self, request: ApiRequest) -> Result<ApiResponse, GatewayError> {
        let ApiRequest {
            path,
            method,
            requester,
            data,
        } = request;

        let handler = self
            .decisions
            .store()
            .handler(&path, method)
            .ok_or_else(|| AuthError::NotFound(format!("no handler for {method} {path}")))?;

        if !handler.enabled {
            return Err(AuthError::HandlerDisabled(format!("{method} {path}")).into());
        }
        if requester.is_anonymous() && !handler.allow_anon {
            return Err(AuthError::AnonymousNotAllowed(format!("{method} {path}")).into());
        }

        let access = self.decisions.authorize(&handler, &requester)?;
        let data = request_data(data)?;
        let scope = CallScope::new(requester, access);

        let result = self.engine.execute(&handler.manifest, &scope, data)?;
        info!(
            request = %scope.request_id,
            handler = %handler.id,
            %method,
            %path,
            "request successful"
        );
        Ok(ApiResponse::ok(result))
    }

    /// Run a request, rendering failures as [`ErrorPayload`]s.
    ///
    /// # Errors
    ///
    /// Returns the rendered payload of any [`GatewayError`].
    pub fn respond(&self, request: ApiRequest) -> Result<ApiResponse, ErrorPayload> {
        let (method, path) = (request.method, request.path.clone());
        self.handle(request).map_err(|err| {
            let payload = err.payload(self.debug);
            if payload.code >= 500 {
                error!(%method, %path, code = payload.code, error = %err, "request failed");
            } else {
                warn!(%method, %path, code = payload.code, error = %err, "request rejected");
            }
            payload
        })
    }
}
