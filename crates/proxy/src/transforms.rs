//! Optional request/response interceptor pipeline.
//!
//! Modules run in the configured order for a route. A module failure is
//! logged and the next module runs; a module never fails the whole request.
//! Only built-in modules exist: file-loaded scripts are refused regardless
//! of `allow_scripts`.

use relay_catalog::mapping;
use relay_config::TransformsConfig;
use relay_types::{RelayError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Context handed to each module.
pub struct TransformCtx<'a> {
    pub route: &'a str,
}

/// Outbound header overrides accumulated by request-side modules; merged
/// into the upstream call after the client's fixed header set, so later
/// entries win.
pub type HeaderOverrides = Vec<(String, String)>;

/// One named interceptor. Both hooks default to no-ops.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Request-side hook: `(ctx, payload) -> {payload?, headers?}`. Mutates
    /// the upstream payload in place and may push outbound header
    /// overrides.
    ///
    /// # Errors
    ///
    /// An error is logged by the pipeline and the next module runs.
    fn on_request(
        &self,
        _ctx: &TransformCtx<'_>,
        _payload: &mut Value,
        _headers: &mut HeaderOverrides,
    ) -> Result<()> {
        Ok(())
    }

    /// Response-side hook; mutates the upstream JSON in place.
    ///
    /// # Errors
    ///
    /// An error is logged by the pipeline and the next module runs.
    fn on_response(&self, _ctx: &TransformCtx<'_>, _json: &mut Value) -> Result<()> {
        Ok(())
    }
}

/// Rewrites `payload.model` through the built-in static map and prefix
/// rules.
struct ModelRouter;

impl Transform for ModelRouter {
    fn name(&self) -> &'static str {
        "model-router"
    }

    fn on_request(
        &self,
        _ctx: &TransformCtx<'_>,
        payload: &mut Value,
        _headers: &mut HeaderOverrides,
    ) -> Result<()> {
        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidRequest("payload has no model".into()))?;
        if let Some(mapped) = mapping::builtin_resolve(model) {
            payload["model"] = Value::String(mapped);
        }
        Ok(())
    }
}

/// Placeholder for Claude Code specific rewrites; disabled by default and
/// currently a no-op.
struct ClaudeCode;

impl Transform for ClaudeCode {
    fn name(&self) -> &'static str {
        "claude-code"
    }
}

/// Holds the built-in modules and runs configured pipelines.
pub struct TransformRegistry {
    modules: HashMap<&'static str, Arc<dyn Transform>>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut modules: HashMap<&'static str, Arc<dyn Transform>> = HashMap::new();
        for module in [
            Arc::new(ModelRouter) as Arc<dyn Transform>,
            Arc::new(ClaudeCode) as Arc<dyn Transform>,
        ] {
            modules.insert(module.name(), module);
        }
        Self { modules }
    }

    /// Adds a module; embedders may extend the built-in set. The module
    /// still only runs when named in the configured allow-list.
    pub fn register(&mut self, module: Arc<dyn Transform>) {
        self.modules.insert(module.name(), module);
    }

    /// Runs the request-side pipeline configured for `route`, returning the
    /// outbound header overrides the modules accumulated.
    pub fn apply_request(
        &self,
        config: &TransformsConfig,
        route: &str,
        payload: &mut Value,
    ) -> HeaderOverrides {
        let mut headers = HeaderOverrides::new();
        self.run(config, route, |module, ctx| {
            module.on_request(ctx, payload, &mut headers)
        });
        headers
    }

    /// Runs the response-side pipeline configured for `route`.
    pub fn apply_response(&self, config: &TransformsConfig, route: &str, json: &mut Value) {
        self.run(config, route, |module, ctx| module.on_response(ctx, json));
    }

    fn run<F>(&self, config: &TransformsConfig, route: &str, mut hook: F)
    where
        F: FnMut(&dyn Transform, &TransformCtx<'_>) -> Result<()>,
    {
        if !config.enabled {
            return;
        }
        let Some(pipeline) = config.pipelines.get(route) else {
            return;
        };
        let ctx = TransformCtx { route };
        for name in pipeline {
            if !config.registry.iter().any(|allowed| allowed == name) {
                tracing::warn!(module = %name, route, "transform not in registry, skipping");
                continue;
            }
            let Some(module) = self.modules.get(name.as_str()) else {
                tracing::warn!(
                    module = %name,
                    route,
                    "transform has no built-in implementation (script modules are not loaded), skipping"
                );
                continue;
            };
            if let Err(e) = hook(module.as_ref(), &ctx) {
                tracing::warn!(module = %name, route, error = %e, "transform failed, continuing");
            }
        }
    }
}
