//! Extension scripts.
//!
//! Extensions are small user-supplied scripts run against data on request.
//! Every invocation gets a fresh engine and scope, torn down when the call
//! returns, so nothing an extension does can leak into the next invocation
//! or into the server itself.
//!
//! Extensions declare the capabilities they need by name. Capabilities the
//! host already provides (registered functions on every engine) cost
//! nothing; only when a declared capability is missing from the host does
//! the loader build an isolated module environment from the extension's
//! module directory. The probe deciding "host-provided or not" is a trait so
//! tests can substitute their own answer.

use crate::config::ExtensionConfig;
use crate::error::{ServerError, ServerResult};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rhai::module_resolvers::FileModuleResolver;
use rhai::{Dynamic, Engine, Scope};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Decides whether a named capability is provided by the host itself.
pub trait CapabilityProbe: Send + Sync {
    fn provides(&self, capability: &str) -> bool;
}

/// Capabilities backed by functions registered on every engine.
pub const HOST_CAPABILITIES: &[&str] = &["base64", "json"];

/// Default probe: the static host capability table.
pub struct HostCapabilityProbe;

impl CapabilityProbe for HostCapabilityProbe {
    fn provides(&self, capability: &str) -> bool {
        HOST_CAPABILITIES.contains(&capability)
    }
}

/// Public description of one extension.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ExtensionSummary {
    /// Name to pass to run_extension.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Usage guidance for callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub enabled: bool,
}

/// Runs configured extensions.
pub struct ExtensionRunner {
    extensions: HashMap<String, ExtensionConfig>,
    /// Declaration order, for stable listings.
    order: Vec<String>,
    probe: Box<dyn CapabilityProbe>,
    environments_built: AtomicU64,
}

impl ExtensionRunner {
    pub fn new(configs: Vec<ExtensionConfig>) -> Self {
        Self::with_probe(configs, Box::new(HostCapabilityProbe))
    }

    pub fn with_probe(configs: Vec<ExtensionConfig>, probe: Box<dyn CapabilityProbe>) -> Self {
        let order: Vec<String> = configs.iter().map(|c| c.name.clone()).collect();
        let extensions = configs.into_iter().map(|c| (c.name.clone(), c)).collect();
        Self {
            extensions,
            order,
            probe,
            environments_built: AtomicU64::new(0),
        }
    }

    /// All configured extensions in declaration order, enabled or not.
    pub fn list(&self) -> Vec<ExtensionSummary> {
        self.order
            .iter()
            .filter_map(|name| self.extensions.get(name))
            .map(|ext| ExtensionSummary {
                name: ext.name.clone(),
                description: ext.description.clone(),
                prompt: ext.prompt.clone(),
                enabled: ext.enabled,
            })
            .collect()
    }

    /// Number of isolated module environments built so far. Stays at zero
    /// while every declared capability is host-provided.
    pub fn environments_built(&self) -> u64 {
        self.environments_built.load(Ordering::Relaxed)
    }

    /// Run one extension over the given input.
    ///
    /// The input is bound to the scope variable `input`; the script's final
    /// expression is the result, converted to JSON.
    pub fn run(&self, name: &str, input: &str) -> ServerResult<serde_json::Value> {
        let ext = self
            .extensions
            .get(name.trim())
            .filter(|e| e.enabled)
            .ok_or_else(|| ServerError::extension_not_found(name.trim()))?;

        if input.trim().is_empty() {
            return Err(ServerError::invalid_input(
                "Extension input must not be empty",
            ));
        }

        let script = self.load_script(ext)?;
        let engine = self.build_engine(ext)?;

        let mut scope = Scope::new();
        scope.push("input", input.to_string());

        debug!(extension = %ext.name, "evaluating extension");
        let value = engine
            .eval_with_scope::<Dynamic>(&mut scope, &script)
            .map_err(|e| ServerError::extension_eval(ext.name.clone(), e.to_string()))?;

        rhai::serde::from_dynamic::<serde_json::Value>(&value)
            .map_err(|e| ServerError::extension_eval(ext.name.clone(), e.to_string()))
        // Engine, scope, and any module resolver drop here; nothing survives
        // the invocation.
    }

    /// Resolve the script source for an extension.
    fn load_script(&self, ext: &ExtensionConfig) -> ServerResult<String> {
        if let Some(script) = &ext.script {
            return Ok(script.clone());
        }
        let dir = ext.script_dir.as_deref().ok_or_else(|| {
            ServerError::extension_env(ext.name.clone(), "no script or script_dir configured")
        })?;
        let path = Path::new(dir).join(ext.entry_or_default());
        std::fs::read_to_string(&path).map_err(|e| {
            error!(
                extension = %ext.name,
                path = %path.display(),
                error = %e,
                "cannot read extension entry script"
            );
            ServerError::extension_env(
                ext.name.clone(),
                format!("cannot read entry script '{}': {e}", path.display()),
            )
        })
    }

    /// Build the per-invocation engine: host functions always, an isolated
    /// module environment only when a required capability is not
    /// host-provided.
    fn build_engine(&self, ext: &ExtensionConfig) -> ServerResult<Engine> {
        let mut engine = Engine::new();
        register_host_functions(&mut engine);

        let missing: Vec<&str> = ext
            .requires
            .iter()
            .map(String::as_str)
            .filter(|cap| !self.probe.provides(cap))
            .collect();
        if missing.is_empty() {
            return Ok(engine);
        }

        let module_dir = ext.module_dir.as_deref().ok_or_else(|| {
            ServerError::extension_env(
                ext.name.clone(),
                format!(
                    "capabilities {:?} are not host-provided and no module_dir is configured",
                    missing
                ),
            )
        })?;
        if !Path::new(module_dir).is_dir() {
            return Err(ServerError::extension_env(
                ext.name.clone(),
                format!("module_dir '{}' does not exist", module_dir),
            ));
        }

        info!(
            extension = %ext.name,
            module_dir,
            missing = ?missing,
            "building isolated module environment"
        );
        engine.set_module_resolver(FileModuleResolver::new_with_path(module_dir));
        self.environments_built.fetch_add(1, Ordering::Relaxed);
        Ok(engine)
    }
}

/// Functions available to every extension, backing [`HOST_CAPABILITIES`].
fn register_host_functions(engine: &mut Engine) {
    engine.register_fn("base64_encode", |s: &str| BASE64.encode(s.as_bytes()));
    engine.register_fn("base64_decode", |s: &str| {
        BASE64
            .decode(s.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    });
    engine.register_fn("json_parse", |s: &str| -> Dynamic {
        serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .and_then(|v| rhai::serde::to_dynamic(v).ok())
            .unwrap_or(Dynamic::UNIT)
    });
}
