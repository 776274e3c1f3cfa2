//! Layered configuration loader with requirement constraints.
//!
//! Discovers configuration layers (system/user/project/etc), validates the
//! schema of each, merges them under optional requirement constraints, and
//! produces a validated `AgenticConfig`.

mod layer_io;
mod merge;
mod schema;


use crate::{AgenticConfig, ConfigError, MemoryBackend};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config filename in local layers.
const DEFAULT_CONFIG_FILE: &str = "agentic.json5";
/// Default config directory under user or repo roots.
const DEFAULT_CONFIG_DIR: &str = ".agentic";
/// Marker files/dirs that identify a project root.
const DEFAULT_PROJECT_ROOT_MARKERS: &[&str] = &[".git"];

#[cfg(unix)]
const SYSTEM_CONFIG_PATH: &str = "/etc/agentic/agentic.json5";
#[cfg(unix)]
const SYSTEM_REQUIREMENTS_PATH: &str = "/etc/agentic/requirements.json5";
#[cfg(windows)]
const SYSTEM_CONFIG_PATH: &str = "C:\\ProgramData\\agentic\\agentic.json5";
#[cfg(windows)]
const SYSTEM_REQUIREMENTS_PATH: &str = "C:\\ProgramData\\agentic\\requirements.json5";

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// The merged, validated config.
    pub config: AgenticConfig,
    /// Metadata for each layer considered during load.
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// Immutable requirements constraints.
    Requirements,
    /// System-wide configuration.
    System,
    /// User-specific configuration.
    User,
    /// Project root configuration.
    Project,
    /// Current working directory configuration.
    Cwd,
    /// Repo-local configuration.
    Repo,
    /// Runtime overrides (highest precedence).
    Runtime,
}

impl ConfigLayerSource {
    /// Short label used in logs and schema errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirements => "requirements",
            Self::System => "system",
            Self::User => "user",
            Self::Project => "project",
            Self::Cwd => "cwd",
            Self::Repo => "repo",
            Self::Runtime => "runtime",
        }
    }
}

/// A config layer that was found and merged.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    /// Layer origin (system, user, runtime, etc).
    pub source: ConfigLayerSource,
    /// Location on disk.
    pub path: PathBuf,
}

/// Options controlling layered config discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Working directory used to locate project, cwd and repo layers.
    pub cwd: PathBuf,
    /// System config path (defaults to `/etc/agentic/agentic.json5` on Unix).
    pub system_config_path: Option<PathBuf>,
    /// User config path (defaults to `~/.agentic/agentic.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Requirements file whose keys lock values against every other layer.
    pub requirements_path: Option<PathBuf>,
    /// Runtime override config paths applied last; each must exist.
    pub runtime_paths: Vec<PathBuf>,
    /// Marker files/dirs used to detect the project root.
    pub project_root_markers: Vec<String>,
}

impl LayeredConfigOptions {
    /// Create options with default layer locations for the provided cwd.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: layer_io::default_system_config_path(),
            user_config_path: layer_io::default_user_config_path(),
            requirements_path: layer_io::default_requirements_path(),
            runtime_paths: Vec::new(),
            project_root_markers: DEFAULT_PROJECT_ROOT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }

    /// Add a runtime override config path that is applied last.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl AgenticConfig {
    /// Load a single config file (no layering).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        Self::load_from_str(&contents)
    }

    /// Load a single config from JSON5 contents (no layering).
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    /// Load a layered config stack using the default layer locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load a layered config stack using explicit layer locations and overrides.
    ///
    /// Layer precedence (low -> high): requirements (constraints), system, user,
    /// project, cwd, repo, runtime overrides. A requirement key cannot be
    /// overridden by any later layer.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = layer_io::normalize_path(&options.cwd)?;
        info!("loading layered config (cwd={})", cwd.display());

        let requirements = match options.requirements_path.as_deref() {
            Some(path) => layer_io::load_optional_layer(ConfigLayerSource::Requirements, path)?,
            None => None,
        };

        let project_root = layer_io::find_project_root(&cwd, &options.project_root_markers);
        match project_root.as_ref() {
            Some(root) => debug!("resolved project root: {}", root.display()),
            None => debug!("project root not found; skipping project/repo layers"),
        }

        let mut candidates: Vec<(ConfigLayerSource, PathBuf)> = Vec::new();
        if let Some(path) = options.system_config_path {
            candidates.push((ConfigLayerSource::System, path));
        }
        if let Some(path) = options.user_config_path {
            candidates.push((ConfigLayerSource::User, path));
        }
        if let Some(root) = project_root.as_ref() {
            candidates.push((ConfigLayerSource::Project, root.join(DEFAULT_CONFIG_FILE)));
        }
        candidates.push((ConfigLayerSource::Cwd, cwd.join(DEFAULT_CONFIG_FILE)));
        if let Some(root) = project_root.as_ref() {
            candidates.push((
                ConfigLayerSource::Repo,
                root.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE),
            ));
        }

        let mut loaded = Vec::new();
        let mut seen_paths = HashSet::new();
        if let Some(layer) = requirements.as_ref() {
            seen_paths.insert(layer_io::dedup_key(&layer.meta.path));
        }
        for (source, path) in candidates {
            if !seen_paths.insert(layer_io::dedup_key(&path)) {
                debug!(
                    "skipping duplicate layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            if let Some(layer) = layer_io::load_optional_layer(source, &path)? {
                loaded.push(layer);
            }
        }
        for path in &options.runtime_paths {
            loaded.push(layer_io::load_required_layer(ConfigLayerSource::Runtime, path)?);
        }

        let locks = requirements.as_ref().map(|layer| &layer.value);
        let mut merged = Value::Object(serde_json::Map::new());
        if let Some(locks) = locks {
            merge::merge_layer(&mut merged, locks, None);
        }
        for layer in &loaded {
            merge::merge_layer(&mut merged, &layer.value, locks);
        }

        let config = config_from_value(merged, "effective")?;
        let layers: Vec<ConfigLayer> = requirements
            .into_iter()
            .chain(loaded)
            .map(|layer| layer.meta)
            .collect();
        info!("layered config loaded (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }

    /// Validate configuration invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let memory = &self.memory;
        if memory.dimension == 0 {
            return Err(invalid("memory.dimension", "must be greater than zero"));
        }
        if !(1..=20).contains(&memory.retrieval_count) {
            return Err(invalid("memory.retrieval_count", "must be within 1..=20"));
        }
        if !(memory.dedup_threshold > 0.0 && memory.dedup_threshold <= 1.0) {
            return Err(invalid("memory.dedup_threshold", "must be within (0, 1]"));
        }
        if !(0.0..=1.0).contains(&memory.importance_weight) {
            return Err(invalid("memory.importance_weight", "must be within [0, 1]"));
        }
        if memory.candidate_multiplier == 0 {
            return Err(invalid(
                "memory.candidate_multiplier",
                "must be at least 1",
            ));
        }
        if memory.path.trim().is_empty() {
            return Err(invalid("memory.path", "must not be empty"));
        }
        if memory.backend == MemoryBackend::Remote {
            let endpoint = memory.remote.endpoint.as_deref().unwrap_or("");
            if endpoint.trim().is_empty() {
                return Err(invalid(
                    "memory.remote.endpoint",
                    "remote backend requires an endpoint",
                ));
            }
        }
        if memory.remote.max_attempts == 0 {
            return Err(invalid("memory.remote.max_attempts", "must be at least 1"));
        }
        if memory.remote.base_delay_ms > memory.remote.max_delay_ms {
            return Err(invalid(
                "memory.remote.base_delay_ms",
                "must not exceed max_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&memory.remote.jitter_ratio) {
            return Err(invalid("memory.remote.jitter_ratio", "must be within [0, 1]"));
        }

        let context = &self.context;
        if !(100..=100_000).contains(&context.max_context_tokens) {
            return Err(invalid(
                "context.max_context_tokens",
                "must be within 100..=100000",
            ));
        }
        if !(1..=50).contains(&context.conversation_history_length) {
            return Err(invalid(
                "context.conversation_history_length",
                "must be within 1..=50",
            ));
        }
        if context.chars_per_token == 0 {
            return Err(invalid("context.chars_per_token", "must be at least 1"));
        }

        if self.embedding.model.trim().is_empty() {
            return Err(invalid("embedding.model", "must not be empty"));
        }
        if let Some(dimensions) = self.embedding.dimensions
            && dimensions != memory.dimension
        {
            return Err(invalid(
                "embedding.dimensions",
                "must match memory.dimension when set",
            ));
        }

        Ok(())
    }
}

fn invalid(path: &str, message: &str) -> ConfigError {
    ConfigError::InvalidField {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// A parsed layer awaiting merge.
#[derive(Debug, Clone)]
struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn config_from_value(value: Value, label: &str) -> Result<AgenticConfig, ConfigError> {
    schema::validate_layer_schema(&value, label)?;
    let config: AgenticConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}
