//! Runtime configuration.
//!
//! Loaded in order: built-in defaults, an optional TOML file, then `PAYOPS_*`
//! environment overrides. Every section has sensible defaults so an empty
//! file (or no file) is a valid configuration.

use crate::council::RolePrompts;
use crate::error::ConfigError;

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    pub router: RouterConfig,
    pub student: StudentConfig,
    pub council: CouncilConfig,
    pub simulator: SimulatorConfig,
    pub store: StoreConfig,
}

/// Escalation and event loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RouterConfig {
    /// Buffered failures that trigger a council deliberation.
    pub failure_threshold: usize,
    /// Capacity of the inbound transaction channel.
    pub inbound_capacity: usize,
    /// Capacity of the outbound observability broadcast bus.
    pub event_bus_capacity: usize,
    /// Persist a student snapshot after this many escalations. 0 disables.
    pub snapshot_every_escalations: u64,
    /// Newest snapshots kept in the store after each save. 0 keeps all.
    pub snapshot_retention: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            inbound_capacity: 256,
            event_bus_capacity: 1024,
            snapshot_every_escalations: 1,
            snapshot_retention: 10,
        }
    }
}

/// Online learner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StudentConfig {
    /// Minimum top-class probability for an autonomous decision.
    pub confidence_threshold: f64,
    /// Training samples required before any autonomous decision.
    pub min_warmup_samples: u64,
    /// Rolling window of recent prediction confidences.
    pub confidence_window: usize,
    /// Rolling window of recent training outcomes.
    pub recent_decisions_window: usize,
}

impl Default for StudentConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.90,
            min_warmup_samples: 20,
            confidence_window: 100,
            recent_decisions_window: 50,
        }
    }
}

/// Council and reasoning backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CouncilConfig {
    /// Use the backend-free council even when an API key is present.
    pub use_mock: bool,
    /// OpenAI-compatible chat completions endpoint.
    pub base_url: String,
    pub model: String,
    /// Never serialized; read from config or `GROQ_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Upper bound on a single role call.
    pub request_timeout_secs: u64,
    /// Upper bound on a whole deliberation, enforced by the router.
    pub deliberation_timeout_secs: u64,
    /// Transactions listed individually in the batch summary.
    pub context_limit: usize,
    /// Seed for the mock council; random when absent.
    pub mock_seed: Option<u64>,
    /// System instructions for the three seats, `[council.prompts]`.
    pub prompts: RolePrompts,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            use_mock: false,
            base_url: "https://api.groq.com/openai/v1/chat/completions".into(),
            model: "llama3-70b-8192".into(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 500,
            request_timeout_secs: 30,
            deliberation_timeout_secs: 90,
            context_limit: 10,
            mock_seed: None,
            prompts: RolePrompts::default(),
        }
    }
}

/// Transaction simulator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SimulatorConfig {
    pub base_failure_rate: f64,
    /// Milliseconds between generated transactions.
    pub interval_ms: u64,
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_failure_rate: 0.05,
            interval_ms: 500,
            seed: None,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StoreConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("payops.db"),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PAYOPS_*` overrides through the given lookup.
    ///
    /// Takes a lookup function rather than reading the process environment
    /// directly so tests can supply their own values.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = parse_env(&lookup, "PAYOPS_FAILURE_THRESHOLD")? {
            self.router.failure_threshold = value;
        }
        if let Some(value) = parse_env(&lookup, "PAYOPS_SNAPSHOT_RETENTION")? {
            self.router.snapshot_retention = value;
        }
        if let Some(value) = parse_env(&lookup, "PAYOPS_CONFIDENCE_THRESHOLD")? {
            self.student.confidence_threshold = value;
        }
        if let Some(value) = parse_env(&lookup, "PAYOPS_MIN_WARMUP_SAMPLES")? {
            self.student.min_warmup_samples = value;
        }
        if let Some(value) = parse_env(&lookup, "PAYOPS_USE_MOCK_COUNCIL")? {
            self.council.use_mock = value;
        }
        if let Some(value) = lookup("PAYOPS_COUNCIL_MODEL") {
            self.council.model = value;
        }
        if let Some(value) = lookup("PAYOPS_COUNCIL_BASE_URL") {
            self.council.base_url = value;
        }
        if let Some(value) = parse_env(&lookup, "PAYOPS_BASE_FAILURE_RATE")? {
            self.simulator.base_failure_rate = value;
        }
        if let Some(value) = lookup("PAYOPS_DB_PATH") {
            self.store.path = PathBuf::from(value);
        }
        if self.council.api_key.is_none() {
            self.council.api_key = lookup("GROQ_API_KEY").filter(|key| !key.trim().is_empty());
        }
        Ok(())
    }

    /// Reject values that would break the routing loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "router.failure_threshold must be greater than 0".into(),
            ));
        }
        if self.router.inbound_capacity == 0 || self.router.event_bus_capacity == 0 {
            return Err(ConfigError::Invalid(
                "router channel capacities must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.student.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "student.confidence_threshold must be within [0, 1], got {}",
                self.student.confidence_threshold
            )));
        }
        if self.student.confidence_window == 0 || self.student.recent_decisions_window == 0 {
            return Err(ConfigError::Invalid(
                "student rolling windows must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.simulator.base_failure_rate) {
            return Err(ConfigError::Invalid(format!(
                "simulator.base_failure_rate must be within [0, 1], got {}",
                self.simulator.base_failure_rate
            )));
        }
        for (seat, prompt) in [
            ("risk", &self.council.prompts.risk),
            ("growth", &self.council.prompts.growth),
            ("manager", &self.council.prompts.manager),
        ] {
            if prompt.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "council.prompts.{seat} must not be empty"
                )));
            }
        }
        if self.council.deliberation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "council.deliberation_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_owned(),
                value,
            }),
        None => Ok(None),
    }
}
