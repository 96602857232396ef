//! Configuration module for the orders service.
//!
//! Configuration is a TOML file. String values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`, which is how deployment settings
//! such as the Redis URL and listen port are injected. A file may split its
//! sections across several files with `include = ["storage.toml"]`; every
//! top-level section must appear in exactly one file.

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Upper bound on creation attempts after identifier collisions.
pub const MAX_CREATE_ATTEMPTS: u32 = 10;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the orders service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Service identity and order-creation behavior.
	pub service: ServiceConfig,
	/// Storage backend selection and per-backend settings.
	pub storage: StorageConfig,
	/// HTTP API settings.
	#[serde(default)]
	pub api: ApiConfig,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Identifier used in logs.
	pub id: String,
	/// How many identifiers to try when a freshly generated one collides
	/// with an existing order.
	#[serde(default = "default_create_attempts")]
	pub create_attempts: u32,
}

fn default_create_attempts() -> u32 {
	3
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

impl StorageConfig {
	/// Configuration table of the primary implementation.
	pub fn primary_config(&self) -> Option<&toml::Value> {
		self.implementations.get(&self.primary)
	}
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default = "default_api_enabled")]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Page size used by `GET /orders` when none is requested.
	#[serde(default = "default_page_size")]
	pub default_page_size: u64,
	/// Largest page size a client may request.
	#[serde(default = "default_max_page_size")]
	pub max_page_size: u64,
	/// Seconds to wait for in-flight requests on shutdown.
	#[serde(default = "default_shutdown_timeout")]
	pub shutdown_timeout_seconds: u64,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			enabled: default_api_enabled(),
			host: default_api_host(),
			port: default_api_port(),
			default_page_size: default_page_size(),
			max_page_size: default_max_page_size(),
			shutdown_timeout_seconds: default_shutdown_timeout(),
		}
	}
}

fn default_api_enabled() -> bool {
	true
}

fn default_api_host() -> String {
	"0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_page_size() -> u64 {
	orders_types::DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> u64 {
	500
}

fn default_shutdown_timeout() -> u64 {
	10
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of `VAR_NAME`, or with the default
/// in `${VAR_NAME:-default}` when the variable is unset. Input is capped at
/// 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	static PATTERN: OnceLock<Regex> = OnceLock::new();

	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = match PATTERN.get() {
		Some(re) => re,
		None => {
			let compiled = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
				.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;
			PATTERN.get_or_init(|| compiled)
		},
	};

	let mut output = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(name.as_str()), cap.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					name.as_str()
				)))
			},
		};
		output.push_str(&input[last..whole.start()]);
		output.push_str(&value);
		last = whole.end();
	}
	output.push_str(&input[last..]);

	Ok(output)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;

		let mut loader = loader::ConfigLoader::new(base_dir);
		loader.load_config(file_name).await
	}

	/// Builds a configuration from an already resolved TOML document.
	pub(crate) fn from_table(value: toml::Value) -> Result<Self, ConfigError> {
		let config: Config = value.try_into()?;
		config.validate()?;
		Ok(config)
	}

	/// Checks cross-field constraints that serde cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.trim().is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}
		if self.service.create_attempts == 0 || self.service.create_attempts > MAX_CREATE_ATTEMPTS
		{
			return Err(ConfigError::Validation(format!(
				"create_attempts must be between 1 and {}",
				MAX_CREATE_ATTEMPTS
			)));
		}

		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if self.storage.primary_config().is_none() {
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		if self.api.default_page_size == 0 || self.api.max_page_size == 0 {
			return Err(ConfigError::Validation(
				"Page sizes must be greater than 0".into(),
			));
		}
		if self.api.default_page_size > self.api.max_page_size {
			return Err(ConfigError::Validation(format!(
				"default_page_size ({}) cannot exceed max_page_size ({})",
				self.api.default_page_size, self.api.max_page_size
			)));
		}

		Ok(())
	}
}

/// Parses a configuration string, resolving environment variables and
/// validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
