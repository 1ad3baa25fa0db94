//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **struct**: Custom data types that group related fields together
//! - **enum with data**: The storage provider is a tagged enum, so invalid
//!   provider combinations cannot even be represented
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__HOST, APP_STORAGE__BUCKET, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables

/// Main application configuration that contains all settings.
///
/// ## Rust Concepts:
/// - **#[derive(...)]**: Automatically implements common traits:
///   - `Debug`: Allows printing with {:?} for debugging
///   - `Clone`: Allows making copies of the struct
///   - `Serialize`: Can convert this struct to JSON, TOML, etc.
///   - `Deserialize`: Can create this struct from JSON, TOML, etc.
/// - **pub struct**: Public struct that other modules can use
/// - **pub fields**: Public fields that can be accessed directly
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, ingest, storage)
/// makes it easier to understand and maintain as the application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to (e.g., "127.0.0.1", "0.0.0.0")
/// - `port`: TCP port number to listen on (1-65535)
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (devices on the network)
/// - `port = 5096`: The port ingest devices are flashed to connect to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Ingest pipeline configuration: where and how segment files are produced.
///
/// ## Fields:
/// - `data_dir`: Directory the per-session segment tree is created under
/// - `segment_seconds`: Wall-clock length of one segment before rotation
///
/// ## Tuning guidelines:
/// - Shorter segments: Files reach object storage sooner, but more of them
/// - Longer segments: Fewer files, but more audio lost if the host dies mid-segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory the per-session segment tree is created under.
    pub data_dir: String,

    /// Wall-clock length of one segment before rotation.
    pub segment_seconds: u64,
}

/// Object-storage upload settings. `enabled = false` keeps everything local.
///
/// ## Fields:
/// - `enabled`: Master switch for uploads; the segment pipeline is identical either way
/// - `upload_bin` / `upload_wav`: Per-extension gates for the two file kinds
/// - `prefix`: Object-key prefix; surrounding slashes and whitespace are ignored
/// - `provider`: Which S3 flavor to talk to (see `ProviderConfig`)
/// - `bucket` / `region`: Standard S3 addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub enabled: bool,

    /// Upload the raw framed `.bin` files.
    pub upload_bin: bool,

    /// Upload the decoded `.wav` files.
    pub upload_wav: bool,

    /// Object-key prefix; surrounding slashes and whitespace are ignored.
    pub prefix: String,

    pub provider: ProviderConfig,
    pub bucket: String,
    pub region: String,
}

/// Which storage backend flavor to talk to.
///
/// ## Rust Concepts:
/// - **enum variants with data**: `S3Compatible` carries the fields only it
///   needs; `Aws` needs none. Code that matches on this enum is forced by
///   the compiler to handle both cases.
/// - **#[serde(tag = "kind")]**: In TOML/JSON the variant is selected by a
///   `kind` field, e.g. `kind = "s3_compatible"`
///
/// `aws` uses the SDK's default endpoint and credential chain;
/// `s3_compatible` points the same client at another S3-speaking service
/// (MinIO, R2, ...) via an explicit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Aws,
    S3Compatible { service_url: String, force_path_style: bool },
}

/// Provides default configuration values.
///
/// ## Rust Concepts:
/// - **impl Default**: Implements the Default trait, which provides a `default()` method
/// - **Self**: Refers to the current type (AppConfig)
/// - **to_string()**: Converts string literals (&str) to owned String objects
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),  // Devices connect over the network
                port: 5096,                   // Port the device firmware dials
            },
            ingest: IngestConfig {
                data_dir: "data/received".to_string(),  // Relative to the working directory
                segment_seconds: 10,                    // 10-second segment files
            },
            storage: StorageConfig {
                enabled: false,                   // Local-only until a bucket is configured
                upload_bin: true,
                upload_wav: true,
                prefix: "received".to_string(),   // Object keys start with received/
                provider: ProviderConfig::Aws,
                bucket: String::new(),
                region: "us-east-1".to_string(),
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Rust Concepts:
    /// - **Builder pattern**: Chain method calls to configure the config loader
    /// - **?**: Early return on error (if any step fails, return the error)
    /// - **env::var()**: Read environment variables, returns Result<String, VarError>
    /// - **if let Ok(...)**: Only execute if the environment variable exists
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_STORAGE__BUCKET=device-audio`: Override the upload bucket
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    ///
    /// (The separator is a double underscore so two-word keys like
    /// `upload_bin` stay addressable as `APP_STORAGE__UPLOAD_BIN`.)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            // Example: APP_INGEST__DATA_DIR becomes ingest.data_dir in the config
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Handle special environment variables used by deployment platforms
        // These don't follow the APP_ prefix convention but are commonly used
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0 (port 0 is reserved and can't be used)
    /// - Segment length is at least one second (a zero-length window would
    ///   rotate on every single frame)
    /// - If storage is enabled, a bucket name must be present
    ///
    /// ## Rust Concepts:
    /// - **&self**: Borrowed reference (read-only access to the struct)
    /// - **anyhow::anyhow!**: Creates an error with a custom message
    /// - **Early return**: Return immediately if validation fails
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.ingest.segment_seconds == 0 {
            return Err(anyhow::anyhow!("Segment length must be at least one second"));
        }

        if self.storage.enabled && self.storage.bucket.trim().is_empty() {
            return Err(anyhow::anyhow!("Storage is enabled but no bucket is configured"));
        }

        Ok(())  // All validation passed
    }
}
