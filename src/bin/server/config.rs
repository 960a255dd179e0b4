//! Server Configuration
//!
//! This module handles loading and managing server configuration.

use kuba_stream::config::ApplicationConfig;
use kuba_stream::query::StreamOptions;

/// Server runtime configuration derived from ApplicationConfig
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server address
    pub listen_addr: String,

    /// CORS allowed origins (empty = allow all origins for development)
    pub cors_allowed_origins: Vec<String>,

    /// Options applied to every streaming execution
    pub stream_options: StreamOptions,
}

impl From<&ApplicationConfig> for ServerConfig {
    fn from(app_config: &ApplicationConfig) -> Self {
        Self {
            listen_addr: app_config.server.listen_addr.clone(),
            cors_allowed_origins: app_config.server.cors_allowed_origins.clone(),
            stream_options: app_config.streaming.stream_options(),
        }
    }
}

/// Load configuration from file or environment
///
/// Priority:
/// 1. `path` (from `--config`)
/// 2. STREAM_CONFIG environment variable
/// 3. application.toml
/// 4. Default configuration
pub fn load_config_with_app(
    path: Option<&std::path::Path>,
) -> kuba_stream::Result<(ServerConfig, ApplicationConfig)> {
    let explicit = path
        .map(|p| p.to_path_buf())
        .or_else(|| std::env::var("STREAM_CONFIG").ok().map(Into::into));

    let app_config = match explicit {
        // An explicitly requested file must load
        Some(path) => {
            let config = ApplicationConfig::load(&path)?;
            eprintln!("[config] Loaded configuration from: {}", path.display());
            config
        },
        None if std::path::Path::new("application.toml").exists() => {
            match ApplicationConfig::load("application.toml") {
                Ok(config) => {
                    eprintln!("[config] Loaded configuration from application.toml");
                    config
                },
                Err(e) => {
                    eprintln!(
                        "[config] Failed to parse application.toml: {}. Using defaults.",
                        e
                    );
                    ApplicationConfig::from_env()?
                },
            }
        },
        None => {
            eprintln!("[config] Using default configuration");
            ApplicationConfig::from_env()?
        },
    };

    Ok((ServerConfig::from(&app_config), app_config))
}
