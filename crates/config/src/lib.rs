use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Top-level runtime settings, layered from `config/default.toml`,
/// `config/{APP_ENV}.toml` and `POINTROOM__*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    pub rooms: LifecycleSettings,
    pub voting: VotingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5050,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub backend: StoreBackend,
    pub url: String,
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Mongo,
            url: "mongodb://localhost:27017".to_string(),
            name: "pointroom".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive. `RUST_LOG` wins when set.
    pub level: String,
    /// Emit newline-delimited JSON instead of the human formatter.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info,tower_http=info".to_string(),
            json: false,
        }
    }
}

/// Room lifecycle knobs used by the registry and the sweeper job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Random draws attempted before code generation gives up.
    pub code_retries: u32,
    /// Idle rooms older than this are archived by the sweeper.
    pub inactivity_hours: i64,
    /// Archived rooms older than this are purged.
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            code_retries: 10,
            inactivity_hours: 24,
            retention_days: 7,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingSettings {
    /// Deck used when neither the room nor the request names one.
    pub default_deck: String,
    pub default_timer_secs: u32,
    /// Attempts the persister makes for a write the caller waits on.
    pub critical_write_attempts: u32,
}

impl Default for VotingSettings {
    fn default() -> Self {
        Self {
            default_deck: "fibonacci".to_string(),
            default_timer_secs: 60,
            critical_write_attempts: 3,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                Environment::with_prefix("POINTROOM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.app.host, self.app.port)
    }
}
