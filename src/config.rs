//! Layered application configuration.
//!
//! Priority: CLI flag > CLI env var > `SEARCHUOFT_*` env > config file > defaults.

use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

/// Endpoint used when `CHATBOT_URL` is not set.
pub const DEFAULT_CHATBOT_URL: &str = "http://localhost:9001/query";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "BIND_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Chatbot query endpoint
    #[arg(long, env = "CHATBOT_URL")]
    pub chatbot_url: Option<String>,

    /// Log output format (pretty or json)
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub chatbot: ChatbotConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatbotConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        // tokio intervals panic on zero.
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
}

/// Script URLs for the page shell. Point these at local copies to run offline.
#[derive(Debug, Deserialize, Clone)]
pub struct UiConfig {
    pub htmx_url: String,
    pub htmx_sse_url: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            htmx_url: "https://unpkg.com/htmx.org@2.0.4".to_string(),
            htmx_sse_url: "https://unpkg.com/htmx-ext-sse@2.2.2/sse.js".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let ui = UiConfig::default();
        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("chatbot.url", DEFAULT_CHATBOT_URL)?
            .set_default("session.idle_timeout_secs", 1800)?
            .set_default("session.sweep_interval_secs", 60)?
            .set_default("log.format", "pretty")?
            .set_default("ui.htmx_url", ui.htmx_url)?
            .set_default("ui.htmx_sse_url", ui.htmx_sse_url)?;

        // An explicit file must exist; ./config.yaml is picked up if present.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::new(path, FileFormat::Yaml).required(true)),
            None => builder.add_source(File::new("config.yaml", FileFormat::Yaml).required(false)),
        };

        // E.g. SEARCHUOFT_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("SEARCHUOFT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // clap has already resolved flag-vs-env for these.
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(url) = cli.chatbot_url {
            builder = builder.set_override("chatbot.url", url)?;
        }
        if let Some(format) = cli.log_format {
            builder = builder.set_override("log.format", format.to_lowercase())?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        url::Url::parse(&self.chatbot.url).map_err(|e| {
            config::ConfigError::Message(format!("invalid chatbot.url {:?}: {e}", self.chatbot.url))
        })?;
        Ok(())
    }
}
