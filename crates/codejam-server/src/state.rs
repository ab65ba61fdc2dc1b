use crate::relay::persist::Persister;
use crate::services::assistant::{Assistant, HttpAssistant};
use crate::services::store::SessionStore;
use crate::ws::registry::SessionRegistry;
use codejam_protocol::{IceServer, Limits};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    /// `None` keeps sessions in memory only
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    pub ai_service_url: Option<String>,
    pub limits: Limits,
}

#[derive(Clone, Debug)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-in-production";

impl Config {
    /// Defaults, then an optional `codejam.toml`, then environment variables
    pub fn load() -> anyhow::Result<Self> {
        let defaults = Limits::default();
        let settings = config::Config::builder()
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("stun_servers", "stun:stun.l.google.com:19302")?
            .set_default("max_code_bytes", defaults.max_code_bytes as u64)?
            .set_default("max_chat_chars", defaults.max_chat_chars as u64)?
            .set_default("max_signal_bytes", defaults.max_signal_bytes as u64)?
            .add_source(config::File::with_name("codejam").required(false))
            .add_source(config::Environment::default())
            .build()?;

        let jwt_secret = settings.get_string("jwt_secret").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, using default (insecure for production!)");
            DEFAULT_JWT_SECRET.to_string()
        });

        let database_url = settings.get_string("database_url").ok();
        if database_url.is_none() {
            tracing::warn!("DATABASE_URL not set, sessions will not survive a restart");
        }

        let stun_servers = settings
            .get_string("stun_servers")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let turn_servers = match settings.get_string("turn_url") {
            Ok(url) => vec![TurnServer {
                url,
                username: settings.get_string("turn_username").unwrap_or_default(),
                credential: settings.get_string("turn_credential").unwrap_or_default(),
            }],
            Err(_) => vec![],
        };

        Ok(Config {
            bind_address: settings.get_string("bind_address")?,
            database_url,
            jwt_secret,
            stun_servers,
            turn_servers,
            ai_service_url: settings.get_string("ai_service_url").ok(),
            limits: Limits {
                max_code_bytes: limit(&settings, "max_code_bytes")?,
                max_chat_chars: limit(&settings, "max_chat_chars")?,
                max_signal_bytes: limit(&settings, "max_signal_bytes")?,
            },
        })
    }

    /// STUN/TURN servers handed to clients as-is
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let stun = self.stun_servers.iter().map(|url| IceServer {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        });
        let turn = self.turn_servers.iter().map(|turn| IceServer {
            urls: vec![turn.url.clone()],
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });
        stun.chain(turn).collect()
    }
}

fn limit(settings: &config::Config, key: &str) -> anyhow::Result<usize> {
    let value = settings.get_int(key)?;
    usize::try_from(value).map_err(|_| {
        anyhow::anyhow!(
            "{} must be a non-negative size, got {}",
            key.to_uppercase(),
            value
        )
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            database_url: None,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            stun_servers: vec![],
            turn_servers: vec![],
            ai_service_url: None,
            limits: Limits::default(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<dyn SessionStore>,
    pub persister: Persister,
    pub assistant: Option<Arc<dyn Assistant>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn SessionStore>) -> anyhow::Result<Self> {
        let assistant = match &config.ai_service_url {
            Some(url) => Some(Arc::new(HttpAssistant::new(url.clone())?) as Arc<dyn Assistant>),
            None => None,
        };

        let registry = Arc::new(SessionRegistry::new());
        let persister = Persister::new(store.clone(), registry.clone());

        Ok(Self {
            config: Arc::new(config),
            registry,
            store,
            persister,
            assistant,
        })
    }

    /// Swap in a different assistant implementation
    pub fn with_assistant(mut self, assistant: Arc<dyn Assistant>) -> Self {
        self.assistant = Some(assistant);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_code_bytes: i64) -> config::Config {
        config::Config::builder()
            .set_default("max_code_bytes", max_code_bytes)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn negative_limit_is_rejected() {
        let err = limit(&settings(-1), "max_code_bytes").unwrap_err();
        assert!(err.to_string().contains("MAX_CODE_BYTES"));
    }

    #[test]
    fn positive_limit_is_accepted() {
        assert_eq!(limit(&settings(2048), "max_code_bytes").unwrap(), 2048);
    }

    #[test]
    fn ice_servers_include_turn_credentials() {
        let config = Config {
            stun_servers: vec!["stun:a".to_string()],
            turn_servers: vec![TurnServer {
                url: "turn:b".to_string(),
                username: "u".to_string(),
                credential: "c".to_string(),
            }],
            ..Config::default()
        };

        let servers = config.ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].username, None);
        assert_eq!(servers[1].credential.as_deref(), Some("c"));
    }
}
