/// Configuration management
use crate::ai::gemini::DEFAULT_MODEL;
use crate::ai::{GeminiClient, PromptService, UnconfiguredPrompt};
use crate::contact_directory::Roster;
use crate::error::{GoalError, Result};
use crate::store::{DocumentStore, MemoryStore, SledStore};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const DEFAULT_PORT: u16 = 9002;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listening address
    pub listen_addr: SocketAddr,

    /// Persistent store directory; in-memory store when unset
    pub data_dir: Option<PathBuf>,

    /// Roster file (`{"version":1,"members":[...]}`); built-in roster when unset
    pub roster_path: Option<PathBuf>,

    /// Deployment label reported by diagnostics
    pub environment: String,

    pub ai_model: String,
    pub ai_api_key: Option<String>,
    /// Override of the Gemini API base URL
    pub ai_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            data_dir: None,
            roster_path: None,
            environment: "development".to_string(),
            ai_model: DEFAULT_MODEL.to_string(),
            ai_api_key: None,
            ai_base_url: None,
        }
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a String> {
    args.get(i + 1)
        .ok_or_else(|| GoalError::Config(format!("{} requires an argument", flag)))
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse::<u16>()
        .map_err(|_| GoalError::Config("Port must be a valid number (0-65535)".to_string()))
}

impl Config {
    /// Create config from command line arguments, then apply environment overrides
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::parse_args(args)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn parse_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();
        let mut port = DEFAULT_PORT;
        let mut bind: IpAddr = config.listen_addr.ip();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    config.data_dir = Some(PathBuf::from(flag_value(args, i, "--data-dir")?));
                    i += 2;
                }
                "--roster" => {
                    config.roster_path = Some(PathBuf::from(flag_value(args, i, "--roster")?));
                    i += 2;
                }
                "--model" => {
                    config.ai_model = flag_value(args, i, "--model")?.clone();
                    i += 2;
                }
                "--bind" => {
                    let raw = flag_value(args, i, "--bind")?;
                    bind = raw
                        .parse()
                        .map_err(|_| GoalError::Config(format!("Invalid bind address: {}", raw)))?;
                    i += 2;
                }
                other if other.starts_with("--") => {
                    return Err(GoalError::Config(format!(
                        "Unknown flag {}. Usage: {} [port] [--data-dir <path>] [--roster <path>] [--model <name>] [--bind <ip>]",
                        other,
                        args.first().map(String::as_str).unwrap_or("goalleader")
                    )));
                }
                other => {
                    port = parse_port(other)?;
                    i += 1;
                }
            }
        }

        config.listen_addr = SocketAddr::new(bind, port);
        Ok(config)
    }

    /// Environment overrides (nice for deployments)
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(p) = var("GOALLEADER_PORT") {
            self.listen_addr.set_port(parse_port(&p)?);
        }
        if let Some(dir) = var("GOALLEADER_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = var("GOALLEADER_ROSTER") {
            self.roster_path = Some(PathBuf::from(path));
        }
        if let Some(env) = var("GOALLEADER_ENV") {
            self.environment = env;
        }
        if let Some(url) = var("GOALLEADER_AI_BASE_URL") {
            self.ai_base_url = Some(url);
        }
        self.ai_api_key = var("GEMINI_API_KEY")
            .or_else(|| var("GOOGLE_API_KEY"))
            .filter(|k| !k.trim().is_empty())
            .or(self.ai_api_key.take());
        Ok(())
    }

    pub fn ai_configured(&self) -> bool {
        self.ai_api_key.is_some()
    }

    /// Persistent store when a data directory is set, shared memory otherwise
    pub fn open_store(&self) -> Result<Arc<dyn DocumentStore>> {
        match &self.data_dir {
            Some(dir) => {
                info!("Opening document store in {}", dir.display());
                Ok(Arc::new(SledStore::new(dir)?))
            }
            None => {
                info!("Using in-memory document store");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    pub fn load_roster(&self) -> Result<Roster> {
        match &self.roster_path {
            Some(path) => Roster::load(path),
            None => Ok(Roster::builtin()),
        }
    }

    pub fn prompt_service(&self) -> Result<Arc<dyn PromptService>> {
        match &self.ai_api_key {
            Some(key) => Ok(Arc::new(GeminiClient::new(
                key.clone(),
                self.ai_model.clone(),
                self.ai_base_url.clone(),
            )?)),
            None => Ok(Arc::new(UnconfiguredPrompt::new(self.ai_model.clone()))),
        }
    }
}
