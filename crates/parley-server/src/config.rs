//! Server configuration: TOML file + CLI overrides.

use parley_core::{ParleyError, ParleyResult, DEFAULT_MAX_FRAME_SIZE};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_five")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_five")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_five")]
    pub otp_ttl_secs: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// 0 disables the idle read deadline.
    #[serde(default)]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Empty means any origin is accepted.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            heartbeat_interval_secs: default_five(),
            sweep_interval_secs: default_five(),
            otp_ttl_secs: default_five(),
            write_timeout_ms: default_write_timeout_ms(),
            read_timeout_secs: 0,
            max_frame_size: default_max_frame_size(),
            allowed_origins: Vec::new(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_true")]
    pub allow_guests: bool,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,
    #[serde(default)]
    pub users_file: Option<String>,
    #[serde(default = "default_login_attempts")]
    pub login_attempts_per_minute: u32,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            allow_guests: true,
            token_ttl_secs: default_token_ttl(),
            hash_iterations: default_hash_iterations(),
            users_file: None,
            login_attempts_per_minute: default_login_attempts(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    3000
}
fn default_five() -> u64 {
    5
}
fn default_write_timeout_ms() -> u64 {
    2000
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_true() -> bool {
    true
}
fn default_token_ttl() -> u64 {
    86400
}
fn default_hash_iterations() -> u32 {
    10_000
}
fn default_login_attempts() -> u32 {
    10
}

/// Values given on the command line; `None` keeps the file/default value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub users_file: Option<String>,
    pub no_guests: bool,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
    pub otp_ttl: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub max_frame_size: usize,
    pub allowed_origins: Vec<String>,
    pub allow_guests: bool,
    pub token_ttl_secs: u64,
    pub hash_iterations: u32,
    pub users_file: Option<PathBuf>,
    pub login_attempts_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::resolve(ConfigFile::default(), Overrides::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> ParleyResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let config = Self::resolve(file_config, overrides);
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> ParleyResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| ParleyError::Config(format!("config parse error: {e}")))
    }

    fn resolve(file: ConfigFile, overrides: Overrides) -> Self {
        let server = file.server;
        let auth = file.auth;
        let users_file = overrides.users_file.or(auth.users_file);

        Self {
            bind: overrides.bind.unwrap_or(server.bind),
            port: overrides.port.unwrap_or(server.port),
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs),
            sweep_interval: Duration::from_secs(server.sweep_interval_secs),
            otp_ttl: Duration::from_secs(server.otp_ttl_secs),
            write_timeout: Duration::from_millis(server.write_timeout_ms),
            read_timeout: (server.read_timeout_secs > 0)
                .then(|| Duration::from_secs(server.read_timeout_secs)),
            max_frame_size: server.max_frame_size,
            allowed_origins: server.allowed_origins,
            allow_guests: auth.allow_guests && !overrides.no_guests,
            token_ttl_secs: auth.token_ttl_secs,
            hash_iterations: auth.hash_iterations,
            users_file: users_file.as_deref().map(expand_tilde_str),
            login_attempts_per_minute: auth.login_attempts_per_minute,
        }
    }

    fn validate(&self) -> ParleyResult<()> {
        if self.heartbeat_interval.is_zero() || self.sweep_interval.is_zero() {
            return Err(ParleyError::Config("loop intervals must be non-zero".into()));
        }
        if self.otp_ttl.is_zero() {
            return Err(ParleyError::Config("otp_ttl_secs must be non-zero".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(ParleyError::Config("write_timeout_ms must be non-zero".into()));
        }
        if self.hash_iterations == 0 {
            return Err(ParleyError::Config("hash_iterations must be >= 1".into()));
        }
        Ok(())
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.otp_ttl, Duration::from_secs(5));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert!(cfg.read_timeout.is_none());
        assert!(cfg.allow_guests);
        assert!(cfg.users_file.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = ServerConfig::parse(
            r#"
[server]
port = 4000
read_timeout_secs = 30
allowed_origins = ["http://localhost:4000"]

[auth]
allow_guests = false
"#,
        )
        .unwrap();
        let cfg = ServerConfig::resolve(file, Overrides::default());
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.read_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.allowed_origins, vec!["http://localhost:4000".to_string()]);
        assert!(!cfg.allow_guests);
        assert_eq!(cfg.hash_iterations, 10_000);
    }

    #[test]
    fn cli_overrides_win() {
        let file = ServerConfig::parse("[server]\nport = 4000\n").unwrap();
        let cfg = ServerConfig::resolve(
            file,
            Overrides {
                port: Some(5000),
                no_guests: true,
                users_file: Some("/tmp/users.json".into()),
                ..Default::default()
            },
        );
        assert_eq!(cfg.port, 5000);
        assert!(!cfg.allow_guests);
        assert_eq!(cfg.users_file, Some(PathBuf::from("/tmp/users.json")));
    }

    #[test]
    fn malformed_file_is_config_error() {
        assert!(matches!(
            ServerConfig::parse("[server]\nport = \"nope\""),
            Err(ParleyError::Config(_))
        ));
    }

    #[test]
    fn zero_intervals_rejected() {
        let file = ServerConfig::parse("[server]\nheartbeat_interval_secs = 0\n").unwrap();
        let cfg = ServerConfig::resolve(file, Overrides::default());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = ServerConfig::load(
            Some(Path::new("/nonexistent/parley/server.toml")),
            Overrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.port, 3000);
    }
}
