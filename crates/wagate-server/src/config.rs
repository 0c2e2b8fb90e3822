use crate::ServerArgs;
use anyhow::{Context, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use wagate::ShutdownAction;

pub const ENVIRONMENTS: &[&str] = &["local", "dev", "uat", "prod", "test"];
pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_PRESENCE_SCHEDULE: &str = "* * * * *";
const ENV_PREFIX: &str = "WAGATE_";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    pub env: String,
    pub port: u16,
    pub log_level: String,
    pub startup: StartupConfig,
    pub shutdown: ShutdownConfig,
    pub auto_logout: bool,
    pub auto_disconnect: bool,
    pub cronjob: CronjobConfig,
    pub dispatch: DispatchConfig,
    /// File the config was read from; `None` when defaults were used.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StartupConfig {
    pub enable_auto_login: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownConfig {
    pub enable_auto_shutdown: bool,
    /// Deadline for the shutdown traversal.
    pub grace_ms: u64,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CronjobConfig {
    pub auto_presence: AutoPresenceConfig,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AutoPresenceConfig {
    pub enable: bool,
    pub schedule: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            env: "local".to_string(),
            port: DEFAULT_PORT,
            log_level: "debug".to_string(),
            startup: StartupConfig::default(),
            shutdown: ShutdownConfig::default(),
            auto_logout: false,
            auto_disconnect: false,
            cronjob: CronjobConfig::default(),
            dispatch: DispatchConfig::default(),
            source: None,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            enable_auto_shutdown: false,
            grace_ms: 1000,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: wagate::dispatch::DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl AutoPresenceConfig {
    pub fn effective_schedule(&self) -> &str {
        if self.schedule.trim().is_empty() {
            DEFAULT_PRESENCE_SCHEDULE
        } else {
            &self.schedule
        }
    }
}

impl GatewayConfig {
    /// Load the config for `args.env`, then apply `WAGATE_*` overrides.
    ///
    /// An explicit `--config` must exist. Otherwise `config.<env>.toml` is
    /// searched for and a missing file falls back to defaults.
    pub fn load(args: &ServerArgs) -> anyhow::Result<Self> {
        if !ENVIRONMENTS.contains(&args.env.as_str()) {
            bail!(
                "unknown environment {:?}, expected one of {}",
                args.env,
                ENVIRONMENTS.join(", ")
            );
        }

        let source = match &args.config {
            Some(path) => Some(path.clone()),
            None => Self::find_file(&args.env),
        };
        let mut config = match &source {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.source = source;

        config.env = args.env.clone();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/wagate")];
        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(home).join(".wagate"));
        }
        paths.push(PathBuf::from("."));
        paths
    }

    fn find_file(env: &str) -> Option<PathBuf> {
        let name = format!("config.{env}.toml");
        Self::search_paths()
            .into_iter()
            .map(|dir| dir.join(&name))
            .find(|path| path.is_file())
    }

    /// Apply `WAGATE_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(port) = var("PORT") {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid {ENV_PREFIX}PORT value: {port}"))?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(value) = var("AUTO_LOGIN") {
            self.startup.enable_auto_login = parse_bool("AUTO_LOGIN", &value)?;
        }
        if let Some(value) = var("AUTO_LOGOUT") {
            self.auto_logout = parse_bool("AUTO_LOGOUT", &value)?;
        }
        if let Some(value) = var("AUTO_DISCONNECT") {
            self.auto_disconnect = parse_bool("AUTO_DISCONNECT", &value)?;
        }
        Ok(())
    }

    /// Disconnect wins over logout when both are enabled.
    pub fn shutdown_action(&self) -> ShutdownAction {
        if !self.shutdown.enable_auto_shutdown {
            ShutdownAction::None
        } else if self.auto_disconnect {
            ShutdownAction::Disconnect
        } else if self.auto_logout {
            ShutdownAction::Logout
        } else {
            ShutdownAction::None
        }
    }
}

fn parse_bool(name: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => bail!("invalid {ENV_PREFIX}{name} value: {value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(env: &str, config: Option<PathBuf>) -> ServerArgs {
        ServerArgs {
            env: env.to_string(),
            config,
        }
    }

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 1234);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.shutdown.grace_ms, 1000);
        assert_eq!(config.dispatch.max_concurrency, 16);
        assert_eq!(config.cronjob.auto_presence.effective_schedule(), "* * * * *");
        assert_eq!(config.shutdown_action(), ShutdownAction::None);
    }

    #[test]
    fn partial_toml_keeps_the_other_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
            port = 8080
            auto_disconnect = true

            [shutdown]
            enable_auto_shutdown = true

            [cronjob.auto_presence]
            enable = true
            schedule = "*/5 * * * *"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.shutdown.grace_ms, 1000);
        assert_eq!(config.shutdown_action(), ShutdownAction::Disconnect);
        assert!(config.cronjob.auto_presence.enable);
        assert_eq!(config.cronjob.auto_presence.effective_schedule(), "*/5 * * * *");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(GatewayConfig::from_toml_str("port = \"many\"").is_err());
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            "log_level = \"info\"\n[startup]\nenable_auto_login = true\n",
        )
        .unwrap();

        let config = GatewayConfig::load(&args("test", Some(path.clone()))).unwrap();
        assert_eq!(config.source, Some(path));
        assert_eq!(config.env, "test");
        assert_eq!(config.log_level, "info");
        assert!(config.startup.enable_auto_login);
    }

    #[test]
    fn missing_explicit_file_and_unknown_env_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GatewayConfig::load(&args("test", Some(dir.path().join("absent.toml")))).is_err());
        assert!(GatewayConfig::load(&args("staging", None)).is_err());
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WAGATE_PORT", "9000"),
            ("WAGATE_LOG_LEVEL", "warn"),
            ("WAGATE_AUTO_LOGIN", "true"),
            ("WAGATE_AUTO_LOGOUT", "1"),
        ]);
        let mut config = GatewayConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.log_level, "warn");
        assert!(config.startup.enable_auto_login);
        assert!(config.auto_logout);
        assert!(!config.auto_disconnect);
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = GatewayConfig::default();
        let err = config
            .apply_overrides(|k| (k == "WAGATE_PORT").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("WAGATE_PORT"));
    }

    #[test]
    fn logout_applies_only_when_disconnect_is_off() {
        let mut config = GatewayConfig::default();
        config.shutdown.enable_auto_shutdown = true;
        config.auto_logout = true;
        assert_eq!(config.shutdown_action(), ShutdownAction::Logout);

        config.auto_disconnect = true;
        assert_eq!(config.shutdown_action(), ShutdownAction::Disconnect);

        config.shutdown.enable_auto_shutdown = false;
        assert_eq!(config.shutdown_action(), ShutdownAction::None);
    }
}
