//! JSON configuration file.
//!
//! Only `zendesk` and `paths` are required; every other section falls back
//! to its defaults. CLI flags are merged over the file in `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::discovery::DiscoveryLimits;
use crate::export::ExportConfig;
use crate::orchestrator::RunConfig;
use crate::remote::{BrowserConfig, Endpoints};
use crate::retry::RetryConfig;
use crate::types::{DelayRange, LogLevel};
use crate::wait::WaitConfig;

const PROFILE_DIR: &str = "chrome_profiles";

#[derive(Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub zendesk: ZendeskSection,
    #[serde(default)]
    pub auth: AuthSection,
    pub paths: PathsSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub throttle: ThrottleSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ZendeskSection {
    pub subdomain: String,
}

#[derive(Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AuthSection {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PathsSection {
    pub codes_file: String,
    pub output_dir: String,
    #[serde(default = "default_chromedriver")]
    pub chromedriver_path: String,
}

fn default_chromedriver() -> String {
    "chromedriver".to_string()
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeSection {
    pub headless: bool,
    pub keep_browser_open: bool,
    pub reset_checkpoint: bool,
    pub no_progress_bar: bool,
}

/// Pause ranges in seconds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ThrottleSection {
    pub between_tickets_min_s: f64,
    pub between_tickets_max_s: f64,
    pub after_print_min_s: f64,
    pub after_print_max_s: f64,
}

impl Default for ThrottleSection {
    fn default() -> Self {
        Self {
            between_tickets_min_s: 1.0,
            between_tickets_max_s: 2.0,
            after_print_min_s: 0.6,
            after_print_max_s: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LimitsSection {
    pub max_pages: u32,
    /// Extra attempts at opening a browser session.
    pub retry_create_driver: u32,
    pub max_tickets_per_assessor: Option<usize>,
    pub checkpoint_every: usize,
    pub max_session_recoveries: u32,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_pages: 5000,
            retry_create_driver: 2,
            max_tickets_per_assessor: None,
            checkpoint_every: 10,
            max_session_recoveries: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
        }
    }
}

impl std::fmt::Debug for AuthSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSection")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("subdomain", &self.zendesk.subdomain)
            .field("auth", &self.auth)
            .field("paths", &self.paths)
            .field("runtime", &self.runtime)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Treat empty strings in the file the same as absent values.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.zendesk.subdomain.trim().is_empty() {
            anyhow::bail!("zendesk.subdomain must not be empty");
        }
        let t = &self.throttle;
        for (name, min, max) in [
            ("between_tickets", t.between_tickets_min_s, t.between_tickets_max_s),
            ("after_print", t.after_print_min_s, t.after_print_max_s),
        ] {
            if !(min >= 0.0 && min <= max) {
                anyhow::bail!("throttle.{name}: need 0 <= min <= max, got {min}..{max}");
            }
        }
        if self.limits.max_pages < 1 {
            anyhow::bail!("limits.max_pages must be at least 1");
        }
        if self.limits.checkpoint_every < 1 {
            anyhow::bail!("limits.checkpoint_every must be at least 1");
        }
        if self.paths.codes_file.trim().is_empty() || self.paths.output_dir.trim().is_empty() {
            anyhow::bail!("paths.codes_file and paths.output_dir are required");
        }
        Ok(())
    }

    pub fn email(&self) -> Option<&str> {
        non_empty(&self.auth.email)
    }

    pub fn password(&self) -> Option<&str> {
        non_empty(&self.auth.password)
    }

    pub fn codes_file(&self) -> PathBuf {
        expand_tilde(&self.paths.codes_file)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_tilde(&self.paths.output_dir)
    }

    pub fn endpoints(&self) -> anyhow::Result<Endpoints> {
        Endpoints::for_subdomain(&self.zendesk.subdomain)
    }

    pub fn discovery_limits(&self) -> DiscoveryLimits {
        DiscoveryLimits {
            max_pages: self.limits.max_pages,
            max_items: self.limits.max_tickets_per_assessor,
        }
    }

    pub fn export_config(&self) -> anyhow::Result<ExportConfig> {
        Ok(ExportConfig {
            output_dir: self.output_dir(),
            endpoints: self.endpoints()?,
            after_print: DelayRange::from_secs_f64(
                self.throttle.after_print_min_s,
                self.throttle.after_print_max_s,
            ),
            wait: WaitConfig::default(),
            nav_retry: RetryConfig::default(),
        })
    }

    pub fn run_config(&self, no_progress_bar: bool) -> RunConfig {
        RunConfig {
            checkpoint_every: self.limits.checkpoint_every,
            max_session_recoveries: self.limits.max_session_recoveries,
            between_tickets: DelayRange::from_secs_f64(
                self.throttle.between_tickets_min_s,
                self.throttle.between_tickets_max_s,
            ),
            failure_delay: Duration::from_millis(800),
            session_retry: RetryConfig {
                max_retries: self.limits.retry_create_driver,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(10),
            },
            no_progress_bar: no_progress_bar || self.runtime.no_progress_bar,
            keep_browser_open: self.runtime.keep_browser_open,
        }
    }

    pub fn browser_config(&self, headless: bool) -> BrowserConfig {
        BrowserConfig {
            chromedriver_path: expand_tilde(&self.paths.chromedriver_path),
            headless: headless || self.runtime.headless,
            profile_root: self.output_dir().join(PROFILE_DIR),
        }
    }
}
