//! Configuration model and loader.
//!
//! Layering mirrors the teacher's `config.rs`: embedded defaults, then an
//! optional project file, then an optional user file, then an explicit CLI
//! override, then environment variables — each layer overriding the last.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Poll,
    Webhook,
    Dual,
}

impl OperationMode {
    pub fn polling_enabled(&self) -> bool {
        matches!(self, OperationMode::Poll | OperationMode::Dual)
    }

    pub fn webhook_enabled(&self) -> bool {
        matches!(self, OperationMode::Webhook | OperationMode::Dual)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub operation: OperationConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub ignore_archived: bool,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub branch: BranchConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub fix: FixConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rest_api: RestApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationConfig {
    pub mode: OperationMode,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Dual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_base_interval")]
    pub base_interval_seconds: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_seconds: u64,
    #[serde(default = "default_max_concurrent_repos")]
    pub max_concurrent_repos: usize,
    /// Size of the PR-processing worker pool draining the Deduplicator queue
    /// (§5 "worker pool reading from the Deduplicator queue") — independent
    /// of `max_concurrent_repos`, which bounds poll cycles instead.
    #[serde(default = "default_processor_workers")]
    pub processor_workers: usize,
    #[serde(default = "default_true")]
    pub adaptive: bool,
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Consecutive empty cycles before the cooldown multiplier kicks in.
    #[serde(default = "default_cooldown_after")]
    pub cooldown_after_empty_cycles: u32,
    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: f64,
    #[serde(default = "default_cycle_deadline")]
    pub cycle_deadline_seconds: u64,
    #[serde(default = "default_pipeline_deadline")]
    pub pipeline_deadline_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_interval() -> u64 {
    60
}
fn default_max_interval() -> u64 {
    3600
}
fn default_max_concurrent_repos() -> usize {
    4
}
fn default_processor_workers() -> usize {
    4
}
fn default_cooldown_after() -> u32 {
    5
}
fn default_cooldown_multiplier() -> f64 {
    1.5
}
fn default_cycle_deadline() -> u64 {
    120
}
fn default_pipeline_deadline() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_interval_seconds: default_base_interval(),
            max_interval_seconds: default_max_interval(),
            max_concurrent_repos: default_max_concurrent_repos(),
            processor_workers: default_processor_workers(),
            adaptive: true,
            repositories: Vec::new(),
            cooldown_after_empty_cycles: default_cooldown_after(),
            cooldown_multiplier: default_cooldown_multiplier(),
            cycle_deadline_seconds: default_cycle_deadline(),
            pipeline_deadline_seconds: default_pipeline_deadline(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_identities")]
    pub identities: Vec<String>,
}

fn default_bot_identities() -> Vec<String> {
    vec!["renovate[bot]".to_string(), "dependabot[bot]".to_string()]
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            identities: default_bot_identities(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    #[serde(default = "default_branch_prefixes")]
    pub prefix: Vec<String>,
}

fn default_branch_prefixes() -> Vec<String> {
    vec!["renovate/".to_string()]
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            prefix: default_branch_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_approval_body")]
    pub body: String,
}

fn default_approval_body() -> String {
    "Automatically approved: all required checks are green.".to_string()
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            body: default_approval_body(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FixConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    #[serde(default = "default_rate_buffer")]
    pub buffer: u64,
    #[serde(default = "default_throttle_threshold")]
    pub throttle_threshold: f64,
    #[serde(default = "default_throttle_factor")]
    pub throttle_factor: u32,
}

fn default_rate_buffer() -> u64 {
    100
}
fn default_throttle_threshold() -> f64 {
    0.8
}
fn default_throttle_factor() -> u32 {
    2
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            buffer: default_rate_buffer(),
            throttle_threshold: default_throttle_threshold(),
            throttle_factor: default_throttle_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Per-namespace TTL overrides, in seconds. Keys match `crate::cache`
    /// namespace names (`repo.meta`, `repo.prs`, `pr.checks`,
    /// `identity.is_bot`).
    #[serde(default)]
    pub ttls: std::collections::HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DashboardCreationMode {
    Always,
    RenovatePrsPresent,
    TestReposOnly,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_title")]
    pub issue_title: String,
    #[serde(default = "default_creation_mode")]
    pub creation_mode: DashboardCreationMode,
    /// `owner/name` entries treated as test repos for `creation_mode:
    /// test-repos-only` — the only policy that discriminates by repo rather
    /// than by dashboard content.
    #[serde(default)]
    pub test_repositories: Vec<String>,
}

fn default_dashboard_title() -> String {
    "Renovate Agent Dashboard".to_string()
}

fn default_creation_mode() -> DashboardCreationMode {
    DashboardCreationMode::RenovatePrsPresent
}

impl DashboardConfig {
    pub fn is_test_repo(&self, repo: &crate::platform::RepoRef) -> bool {
        self.test_repositories.iter().any(|r| r == &repo.full_name())
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            issue_title: default_dashboard_title(),
            creation_mode: default_creation_mode(),
            test_repositories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_true")]
    pub require_signature: bool,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_seconds: u64,
}

fn default_webhook_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub to_file: bool,
    #[serde(default = "default_log_dir")]
    pub directory: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
            directory: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestApiConfig {
    #[serde(default = "default_rest_port")]
    pub port: u16,
}

fn default_rest_port() -> u16 {
    8080
}

impl Default for RestApiConfig {
    fn default() -> Self {
        Self {
            port: default_rest_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            operation: OperationConfig::default(),
            poll: PollConfig::default(),
            allowlist: Vec::new(),
            ignore_archived: true,
            bot: BotConfig::default(),
            branch: BranchConfig::default(),
            approval: ApprovalConfig::default(),
            fix: FixConfig::default(),
            rate: RateConfig::default(),
            cache: CacheConfig::default(),
            dashboard: DashboardConfig::default(),
            webhook: WebhookConfig::default(),
            logging: LoggingConfig::default(),
            rest_api: RestApiConfig::default(),
        }
    }
}

impl Config {
    /// Default project-local config file name.
    pub fn project_config_path() -> std::path::PathBuf {
        std::path::PathBuf::from("renovate-agent.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let project_config = Self::project_config_path();
        if project_config.exists() {
            builder = builder.add_source(config::File::from(project_config));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("renovate-agent").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RENOVATE_AGENT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("failed to load configuration")?;
        let config: Config = config
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        Ok(config)
    }

    /// Validate cross-field invariants that `serde` defaults alone can't
    /// express (§9 open question: `webhook.require_signature`).
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if !self.operation.mode.polling_enabled() && !self.operation.mode.webhook_enabled() {
            return Err(ErrorKind::ConfigInvalid(
                "operation.mode must enable polling, webhook, or both".into(),
            ));
        }

        if self.operation.mode.webhook_enabled()
            && self.webhook.require_signature
            && self.webhook.secret.as_deref().unwrap_or("").is_empty()
        {
            return Err(ErrorKind::ConfigInvalid(
                "webhook.secret is required when webhook intake is enabled and \
                 webhook.require_signature is true"
                    .into(),
            ));
        }

        if self.poll.max_concurrent_repos == 0 {
            return Err(ErrorKind::ConfigInvalid(
                "poll.max_concurrent_repos must be at least 1".into(),
            ));
        }

        if self.poll.processor_workers == 0 {
            return Err(ErrorKind::ConfigInvalid(
                "poll.processor_workers must be at least 1".into(),
            ));
        }

        if self.poll.base_interval_seconds == 0 {
            return Err(ErrorKind::ConfigInvalid(
                "poll.base_interval_seconds must be greater than 0".into(),
            ));
        }

        if self.poll.max_interval_seconds < self.poll.base_interval_seconds {
            return Err(ErrorKind::ConfigInvalid(
                "poll.max_interval_seconds must be >= poll.base_interval_seconds".into(),
            ));
        }

        Ok(())
    }

    /// TTL override for a cache namespace, if configured.
    pub fn cache_ttl_override(&self, namespace: &str) -> Option<std::time::Duration> {
        self.cache
            .ttls
            .get(namespace)
            .map(|secs| std::time::Duration::from_secs(*secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn webhook_without_secret_fails_when_required() {
        let mut config = Config::default();
        config.operation.mode = OperationMode::Webhook;
        config.webhook.require_signature = true;
        config.webhook.secret = None;
        assert!(matches!(
            config.validate(),
            Err(ErrorKind::ConfigInvalid(_))
        ));
    }

    #[test]
    fn webhook_without_secret_ok_when_signature_not_required() {
        let mut config = Config::default();
        config.operation.mode = OperationMode::Webhook;
        config.webhook.require_signature = false;
        config.webhook.secret = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let mut config = Config::default();
        config.poll.max_concurrent_repos = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_processor_workers_is_invalid() {
        let mut config = Config::default();
        config.poll.processor_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_interval_below_base_is_invalid() {
        let mut config = Config::default();
        config.poll.max_interval_seconds = 10;
        config.poll.base_interval_seconds = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn dashboard_test_repo_membership() {
        use crate::platform::RepoRef;
        let mut config = Config::default();
        config.dashboard.test_repositories = vec!["acme/sandbox".into()];
        assert!(config.dashboard.is_test_repo(&RepoRef::new("acme", "sandbox")));
        assert!(!config.dashboard.is_test_repo(&RepoRef::new("acme", "web")));
    }

    #[test]
    fn operation_mode_flags() {
        assert!(OperationMode::Poll.polling_enabled());
        assert!(!OperationMode::Poll.webhook_enabled());
        assert!(OperationMode::Dual.polling_enabled());
        assert!(OperationMode::Dual.webhook_enabled());
    }
}
