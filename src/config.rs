//! Operator configuration.
//!
//! Configuration is loaded once from a YAML file into an immutable, validated
//! snapshot. The platform token is never stored in the file; it comes from the
//! `GITHUB_TOKEN` environment variable (a `.env` file is honored).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{IssueNumber, RepoId, WorkItemId};

/// Default poll interval between engine cycles.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default minimum interval between one item's completion and the next
/// item's assignment.
const DEFAULT_COOLDOWN_MINUTES: u64 = 60;

/// Default login of the agent account on the platform.
const DEFAULT_AGENT_LOGIN: &str = "copilot";

/// Default endpoint of the remote capability server used to invoke the agent.
const DEFAULT_AGENT_ENDPOINT: &str = "https://api.githubcopilot.com/mcp/";

/// Default directory for persisted engine state.
const DEFAULT_STATE_DIR: &str = ".agent-queue";

/// Errors raised while loading or validating configuration.
///
/// All of these are fatal misconfiguration: the process exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("missing required config field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("GITHUB_TOKEN environment variable is not set")]
    MissingToken,
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Raw on-disk configuration shape, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    owner: Option<String>,
    repo: Option<String>,
    target_branch: Option<String>,
    poll_interval_seconds: Option<u64>,
    cooldown_minutes: Option<u64>,
    auto_merge: Option<bool>,
    auto_assign_next: Option<bool>,
    skip_final_review: Option<bool>,
    agent_login: Option<String>,
    agent_endpoint: Option<String>,
    agent_instructions: Option<String>,
    #[serde(default)]
    issue_queue: Vec<WorkItemId>,
    #[serde(default)]
    issue_numbers: BTreeMap<WorkItemId, u64>,
    state_dir: Option<PathBuf>,
}

/// Validated, immutable snapshot of operator settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository the engine operates on.
    pub repo: RepoId,

    /// Branch merges target; also advertised to the agent at assignment.
    pub target_branch: String,

    /// Interval between poll cycles.
    pub poll_interval: Duration,

    /// Minimum interval between one item's completion and the next
    /// assignment.
    pub cooldown_minutes: u64,

    /// Merge approved change requests automatically.
    pub auto_merge: bool,

    /// Assign the next queued item automatically once idle and off cooldown.
    pub auto_assign_next: bool,

    /// Once a revision cycle has happened, merge without a final
    /// approval review.
    pub skip_final_review: bool,

    /// The agent's login on the platform (for review-request dedup).
    pub agent_login: String,

    /// Endpoint of the remote capability server.
    pub agent_endpoint: String,

    /// Instructions posted to the issue at assignment time.
    pub agent_instructions: String,

    /// Initial queue order (seeds the persistent queue).
    pub issue_queue: Vec<WorkItemId>,

    /// Pre-mapped issue numbers for queue items, avoiding platform searches.
    pub issue_numbers: BTreeMap<WorkItemId, IssueNumber>,

    /// Directory holding the persisted engine state.
    pub state_dir: PathBuf,
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let owner = file
            .owner
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingField("owner"))?;
        let repo = file
            .repo
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingField("repo"))?;

        let poll_secs = file
            .poll_interval_seconds
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_seconds",
                reason: "must be at least 1".to_string(),
            });
        }

        let target_branch = file.target_branch.unwrap_or_else(|| "main".to_string());
        if target_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "target_branch",
                reason: "must not be empty".to_string(),
            });
        }

        let mut seen = std::collections::BTreeSet::new();
        for id in &file.issue_queue {
            if !seen.insert(id.clone()) {
                return Err(ConfigError::InvalidValue {
                    field: "issue_queue",
                    reason: format!("duplicate item id {}", id),
                });
            }
        }

        Ok(Config {
            repo: RepoId::new(owner, repo),
            target_branch,
            poll_interval: Duration::from_secs(poll_secs),
            cooldown_minutes: file.cooldown_minutes.unwrap_or(DEFAULT_COOLDOWN_MINUTES),
            auto_merge: file.auto_merge.unwrap_or(true),
            auto_assign_next: file.auto_assign_next.unwrap_or(true),
            skip_final_review: file.skip_final_review.unwrap_or(false),
            agent_login: file
                .agent_login
                .unwrap_or_else(|| DEFAULT_AGENT_LOGIN.to_string()),
            agent_endpoint: file
                .agent_endpoint
                .unwrap_or_else(|| DEFAULT_AGENT_ENDPOINT.to_string()),
            agent_instructions: file.agent_instructions.unwrap_or_default(),
            issue_queue: file.issue_queue,
            issue_numbers: file
                .issue_numbers
                .into_iter()
                .map(|(k, v)| (k, IssueNumber(v)))
                .collect(),
            state_dir: file
                .state_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
        })
    }

    /// Reads the platform token from the environment.
    ///
    /// A `.env` file in the working directory is honored (loaded by `main`).
    pub fn github_token() -> Result<String> {
        std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)
    }

    /// Looks up the pre-mapped issue number for a work item, if any.
    pub fn issue_number_for(&self, id: &WorkItemId) -> Option<IssueNumber> {
        self.issue_numbers.get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Config> {
        let file: ConfigFile = serde_yaml::from_str(yaml).expect("test yaml parses");
        Config::from_file(file)
    }

    #[test]
    fn minimal_config_applies_defaults() {
        let config = parse("owner: acme\nrepo: widgets\n").unwrap();

        assert_eq!(config.repo, RepoId::new("acme", "widgets"));
        assert_eq!(config.target_branch, "main");
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.cooldown_minutes, 60);
        assert!(config.auto_merge);
        assert!(config.auto_assign_next);
        assert!(!config.skip_final_review);
        assert_eq!(config.agent_login, "copilot");
        assert!(config.issue_queue.is_empty());
    }

    #[test]
    fn full_config_roundtrips() {
        let config = parse(
            "owner: acme\n\
             repo: widgets\n\
             target_branch: develop\n\
             poll_interval_seconds: 120\n\
             cooldown_minutes: 30\n\
             auto_merge: false\n\
             auto_assign_next: false\n\
             agent_instructions: keep commits small\n\
             issue_queue: [TC-A-01, TC-A-02]\n\
             issue_numbers:\n  TC-A-01: 12\n  TC-A-02: 13\n",
        )
        .unwrap();

        assert_eq!(config.target_branch, "develop");
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.cooldown_minutes, 30);
        assert!(!config.auto_merge);
        assert_eq!(config.issue_queue.len(), 2);
        assert_eq!(
            config.issue_number_for(&WorkItemId::from("TC-A-01")),
            Some(IssueNumber(12))
        );
        assert_eq!(config.issue_number_for(&WorkItemId::from("TC-Z-99")), None);
    }

    #[test]
    fn missing_owner_is_fatal() {
        let err = parse("repo: widgets\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("owner")));
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let err = parse("owner: a\nrepo: b\npoll_interval_seconds: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "poll_interval_seconds",
                ..
            }
        ));
    }

    #[test]
    fn duplicate_queue_ids_rejected() {
        let err = parse("owner: a\nrepo: b\nissue_queue: [X-1, X-1]\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "issue_queue",
                ..
            }
        ));
    }
}
