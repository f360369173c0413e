//! Structure of the configuration file.
//!
#![allow(non_snake_case)]

use anyhow::{bail, Context};
use quorum_sdk::{CoordinatorSettings, Parameters};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONF_PATH: &str = "quorum_peer.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PeerConfig {
    pub peer: PeerSection,
    #[serde(default)]
    pub session: SessionSection,
    pub logging: LoggingConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PeerSection {
    pub PeerId: String,
    pub SqlitePath: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SessionSection {
    pub QuorumTimeoutSecs: u64,
    pub ComputationTimeoutSecs: u64,
    pub ActivityPollSecs: u64,
    pub Parties: u16,
    pub Threshold: u16,
}

impl Default for SessionSection {
    fn default() -> Self {
        let settings = CoordinatorSettings::default();
        Self {
            QuorumTimeoutSecs: settings.quorum_timeout.as_secs(),
            ComputationTimeoutSecs: settings.computation_timeout.as_secs(),
            ActivityPollSecs: settings.activity_poll.as_secs(),
            Parties: settings.parameters.parties,
            Threshold: settings.parameters.threshold,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub Level: String,
    pub Dir: String,
}

impl PeerConfig {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            bail!(
                "`{}` not found.\nOriginally, this file accompanies the executable.",
                path.display()
            );
        }
        let conf_str = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Cannot read `{}`", path.display()))?;
        Self::parse(&conf_str)
            .with_context(|| format!("Cannot decode `{}`", path.display()))
    }

    pub fn parse(conf_str: &str) -> anyhow::Result<Self> {
        let conf: PeerConfig = toml::from_str(conf_str)?;
        conf.validate()?;
        Ok(conf)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let level = self.logging.Level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            bail!(
                "Unknown log level «{}», expected one of {}",
                self.logging.Level,
                LOG_LEVELS.join("|")
            );
        }
        if self.peer.PeerId.trim().is_empty() {
            bail!("PeerId may not be empty");
        }
        if self.session.QuorumTimeoutSecs == 0 || self.session.ComputationTimeoutSecs == 0 {
            bail!("session timeouts must be positive");
        }
        self.settings().parameters.validate()?;
        Ok(())
    }

    pub fn settings(&self) -> CoordinatorSettings {
        let s = &self.session;
        CoordinatorSettings {
            quorum_timeout: Duration::from_secs(s.QuorumTimeoutSecs),
            computation_timeout: Duration::from_secs(s.ComputationTimeoutSecs),
            activity_poll: Duration::from_secs(s.ActivityPollSecs.max(1)),
            parameters: Parameters {
                parties: s.Parties,
                threshold: s.Threshold,
            },
        }
    }
}
