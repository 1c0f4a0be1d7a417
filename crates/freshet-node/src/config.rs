use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use freshet_codec::BatchLimits;

/// Runtime configuration for one process group.
///
/// Defaults first, then an optional TOML file, then `FRESHET_`-prefixed
/// environment variables, later sources winning.
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Hard cap on one packed microbatch, acks included.
    pub batch_byte_budget: usize,
    /// Maximum rows per microbatch.
    pub batch_row_budget: u32,
    /// Bytes of the byte budget held back for ack references.
    pub batch_ack_reserve: usize,
    /// Slots in the shared acknowledgment arena.
    pub ack_slots: usize,
    /// Sleep between ack-predicate polls while waiting on a send.
    #[serde(with = "humantime_serde")]
    pub ack_poll_interval: Duration,
    /// How long a consumer waits for inbound traffic before going idle.
    #[serde(with = "humantime_serde")]
    pub recv_poll_timeout: Duration,
    /// Per-mailbox high-water mark in payload bytes.
    pub mailbox_high_water: usize,
    pub num_workers: usize,
    pub num_combiners: usize,
    pub num_queues: usize,
}

impl DeliveryConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("batch_byte_budget", 1024 * 1024)?
            .set_default("batch_row_budget", 250)?
            .set_default("batch_ack_reserve", 2048)?
            .set_default("ack_slots", 128)?
            .set_default("ack_poll_interval", "1ms")?
            .set_default("recv_poll_timeout", "10ms")?
            .set_default("mailbox_high_water", 8 * 1024 * 1024)?
            .set_default("num_workers", 1)?
            .set_default("num_combiners", 1)?
            .set_default("num_queues", 1)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("FRESHET").try_parsing(true));

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 || self.num_combiners == 0 || self.num_queues == 0 {
            return Err(ConfigError::Message(
                "num_workers, num_combiners and num_queues must all be at least 1".into(),
            ));
        }
        if self.batch_ack_reserve >= self.batch_byte_budget {
            return Err(ConfigError::Message(
                "batch_ack_reserve must leave room under batch_byte_budget".into(),
            ));
        }
        Ok(())
    }

    /// Budgets handed to every microbatch builder in this group.
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            byte_budget: self.batch_byte_budget,
            row_budget: self.batch_row_budget,
            ack_reserve: self.batch_ack_reserve,
        }
    }
}
