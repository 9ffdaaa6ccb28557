// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Client configuration scalars.

use common_util::config::ReadableDuration;
use serde_derive::Deserialize;

/// Fallback master address when `master.address` is not configured.
const DEFAULT_MASTER_ADDR: &str = "127.0.0.1:60000";
/// Default sleep between retries (`client.pause`).
const DEFAULT_PAUSE: ReadableDuration = ReadableDuration::millis(30_000);
/// Default retry bound N (`client.retries.number`).
const DEFAULT_MAX_RETRIES: usize = 5;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// `host:port` of the master (`master.address`).
    pub master_addr: String,
    /// Sleep between retry attempts (`client.pause`).
    pub pause: ReadableDuration,
    /// Bound on attempts of every retried operation
    /// (`client.retries.number`).
    pub max_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            master_addr: DEFAULT_MASTER_ADDR.to_string(),
            pause: DEFAULT_PAUSE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}
