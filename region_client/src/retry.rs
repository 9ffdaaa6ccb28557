// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Bounded retry with a fixed pause between attempts.

use std::{fmt, future::Future, time::Duration};

use log::debug;

/// Retry budget shared by every bounded loop in the client: up to
/// `max_tries` attempts, sleeping `pause` between attempts.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_tries: usize,
    pause: Duration,
}

impl RetryPolicy {
    pub fn new(max_tries: usize, pause: Duration) -> Self {
        Self {
            // A zero budget would make every operation fail without ever
            // running; clamp to one attempt.
            max_tries: max_tries.max(1),
            pause,
        }
    }

    pub fn max_tries(&self) -> usize {
        self.max_tries
    }

    /// Sleep one pause interval.
    pub async fn pause(&self) {
        tokio::time::sleep(self.pause).await;
    }

    /// Run `op` up to the retry bound. `retryable` decides whether a
    /// failure consumes another attempt; a non-retryable failure and the
    /// final attempt's failure are returned as-is.
    pub async fn retry<T, E, Op, Fut, Cls>(
        &self,
        what: &str,
        mut op: Op,
        retryable: Cls,
    ) -> std::result::Result<T, E>
    where
        Op: FnMut(usize) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        Cls: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut tries = 0;
        loop {
            match op(tries).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tries += 1;
                    if tries >= self.max_tries || !retryable(&err) {
                        return Err(err);
                    }
                    debug!("Retrying {}, tries:{}, err:{}", what, tries, err);
                    self.pause().await;
                }
            }
        }
    }
}
