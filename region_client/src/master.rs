// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Master location and liveness.

use log::{info, warn};
use table_rpc::{ConnectionFactoryRef, MasterRef};
use tokio::sync::Mutex;

use crate::{
    error::{remote_err, MasterNotRunning, Result},
    retry::RetryPolicy,
};

/// Finds the master at its configured address, verifies liveness with a
/// cheap probe, and caches the verified handle for later calls.
pub struct MasterLocator {
    factory: ConnectionFactoryRef,
    addr: String,
    retry: RetryPolicy,
    handle: Mutex<Option<MasterRef>>,
}

impl MasterLocator {
    pub fn new(factory: ConnectionFactoryRef, addr: String, retry: RetryPolicy) -> Self {
        Self {
            factory,
            addr,
            retry,
            handle: Mutex::new(None),
        }
    }

    /// A verified master handle, probing up to the retry bound. Fails with
    /// `MasterNotRunning` once the budget is exhausted.
    pub async fn ensure_master(&self) -> Result<MasterRef> {
        let mut handle = self.handle.lock().await;
        if let Some(master) = handle.as_ref() {
            return Ok(master.clone());
        }

        for tries in 0..self.retry.max_tries() {
            match self.probe().await {
                Ok(Some(master)) => {
                    info!("Connected to master, addr:{}", self.addr);
                    *handle = Some(master.clone());
                    return Ok(master);
                }
                Ok(None) => {
                    warn!(
                        "Master probe returned not running, addr:{}, tries:{}",
                        self.addr, tries
                    );
                }
                Err(err) => {
                    warn!(
                        "Failed to reach master, addr:{}, tries:{}, err:{}",
                        self.addr, tries, err
                    );
                }
            }
            if tries + 1 < self.retry.max_tries() {
                self.retry.pause().await;
            }
        }

        MasterNotRunning {
            addr: self.addr.as_str(),
            tries: self.retry.max_tries(),
        }
        .fail()
    }

    /// Forget the cached handle so the next call reconnects.
    pub async fn reset(&self) {
        *self.handle.lock().await = None;
    }

    async fn probe(&self) -> Result<Option<MasterRef>> {
        let master = self
            .factory
            .connect_master(&self.addr)
            .await
            .map_err(remote_err)?;
        let running = master.is_master_running().await.map_err(remote_err)?;
        if running {
            Ok(Some(master))
        } else {
            Ok(None)
        }
    }
}
