// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Single-row update sessions.

use log::{debug, warn};
use rand::Rng;
use snafu::ensure;
use table_rpc::{
    types::{ClientId, LockId, RegionDescriptor, RowKey, ServerAddress},
    RegionServerRef,
};

use crate::{
    dispatch::Dispatcher,
    error::{remote_err, NoActiveSession, Result},
};

/// A single-row atomic update in flight: a row lock held on the server of
/// the region that covered the row when the session began.
///
/// The session pins its region, server and client id for its whole life.
/// `commit` and `abort` consume the session; an RPC failure during `put` or
/// `delete` tears the session down with a best-effort abort, after which
/// every further call fails with `NoActiveSession`.
pub struct UpdateSession {
    region: RegionDescriptor,
    server: RegionServerRef,
    server_addr: ServerAddress,
    client_id: ClientId,
    lock: LockId,
    row: RowKey,
    active: bool,
}

/// Begin a session for `row`, resolving its region with the same
/// invalidate-on-stale retry the dispatcher applies to reads.
pub(crate) async fn begin(dispatcher: &Dispatcher, table: &str, row: &[u8]) -> Result<UpdateSession> {
    // The id only distinguishes concurrent sessions on the server; a
    // non-cryptographic draw is enough.
    let client_id: ClientId = rand::thread_rng().gen();
    let row_key = row.to_vec();

    dispatcher
        .dispatch(table, row, move |server, location| {
            let row = row_key.clone();
            async move {
                let lock = server
                    .start_update(&location.region.region_name, client_id, &row)
                    .await
                    .map_err(remote_err)?;
                debug!(
                    "Update session started, region:{}, client_id:{}, lock_id:{}",
                    location.region.region_name, client_id, lock
                );
                Ok(UpdateSession {
                    region: location.region,
                    server,
                    server_addr: location.server,
                    client_id,
                    lock,
                    row,
                    active: true,
                })
            }
        })
        .await
}

impl UpdateSession {
    pub fn row(&self) -> &[u8] {
        &self.row
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stage a cell write under the session's lock.
    pub async fn put(&mut self, column: &str, value: Vec<u8>) -> Result<()> {
        self.check_active()?;
        let result = self
            .server
            .put(
                &self.region.region_name,
                self.client_id,
                self.lock,
                column,
                value,
            )
            .await
            .map_err(remote_err);
        if let Err(err) = result {
            self.teardown_after_failure(&err).await;
            return Err(err);
        }
        Ok(())
    }

    /// Stage a cell deletion under the session's lock.
    pub async fn delete(&mut self, column: &str) -> Result<()> {
        self.check_active()?;
        let result = self
            .server
            .delete(&self.region.region_name, self.client_id, self.lock, column)
            .await
            .map_err(remote_err);
        if let Err(err) = result {
            self.teardown_after_failure(&err).await;
            return Err(err);
        }
        Ok(())
    }

    /// Atomically apply the staged changes. The session ends no matter how
    /// the call returns.
    pub async fn commit(mut self) -> Result<()> {
        self.check_active()?;
        self.active = false;
        self.server
            .commit(&self.region.region_name, self.client_id, self.lock)
            .await
            .map_err(remote_err)
    }

    /// Discard the staged changes. The session ends no matter how the call
    /// returns.
    pub async fn abort(mut self) -> Result<()> {
        self.check_active()?;
        self.active = false;
        self.server
            .abort(&self.region.region_name, self.client_id, self.lock)
            .await
            .map_err(remote_err)
    }

    fn check_active(&self) -> Result<()> {
        ensure!(self.active, NoActiveSession);
        Ok(())
    }

    /// A mutation RPC failed: try to abort the server-side lock, ignoring
    /// any error of the abort itself, and end the session. The caller
    /// surfaces the original error.
    async fn teardown_after_failure(&mut self, err: &crate::error::Error) {
        warn!(
            "Update RPC failed, aborting session, region:{}, lock_id:{}, err:{}",
            self.region.region_name, self.lock, err
        );
        self.active = false;
        if let Err(abort_err) = self
            .server
            .abort(&self.region.region_name, self.client_id, self.lock)
            .await
        {
            warn!(
                "Best effort abort failed, region:{}, lock_id:{}, err:{}",
                self.region.region_name, self.lock, abort_err
            );
        }
    }
}

impl Drop for UpdateSession {
    fn drop(&mut self) {
        if self.active {
            warn!(
                "Update session dropped without commit or abort, region:{}, lock_id:{}",
                self.region.region_name, self.lock
            );
        }
    }
}
