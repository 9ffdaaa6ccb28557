// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Row-addressed request dispatch with stale-location retry.

use std::{future::Future, sync::Arc};

use log::debug;
use table_rpc::RegionServerRef;

use crate::{
    connection::ConnectionPool,
    directory::{DirectoryCache, RegionLocation},
    error::Result,
    resolver::CatalogResolver,
    retry::RetryPolicy,
};

/// Wraps any per-row RPC: resolves the owning region through the cache,
/// invokes the operation against its server, and absorbs stale-location
/// failures by invalidating the table directory and re-resolving before the
/// next attempt. Every other error is terminal at this layer.
pub struct Dispatcher {
    pool: Arc<ConnectionPool>,
    cache: Arc<DirectoryCache>,
    resolver: Arc<CatalogResolver>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<ConnectionPool>,
        cache: Arc<DirectoryCache>,
        resolver: Arc<CatalogResolver>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            cache,
            resolver,
            retry,
        }
    }

    /// Dispatch `op` against the region of `table` covering `row`. The
    /// table must have been opened.
    pub async fn dispatch<T, Op, Fut>(&self, table: &str, row: &[u8], op: Op) -> Result<T>
    where
        Op: Fn(RegionServerRef, RegionLocation) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry
            .retry(
                "row dispatch",
                |tries| self.attempt(table, row, &op, tries),
                |err| err.is_stale_location(),
            )
            .await
    }

    async fn attempt<T, Op, Fut>(
        &self,
        table: &str,
        row: &[u8],
        op: &Op,
        tries: usize,
    ) -> Result<T>
    where
        Op: Fn(RegionServerRef, RegionLocation) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let location = self.cache.lookup(table, row).await?;
        let server = self.pool.connect(&location.server).await?;
        match op(server, location.clone()).await {
            Err(err) if err.is_stale_location() => {
                debug!(
                    "Stale region location, table:{}, region:{}, tries:{}, err:{}",
                    table, location.region.region_name, tries, err
                );
                self.cache.invalidate_region(&location).await;
                self.resolver.resolve_table(table).await?;
                Err(err)
            }
            other => other,
        }
    }
}
