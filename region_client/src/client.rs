// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Client facade.

use std::sync::Arc;

use snafu::ensure;
use table_rpc::{
    types::{Cell, Timestamp},
    ConnectionFactoryRef,
};

use crate::{
    catalog,
    config::Config,
    connection::ConnectionPool,
    directory::DirectoryCache,
    dispatch::Dispatcher,
    error::{remote_err, IllegalArgument, Result},
    master::MasterLocator,
    resolver::CatalogResolver,
    retry::RetryPolicy,
    scanner::TableScanner,
    update::{self, UpdateSession},
};

/// Entry point of the client: resolves tables through the two-level
/// catalog, dispatches row operations with stale-location retry, and issues
/// DDL to the master. One instance per cluster; all internals are shared
/// behind it.
pub struct Client {
    pub(crate) pool: Arc<ConnectionPool>,
    pub(crate) master: Arc<MasterLocator>,
    pub(crate) cache: Arc<DirectoryCache>,
    pub(crate) resolver: Arc<CatalogResolver>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) retry: RetryPolicy,
}

impl Client {
    pub fn new(config: Config, factory: ConnectionFactoryRef) -> Self {
        let retry = RetryPolicy::new(config.max_retries, config.pause.0);
        let pool = Arc::new(ConnectionPool::new(factory.clone()));
        let master = Arc::new(MasterLocator::new(
            factory,
            config.master_addr.clone(),
            retry.clone(),
        ));
        let cache = Arc::new(DirectoryCache::new());
        let resolver = Arc::new(CatalogResolver::new(
            pool.clone(),
            master.clone(),
            cache.clone(),
            retry.clone(),
        ));
        let dispatcher = Dispatcher::new(
            pool.clone(),
            cache.clone(),
            resolver.clone(),
            retry.clone(),
        );

        Self {
            pool,
            master,
            cache,
            resolver,
            dispatcher,
            retry,
        }
    }

    /// Resolve `table` and cache its region directory. Idempotent; every
    /// row operation requires the table to have been opened.
    pub async fn open_table(&self, table: &str) -> Result<()> {
        check_table_name(table)?;
        self.resolver.ensure_table(table).await.map(|_| ())
    }

    /// Latest version of one cell.
    pub async fn get(&self, table: &str, row: &[u8], column: &str) -> Result<Option<Vec<u8>>> {
        check_table_name(table)?;
        check_row(row)?;
        let row_key = row.to_vec();
        let column = column.to_string();
        self.dispatcher
            .dispatch(table, row, move |server, location| {
                let row = row_key.clone();
                let column = column.clone();
                async move {
                    server
                        .get(&location.region.region_name, &row, &column)
                        .await
                        .map_err(remote_err)
                }
            })
            .await
    }

    /// Up to `num_versions` most recent versions of one cell, newest
    /// first.
    pub async fn get_versions(
        &self,
        table: &str,
        row: &[u8],
        column: &str,
        num_versions: u32,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        check_table_name(table)?;
        check_row(row)?;
        let row_key = row.to_vec();
        let column = column.to_string();
        self.dispatcher
            .dispatch(table, row, move |server, location| {
                let row = row_key.clone();
                let column = column.clone();
                async move {
                    server
                        .get_versions(&location.region.region_name, &row, &column, num_versions)
                        .await
                        .map_err(remote_err)
                }
            })
            .await
    }

    /// Like [Self::get_versions], restricted to versions written at or
    /// before `timestamp`.
    pub async fn get_versions_before(
        &self,
        table: &str,
        row: &[u8],
        column: &str,
        timestamp: Timestamp,
        num_versions: u32,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        check_table_name(table)?;
        check_row(row)?;
        let row_key = row.to_vec();
        let column = column.to_string();
        self.dispatcher
            .dispatch(table, row, move |server, location| {
                let row = row_key.clone();
                let column = column.clone();
                async move {
                    server
                        .get_versions_before(
                            &location.region.region_name,
                            &row,
                            &column,
                            timestamp,
                            num_versions,
                        )
                        .await
                        .map_err(remote_err)
                }
            })
            .await
    }

    /// All cells of one row.
    pub async fn get_row(&self, table: &str, row: &[u8]) -> Result<Vec<Cell>> {
        check_table_name(table)?;
        check_row(row)?;
        let row_key = row.to_vec();
        self.dispatcher
            .dispatch(table, row, move |server, location| {
                let row = row_key.clone();
                async move {
                    server
                        .get_row(&location.region.region_name, &row)
                        .await
                        .map_err(remote_err)
                }
            })
            .await
    }

    /// Ordered scan of `columns` over every region intersecting
    /// `[start_row, +inf)`. An empty `start_row` scans the whole table.
    pub async fn scan(
        &self,
        table: &str,
        columns: &[&str],
        start_row: &[u8],
    ) -> Result<TableScanner> {
        check_table_name(table)?;
        self.resolver.ensure_table(table).await?;
        TableScanner::open(
            self.pool.clone(),
            self.cache.clone(),
            self.resolver.clone(),
            self.retry.clone(),
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
            start_row.to_vec(),
        )
        .await
    }

    /// Begin a single-row atomic update on `row`, returning the session
    /// holding its lock.
    pub async fn start_update(&self, table: &str, row: &[u8]) -> Result<UpdateSession> {
        check_table_name(table)?;
        check_row(row)?;
        update::begin(&self.dispatcher, table, row).await
    }
}

/// A usable user table name: non-empty and not a reserved catalog table.
pub(crate) fn check_table_name(table: &str) -> Result<()> {
    ensure!(
        !table.is_empty(),
        IllegalArgument {
            msg: "table name must not be empty",
        }
    );
    ensure!(
        !catalog::is_reserved_table(table),
        IllegalArgument {
            msg: format!("table name {} is reserved", table),
        }
    );
    Ok(())
}

pub(crate) fn check_row(row: &[u8]) -> Result<()> {
    ensure!(
        !row.is_empty(),
        IllegalArgument {
            msg: "row key must not be empty",
        }
    );
    Ok(())
}
