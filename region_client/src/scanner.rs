// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Multi-region streaming scanner.

use std::{collections::VecDeque, sync::Arc};

use log::{debug, warn};
use table_rpc::{
    types::{RowKey, ScanRow, ScannerId},
    RegionServerRef,
};

use crate::{
    connection::ConnectionPool,
    directory::{DirectoryCache, RegionLocation},
    error::{remote_err, Result},
    resolver::CatalogResolver,
    retry::RetryPolicy,
};

struct OpenRegionScanner {
    server: RegionServerRef,
    scanner: ScannerId,
    region_name: String,
}

/// Ordered iteration over every region of a table whose range intersects
/// `[start_row, +inf)`. The region sequence is captured when the scanner is
/// built; region movement is absorbed by re-resolving the moved region at
/// its captured start key. Rows come back in strictly increasing key order
/// because regions are visited in start-key order and each server scanner
/// is ordered.
pub struct TableScanner {
    pool: Arc<ConnectionPool>,
    cache: Arc<DirectoryCache>,
    resolver: Arc<CatalogResolver>,
    retry: RetryPolicy,
    table: String,
    columns: Vec<String>,
    start_row: RowKey,
    /// Regions still to visit, captured at build time.
    pending: VecDeque<RegionLocation>,
    current: Option<OpenRegionScanner>,
    closed: bool,
}

impl TableScanner {
    pub(crate) async fn open(
        pool: Arc<ConnectionPool>,
        cache: Arc<DirectoryCache>,
        resolver: Arc<CatalogResolver>,
        retry: RetryPolicy,
        table: String,
        columns: Vec<String>,
        start_row: RowKey,
    ) -> Result<Self> {
        let mut scanner = Self {
            pool,
            cache,
            resolver,
            retry,
            table,
            columns,
            start_row,
            pending: VecDeque::new(),
            current: None,
            closed: false,
        };
        scanner.open_first().await?;
        Ok(scanner)
    }

    /// Snapshot the directory from the region covering `start_row` to the
    /// last region, then open the first region's scanner with `start_row`
    /// as the hint. A stale location reloads the directory and recomputes
    /// the snapshot before the next attempt.
    async fn open_first(&mut self) -> Result<()> {
        let mut tries = 0;
        loop {
            let directory = self.resolver.ensure_table(&self.table).await?;
            self.pending = directory.tail(&self.start_row).into_iter().collect();
            let first = match self.pending.pop_front() {
                Some(location) => location,
                None => {
                    self.closed = true;
                    return Ok(());
                }
            };
            let hint = self.start_row.clone();
            match self.try_open(&first, &hint).await {
                Ok(open) => {
                    self.current = Some(open);
                    return Ok(());
                }
                Err(err) if err.is_stale_location() && tries + 1 < self.retry.max_tries() => {
                    tries += 1;
                    self.cache.invalidate(&self.table).await;
                    warn!(
                        "Region moved while opening scanner, table:{}, tries:{}, err:{}",
                        self.table, tries, err
                    );
                    self.retry.pause().await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Next row in key order, `None` once the last region is exhausted or
    /// the scanner was closed.
    pub async fn next(&mut self) -> Result<Option<ScanRow>> {
        if self.closed {
            return Ok(None);
        }
        loop {
            let (server, scanner) = match &self.current {
                Some(open) => (open.server.clone(), open.scanner),
                None => {
                    match self.pending.pop_front() {
                        Some(location) => {
                            // Later regions are read from their beginning.
                            let open = self.open_region(location, b"").await?;
                            self.current = Some(open);
                            continue;
                        }
                        None => {
                            self.closed = true;
                            return Ok(None);
                        }
                    }
                }
            };

            match server.next_row(scanner).await {
                Ok(Some(row)) => return Ok(Some(row)),
                Ok(None) => {
                    // Region exhausted: release its scanner and advance.
                    self.release_current().await;
                }
                Err(err) => {
                    let err = remote_err(err);
                    self.release_current().await;
                    return Err(err);
                }
            }
        }
    }

    /// Close the scanner, releasing any open server-side scanner. Safe to
    /// call more than once; `next` returns `None` afterwards.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending.clear();
        if let Some(open) = self.current.take() {
            open.server
                .close_scanner(open.scanner)
                .await
                .map_err(remote_err)?;
        }
        Ok(())
    }

    /// Open a scanner on `location`, re-resolving the region at its start
    /// key when the captured location went stale.
    async fn open_region(
        &self,
        location: RegionLocation,
        hint: &[u8],
    ) -> Result<OpenRegionScanner> {
        let mut location = location;
        let mut tries = 0;
        loop {
            match self.try_open(&location, hint).await {
                Ok(open) => return Ok(open),
                Err(err) if err.is_stale_location() && tries + 1 < self.retry.max_tries() => {
                    tries += 1;
                    let start_key = location.region.start_key.clone();
                    self.cache.invalidate(&self.table).await;
                    self.resolver.resolve_table(&self.table).await?;
                    location = self.cache.lookup(&self.table, &start_key).await?;
                    warn!(
                        "Region moved while advancing scanner, table:{}, start_key:{:?}, tries:{}, err:{}",
                        self.table, start_key, tries, err
                    );
                    self.retry.pause().await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_open(&self, location: &RegionLocation, hint: &[u8]) -> Result<OpenRegionScanner> {
        let server = self.pool.connect(&location.server).await?;
        let scanner = server
            .open_scanner(&location.region.region_name, &self.columns, hint)
            .await
            .map_err(remote_err)?;
        debug!(
            "Opened region scanner, region:{}, scanner_id:{}",
            location.region.region_name, scanner
        );
        Ok(OpenRegionScanner {
            server,
            scanner,
            region_name: location.region.region_name.clone(),
        })
    }

    async fn release_current(&mut self) {
        if let Some(open) = self.current.take() {
            if let Err(err) = open.server.close_scanner(open.scanner).await {
                warn!(
                    "Failed to close region scanner, region:{}, scanner_id:{}, err:{}",
                    open.region_name, open.scanner, err
                );
            }
        }
    }
}

impl Drop for TableScanner {
    fn drop(&mut self) {
        if let Some(open) = &self.current {
            warn!(
                "Table scanner dropped without close, region:{}, scanner_id:{}",
                open.region_name, open.scanner
            );
        }
    }
}
