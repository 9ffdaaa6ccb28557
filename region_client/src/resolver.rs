// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Two-level catalog resolution: master to root, root to meta, meta to user
//! tables.

use std::sync::Arc;

use log::{debug, warn};
use snafu::{ensure, ResultExt};
use table_rpc::{
    types::{ScannerId, ServerAddress},
    MasterRef, RegionServerRef,
};

use crate::{
    catalog::{
        RegionInfoEncoding, COLUMN_REGION_INFO, COLUMN_SERVER, META_TABLE_NAME, ROOT_REGION_NAME,
        ROOT_TABLE_NAME,
    },
    connection::ConnectionPool,
    directory::{DirectoryCache, RegionDirectory, RegionLocation},
    error::{
        remote_err, DecodeCatalogRow, Error, NoServerForRegion, RegionNotFound, Result,
        TableOffline,
    },
    master::MasterLocator,
    retry::RetryPolicy,
};

/// Outcome of one pass over a catalog region.
enum ScanPass {
    Complete(Vec<RegionLocation>),
    /// A row of the target table exists but carries no server assignment
    /// yet; the whole pass is discarded and retried.
    Unassigned { region: String },
}

/// Walks the catalog to turn table names into region directories,
/// installing every resolution into the directory cache.
pub struct CatalogResolver {
    pool: Arc<ConnectionPool>,
    master: Arc<MasterLocator>,
    cache: Arc<DirectoryCache>,
    retry: RetryPolicy,
}

impl CatalogResolver {
    pub fn new(
        pool: Arc<ConnectionPool>,
        master: Arc<MasterLocator>,
        cache: Arc<DirectoryCache>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            master,
            cache,
            retry,
        }
    }

    /// Resolve `table` from the catalog and install its directory.
    pub async fn resolve_table(&self, table: &str) -> Result<RegionDirectory> {
        if table == ROOT_TABLE_NAME {
            self.resolve_root().await
        } else if table == META_TABLE_NAME {
            self.resolve_meta().await
        } else {
            self.resolve_user_table(table).await
        }
    }

    /// Like [Self::resolve_table], but reuse the cached directory when one
    /// is present.
    pub async fn ensure_table(&self, table: &str) -> Result<RegionDirectory> {
        if let Some(directory) = self.cache.get(table).await {
            return Ok(directory);
        }
        self.resolve_table(table).await
    }

    async fn ensure_root(&self) -> Result<RegionDirectory> {
        if let Some(directory) = self.cache.get(ROOT_TABLE_NAME).await {
            return Ok(directory);
        }
        self.resolve_root().await
    }

    async fn ensure_meta(&self) -> Result<RegionDirectory> {
        if let Some(directory) = self.cache.get(META_TABLE_NAME).await {
            return Ok(directory);
        }
        self.resolve_meta().await
    }

    /// Ask the master where root lives and validate the answer against the
    /// region's own self-describe call; the master may hand out a location
    /// the server no longer agrees with.
    async fn resolve_root(&self) -> Result<RegionDirectory> {
        let master = self.master.ensure_master().await?;
        let mut tries = 0;
        loop {
            let addr = self.wait_for_root_address(&master).await?;
            let server = self.pool.connect(&addr).await?;
            match server.get_region_info(ROOT_REGION_NAME).await {
                Ok(region) => {
                    let mut directory = RegionDirectory::new();
                    directory.insert(RegionLocation {
                        region,
                        server: addr,
                    });
                    self.cache.install(ROOT_TABLE_NAME, directory.clone()).await;
                    return Ok(directory);
                }
                Err(err) if err.is_stale_location() => {
                    tries += 1;
                    if tries >= self.retry.max_tries() {
                        return NoServerForRegion {
                            table: ROOT_TABLE_NAME,
                            msg: format!("root location kept failing validation, last addr:{}", addr),
                        }
                        .fail();
                    }
                    warn!(
                        "Root region is not where the master said, addr:{}, tries:{}, err:{}",
                        addr, tries, err
                    );
                    self.retry.pause().await;
                }
                Err(err) => return Err(remote_err(err)),
            }
        }
    }

    async fn wait_for_root_address(&self, master: &MasterRef) -> Result<ServerAddress> {
        let mut tries = 0;
        loop {
            match master.find_root_region().await.map_err(remote_err)? {
                Some(addr) => return Ok(addr),
                None => {
                    tries += 1;
                    if tries >= self.retry.max_tries() {
                        return NoServerForRegion {
                            table: ROOT_TABLE_NAME,
                            msg: "master never reported a root location",
                        }
                        .fail();
                    }
                    debug!("Master does not know the root location yet, tries:{}", tries);
                    self.retry.pause().await;
                }
            }
        }
    }

    async fn resolve_meta(&self) -> Result<RegionDirectory> {
        let directory = self
            .retry
            .retry(
                "meta table resolution",
                |_| self.meta_pass(),
                |err: &Error| err.is_stale_location(),
            )
            .await?;
        self.cache.install(META_TABLE_NAME, directory.clone()).await;
        Ok(directory)
    }

    async fn meta_pass(&self) -> Result<RegionDirectory> {
        let root = self.ensure_root().await?;
        // The root directory holds exactly one region by construction.
        let root_location = match root.first() {
            Some(location) => location.clone(),
            None => {
                return NoServerForRegion {
                    table: ROOT_TABLE_NAME,
                    msg: "root directory is empty",
                }
                .fail()
            }
        };
        match self
            .scan_catalog_regions(&[root_location], META_TABLE_NAME)
            .await
        {
            Err(err) if err.is_stale_location() => {
                // Root itself moved; force a fresh master round next pass.
                self.cache.invalidate(ROOT_TABLE_NAME).await;
                Err(err)
            }
            other => other,
        }
    }

    async fn resolve_user_table(&self, table: &str) -> Result<RegionDirectory> {
        let directory = self
            .retry
            .retry(
                "user table resolution",
                |_| self.user_table_pass(table),
                |err: &Error| err.is_stale_location(),
            )
            .await?;
        self.cache.install(table, directory.clone()).await;
        Ok(directory)
    }

    async fn user_table_pass(&self, table: &str) -> Result<RegionDirectory> {
        let meta = self.ensure_meta().await?;
        // Meta regions that can hold this table's rows: floor by table
        // name, then every region after it.
        let catalog_regions = meta.tail(table.as_bytes());
        match self.scan_catalog_regions(&catalog_regions, table).await {
            Err(err) if err.is_stale_location() => {
                self.cache.invalidate(META_TABLE_NAME).await;
                Err(err)
            }
            other => other,
        }
    }

    /// Scan an ordered run of catalog regions, accumulating the directory
    /// of `table`. Shared by meta-from-root and user-from-meta resolution.
    async fn scan_catalog_regions(
        &self,
        catalog: &[RegionLocation],
        table: &str,
    ) -> Result<RegionDirectory> {
        let mut directory = RegionDirectory::new();
        let mut saw_rows = false;
        for catalog_location in catalog {
            for location in self
                .scan_catalog_region(catalog_location, table, &mut saw_rows)
                .await?
            {
                directory.insert(location);
            }
        }

        if directory.is_empty() {
            if saw_rows {
                return NoServerForRegion {
                    table,
                    msg: "regions exist but lost their assignment",
                }
                .fail();
            }
            return RegionNotFound { table }.fail();
        }

        Ok(directory)
    }

    /// Scan one catalog region. An unassigned row discards the partial
    /// result and retries the whole pass after a pause.
    async fn scan_catalog_region(
        &self,
        catalog_location: &RegionLocation,
        table: &str,
        saw_rows: &mut bool,
    ) -> Result<Vec<RegionLocation>> {
        let mut tries = 0;
        loop {
            match self.scan_catalog_pass(catalog_location, table).await? {
                ScanPass::Complete(locations) => {
                    if !locations.is_empty() {
                        *saw_rows = true;
                    }
                    return Ok(locations);
                }
                ScanPass::Unassigned { region } => {
                    *saw_rows = true;
                    tries += 1;
                    if tries >= self.retry.max_tries() {
                        return NoServerForRegion {
                            table,
                            msg: format!("region {} still has no assignment", region),
                        }
                        .fail();
                    }
                    warn!(
                        "Catalog row lacks a server assignment, table:{}, region:{}, tries:{}",
                        table, region, tries
                    );
                    self.retry.pause().await;
                }
            }
        }
    }

    async fn scan_catalog_pass(
        &self,
        catalog_location: &RegionLocation,
        table: &str,
    ) -> Result<ScanPass> {
        let server = self.pool.connect(&catalog_location.server).await?;
        let columns = vec![COLUMN_REGION_INFO.to_string(), COLUMN_SERVER.to_string()];
        let scanner = server
            .open_scanner(
                &catalog_location.region.region_name,
                &columns,
                table.as_bytes(),
            )
            .await
            .map_err(remote_err)?;

        let result = self.collect_catalog_rows(&server, scanner, table).await;

        // Release the server-side scanner on every path, including errors.
        if let Err(err) = server.close_scanner(scanner).await {
            warn!(
                "Failed to close catalog scanner, scanner_id:{}, err:{}",
                scanner, err
            );
        }

        result
    }

    async fn collect_catalog_rows(
        &self,
        server: &RegionServerRef,
        scanner: ScannerId,
        table: &str,
    ) -> Result<ScanPass> {
        let encoding = RegionInfoEncoding::newest();
        let mut locations = Vec::new();
        while let Some(row) = server.next_row(scanner).await.map_err(remote_err)? {
            let mut region = None;
            let mut addr: Option<ServerAddress> = None;
            for cell in &row.cells {
                match cell.column.as_str() {
                    COLUMN_REGION_INFO => {
                        region = Some(
                            encoding
                                .decode_from_slice(&cell.value)
                                .context(DecodeCatalogRow { table })?,
                        );
                    }
                    COLUMN_SERVER => {
                        addr = Some(String::from_utf8_lossy(&cell.value).into_owned());
                    }
                    _ => {}
                }
            }

            let region = match region {
                Some(region) => region,
                None => {
                    warn!("Catalog row without region info, row:{:?}", row.row);
                    continue;
                }
            };
            // Rows are ordered, so the run of this table's regions is
            // contiguous; the first foreign row ends it.
            if region.table_name() != table {
                break;
            }
            ensure!(!region.offline, TableOffline { table });

            match addr {
                Some(server_addr) => locations.push(RegionLocation {
                    region,
                    server: server_addr,
                }),
                None => {
                    return Ok(ScanPass::Unassigned {
                        region: region.region_name,
                    })
                }
            }
        }

        Ok(ScanPass::Complete(locations))
    }
}
