// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Admin operations: DDL through the master, then polling meta until the
//! change is visible.

use log::{debug, info, warn};
use snafu::ResultExt;
use table_rpc::{
    types::{ColumnFamilyDescriptor, RegionDescriptor, ScannerId, TableDescriptor},
    RegionServerRef,
};

use crate::{
    catalog::{RegionInfoEncoding, COLUMN_REGION_INFO, META_TABLE_NAME},
    client::{check_table_name, Client},
    error::{remote_err, DecodeCatalogRow, Result, WaitTimeout},
};

impl Client {
    /// Create `desc` at the master, then wait until its first region shows
    /// up in meta. Directories of already-opened tables are untouched.
    pub async fn create_table(&self, desc: TableDescriptor) -> Result<()> {
        check_table_name(&desc.name)?;
        let master = self.master.ensure_master().await?;
        self.after_master_call(master.create_table(desc.clone()).await)
            .await?;
        info!("Created table at master, table:{}", desc.name);

        self.wait_meta_condition(&desc.name, "table creation", |first| first.is_some())
            .await
    }

    /// Delete `table` at the master, then wait until meta stops listing it.
    pub async fn delete_table(&self, table: &str) -> Result<()> {
        check_table_name(table)?;
        let master = self.master.ensure_master().await?;
        self.after_master_call(master.delete_table(table).await)
            .await?;
        info!("Deleted table at master, table:{}", table);
        self.cache.invalidate(table).await;

        self.wait_meta_condition(table, "table deletion", |first| first.is_none())
            .await
    }

    /// Enable `table`, then wait until its first region is no longer
    /// offline in meta.
    pub async fn enable_table(&self, table: &str) -> Result<()> {
        check_table_name(table)?;
        let master = self.master.ensure_master().await?;
        self.after_master_call(master.enable_table(table).await)
            .await?;
        info!("Enabled table at master, table:{}", table);
        self.cache.invalidate(table).await;

        // An empty first poll means "not visible yet" and is retried.
        self.wait_meta_condition(table, "table enable", |first| {
            matches!(first, Some(region) if !region.offline)
        })
        .await
    }

    /// Disable `table`, then wait until its first region is offline in
    /// meta.
    pub async fn disable_table(&self, table: &str) -> Result<()> {
        check_table_name(table)?;
        let master = self.master.ensure_master().await?;
        self.after_master_call(master.disable_table(table).await)
            .await?;
        info!("Disabled table at master, table:{}", table);
        self.cache.invalidate(table).await;

        self.wait_meta_condition(table, "table disable", |first| {
            matches!(first, Some(region) if region.offline)
        })
        .await
    }

    /// Add a column family to `table`.
    pub async fn add_column(&self, table: &str, family: ColumnFamilyDescriptor) -> Result<()> {
        check_table_name(table)?;
        let master = self.master.ensure_master().await?;
        self.after_master_call(master.add_column(table, family).await)
            .await
    }

    /// Drop a column family from `table`.
    pub async fn delete_column(&self, table: &str, family: &str) -> Result<()> {
        check_table_name(table)?;
        let master = self.master.ensure_master().await?;
        self.after_master_call(master.delete_column(table, family).await)
            .await
    }

    /// Ask the cluster to shut down.
    pub async fn shutdown(&self) -> Result<()> {
        let master = self.master.ensure_master().await?;
        self.after_master_call(master.shutdown().await).await
    }

    /// Translate the outcome of a master RPC; on failure drop the cached
    /// handle so the next admin call re-locates the master.
    async fn after_master_call(&self, result: table_rpc::Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.master.reset().await;
                Err(remote_err(err))
            }
        }
    }

    /// Poll the first meta row of `table` until `done` accepts it, up to
    /// the retry bound with a pause between polls.
    async fn wait_meta_condition<F>(&self, table: &str, what: &str, done: F) -> Result<()>
    where
        F: Fn(Option<&RegionDescriptor>) -> bool,
    {
        let mut tries = 0;
        loop {
            match self.first_meta_row(table).await {
                Ok(first) => {
                    if done(first.as_ref()) {
                        info!("Done waiting for {}, table:{}, tries:{}", what, table, tries);
                        return Ok(());
                    }
                }
                Err(err) if err.is_stale_location() => {
                    warn!(
                        "Meta region moved while polling, table:{}, err:{}",
                        table, err
                    );
                    self.cache.invalidate(META_TABLE_NAME).await;
                }
                Err(err) => return Err(err),
            }
            tries += 1;
            if tries >= self.retry.max_tries() {
                return WaitTimeout { table, what, tries }.fail();
            }
            debug!("Waiting for {}, table:{}, tries:{}", what, table, tries);
            self.retry.pause().await;
        }
    }

    /// Decode the first catalog row for `table` from the meta region that
    /// would host it. The server-side scanner is closed on every path.
    async fn first_meta_row(&self, table: &str) -> Result<Option<RegionDescriptor>> {
        let meta = self.resolver.ensure_table(META_TABLE_NAME).await?;
        let catalog_location = match meta.floor(table.as_bytes()) {
            Some(location) => location.clone(),
            None => return Ok(None),
        };
        let server = self.pool.connect(&catalog_location.server).await?;
        let columns = vec![COLUMN_REGION_INFO.to_string()];
        let scanner = server
            .open_scanner(
                &catalog_location.region.region_name,
                &columns,
                table.as_bytes(),
            )
            .await
            .map_err(remote_err)?;

        let result = self.read_first_region_info(&server, scanner, table).await;

        if let Err(err) = server.close_scanner(scanner).await {
            warn!(
                "Failed to close admin poll scanner, scanner_id:{}, err:{}",
                scanner, err
            );
        }

        result
    }

    async fn read_first_region_info(
        &self,
        server: &RegionServerRef,
        scanner: ScannerId,
        table: &str,
    ) -> Result<Option<RegionDescriptor>> {
        let row = match server.next_row(scanner).await.map_err(remote_err)? {
            Some(row) => row,
            None => return Ok(None),
        };
        for cell in &row.cells {
            if cell.column == COLUMN_REGION_INFO {
                let region = RegionInfoEncoding::newest()
                    .decode_from_slice(&cell.value)
                    .context(DecodeCatalogRow { table })?;
                if region.table_name() == table {
                    return Ok(Some(region));
                }
                return Ok(None);
            }
        }
        Ok(None)
    }
}
