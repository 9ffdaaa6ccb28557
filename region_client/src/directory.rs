// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Region directory cache: per-table ordered maps from region start key to
//! the serving location.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound::{Included, Unbounded},
};

use log::{debug, info};
use snafu::OptionExt;
use table_rpc::types::{RegionDescriptor, RowKey, ServerAddress};
use tokio::sync::RwLock;

use crate::error::{Result, TableNotOpen};

/// A resolved region plus the address currently serving it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionLocation {
    pub region: RegionDescriptor,
    pub server: ServerAddress,
}

/// The ordered directory of one table, keyed by region start key. The
/// region owning a row is found by floor search: the greatest start key
/// not above the row.
#[derive(Clone, Debug, Default)]
pub struct RegionDirectory {
    regions: BTreeMap<RowKey, RegionLocation>,
}

impl RegionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: RegionLocation) {
        self.regions
            .insert(location.region.start_key.clone(), location);
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// The location whose start key is the floor of `row`.
    pub fn floor(&self, row: &[u8]) -> Option<&RegionLocation> {
        self.regions
            .range::<[u8], _>((Unbounded, Included(row)))
            .next_back()
            .map(|(_, location)| location)
    }

    /// Locations from the region covering `row` through the last region of
    /// the table, in start-key order.
    pub fn tail(&self, row: &[u8]) -> Vec<RegionLocation> {
        let from = match self.floor(row) {
            Some(location) => location.region.start_key.clone(),
            None => return Vec::new(),
        };
        self.regions
            .range::<[u8], _>((Included(from.as_slice()), Unbounded))
            .map(|(_, location)| location.clone())
            .collect()
    }

    /// The location with the least start key.
    pub fn first(&self) -> Option<&RegionLocation> {
        self.regions.values().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionLocation> {
        self.regions.values()
    }
}

/// Cache of resolved directories, keyed by table name. Entries are replaced
/// wholesale on (re)resolution and removed wholesale on invalidation; a
/// single stale region always discards the whole table, since splits and
/// moves commonly cascade into neighbor metadata.
#[derive(Debug, Default)]
pub struct DirectoryCache {
    tables: RwLock<HashMap<String, RegionDirectory>>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached directory of `table`, if resolved.
    pub async fn get(&self, table: &str) -> Option<RegionDirectory> {
        self.tables.read().await.get(table).cloned()
    }

    /// Location of the region covering `row`. The table must have been
    /// resolved first.
    pub async fn lookup(&self, table: &str, row: &[u8]) -> Result<RegionLocation> {
        let tables = self.tables.read().await;
        let directory = tables.get(table).context(TableNotOpen { table })?;
        directory
            .floor(row)
            .cloned()
            .context(TableNotOpen { table })
    }

    /// Atomically replace the directory of `table`.
    pub async fn install(&self, table: &str, directory: RegionDirectory) {
        info!(
            "Install region directory, table:{}, regions:{}",
            table,
            directory.len()
        );
        self.tables
            .write()
            .await
            .insert(table.to_string(), directory);
    }

    /// Drop the whole directory of `table`, forcing a reload on next use.
    pub async fn invalidate(&self, table: &str) {
        if self.tables.write().await.remove(table).is_some() {
            debug!("Invalidated region directory, table:{}", table);
        }
    }

    /// Drop the directory of the table the region belongs to.
    pub async fn invalidate_region(&self, location: &RegionLocation) {
        self.invalidate(location.region.table_name()).await;
    }
}
