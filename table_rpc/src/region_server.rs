// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Operations served by a region server.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::Result,
    types::{Cell, ClientId, LockId, RegionDescriptor, ScanRow, ScannerId, Timestamp},
};

/// A node hosting regions. Every operation addresses one region by name and
/// fails with `NotServingRegion` when the region has moved away from this
/// server.
#[async_trait]
pub trait RegionServer: Send + Sync {
    /// Self-describe call: the descriptor of a region served here.
    async fn get_region_info(&self, region: &str) -> Result<RegionDescriptor>;

    /// Latest version of one cell.
    async fn get(&self, region: &str, row: &[u8], column: &str) -> Result<Option<Vec<u8>>>;

    /// Up to `num_versions` most recent versions of one cell, newest first.
    async fn get_versions(
        &self,
        region: &str,
        row: &[u8],
        column: &str,
        num_versions: u32,
    ) -> Result<Option<Vec<Vec<u8>>>>;

    /// Like [Self::get_versions], restricted to versions written at or
    /// before `timestamp`.
    async fn get_versions_before(
        &self,
        region: &str,
        row: &[u8],
        column: &str,
        timestamp: Timestamp,
        num_versions: u32,
    ) -> Result<Option<Vec<Vec<u8>>>>;

    /// All cells of one row.
    async fn get_row(&self, region: &str, row: &[u8]) -> Result<Vec<Cell>>;

    /// Open a server-side scanner over `columns`, positioned at the first
    /// row >= `start_row`.
    async fn open_scanner(
        &self,
        region: &str,
        columns: &[String],
        start_row: &[u8],
    ) -> Result<ScannerId>;

    /// Next row of an open scanner, `None` once exhausted.
    async fn next_row(&self, scanner: ScannerId) -> Result<Option<ScanRow>>;

    /// Release a server-side scanner.
    async fn close_scanner(&self, scanner: ScannerId) -> Result<()>;

    /// Open a single-row atomic update and return its lock.
    async fn start_update(&self, region: &str, client: ClientId, row: &[u8]) -> Result<LockId>;

    /// Stage a cell write under an open lock.
    async fn put(
        &self,
        region: &str,
        client: ClientId,
        lock: LockId,
        column: &str,
        value: Vec<u8>,
    ) -> Result<()>;

    /// Stage a cell deletion under an open lock.
    async fn delete(&self, region: &str, client: ClientId, lock: LockId, column: &str)
        -> Result<()>;

    /// Discard an open update and release its lock.
    async fn abort(&self, region: &str, client: ClientId, lock: LockId) -> Result<()>;

    /// Atomically apply an open update and release its lock.
    async fn commit(&self, region: &str, client: ClientId, lock: LockId) -> Result<()>;
}

pub type RegionServerRef = Arc<dyn RegionServer>;

impl std::fmt::Debug for dyn RegionServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionServer").finish_non_exhaustive()
    }
}
