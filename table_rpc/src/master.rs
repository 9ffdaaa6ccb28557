// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Operations served by the cluster master.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::Result,
    types::{ColumnFamilyDescriptor, ServerAddress, TableDescriptor},
};

/// The cluster coordinator. It assigns regions to servers and is the only
/// party that knows where the root catalog region currently lives; the
/// client consults it for that bootstrap step and for DDL.
#[async_trait]
pub trait Master: Send + Sync {
    /// Cheap liveness probe.
    async fn is_master_running(&self) -> Result<bool>;

    /// Current address of the root catalog region, `None` while the master
    /// has not assigned it yet.
    async fn find_root_region(&self) -> Result<Option<ServerAddress>>;

    async fn create_table(&self, desc: TableDescriptor) -> Result<()>;

    async fn delete_table(&self, table: &str) -> Result<()>;

    async fn add_column(&self, table: &str, family: ColumnFamilyDescriptor) -> Result<()>;

    async fn delete_column(&self, table: &str, family: &str) -> Result<()>;

    async fn enable_table(&self, table: &str) -> Result<()>;

    async fn disable_table(&self, table: &str) -> Result<()>;

    /// Ask the whole cluster to shut down.
    async fn shutdown(&self) -> Result<()>;
}

pub type MasterRef = Arc<dyn Master>;

impl std::fmt::Debug for dyn Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master").finish_non_exhaustive()
    }
}
