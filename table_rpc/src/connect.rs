// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Connection establishment seam.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::Result, master::MasterRef, region_server::RegionServerRef};

/// Builds RPC handles from addresses. Implementations own all transport
/// details; transient connect failures are absorbed below this seam and
/// only permanent failure surfaces, as `Unreachable`.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect_region_server(&self, addr: &str) -> Result<RegionServerRef>;

    async fn connect_master(&self, addr: &str) -> Result<MasterRef>;
}

pub type ConnectionFactoryRef = Arc<dyn ConnectionFactory>;
