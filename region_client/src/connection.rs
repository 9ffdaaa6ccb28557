// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Pool of region server connections, keyed by address.

use std::collections::HashMap;

use log::debug;
use table_rpc::{types::ServerAddress, ConnectionFactoryRef, RegionServerRef};
use tokio::sync::RwLock;

use crate::error::{remote_err, Result};

/// Maps server address to a shared RPC handle, connecting lazily on first
/// use. Handles live until the client is dropped; nothing is evicted.
pub struct ConnectionPool {
    factory: ConnectionFactoryRef,
    servers: RwLock<HashMap<ServerAddress, RegionServerRef>>,
}

impl ConnectionPool {
    pub fn new(factory: ConnectionFactoryRef) -> Self {
        Self {
            factory,
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Shared handle for `addr`. Concurrent first connects to one address
    /// may both reach the factory; the last writer wins, which is fine for
    /// cheap handles and keeps the lock out of the connect await.
    pub async fn connect(&self, addr: &str) -> Result<RegionServerRef> {
        {
            let servers = self.servers.read().await;
            if let Some(server) = servers.get(addr) {
                return Ok(server.clone());
            }
        }

        let server = self
            .factory
            .connect_region_server(addr)
            .await
            .map_err(remote_err)?;
        debug!("Connected to region server, addr:{}", addr);
        self.servers
            .write()
            .await
            .insert(addr.to_string(), server.clone());

        Ok(server)
    }
}
