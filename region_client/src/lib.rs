// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Client core for RangeStore, a sharded, range-partitioned,
//! column-family table store.
//!
//! Row keys resolve to the serving region server through a two-level
//! catalog: a single-region root table indexes the meta table, and the meta
//! table indexes every user table. This crate navigates that catalog,
//! caches the resulting region directories, detects stale locations from
//! RPC failures, and wraps reads, scans and single-row updates with bounded
//! invalidate-and-retry:
//!
//! - [Client] is the entry point: open a table, then `get` / `scan` /
//!   `start_update` against it, or issue DDL through the admin calls.
//! - [TableScanner] stitches one ordered iteration across all regions of a
//!   table and absorbs region movement mid-scan.
//! - [UpdateSession] carries a single-row atomic update from `start_update`
//!   to `commit` or `abort`.
//!
//! Transport is pluggable through [table_rpc::ConnectionFactory]; the crate
//! never touches sockets itself.

mod admin;
pub mod catalog;
mod client;
mod config;
mod connection;
mod directory;
mod dispatch;
mod error;
mod master;
mod resolver;
mod retry;
mod scanner;
mod update;


pub use client::Client;
pub use common_util::config::ReadableDuration;
pub use config::Config;
pub use directory::{RegionDirectory, RegionLocation};
pub use error::{Error, Result};
pub use scanner::TableScanner;
pub use table_rpc::types::{
    Cell, ColumnFamilyDescriptor, RegionDescriptor, RowKey, ScanRow, TableDescriptor,
};
pub use update::UpdateSession;
