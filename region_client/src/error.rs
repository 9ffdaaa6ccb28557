// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Errors surfaced by the client core.

use common_util::define_result;
use snafu::{Backtrace, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "Master is not running, addr:{}, tries:{}.\nBacktrace:\n{}",
        addr,
        tries,
        backtrace
    ))]
    MasterNotRunning {
        addr: String,
        tries: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "No server for region, table:{}, msg:{}.\nBacktrace:\n{}",
        table,
        msg,
        backtrace
    ))]
    NoServerForRegion {
        table: String,
        msg: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "No regions in meta, table does not exist, table:{}.\nBacktrace:\n{}",
        table,
        backtrace
    ))]
    RegionNotFound { table: String, backtrace: Backtrace },

    #[snafu(display("Region location is stale, region:{}, err:{}", region, source))]
    NotServingRegion {
        region: String,
        source: table_rpc::Error,
    },

    #[snafu(display("Table is offline, table:{}.\nBacktrace:\n{}", table, backtrace))]
    TableOffline { table: String, backtrace: Backtrace },

    #[snafu(display("Invalid column name, err:{}", source))]
    InvalidColumnName { source: table_rpc::Error },

    #[snafu(display("Row lock failure, err:{}", source))]
    Lock { source: table_rpc::Error },

    #[snafu(display("Table is not disabled, err:{}", source))]
    TableNotDisabled { source: table_rpc::Error },

    #[snafu(display("Illegal argument, msg:{}.\nBacktrace:\n{}", msg, backtrace))]
    IllegalArgument { msg: String, backtrace: Backtrace },

    #[snafu(display("Update session is no longer active.\nBacktrace:\n{}", backtrace))]
    NoActiveSession { backtrace: Backtrace },

    #[snafu(display(
        "Table has not been opened, table:{}.\nBacktrace:\n{}",
        table,
        backtrace
    ))]
    TableNotOpen { table: String, backtrace: Backtrace },

    #[snafu(display(
        "Gave up waiting for {}, table:{}, tries:{}.\nBacktrace:\n{}",
        what,
        table,
        tries,
        backtrace
    ))]
    WaitTimeout {
        table: String,
        what: String,
        tries: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to decode catalog row, table:{}, err:{}", table, source))]
    DecodeCatalogRow {
        table: String,
        source: crate::catalog::Error,
    },

    #[snafu(display("Rpc failed, err:{}", source))]
    Rpc { source: table_rpc::Error },
}

define_result!(Error);

impl Error {
    /// Whether the failure is a stale-location kind, recoverable by
    /// invalidating the cached directory and re-resolving the table.
    pub fn is_stale_location(&self) -> bool {
        matches!(self, Error::NotServingRegion { .. })
    }
}

/// Rematerialize a remote error as the matching local kind. The three
/// location-stale server kinds collapse into [Error::NotServingRegion] so
/// retry loops classify on a single variant.
pub(crate) fn remote_err(err: table_rpc::Error) -> Error {
    use table_rpc::Error as Remote;

    match &err {
        Remote::NotServingRegion { region, .. }
        | Remote::WrongRegion { region, .. }
        | Remote::RegionNotFound { region, .. } => Error::NotServingRegion {
            region: region.clone(),
            source: err,
        },
        Remote::InvalidColumnName { .. } => Error::InvalidColumnName { source: err },
        Remote::Lock { .. } => Error::Lock { source: err },
        Remote::TableNotDisabled { .. } => Error::TableNotDisabled { source: err },
        _ => Error::Rpc { source: err },
    }
}
