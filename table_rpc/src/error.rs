// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Error kinds reported by the remote surface.

use common_util::define_result;
use snafu::{Backtrace, Snafu};

use crate::types::ScannerId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "Region is not served here, region:{}.\nBacktrace:\n{}",
        region,
        backtrace
    ))]
    NotServingRegion { region: String, backtrace: Backtrace },

    #[snafu(display(
        "Row routed to the wrong region, region:{}, row:{:?}.\nBacktrace:\n{}",
        region,
        row,
        backtrace
    ))]
    WrongRegion {
        region: String,
        row: Vec<u8>,
        backtrace: Backtrace,
    },

    #[snafu(display("Region not found, region:{}.\nBacktrace:\n{}", region, backtrace))]
    RegionNotFound { region: String, backtrace: Backtrace },

    #[snafu(display("Invalid column name, column:{}.\nBacktrace:\n{}", column, backtrace))]
    InvalidColumnName { column: String, backtrace: Backtrace },

    #[snafu(display("Row lock failure, msg:{}.\nBacktrace:\n{}", msg, backtrace))]
    Lock { msg: String, backtrace: Backtrace },

    #[snafu(display("Table is not disabled, table:{}.\nBacktrace:\n{}", table, backtrace))]
    TableNotDisabled { table: String, backtrace: Backtrace },

    #[snafu(display(
        "Scanner not found, scanner_id:{}.\nBacktrace:\n{}",
        scanner_id,
        backtrace
    ))]
    ScannerNotFound {
        scanner_id: ScannerId,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Server unreachable, addr:{}, msg:{}.\nBacktrace:\n{}",
        addr,
        msg,
        backtrace
    ))]
    Unreachable {
        addr: String,
        msg: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Remote call failed, msg:{}.\nBacktrace:\n{}", msg, backtrace))]
    Remote { msg: String, backtrace: Backtrace },
}

define_result!(Error);

impl Error {
    /// Whether the failure means the client's cached location of the region
    /// is stale and a fresh catalog resolution may succeed.
    pub fn is_stale_location(&self) -> bool {
        matches!(
            self,
            Error::NotServingRegion { .. } | Error::WrongRegion { .. } | Error::RegionNotFound { .. }
        )
    }
}
