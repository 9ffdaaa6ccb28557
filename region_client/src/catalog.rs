// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Catalog table layout: reserved names, catalog columns and the encoding
//! of region descriptors stored in catalog rows.

use common_util::{
    bytes::{Buf, BufMut, BytesMut, SafeBuf, SafeBufMut},
    codec::{Decoder, Encoder},
    define_result,
};
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use table_rpc::types::{ColumnFamilyDescriptor, RegionDescriptor, TableDescriptor};

/// Name of the single-region catalog table indexing the meta table.
pub const ROOT_TABLE_NAME: &str = "-ROOT-";
/// Name of the multi-region catalog table indexing all user tables.
pub const META_TABLE_NAME: &str = ".META.";
/// Name of the sole region of the root table (empty start key).
pub const ROOT_REGION_NAME: &str = "-ROOT-,";

/// Catalog column holding the encoded [RegionDescriptor] of a region.
pub const COLUMN_REGION_INFO: &str = "info:regioninfo";
/// Catalog column holding the UTF-8 address of the serving server. Absent
/// while the region is unassigned.
pub const COLUMN_SERVER: &str = "info:server";

pub const REGION_INFO_ENCODING_V0: u8 = 0;
pub const NEWEST_REGION_INFO_ENCODING_VERSION: u8 = REGION_INFO_ENCODING_V0;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to encode region info, err:{}", source))]
    EncodeRegionInfo { source: common_util::bytes::Error },

    #[snafu(display("Failed to decode region info, err:{}", source))]
    DecodeRegionInfo { source: common_util::bytes::Error },

    #[snafu(display(
        "Found invalid version, expect:{}, given:{}.\nBacktrace:\n{}",
        expect,
        given,
        backtrace
    ))]
    InvalidVersion {
        expect: u8,
        given: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("Found invalid utf8 name, err:{}.\nBacktrace:\n{}", source, backtrace))]
    InvalidName {
        source: std::string::FromUtf8Error,
        backtrace: Backtrace,
    },
}

define_result!(Error);

/// Whether `name` is one of the catalog tables user code must not touch.
pub fn is_reserved_table(name: &str) -> bool {
    name == ROOT_TABLE_NAME || name == META_TABLE_NAME
}

/// Unique region name: `<table>,<hex(start key)>`. Sorts the same way the
/// catalog rows do within one table.
pub fn region_name(table: &str, start_key: &[u8]) -> String {
    let mut name = String::with_capacity(table.len() + 1 + start_key.len() * 2);
    name.push_str(table);
    name.push(',');
    for b in start_key {
        name.push_str(&format!("{:02x}", b));
    }
    name
}

/// Versioned binary encoding of [RegionDescriptor] for the
/// `info:regioninfo` catalog cell.
#[derive(Debug, Clone)]
pub struct RegionInfoEncoding {
    version: u8,
}

impl RegionInfoEncoding {
    /// Create newest version encoding.
    pub fn newest() -> Self {
        Self {
            version: NEWEST_REGION_INFO_ENCODING_VERSION,
        }
    }

    pub fn encode_to_vec(&self, region: &RegionDescriptor) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(self.estimate_encoded_size(region));
        self.encode(&mut buf, region)?;
        Ok(buf.to_vec())
    }

    pub fn decode_from_slice(&self, mut buf: &[u8]) -> Result<RegionDescriptor> {
        self.decode(&mut buf)
    }
}

fn encode_bytes<B: BufMut>(buf: &mut B, value: &[u8]) -> Result<()> {
    buf.try_put_u32(value.len() as u32)
        .context(EncodeRegionInfo)?;
    buf.try_put(value).context(EncodeRegionInfo)
}

fn decode_bytes<B: Buf>(buf: &mut B) -> Result<Vec<u8>> {
    let len = SafeBuf::try_get_u32(buf).context(DecodeRegionInfo)? as usize;
    let mut value = vec![0; len];
    SafeBuf::try_copy_to_slice(buf, &mut value).context(DecodeRegionInfo)?;
    Ok(value)
}

fn decode_string<B: Buf>(buf: &mut B) -> Result<String> {
    String::from_utf8(decode_bytes(buf)?).context(InvalidName)
}

impl Encoder<RegionDescriptor> for RegionInfoEncoding {
    type Error = Error;

    /// Value format:
    ///
    /// ```text
    /// +---------------------+-------------+-----------+---------+-------------+
    /// | version header(u8)  | region_name | start_key | end_key | offline(u8) |
    /// +---------------------+-------------+-----------+---------+-------------+
    /// | table_name | family_count(u32) | (family_name, max_versions(u32))*    |
    /// +----------------------------------------------------------------------+
    /// ```
    ///
    /// Every name/key is length(u32)-prefixed. More information can be
    /// extended after the incremented `version header`.
    fn encode<B: BufMut>(&self, buf: &mut B, region: &RegionDescriptor) -> Result<()> {
        buf.try_put_u8(self.version).context(EncodeRegionInfo)?;
        encode_bytes(buf, region.region_name.as_bytes())?;
        encode_bytes(buf, &region.start_key)?;
        encode_bytes(buf, &region.end_key)?;
        buf.try_put_u8(region.offline as u8)
            .context(EncodeRegionInfo)?;
        encode_bytes(buf, region.table.name.as_bytes())?;
        buf.try_put_u32(region.table.families.len() as u32)
            .context(EncodeRegionInfo)?;
        for family in &region.table.families {
            encode_bytes(buf, family.name.as_bytes())?;
            buf.try_put_u32(family.max_versions)
                .context(EncodeRegionInfo)?;
        }

        Ok(())
    }

    fn estimate_encoded_size(&self, region: &RegionDescriptor) -> usize {
        // Refer to value format.
        let families: usize = region
            .table
            .families
            .iter()
            .map(|f| 4 + f.name.len() + 4)
            .sum();
        1 + 4
            + region.region_name.len()
            + 4
            + region.start_key.len()
            + 4
            + region.end_key.len()
            + 1
            + 4
            + region.table.name.len()
            + 4
            + families
    }
}

impl Decoder<RegionDescriptor> for RegionInfoEncoding {
    type Error = Error;

    fn decode<B: Buf>(&self, buf: &mut B) -> Result<RegionDescriptor> {
        // Check version
        let version = SafeBuf::try_get_u8(buf).context(DecodeRegionInfo)?;
        ensure!(
            version == self.version,
            InvalidVersion {
                expect: self.version,
                given: version
            }
        );

        let region_name = decode_string(buf)?;
        let start_key = decode_bytes(buf)?;
        let end_key = decode_bytes(buf)?;
        let offline = SafeBuf::try_get_u8(buf).context(DecodeRegionInfo)? != 0;
        let table_name = decode_string(buf)?;
        let family_count = SafeBuf::try_get_u32(buf).context(DecodeRegionInfo)?;
        let mut families = Vec::with_capacity(family_count as usize);
        for _ in 0..family_count {
            let name = decode_string(buf)?;
            let max_versions = SafeBuf::try_get_u32(buf).context(DecodeRegionInfo)?;
            families.push(ColumnFamilyDescriptor { name, max_versions });
        }

        Ok(RegionDescriptor {
            region_name,
            start_key,
            end_key,
            table: TableDescriptor {
                name: table_name,
                families,
            },
            offline,
        })
    }
}
