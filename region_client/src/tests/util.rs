// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! In-memory cluster for tests: a master, region servers and the two
//! catalog tables, with movable region assignments and fault injection.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use table_rpc::{
    error as rpc_error,
    types::{
        Cell, ClientId, ColumnFamilyDescriptor, LockId, RegionDescriptor, RowKey, ScanRow,
        ScannerId, ServerAddress, TableDescriptor, Timestamp,
    },
    ConnectionFactory, ConnectionFactoryRef, Master, MasterRef, RegionServer, RegionServerRef,
};

use crate::catalog::{
    self, RegionInfoEncoding, COLUMN_REGION_INFO, COLUMN_SERVER, META_TABLE_NAME, ROOT_REGION_NAME,
    ROOT_TABLE_NAME,
};

/// Route test log output through the harness capture.
pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const MASTER_ADDR: &str = "master:60000";
const ROOT_SERVER: &str = "rs-root:1";
const META_SERVER: &str = "rs-meta:1";
/// Server the mock master assigns to regions of freshly created tables.
const CREATED_TABLE_SERVER: &str = "rs-b:1";

/// Versions of one column of one row, in write order.
type ColumnVersions = Vec<(Timestamp, Vec<u8>)>;
type RowData = BTreeMap<String, ColumnVersions>;

struct MockRegion {
    start: RowKey,
    end: RowKey,
    server: Option<ServerAddress>,
    /// Assign `addr` once this many meta scans have happened.
    assign_after_scans: Option<(usize, ServerAddress)>,
    rows: BTreeMap<RowKey, RowData>,
}

impl MockRegion {
    fn covers(&self, row: &[u8]) -> bool {
        self.start.as_slice() <= row && (self.end.is_empty() || row < self.end.as_slice())
    }
}

struct TableState {
    families: Vec<ColumnFamilyDescriptor>,
    offline: bool,
    regions: Vec<MockRegion>,
}

struct MetaRegionSpec {
    start: RowKey,
    server: ServerAddress,
}

enum DdlOp {
    Create(TableDescriptor),
    Delete(String),
    Enable(String),
    Disable(String),
}

struct PendingDdl {
    polls_left: usize,
    op: DdlOp,
}

struct ScannerState {
    rows: Vec<ScanRow>,
    pos: usize,
}

struct PendingUpdate {
    table: String,
    row: RowKey,
    client_id: ClientId,
    puts: Vec<(String, Vec<u8>)>,
    deletes: Vec<String>,
}

#[derive(Clone)]
enum RegionKind {
    Root,
    Meta(usize),
    User(String, usize),
}

#[derive(Default)]
struct Counters {
    master_connects: usize,
    master_probes: usize,
    region_server_connects: HashMap<String, usize>,
    row_rpcs: usize,
    total_rpcs: usize,
    opened_scanners: usize,
    closed_scanners: usize,
    meta_scans: usize,
}

struct ClusterState {
    tables: BTreeMap<String, TableState>,
    meta_regions: Vec<MetaRegionSpec>,
    root_server: ServerAddress,
    master_running: bool,
    master_running_after: Option<usize>,
    root_hidden_polls: usize,
    stale_root_hints: VecDeque<ServerAddress>,
    pending_ddl: Vec<PendingDdl>,
    ddl_lag: usize,
    shut_down: bool,
    not_serving_tables: HashSet<String>,
    fail_next_mutation: bool,
    next_scanner_id: ScannerId,
    next_lock_id: LockId,
    next_ts: Timestamp,
    scanners: HashMap<ScannerId, ScannerState>,
    locks: HashMap<LockId, PendingUpdate>,
    counters: Counters,
}

impl ClusterState {
    fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            meta_regions: vec![MetaRegionSpec {
                start: Vec::new(),
                server: META_SERVER.to_string(),
            }],
            root_server: ROOT_SERVER.to_string(),
            master_running: true,
            master_running_after: None,
            root_hidden_polls: 0,
            stale_root_hints: VecDeque::new(),
            pending_ddl: Vec::new(),
            ddl_lag: 0,
            shut_down: false,
            not_serving_tables: HashSet::new(),
            fail_next_mutation: false,
            next_scanner_id: 1,
            next_lock_id: 1,
            next_ts: 1,
            scanners: HashMap::new(),
            locks: HashMap::new(),
            counters: Counters::default(),
        }
    }

    fn known_region_server(&self, addr: &str) -> bool {
        if addr == self.root_server {
            return true;
        }
        if self.meta_regions.iter().any(|m| m.server == addr) {
            return true;
        }
        self.tables.values().any(|table| {
            table.regions.iter().any(|region| {
                region.server.as_deref() == Some(addr)
                    || matches!(&region.assign_after_scans, Some((_, a)) if a == addr)
            })
        }) || addr == CREATED_TABLE_SERVER
    }

    fn classify_region(&self, region: &str) -> Option<RegionKind> {
        if region == ROOT_REGION_NAME {
            return Some(RegionKind::Root);
        }
        for (idx, spec) in self.meta_regions.iter().enumerate() {
            if catalog::region_name(META_TABLE_NAME, &spec.start) == region {
                return Some(RegionKind::Meta(idx));
            }
        }
        for (name, table) in &self.tables {
            for (idx, mock_region) in table.regions.iter().enumerate() {
                if catalog::region_name(name, &mock_region.start) == region {
                    return Some(RegionKind::User(name.clone(), idx));
                }
            }
        }
        None
    }

    fn check_serving(&self, kind: &RegionKind, addr: &str, region: &str) -> rpc_error::Result<()> {
        let serving = match kind {
            RegionKind::Root => addr == self.root_server,
            RegionKind::Meta(idx) => addr == self.meta_regions[*idx].server,
            RegionKind::User(table, idx) => {
                !self.not_serving_tables.contains(table)
                    && self.tables[table].regions[*idx].server.as_deref() == Some(addr)
            }
        };
        if serving {
            Ok(())
        } else {
            rpc_error::NotServingRegion { region }.fail()
        }
    }

    fn locate_region(&self, region: &str, addr: &str) -> rpc_error::Result<RegionKind> {
        match self.classify_region(region) {
            Some(kind) => {
                self.check_serving(&kind, addr, region)?;
                Ok(kind)
            }
            None => rpc_error::RegionNotFound { region }.fail(),
        }
    }

    fn region_descriptor(&self, kind: &RegionKind) -> RegionDescriptor {
        match kind {
            RegionKind::Root => RegionDescriptor {
                region_name: ROOT_REGION_NAME.to_string(),
                start_key: Vec::new(),
                end_key: Vec::new(),
                table: TableDescriptor::new(
                    ROOT_TABLE_NAME,
                    vec![ColumnFamilyDescriptor::new("info")],
                ),
                offline: false,
            },
            RegionKind::Meta(idx) => {
                let start = self.meta_regions[*idx].start.clone();
                let end = self
                    .meta_regions
                    .get(idx + 1)
                    .map(|m| m.start.clone())
                    .unwrap_or_default();
                RegionDescriptor {
                    region_name: catalog::region_name(META_TABLE_NAME, &start),
                    start_key: start,
                    end_key: end,
                    table: TableDescriptor::new(
                        META_TABLE_NAME,
                        vec![ColumnFamilyDescriptor::new("info")],
                    ),
                    offline: false,
                }
            }
            RegionKind::User(table, idx) => {
                let state = &self.tables[table];
                let region = &state.regions[*idx];
                RegionDescriptor {
                    region_name: catalog::region_name(table, &region.start),
                    start_key: region.start.clone(),
                    end_key: region.end.clone(),
                    table: TableDescriptor::new(table.clone(), state.families.clone()),
                    offline: state.offline,
                }
            }
        }
    }

    /// Apply DDL whose visibility lag has drained; age the rest. Runs on
    /// every meta region scan, together with delayed assignments.
    fn tick_meta(&mut self) {
        self.counters.meta_scans += 1;

        let pending = std::mem::take(&mut self.pending_ddl);
        for mut ddl in pending {
            if ddl.polls_left == 0 {
                match ddl.op {
                    DdlOp::Create(desc) => {
                        self.tables.insert(
                            desc.name.clone(),
                            TableState {
                                families: desc.families,
                                offline: false,
                                regions: vec![MockRegion {
                                    start: Vec::new(),
                                    end: Vec::new(),
                                    server: Some(CREATED_TABLE_SERVER.to_string()),
                                    assign_after_scans: None,
                                    rows: BTreeMap::new(),
                                }],
                            },
                        );
                    }
                    DdlOp::Delete(name) => {
                        self.tables.remove(&name);
                    }
                    DdlOp::Enable(name) => {
                        if let Some(table) = self.tables.get_mut(&name) {
                            table.offline = false;
                        }
                    }
                    DdlOp::Disable(name) => {
                        if let Some(table) = self.tables.get_mut(&name) {
                            table.offline = true;
                        }
                    }
                }
            } else {
                ddl.polls_left -= 1;
                self.pending_ddl.push(ddl);
            }
        }

        for table in self.tables.values_mut() {
            for region in &mut table.regions {
                if let Some((polls, addr)) = region.assign_after_scans.take() {
                    if polls == 0 {
                        region.server = Some(addr);
                    } else {
                        region.assign_after_scans = Some((polls - 1, addr));
                    }
                }
            }
        }
    }

    fn materialize_root_rows(&self, start_row: &[u8], columns: &[String]) -> Vec<ScanRow> {
        let encoding = RegionInfoEncoding::newest();
        let mut rows = Vec::new();
        for (idx, spec) in self.meta_regions.iter().enumerate() {
            let kind = RegionKind::Meta(idx);
            let descriptor = self.region_descriptor(&kind);
            let key = descriptor.region_name.as_bytes().to_vec();
            if key.as_slice() < start_row {
                continue;
            }
            let mut cells = vec![Cell::new(
                COLUMN_REGION_INFO,
                encoding.encode_to_vec(&descriptor).unwrap(),
            )];
            cells.push(Cell::new(COLUMN_SERVER, spec.server.as_bytes().to_vec()));
            rows.push(ScanRow {
                row: key,
                cells: filter_cells(cells, columns),
            });
        }
        rows.sort_by(|a, b| a.row.cmp(&b.row));
        rows
    }

    fn materialize_meta_rows(
        &self,
        meta_idx: usize,
        start_row: &[u8],
        columns: &[String],
    ) -> Vec<ScanRow> {
        let encoding = RegionInfoEncoding::newest();
        let meta_start = self.meta_regions[meta_idx].start.clone();
        let meta_end = self
            .meta_regions
            .get(meta_idx + 1)
            .map(|m| m.start.clone())
            .unwrap_or_default();

        let mut rows = Vec::new();
        for (name, table) in &self.tables {
            for (idx, region) in table.regions.iter().enumerate() {
                let descriptor = self.region_descriptor(&RegionKind::User(name.clone(), idx));
                let key = descriptor.region_name.as_bytes().to_vec();
                let in_meta_region = meta_start.as_slice() <= key.as_slice()
                    && (meta_end.is_empty() || key.as_slice() < meta_end.as_slice());
                if !in_meta_region || key.as_slice() < start_row {
                    continue;
                }
                let mut cells = vec![Cell::new(
                    COLUMN_REGION_INFO,
                    encoding.encode_to_vec(&descriptor).unwrap(),
                )];
                if let Some(server) = &region.server {
                    cells.push(Cell::new(COLUMN_SERVER, server.as_bytes().to_vec()));
                }
                rows.push(ScanRow {
                    row: key,
                    cells: filter_cells(cells, columns),
                });
            }
        }
        rows.sort_by(|a, b| a.row.cmp(&b.row));
        rows
    }

    fn materialize_user_rows(
        &self,
        table: &str,
        region_idx: usize,
        start_row: &[u8],
        columns: &[String],
    ) -> Vec<ScanRow> {
        let region = &self.tables[table].regions[region_idx];
        let mut rows = Vec::new();
        for (row_key, data) in region.rows.iter() {
            if row_key.as_slice() < start_row {
                continue;
            }
            let mut cells = Vec::new();
            for (column, versions) in data {
                if !column_selected(column, columns) {
                    continue;
                }
                if let Some((_, value)) = versions.last() {
                    cells.push(Cell::new(column.clone(), value.clone()));
                }
            }
            if !cells.is_empty() {
                rows.push(ScanRow {
                    row: row_key.clone(),
                    cells,
                });
            }
        }
        rows
    }

    fn check_column(&self, table: &str, column: &str) -> rpc_error::Result<()> {
        let family = match column.split_once(':') {
            Some((family, _)) => family,
            None => return rpc_error::InvalidColumnName { column }.fail(),
        };
        let known = self.tables[table].families.iter().any(|f| f.name == family);
        if known {
            Ok(())
        } else {
            rpc_error::InvalidColumnName { column }.fail()
        }
    }

    fn user_region_mut(&mut self, table: &str, row: &[u8]) -> Option<&mut MockRegion> {
        self.tables
            .get_mut(table)?
            .regions
            .iter_mut()
            .find(|region| region.covers(row))
    }

    fn write_cell(&mut self, table: &str, row: &[u8], column: &str, value: Vec<u8>) {
        let ts = self.next_ts;
        self.next_ts += 1;
        let region = self
            .user_region_mut(table, row)
            .expect("row outside every region");
        region
            .rows
            .entry(row.to_vec())
            .or_insert_with(BTreeMap::new)
            .entry(column.to_string())
            .or_insert_with(Vec::new)
            .push((ts, value));
    }

    fn column_versions(&self, table: &str, row: &[u8], column: &str) -> Option<&ColumnVersions> {
        self.tables
            .get(table)?
            .regions
            .iter()
            .find(|region| region.covers(row))?
            .rows
            .get(row)?
            .get(column)
    }
}

fn column_selected(column: &str, requested: &[String]) -> bool {
    if requested.is_empty() {
        return true;
    }
    requested.iter().any(|r| {
        if r.ends_with(':') {
            column.starts_with(r.as_str())
        } else {
            column == r
        }
    })
}

fn filter_cells(cells: Vec<Cell>, requested: &[String]) -> Vec<Cell> {
    cells
        .into_iter()
        .filter(|cell| column_selected(&cell.column, requested))
        .collect()
}

/// Shared in-memory cluster handle. Clones share state.
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    pub fn factory(&self) -> ConnectionFactoryRef {
        Arc::new(MockFactory {
            state: self.state.clone(),
        })
    }

    pub fn master_addr(&self) -> String {
        MASTER_ADDR.to_string()
    }

    /// Add an assigned table. `splits` are the non-empty region boundaries;
    /// `servers` assigns one address per resulting region.
    pub fn add_table(&self, name: &str, splits: &[&[u8]], servers: &[&str]) {
        assert_eq!(splits.len() + 1, servers.len());
        let mut starts: Vec<RowKey> = vec![Vec::new()];
        starts.extend(splits.iter().map(|s| s.to_vec()));
        let regions = starts
            .iter()
            .enumerate()
            .map(|(i, start)| MockRegion {
                start: start.clone(),
                end: starts.get(i + 1).cloned().unwrap_or_default(),
                server: Some(servers[i].to_string()),
                assign_after_scans: None,
                rows: BTreeMap::new(),
            })
            .collect();
        self.lock().tables.insert(
            name.to_string(),
            TableState {
                families: vec![ColumnFamilyDescriptor::new("info")],
                offline: false,
                regions,
            },
        );
    }

    pub fn split_meta(&self, boundary: &[u8], server: &str) {
        let mut state = self.lock();
        state.meta_regions.push(MetaRegionSpec {
            start: boundary.to_vec(),
            server: server.to_string(),
        });
        state.meta_regions.sort_by(|a, b| a.start.cmp(&b.start));
    }

    pub fn put_row(&self, table: &str, row: &[u8], column: &str, value: Vec<u8>) {
        self.lock().write_cell(table, row, column, value);
    }

    pub fn read_cell(&self, table: &str, row: &[u8], column: &str) -> Option<Vec<u8>> {
        self.lock()
            .column_versions(table, row, column)
            .and_then(|versions| versions.last().map(|(_, value)| value.clone()))
    }

    pub fn move_region(&self, table: &str, start: &[u8], new_server: &str) {
        let mut state = self.lock();
        let region = state
            .tables
            .get_mut(table)
            .and_then(|t| t.regions.iter_mut().find(|r| r.start == start))
            .expect("no such region");
        region.server = Some(new_server.to_string());
    }

    pub fn unassign_region(&self, table: &str, start: &[u8]) {
        let mut state = self.lock();
        let region = state
            .tables
            .get_mut(table)
            .and_then(|t| t.regions.iter_mut().find(|r| r.start == start))
            .expect("no such region");
        region.server = None;
    }

    /// Assign `addr` to the region once `scans` further meta scans have
    /// happened.
    pub fn assign_region_after_scans(&self, table: &str, start: &[u8], addr: &str, scans: usize) {
        let mut state = self.lock();
        let region = state
            .tables
            .get_mut(table)
            .and_then(|t| t.regions.iter_mut().find(|r| r.start == start))
            .expect("no such region");
        region.assign_after_scans = Some((scans, addr.to_string()));
    }

    /// Split the region starting at `start` in two at `split_key`; the new
    /// right half lands on `new_server`.
    pub fn split_region(&self, table: &str, start: &[u8], split_key: &[u8], new_server: &str) {
        let mut state = self.lock();
        let table_state = state.tables.get_mut(table).expect("no such table");
        let idx = table_state
            .regions
            .iter()
            .position(|r| r.start == start)
            .expect("no such region");
        let old_end = table_state.regions[idx].end.clone();
        table_state.regions[idx].end = split_key.to_vec();
        let right_rows = table_state.regions[idx].rows.split_off(&split_key.to_vec());
        table_state.regions.insert(
            idx + 1,
            MockRegion {
                start: split_key.to_vec(),
                end: old_end,
                server: Some(new_server.to_string()),
                assign_after_scans: None,
                rows: right_rows,
            },
        );
    }

    pub fn set_table_offline(&self, table: &str, offline: bool) {
        self.lock().tables.get_mut(table).expect("no such table").offline = offline;
    }

    pub fn set_master_running(&self, running: bool) {
        self.lock().master_running = running;
    }

    /// The master reports not-running until `probes` probes have failed.
    pub fn set_master_running_after(&self, probes: usize) {
        let mut state = self.lock();
        state.master_running = false;
        state.master_running_after = Some(probes);
    }

    pub fn hide_root_for(&self, polls: usize) {
        self.lock().root_hidden_polls = polls;
    }

    /// The master's next root answer points at `addr`, which does not
    /// actually serve root.
    pub fn push_stale_root_hint(&self, addr: &str) {
        self.lock().stale_root_hints.push_back(addr.to_string());
    }

    /// DDL issued after this call becomes visible in meta only after this
    /// many meta scans.
    pub fn set_ddl_lag(&self, polls: usize) {
        self.lock().ddl_lag = polls;
    }

    /// Every row RPC against this table answers `NotServingRegion`.
    pub fn always_not_serving(&self, table: &str) {
        self.lock().not_serving_tables.insert(table.to_string());
    }

    pub fn fail_next_mutation(&self) {
        self.lock().fail_next_mutation = true;
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    pub fn table_offline(&self, table: &str) -> bool {
        self.lock().tables.get(table).expect("no such table").offline
    }

    pub fn table_has_family(&self, table: &str, family: &str) -> bool {
        self.lock()
            .tables
            .get(table)
            .expect("no such table")
            .families
            .iter()
            .any(|f| f.name == family)
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    pub fn locks_released(&self) -> bool {
        self.lock().locks.is_empty()
    }

    pub fn master_connects(&self) -> usize {
        self.lock().counters.master_connects
    }

    pub fn master_probes(&self) -> usize {
        self.lock().counters.master_probes
    }

    pub fn region_server_connects(&self, addr: &str) -> usize {
        self.lock()
            .counters
            .region_server_connects
            .get(addr)
            .copied()
            .unwrap_or(0)
    }

    pub fn row_rpc_count(&self) -> usize {
        self.lock().counters.row_rpcs
    }

    pub fn total_rpc_count(&self) -> usize {
        self.lock().counters.total_rpcs
    }

    pub fn scanner_open_count(&self) -> usize {
        self.lock().counters.opened_scanners
    }

    pub fn meta_scan_count(&self) -> usize {
        self.lock().counters.meta_scans
    }

    /// Every server-side scanner ever opened was closed exactly once.
    pub fn assert_scanners_closed(&self) {
        let state = self.lock();
        assert!(
            state.scanners.is_empty(),
            "scanners left open: {:?}",
            state.scanners.keys().collect::<Vec<_>>()
        );
        assert_eq!(
            state.counters.opened_scanners, state.counters.closed_scanners,
            "open/close counts diverge"
        );
    }
}

struct MockFactory {
    state: Arc<Mutex<ClusterState>>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect_region_server(&self, addr: &str) -> rpc_error::Result<RegionServerRef> {
        let mut state = self.state.lock().unwrap();
        if !state.known_region_server(addr) {
            return rpc_error::Unreachable {
                addr,
                msg: "no such region server",
            }
            .fail();
        }
        *state
            .counters
            .region_server_connects
            .entry(addr.to_string())
            .or_insert(0) += 1;
        Ok(Arc::new(MockRegionServer {
            addr: addr.to_string(),
            state: self.state.clone(),
        }))
    }

    async fn connect_master(&self, addr: &str) -> rpc_error::Result<MasterRef> {
        let mut state = self.state.lock().unwrap();
        if addr != MASTER_ADDR {
            return rpc_error::Unreachable {
                addr,
                msg: "no master here",
            }
            .fail();
        }
        state.counters.master_connects += 1;
        Ok(Arc::new(MockMaster {
            state: self.state.clone(),
        }))
    }
}

struct MockMaster {
    state: Arc<Mutex<ClusterState>>,
}

#[async_trait]
impl Master for MockMaster {
    async fn is_master_running(&self) -> rpc_error::Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.counters.total_rpcs += 1;
        state.counters.master_probes += 1;
        if let Some(after) = state.master_running_after {
            if state.counters.master_probes > after {
                state.master_running = true;
                state.master_running_after = None;
            }
        }
        Ok(state.master_running)
    }

    async fn find_root_region(&self) -> rpc_error::Result<Option<ServerAddress>> {
        let mut state = self.state.lock().unwrap();
        state.counters.total_rpcs += 1;
        if state.root_hidden_polls > 0 {
            state.root_hidden_polls -= 1;
            return Ok(None);
        }
        if let Some(hint) = state.stale_root_hints.pop_front() {
            return Ok(Some(hint));
        }
        Ok(Some(state.root_server.clone()))
    }

    async fn create_table(&self, desc: TableDescriptor) -> rpc_error::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.total_rpcs += 1;
        let polls_left = state.ddl_lag;
        state.pending_ddl.push(PendingDdl {
            polls_left,
            op: DdlOp::Create(desc),
        });
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> rpc_error::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.total_rpcs += 1;
        let polls_left = state.ddl_lag;
        state.pending_ddl.push(PendingDdl {
            polls_left,
            op: DdlOp::Delete(table.to_string()),
        });
        Ok(())
    }

    async fn add_column(
        &self,
        table: &str,
        family: ColumnFamilyDescriptor,
    ) -> rpc_error::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.total_rpcs += 1;
        match state.tables.get_mut(table) {
            Some(table_state) => {
                table_state.families.push(family);
                Ok(())
            }
            None => rpc_error::Remote {
                msg: format!("no such table {}", table),
            }
            .fail(),
        }
    }

    async fn delete_column(&self, table: &str, family: &str) -> rpc_error::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.total_rpcs += 1;
        match state.tables.get_mut(table) {
            Some(table_state) => {
                table_state.families.retain(|f| f.name != family);
                Ok(())
            }
            None => rpc_error::Remote {
                msg: format!("no such table {}", table),
            }
            .fail(),
        }
    }

    async fn enable_table(&self, table: &str) -> rpc_error::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.total_rpcs += 1;
        let polls_left = state.ddl_lag;
        state.pending_ddl.push(PendingDdl {
            polls_left,
            op: DdlOp::Enable(table.to_string()),
        });
        Ok(())
    }

    async fn disable_table(&self, table: &str) -> rpc_error::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.total_rpcs += 1;
        let polls_left = state.ddl_lag;
        state.pending_ddl.push(PendingDdl {
            polls_left,
            op: DdlOp::Disable(table.to_string()),
        });
        Ok(())
    }

    async fn shutdown(&self) -> rpc_error::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.total_rpcs += 1;
        state.shut_down = true;
        Ok(())
    }
}

struct MockRegionServer {
    addr: String,
    state: Arc<Mutex<ClusterState>>,
}

impl MockRegionServer {
    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl RegionServer for MockRegionServer {
    async fn get_region_info(&self, region: &str) -> rpc_error::Result<RegionDescriptor> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        let kind = state.locate_region(region, &self.addr)?;
        Ok(state.region_descriptor(&kind))
    }

    async fn get(
        &self,
        region: &str,
        row: &[u8],
        column: &str,
    ) -> rpc_error::Result<Option<Vec<u8>>> {
        Ok(self
            .versions_common(region, row, column, None, 1)
            .await?
            .and_then(|mut versions| versions.pop()))
    }

    async fn get_versions(
        &self,
        region: &str,
        row: &[u8],
        column: &str,
        num_versions: u32,
    ) -> rpc_error::Result<Option<Vec<Vec<u8>>>> {
        self.versions_common(region, row, column, None, num_versions)
            .await
    }

    async fn get_versions_before(
        &self,
        region: &str,
        row: &[u8],
        column: &str,
        timestamp: Timestamp,
        num_versions: u32,
    ) -> rpc_error::Result<Option<Vec<Vec<u8>>>> {
        self.versions_common(region, row, column, Some(timestamp), num_versions)
            .await
    }

    async fn get_row(&self, region: &str, row: &[u8]) -> rpc_error::Result<Vec<Cell>> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        state.counters.row_rpcs += 1;
        let kind = state.locate_region(region, &self.addr)?;
        let (table, idx) = match kind {
            RegionKind::User(table, idx) => (table, idx),
            _ => {
                return rpc_error::Remote {
                    msg: "row reads are for user regions",
                }
                .fail()
            }
        };
        let data = state.tables[&table].regions[idx].rows.get(row);
        let mut cells = Vec::new();
        if let Some(data) = data {
            for (column, versions) in data {
                if let Some((_, value)) = versions.last() {
                    cells.push(Cell::new(column.clone(), value.clone()));
                }
            }
        }
        Ok(cells)
    }

    async fn open_scanner(
        &self,
        region: &str,
        columns: &[String],
        start_row: &[u8],
    ) -> rpc_error::Result<ScannerId> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        let kind = state.locate_region(region, &self.addr)?;
        let rows = match &kind {
            RegionKind::Root => state.materialize_root_rows(start_row, columns),
            RegionKind::Meta(idx) => {
                let idx = *idx;
                state.tick_meta();
                state.materialize_meta_rows(idx, start_row, columns)
            }
            RegionKind::User(table, idx) => {
                let (table, idx) = (table.clone(), *idx);
                state.materialize_user_rows(&table, idx, start_row, columns)
            }
        };
        let id = state.next_scanner_id;
        state.next_scanner_id += 1;
        state.scanners.insert(id, ScannerState { rows, pos: 0 });
        state.counters.opened_scanners += 1;
        Ok(id)
    }

    async fn next_row(&self, scanner: ScannerId) -> rpc_error::Result<Option<ScanRow>> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        let scan = match state.scanners.get_mut(&scanner) {
            Some(scan) => scan,
            None => return rpc_error::ScannerNotFound { scanner_id: scanner }.fail(),
        };
        if scan.pos >= scan.rows.len() {
            return Ok(None);
        }
        let row = scan.rows[scan.pos].clone();
        scan.pos += 1;
        Ok(Some(row))
    }

    async fn close_scanner(&self, scanner: ScannerId) -> rpc_error::Result<()> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        if state.scanners.remove(&scanner).is_none() {
            return rpc_error::ScannerNotFound { scanner_id: scanner }.fail();
        }
        state.counters.closed_scanners += 1;
        Ok(())
    }

    async fn start_update(
        &self,
        region: &str,
        client: ClientId,
        row: &[u8],
    ) -> rpc_error::Result<LockId> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        state.counters.row_rpcs += 1;
        let kind = state.locate_region(region, &self.addr)?;
        let table = match kind {
            RegionKind::User(table, _) => table,
            _ => {
                return rpc_error::Remote {
                    msg: "updates are for user regions",
                }
                .fail()
            }
        };
        let lock = state.next_lock_id;
        state.next_lock_id += 1;
        state.locks.insert(
            lock,
            PendingUpdate {
                table,
                row: row.to_vec(),
                client_id: client,
                puts: Vec::new(),
                deletes: Vec::new(),
            },
        );
        Ok(lock)
    }

    async fn put(
        &self,
        region: &str,
        client: ClientId,
        lock: LockId,
        column: &str,
        value: Vec<u8>,
    ) -> rpc_error::Result<()> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        state.counters.row_rpcs += 1;
        if state.fail_next_mutation {
            state.fail_next_mutation = false;
            return rpc_error::Remote {
                msg: "injected mutation failure",
            }
            .fail();
        }
        state.locate_region(region, &self.addr)?;
        let update = match state.locks.get_mut(&lock) {
            Some(update) if update.client_id == client => update,
            _ => {
                return rpc_error::Lock {
                    msg: format!("unknown lock {}", lock),
                }
                .fail()
            }
        };
        update.puts.push((column.to_string(), value));
        Ok(())
    }

    async fn delete(
        &self,
        region: &str,
        client: ClientId,
        lock: LockId,
        column: &str,
    ) -> rpc_error::Result<()> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        state.counters.row_rpcs += 1;
        if state.fail_next_mutation {
            state.fail_next_mutation = false;
            return rpc_error::Remote {
                msg: "injected mutation failure",
            }
            .fail();
        }
        state.locate_region(region, &self.addr)?;
        let update = match state.locks.get_mut(&lock) {
            Some(update) if update.client_id == client => update,
            _ => {
                return rpc_error::Lock {
                    msg: format!("unknown lock {}", lock),
                }
                .fail()
            }
        };
        update.deletes.push(column.to_string());
        Ok(())
    }

    async fn abort(&self, region: &str, client: ClientId, lock: LockId) -> rpc_error::Result<()> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        state.counters.row_rpcs += 1;
        state.locate_region(region, &self.addr)?;
        match state.locks.remove(&lock) {
            Some(update) if update.client_id == client => Ok(()),
            _ => rpc_error::Lock {
                msg: format!("unknown lock {}", lock),
            }
            .fail(),
        }
    }

    async fn commit(&self, region: &str, client: ClientId, lock: LockId) -> rpc_error::Result<()> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        state.counters.row_rpcs += 1;
        state.locate_region(region, &self.addr)?;
        let update = match state.locks.remove(&lock) {
            Some(update) if update.client_id == client => update,
            _ => {
                return rpc_error::Lock {
                    msg: format!("unknown lock {}", lock),
                }
                .fail()
            }
        };
        for (column, value) in update.puts {
            state.write_cell(&update.table, &update.row, &column, value);
        }
        for column in update.deletes {
            if let Some(region) = state.user_region_mut(&update.table, &update.row) {
                if let Some(data) = region.rows.get_mut(&update.row) {
                    data.remove(&column);
                }
            }
        }
        Ok(())
    }
}

impl MockRegionServer {
    async fn versions_common(
        &self,
        region: &str,
        row: &[u8],
        column: &str,
        before: Option<Timestamp>,
        num_versions: u32,
    ) -> rpc_error::Result<Option<Vec<Vec<u8>>>> {
        let mut state = self.lock();
        state.counters.total_rpcs += 1;
        state.counters.row_rpcs += 1;
        let kind = state.locate_region(region, &self.addr)?;
        let (table, idx) = match kind {
            RegionKind::User(table, idx) => (table, idx),
            _ => {
                return rpc_error::Remote {
                    msg: "cell reads are for user regions",
                }
                .fail()
            }
        };
        state.check_column(&table, column)?;
        let mock_region = &state.tables[&table].regions[idx];
        if !mock_region.covers(row) {
            return rpc_error::WrongRegion {
                region,
                row: row.to_vec(),
            }
            .fail();
        }
        let versions = mock_region
            .rows
            .get(row)
            .and_then(|data| data.get(column))
            .map(|versions| {
                versions
                    .iter()
                    .rev()
                    .filter(|(ts, _)| before.map_or(true, |cap| *ts <= cap))
                    .take(num_versions as usize)
                    .map(|(_, value)| value.clone())
                    .collect::<Vec<_>>()
            })
            .filter(|versions| !versions.is_empty());
        Ok(versions)
    }
}
