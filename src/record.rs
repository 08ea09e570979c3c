//! Output records and the flat row format they are emitted in.
//!
//! One [`ApcRecord`] is produced per queued APC. It is denormalized: process name, IDs and the
//! owning thread's APC state flags are copied into every record, so each row stands on its own
//! and the table stays flat. The process/thread hierarchy is conveyed through the PID and TID
//! columns only; every [`Row`] has nesting depth zero.
//!
//! The column schema is fixed, see [`COLUMNS`].

use std::fmt;

use serde::{Serialize, Serializer};
use strum::{Display, EnumCount, EnumIter, IntoStaticStr};

use crate::windows::{ApcEntry, ApcMode, ApcStateView, ProcessHandle, ThreadHandle};

fn serialize_hex<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:#x}"))
}

/// One queued APC, resolved against its thread and process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApcRecord {
    /// Image name of the owning process
    #[serde(rename = "ProcessName")]
    pub process_name: String,
    /// Process ID from the thread's `Cid`
    #[serde(rename = "PID")]
    pub pid: u64,
    /// Thread ID from the thread's `Cid`
    #[serde(rename = "TID")]
    pub tid: u64,
    /// `_KAPC.KernelRoutine`
    #[serde(rename = "KernelRoutine", serialize_with = "serialize_hex")]
    pub kernel_routine: u64,
    /// `_KAPC.NormalRoutine`
    #[serde(rename = "NormalRoutine", serialize_with = "serialize_hex")]
    pub normal_routine: u64,
    /// `_KAPC.ApcMode`
    #[serde(rename = "APCMode")]
    pub mode: ApcMode,
    /// `_KAPC.Inserted`
    #[serde(rename = "Inserted")]
    pub inserted: bool,
    /// Bit 0 of the thread's `InProgressFlags`
    #[serde(rename = "KernelAPCInProgress")]
    pub kernel_apc_in_progress: bool,
    /// Bit 1 of the thread's `InProgressFlags`
    #[serde(rename = "SpecialAPCInProgress")]
    pub special_apc_in_progress: bool,
    /// The thread's `KernelApcPending`
    #[serde(rename = "KernelAPCPending")]
    pub kernel_apc_pending: bool,
    /// The thread's `UserApcPending`
    #[serde(rename = "UserAPCPending")]
    pub user_apc_pending: bool,
}

impl ApcRecord {
    /// Assembles the record for `entry`.
    ///
    /// The IDs are taken from `thread`, not from `process`.
    pub fn new(
        process: &ProcessHandle,
        thread: &ThreadHandle,
        state: &ApcStateView,
        entry: &ApcEntry,
    ) -> Self {
        ApcRecord {
            process_name: process.name.clone(),
            pid: thread.pid,
            tid: thread.tid,
            kernel_routine: entry.kernel_routine,
            normal_routine: entry.normal_routine,
            mode: entry.mode,
            inserted: entry.inserted,
            kernel_apc_in_progress: state.kernel_apc_in_progress,
            special_apc_in_progress: state.special_apc_in_progress,
            kernel_apc_pending: state.kernel_apc_pending,
            user_apc_pending: state.user_apc_pending,
        }
    }

    /// Returns the value of one column.
    pub fn cell(&self, column: Column) -> Cell {
        match column {
            Column::ProcessName => Cell::Str(self.process_name.clone()),
            Column::Pid => Cell::Int(self.pid),
            Column::Tid => Cell::Int(self.tid),
            Column::KernelRoutine => Cell::Hex(self.kernel_routine),
            Column::NormalRoutine => Cell::Hex(self.normal_routine),
            Column::ApcMode => Cell::Str(self.mode.to_string()),
            Column::Inserted => Cell::Bool(self.inserted),
            Column::KernelApcInProgress => Cell::Bool(self.kernel_apc_in_progress),
            Column::SpecialApcInProgress => Cell::Bool(self.special_apc_in_progress),
            Column::KernelApcPending => Cell::Bool(self.kernel_apc_pending),
            Column::UserApcPending => Cell::Bool(self.user_apc_pending),
        }
    }

    /// Converts the record into a top-level row.
    pub fn to_row(&self) -> Row {
        Row {
            depth: 0,
            cells: COLUMNS.iter().map(|&column| self.cell(column)).collect(),
        }
    }
}

/// A column of the APC table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, IntoStaticStr,
)]
pub enum Column {
    /// Process image name
    ProcessName,
    /// Process ID
    #[strum(to_string = "PID")]
    Pid,
    /// Thread ID
    #[strum(to_string = "TID")]
    Tid,
    /// Kernel routine address
    KernelRoutine,
    /// Normal routine address
    NormalRoutine,
    /// `Kernel` or `User`
    #[strum(to_string = "APCMode")]
    ApcMode,
    /// Inserted flag
    Inserted,
    /// Kernel APC delivery in progress
    #[strum(to_string = "KernelAPCInProgress")]
    KernelApcInProgress,
    /// Special APC delivery in progress
    #[strum(to_string = "SpecialAPCInProgress")]
    SpecialApcInProgress,
    /// Kernel APC pending
    #[strum(to_string = "KernelAPCPending")]
    KernelApcPending,
    /// User APC pending
    #[strum(to_string = "UserAPCPending")]
    UserApcPending,
}

impl Column {
    /// Returns the kind of value stored in this column.
    pub fn kind(self) -> CellKind {
        match self {
            Column::ProcessName | Column::ApcMode => CellKind::Str,
            Column::Pid | Column::Tid => CellKind::Int,
            Column::KernelRoutine | Column::NormalRoutine => CellKind::Hex,
            _ => CellKind::Bool,
        }
    }
}

/// The columns of the APC table, in order.
pub const COLUMNS: [Column; Column::COUNT] = [
    Column::ProcessName,
    Column::Pid,
    Column::Tid,
    Column::KernelRoutine,
    Column::NormalRoutine,
    Column::ApcMode,
    Column::Inserted,
    Column::KernelApcInProgress,
    Column::SpecialApcInProgress,
    Column::KernelApcPending,
    Column::UserApcPending,
];

/// Kind of value held by a [`Cell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Text
    Str,
    /// Decimal integer
    Int,
    /// Address rendered in hexadecimal
    Hex,
    /// Boolean
    Bool,
}

/// One typed table cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Text
    Str(String),
    /// Decimal integer
    Int(u64),
    /// Address rendered in hexadecimal
    Hex(u64),
    /// Boolean
    Bool(bool),
}

impl Cell {
    /// Returns the kind of this cell.
    pub fn kind(&self) -> CellKind {
        match self {
            Cell::Str(_) => CellKind::Str,
            Cell::Int(_) => CellKind::Int,
            Cell::Hex(_) => CellKind::Hex,
            Cell::Bool(_) => CellKind::Bool,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Str(value) => f.write_str(value),
            Cell::Int(value) => write!(f, "{value}"),
            Cell::Hex(value) => write!(f, "{value:#x}"),
            Cell::Bool(true) => f.write_str("True"),
            Cell::Bool(false) => f.write_str("False"),
        }
    }
}

/// A positional output row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Nesting depth, always zero for APC records
    pub depth: usize,
    /// One cell per column of [`COLUMNS`]
    pub cells: Vec<Cell>,
}

/// Destination of emitted rows.
pub trait RowSink {
    /// Appends one row.
    fn push_row(&mut self, row: Row);
}

impl RowSink for Vec<Row> {
    fn push_row(&mut self, row: Row) {
        self.push(row);
    }
}

impl<S: RowSink + ?Sized> RowSink for &mut S {
    fn push_row(&mut self, row: Row) {
        (**self).push_row(row);
    }
}

/// Appends records to a [`RowSink`] as top-level rows.
///
/// The emitter performs no I/O of its own.
pub struct RecordEmitter<S> {
    sink: S,
    emitted: usize,
}

impl<S: RowSink> RecordEmitter<S> {
    /// Creates an emitter writing into `sink`.
    pub fn new(sink: S) -> Self {
        RecordEmitter { sink, emitted: 0 }
    }

    /// Appends one record.
    pub fn emit(&mut self, record: &ApcRecord) {
        self.sink.push_row(record.to_row());
        self.emitted += 1;
    }

    /// Returns the number of records emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Returns the sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    fn sample() -> ApcRecord {
        let process = ProcessHandle {
            address: 0xffff_c000_0000_1000,
            pid: 4,
            name: "System".to_string(),
        };
        let thread = ThreadHandle {
            address: 0xffff_c000_0000_2000,
            pid: 4,
            tid: 88,
        };
        let state = ApcStateView {
            address: 0xffff_c000_0000_2098,
            queue_heads: [0xffff_c000_0000_2098, 0xffff_c000_0000_20a8],
            kernel_apc_in_progress: false,
            special_apc_in_progress: true,
            kernel_apc_pending: true,
            user_apc_pending: false,
        };
        let entry = ApcEntry {
            address: 0xffff_c000_0000_3000,
            queue: 0,
            kernel_routine: 0xfffff800_01000000,
            normal_routine: 0,
            mode: ApcMode::Kernel,
            inserted: true,
        };
        ApcRecord::new(&process, &thread, &state, &entry)
    }

    #[test]
    fn columns() {
        assert_eq!(COLUMNS.len(), 11);
        assert_eq!(Column::iter().collect::<Vec<_>>(), COLUMNS.to_vec());

        let names: Vec<String> = COLUMNS.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec![
                "ProcessName",
                "PID",
                "TID",
                "KernelRoutine",
                "NormalRoutine",
                "APCMode",
                "Inserted",
                "KernelAPCInProgress",
                "SpecialAPCInProgress",
                "KernelAPCPending",
                "UserAPCPending",
            ]
        );
        let name: &'static str = Column::ApcMode.into();
        assert_eq!(name, "APCMode");
    }

    #[test]
    fn row() {
        let row = sample().to_row();

        assert_eq!(row.depth, 0);
        assert_eq!(row.cells.len(), COLUMNS.len());
        for (cell, column) in row.cells.iter().zip(COLUMNS) {
            assert_eq!(cell.kind(), column.kind());
        }

        let rendered: Vec<String> = row.cells.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "System",
                "4",
                "88",
                "0xfffff80001000000",
                "0x0",
                "Kernel",
                "True",
                "False",
                "True",
                "True",
                "False"
            ]
        );
    }

    #[test]
    fn json() {
        let json = serde_json::to_value(sample()).unwrap();

        assert_eq!(json["ProcessName"], "System");
        assert_eq!(json["PID"], 4);
        assert_eq!(json["TID"], 88);
        assert_eq!(json["KernelRoutine"], "0xfffff80001000000");
        assert_eq!(json["NormalRoutine"], "0x0");
        assert_eq!(json["APCMode"], "Kernel");
        assert_eq!(json["Inserted"], true);
        assert_eq!(json["SpecialAPCInProgress"], true);
    }

    #[test]
    fn emitter() {
        let mut rows = Vec::new();
        let mut emitter = RecordEmitter::new(&mut rows);
        emitter.emit(&sample());
        emitter.emit(&sample());
        assert_eq!(emitter.emitted(), 2);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], sample().to_row());

        let emitter = RecordEmitter::new(Vec::new());
        assert!(emitter.into_inner().is_empty());
    }
}
