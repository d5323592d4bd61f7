//! Inspect command implementation.

use crate::scan::{resolve, scan_index, scan_log, Tail, Target};
use crate::Format;
use serde::Serialize;
use std::path::Path;

/// Inspection result for one collection name.
#[derive(Debug, Default, Serialize)]
pub struct InspectResult {
    /// Collection name.
    pub name: String,
    /// Base directory.
    pub path: String,
    /// Append-log statistics, if a `.collection` file exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogReport>,
    /// Indexed database statistics, if database files exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseReport>,
}

/// Statistics for an append log.
#[derive(Debug, Serialize)]
pub struct LogReport {
    /// Log size in bytes.
    pub size: u64,
    /// Complete frames.
    pub frames: usize,
    /// Insert frames.
    pub inserts: usize,
    /// Tombstone frames.
    pub tombstones: usize,
    /// Records a replay would keep.
    pub live_records: usize,
    /// Inserts cancelled by a tombstone.
    pub dead_records: usize,
    /// Payload bytes of live records.
    pub live_bytes: u64,
    /// How the log ends.
    pub tail: Tail,
}

/// Statistics for an indexed database.
#[derive(Debug, Serialize)]
pub struct DatabaseReport {
    /// Index log size in bytes.
    pub index_size: u64,
    /// Storage file size in bytes.
    pub storage_size: u64,
    /// Complete index entries.
    pub entries: usize,
    /// Insert entries.
    pub inserts: usize,
    /// Delete entries.
    pub deletes: usize,
    /// Ids a replay would keep.
    pub live_records: usize,
    /// Highest id ever bound.
    pub max_id: i32,
    /// Payload bytes of live records.
    pub live_bytes: u64,
    /// Storage bytes no live record points at.
    pub dead_bytes: u64,
    /// How the index ends.
    pub tail: Tail,
}

/// Runs the inspect command.
pub fn run(base: &Path, name: &str, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(base, name)?;

    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Format::Text => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects statistics for every file stored under `name`.
pub fn inspect(base: &Path, name: &str) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut result = InspectResult {
        name: name.to_string(),
        path: base.display().to_string(),
        ..InspectResult::default()
    };

    for target in resolve(base, name)? {
        match target {
            Target::Log { path } => {
                let scan = scan_log(&path)?;
                result.log = Some(LogReport {
                    size: scan.size,
                    frames: scan.entries.len(),
                    inserts: scan.inserts,
                    tombstones: scan.deletes,
                    live_records: scan.live,
                    dead_records: scan.inserts - scan.live,
                    live_bytes: scan.live_bytes,
                    tail: scan.tail,
                });
            }
            Target::Database { index, storage } => {
                let scan = scan_index(&index, &storage)?;
                result.database = Some(DatabaseReport {
                    index_size: scan.index_size,
                    storage_size: scan.storage_size,
                    entries: scan.entries.len(),
                    inserts: scan.inserts,
                    deletes: scan.deletes,
                    live_records: scan.live,
                    max_id: scan.max_id,
                    live_bytes: scan.live_bytes,
                    dead_bytes: scan.storage_size.saturating_sub(scan.live_bytes),
                    tail: scan.tail,
                });
            }
        }
    }

    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Docket Collection Inspection");
    println!("============================");
    println!();
    println!("Name: {}", result.name);
    println!("Path: {}", result.path);

    if let Some(log) = &result.log {
        println!();
        println!("Append log:");
        println!("  Size:          {}", format_size(log.size));
        println!("  Frames:        {}", log.frames);
        println!("  Inserts:       {}", log.inserts);
        println!("  Tombstones:    {}", log.tombstones);
        println!("  Live records:  {}", log.live_records);
        println!("  Dead records:  {}", log.dead_records);
        println!("  Live payload:  {}", format_size(log.live_bytes));
        println!("  Tail:          {}", describe_tail(log.tail));
    }

    if let Some(db) = &result.database {
        println!();
        println!("Indexed database:");
        println!("  Index size:    {}", format_size(db.index_size));
        println!("  Storage size:  {}", format_size(db.storage_size));
        println!("  Entries:       {}", db.entries);
        println!("  Inserts:       {}", db.inserts);
        println!("  Deletes:       {}", db.deletes);
        println!("  Live records:  {}", db.live_records);
        println!("  Max id:        {}", db.max_id);
        println!("  Dead storage:  {}", format_size(db.dead_bytes));
        println!("  Tail:          {}", describe_tail(db.tail));
    }
}

pub(crate) fn describe_tail(tail: Tail) -> String {
    match tail {
        Tail::Clean => "clean".to_string(),
        Tail::Torn { offset, bytes } => format!("torn at offset {offset} ({bytes} bytes)"),
        Tail::UnknownMarker { offset, marker } => {
            format!("unknown marker {marker} at offset {offset}")
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
