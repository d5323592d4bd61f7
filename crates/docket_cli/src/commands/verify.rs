//! Verify command implementation.

use super::inspect::describe_tail;
use crate::scan::{resolve, scan_index, scan_log, Target};
use std::path::Path;

/// Verification result for one file.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of entries checked.
    pub entries_checked: usize,
    /// Problems a normal open would reject or repair.
    pub errors: Vec<String>,
    /// Oddities replay tolerates silently.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Promotes warnings to errors.
    fn strict(mut self) -> Self {
        self.errors.append(&mut self.warnings);
        self
    }
}

/// Runs the verify command.
pub fn run(base: &Path, name: &str, strict: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying {name:?} in {}", base.display());
    println!();

    let mut passed = true;
    for target in resolve(base, name)? {
        let (label, result) = match &target {
            Target::Log { path } => {
                println!("Checking append log...");
                ("Append log", verify_log(path)?)
            }
            Target::Database { index, storage } => {
                println!("Checking indexed database...");
                ("Database", verify_database(index, storage)?)
            }
        };
        let result = if strict { result.strict() } else { result };
        print_result(label, &result);
        passed &= result.is_ok();
    }

    println!();
    if passed {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err("Verification failed".into())
    }
}

/// Replays a `.collection` log strictly.
pub fn verify_log(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let scan = scan_log(path)?;
    let mut result = VerifyResult {
        entries_checked: scan.entries.len(),
        ..VerifyResult::default()
    };

    if !scan.tail.is_clean() {
        result.errors.push(format!("log {}", describe_tail(scan.tail)));
    }
    for (offset, target) in &scan.stray_tombstones {
        result.warnings.push(format!(
            "tombstone at offset {offset} names sequence {target}, which is not live"
        ));
    }
    Ok(result)
}

/// Replays an index log strictly against its storage file.
pub fn verify_database(
    index: &Path,
    storage: &Path,
) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    match (index.is_file(), storage.is_file()) {
        (true, false) => result
            .errors
            .push(format!("storage file {} is missing", storage.display())),
        (false, true) => result
            .errors
            .push(format!("index file {} is missing", index.display())),
        _ => {}
    }

    let scan = scan_index(index, storage)?;
    result.entries_checked = scan.entries.len();

    if !scan.tail.is_clean() {
        result.errors.push(format!("index {}", describe_tail(scan.tail)));
    }
    for (offset, id) in &scan.dangling {
        result.errors.push(format!(
            "entry at offset {offset} for id {id} points past the end of storage ({} bytes)",
            scan.storage_size
        ));
    }
    for (offset, id) in &scan.stray_deletes {
        result
            .warnings
            .push(format!("delete at offset {offset} names id {id}, which is not bound"));
    }
    Ok(result)
}

fn print_result(label: &str, result: &VerifyResult) {
    println!("  {} entries checked", result.entries_checked);
    for error in &result.errors {
        println!("  ERROR: {error}");
    }
    for warning in &result.warnings {
        println!("  WARNING: {warning}");
    }
    if result.is_ok() {
        println!("  {label}: OK");
    } else {
        println!("  {label}: {} error(s)", result.errors.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::collection::frame::{write_delete, write_insert};
    use docket_core::database::index::{IndexEntry, Slot};
    use docket_core::SequenceNumber;
    use tempfile::tempdir;

    #[test]
    fn clean_log_passes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.collection");
        let mut buf = Vec::new();
        write_insert(&mut buf, b"{}").unwrap();
        write_delete(&mut buf, SequenceNumber::new(0));
        std::fs::write(&path, &buf).unwrap();

        let result = verify_log(&path).unwrap();
        assert_eq!(result.entries_checked, 2);
        assert!(result.is_ok());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn torn_log_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.collection");
        std::fs::write(&path, [4, 0, b'x']).unwrap();

        let result = verify_log(&path).unwrap();
        assert!(!result.is_ok());
        assert!(result.errors[0].contains("torn"));
    }

    #[test]
    fn stray_tombstone_fails_only_when_strict() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.collection");
        let mut buf = Vec::new();
        write_delete(&mut buf, SequenceNumber::new(42));
        std::fs::write(&path, &buf).unwrap();

        let result = verify_log(&path).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 1);
        assert!(!result.strict().is_ok());
    }

    #[test]
    fn database_problems_are_errors() {
        let dir = tempdir().unwrap();
        let index = dir.path().join("a_index.db");
        let storage = dir.path().join("a.db");

        let mut buf = Vec::new();
        IndexEntry::Insert {
            id: 1,
            slot: Slot { offset: 0, len: 8 },
        }
        .encode_into(&mut buf);
        std::fs::write(&index, &buf).unwrap();

        let result = verify_database(&index, &storage).unwrap();
        assert_eq!(result.errors.len(), 2);

        std::fs::write(&storage, b"12345678").unwrap();
        let result = verify_database(&index, &storage).unwrap();
        assert!(result.is_ok());

        buf.push(3);
        std::fs::write(&index, &buf).unwrap();
        let result = verify_database(&index, &storage).unwrap();
        assert!(result.errors[0].contains("unknown marker 3"));
    }
}
