//! Core type definitions for Docket.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::path::{Path, PathBuf};

/// Position of an entry in an append-log.
///
/// Every appended entry, insert or tombstone, consumes one sequence
/// number. Tombstones name the sequence of the insert they cancel. The
/// counter is internal bookkeeping and never application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(pub u32);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u32) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Where a collection lives: a base directory plus a collection name.
///
/// The name is the stem of every file the engine owns, e.g.
/// `{base_path}/{name}.collection`. A location is also the key under
/// which the connection cache shares an open engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    base_path: PathBuf,
    name: String,
}

impl Location {
    /// Validates and creates a location. Does not touch the file system.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the base path or the name is blank.
    pub fn new(base_path: impl AsRef<Path>, name: impl Into<String>) -> CoreResult<Self> {
        let base_path = base_path.as_ref();
        let name = name.into();

        if name.trim().is_empty() {
            return Err(CoreError::invalid_config("collection name must not be empty"));
        }
        if base_path.to_string_lossy().trim().is_empty() {
            return Err(CoreError::invalid_config("base path must not be empty"));
        }

        Ok(Self {
            base_path: base_path.to_path_buf(),
            name,
        })
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `{base_path}/{name}{suffix}`.
    #[must_use]
    pub fn file(&self, suffix: &str) -> PathBuf {
        self.base_path.join(format!("{}{}", self.name, suffix))
    }

    /// Creates the base directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_dir(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_path)?;
        Ok(())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_path.join(&self.name).display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_number_next() {
        let s = SequenceNumber::new(5);
        assert_eq!(s.next().as_u32(), 6);
        assert_eq!(format!("{s}"), "seq:5");
    }

    #[test]
    fn location_rejects_blank_parts() {
        assert!(matches!(
            Location::new("/tmp", "  "),
            Err(CoreError::InvalidConfig { .. })
        ));
        assert!(matches!(
            Location::new("", "users"),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn location_builds_file_names() {
        let location = Location::new("/data", "users").unwrap();
        assert_eq!(location.file(".db"), PathBuf::from("/data/users.db"));
        assert_eq!(
            location.file("_index.db"),
            PathBuf::from("/data/users_index.db")
        );
        assert_eq!(location.name(), "users");
    }
}
