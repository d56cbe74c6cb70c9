//! Schema file discovery
//!
//! A schema root looks like this:
//!
//! ```text
//! root/
//! ├── db.version                 desired version, e.g. "1.2.0"
//! ├── ddl/**/*.sql               base files, always applied
//! ├── dml/**/*.sql               base files, always applied
//! └── migration/
//!     ├── 1.1.0/up/*.sql         applied when db < 1.1.0 <= target
//!     └── 1.2.0/up/*.sql
//! ```
//!
//! [`SchemaFileResolver::resolve`] turns such a tree into the ordered list of
//! files one run executes: base directories first, in layout order, then the
//! `up` files of every migration directory inside the version window, oldest
//! version first.

use crate::migration::report::{MigrationEvent, Reporter};
use crate::migration::MigrationError;
use crate::source::SchemaSource;
use crate::version::Version;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Directory and file naming conventions of a schema root
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchemaLayout {
    /// Base directories, walked recursively in this order
    pub base_dirs: Vec<String>,
    /// Directory holding one subdirectory per migration version
    pub migration_dir: String,
    /// Subdirectory of a migration version holding its files
    pub up_dir: String,
    /// Extension of schema files, without the dot
    pub extension: String,
    /// Root-relative file holding the desired version
    pub version_file: String,
}

impl Default for SchemaLayout {
    fn default() -> Self {
        Self {
            base_dirs: vec!["ddl".to_string(), "dml".to_string()],
            migration_dir: "migration".to_string(),
            up_dir: "up".to_string(),
            extension: "sql".to_string(),
            version_file: "db.version".to_string(),
        }
    }
}

impl SchemaLayout {
    /// The extension is whatever follows the last `.`, so a file named
    /// exactly `.sql` still counts
    fn is_schema_file(&self, name: &str) -> bool {
        name.rsplit_once('.')
            .is_some_and(|(_, ext)| ext == self.extension)
    }
}

/// Resolves the ordered list of schema files for a version window
pub struct SchemaFileResolver<'a> {
    source: &'a dyn SchemaSource,
    layout: &'a SchemaLayout,
    reporter: &'a dyn Reporter,
}

impl<'a> SchemaFileResolver<'a> {
    pub fn new(
        source: &'a dyn SchemaSource,
        layout: &'a SchemaLayout,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            source,
            layout,
            reporter,
        }
    }

    /// Resolve the files to execute when moving from `current` to `target`
    ///
    /// Base files are always included. A migration directory contributes its
    /// `up` files only when `current < version <= target`. The result is
    /// deterministic for a given tree.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Io` if a required directory is missing or
    /// unreadable, and `MigrationError::InvalidMigrationDirectory` if any
    /// directory under the migration directory is not named `MAJOR.MINOR.PATCH`.
    pub fn resolve(
        &self,
        root: &Path,
        current: &Version,
        target: &Version,
    ) -> Result<Vec<PathBuf>, MigrationError> {
        let mut files = Vec::new();
        for base in &self.layout.base_dirs {
            self.walk(&root.join(base), &mut files)?;
        }

        for (_, up_path) in self.migrations_in_window(root, current, target)? {
            let entries = self
                .source
                .list_dir(&up_path)
                .map_err(|e| MigrationError::io(&up_path, e))?;
            files.extend(
                entries
                    .into_iter()
                    .filter(|entry| !entry.is_dir && self.layout.is_schema_file(&entry.name))
                    .map(|entry| up_path.join(entry.name)),
            );
        }

        Ok(files)
    }

    /// Migration `up` directories with `current < version <= target`, by version
    fn migrations_in_window(
        &self,
        root: &Path,
        current: &Version,
        target: &Version,
    ) -> Result<Vec<(Version, PathBuf)>, MigrationError> {
        let migration_root = root.join(&self.layout.migration_dir);
        let entries = self
            .source
            .list_dir(&migration_root)
            .map_err(|e| MigrationError::io(&migration_root, e))?;

        let mut included = Vec::new();
        for entry in entries.into_iter().filter(|entry| entry.is_dir) {
            let path = migration_root.join(&entry.name);
            let version = match Version::parse(&entry.name) {
                Ok(version) => version,
                Err(source) => {
                    self.reporter
                        .report(&MigrationEvent::InvalidMigrationDirectory { path: &path });
                    return Err(MigrationError::InvalidMigrationDirectory { path, source });
                }
            };

            if version.greater_than(current) && version.less_than_or_eq(target) {
                self.reporter.report(&MigrationEvent::MigrationIncluded {
                    path: &path,
                    version: &version,
                });
                included.push((version, path.join(&self.layout.up_dir)));
            } else {
                self.reporter.report(&MigrationEvent::MigrationSkipped {
                    path: &path,
                    version: &version,
                });
            }
        }

        // Stable: equal versions keep listing order
        included.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(included)
    }

    fn walk(&self, dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), MigrationError> {
        let entries = self
            .source
            .list_dir(dir)
            .map_err(|e| MigrationError::io(dir, e))?;

        for entry in entries {
            let path = dir.join(&entry.name);
            if entry.is_dir {
                self.walk(&path, files)?;
            } else if self.layout.is_schema_file(&entry.name) {
                files.push(path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::report::LogReporter;
    use crate::test_helpers::{MemorySource, RecordingReporter};

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    fn sample_tree() -> MemorySource {
        MemorySource::new()
            .with_file("/s/db.version", "1.2.0\n")
            .with_file("/s/ddl/b_tables.sql", "CREATE TABLE b();")
            .with_file("/s/ddl/a/functions.sql", "CREATE FUNCTION f();")
            .with_file("/s/ddl/notes.txt", "not sql")
            .with_file("/s/dml/seed.sql", "INSERT INTO b VALUES ();")
            .with_file("/s/migration/1.0.0/up/old.sql", "-- 1.0.0")
            .with_file("/s/migration/1.10.0/up/future.sql", "-- 1.10.0")
            .with_file("/s/migration/1.2.0/up/2_b.sql", "-- 1.2.0 b")
            .with_file("/s/migration/1.2.0/up/1_a.sql", "-- 1.2.0 a")
            .with_file("/s/migration/1.2.0/up/readme.md", "docs")
            .with_file("/s/migration/1.1.0/up/c.sql", "-- 1.1.0")
            .with_file("/s/migration/README", "not a directory")
    }

    fn resolve(source: &MemorySource, current: &str, target: &str) -> Vec<String> {
        let layout = SchemaLayout::default();
        SchemaFileResolver::new(source, &layout, &LogReporter)
            .resolve(Path::new("/s"), &v(current), &v(target))
            .unwrap()
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_base_files_first_then_migrations_in_window() {
        let files = resolve(&sample_tree(), "1.0.0", "1.2.0");
        assert_eq!(
            files,
            vec![
                "/s/ddl/a/functions.sql",
                "/s/ddl/b_tables.sql",
                "/s/dml/seed.sql",
                "/s/migration/1.1.0/up/c.sql",
                "/s/migration/1.2.0/up/1_a.sql",
                "/s/migration/1.2.0/up/2_b.sql",
            ]
        );
    }

    #[test]
    fn test_out_of_window_directories_contribute_nothing() {
        let files = resolve(&sample_tree(), "1.1.0", "1.2.0");
        assert!(files.iter().all(|f| !f.contains("/1.0.0/")));
        assert!(files.iter().all(|f| !f.contains("/1.1.0/")));
        assert!(files.iter().all(|f| !f.contains("/1.10.0/")));
        assert!(files.iter().any(|f| f.contains("/1.2.0/")));
    }

    #[test]
    fn test_numeric_version_order_beats_name_order() {
        let files = resolve(&sample_tree(), "1.1.0", "2.0.0");
        let pos_12 = files.iter().position(|f| f.contains("/1.2.0/")).unwrap();
        let pos_110 = files.iter().position(|f| f.contains("/1.10.0/")).unwrap();
        assert!(pos_12 < pos_110);
    }

    #[test]
    fn test_only_base_files_when_window_is_empty_of_migrations() {
        let files = resolve(&sample_tree(), "5.0.0", "6.0.0");
        assert_eq!(
            files,
            vec!["/s/ddl/a/functions.sql", "/s/ddl/b_tables.sql", "/s/dml/seed.sql"]
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let tree = sample_tree();
        assert_eq!(resolve(&tree, "0.0.0", "9.9.9"), resolve(&tree, "0.0.0", "9.9.9"));
    }

    #[test]
    fn test_malformed_directory_name_is_fatal() {
        let tree = sample_tree().with_file("/s/migration/latest/up/x.sql", "--");
        let layout = SchemaLayout::default();
        let reporter = RecordingReporter::new();
        let err = SchemaFileResolver::new(&tree, &layout, &reporter)
            .resolve(Path::new("/s"), &v("1.0.0"), &v("1.2.0"))
            .unwrap_err();

        match err {
            MigrationError::InvalidMigrationDirectory { path, .. } => {
                assert_eq!(path, PathBuf::from("/s/migration/latest"));
            }
            other => panic!("expected invalid directory, got {other:?}"),
        }
        assert!(reporter.contains("invalid_migration_directory /s/migration/latest"));
    }

    #[test]
    fn test_missing_base_directory_is_io_error() {
        let tree = MemorySource::new()
            .with_file("/s/ddl/a.sql", "--")
            .with_dir("/s/migration");
        let layout = SchemaLayout::default();
        let err = SchemaFileResolver::new(&tree, &layout, &LogReporter)
            .resolve(Path::new("/s"), &v("0.0.0"), &v("1.0.0"))
            .unwrap_err();
        match err {
            MigrationError::Io { path, .. } => assert_eq!(path, PathBuf::from("/s/dml")),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn test_included_migration_without_up_directory_is_io_error() {
        let tree = MemorySource::new()
            .with_dir("/s/ddl")
            .with_dir("/s/dml")
            .with_dir("/s/migration/1.0.0/down");
        let layout = SchemaLayout::default();
        let err = SchemaFileResolver::new(&tree, &layout, &LogReporter)
            .resolve(Path::new("/s"), &v("0.0.0"), &v("1.0.0"))
            .unwrap_err();
        assert!(matches!(err, MigrationError::Io { .. }));
    }

    #[test]
    fn test_skips_are_reported() {
        let layout = SchemaLayout::default();
        let reporter = RecordingReporter::new();
        let tree = sample_tree();
        SchemaFileResolver::new(&tree, &layout, &reporter)
            .resolve(Path::new("/s"), &v("1.1.0"), &v("1.2.0"))
            .unwrap();

        assert!(reporter.contains("migration_skipped 1.0.0"));
        assert!(reporter.contains("migration_skipped 1.1.0"));
        assert!(reporter.contains("migration_skipped 1.10.0"));
        assert!(reporter.contains("migration_included 1.2.0"));
    }

    #[test]
    fn test_extension_matching_uses_last_dot() {
        let tree = MemorySource::new()
            .with_file("/s/ddl/.sql", "CREATE TABLE hidden();")
            .with_file("/s/ddl/a.sql.bak", "--")
            .with_file("/s/ddl/sql", "--")
            .with_file("/s/ddl/b.tar.sql", "--")
            .with_dir("/s/dml")
            .with_dir("/s/migration");
        let files = resolve(&tree, "0.0.0", "1.0.0");
        assert_eq!(files, vec!["/s/ddl/.sql", "/s/ddl/b.tar.sql"]);
    }

    #[test]
    fn test_custom_layout() {
        let tree = MemorySource::new()
            .with_file("/s/schema/t.pgsql", "--")
            .with_file("/s/schema/t.sql", "--")
            .with_file("/s/versions/0.1.0/apply/m.pgsql", "--");
        let layout = SchemaLayout {
            base_dirs: vec!["schema".to_string()],
            migration_dir: "versions".to_string(),
            up_dir: "apply".to_string(),
            extension: "pgsql".to_string(),
            version_file: "VERSION".to_string(),
        };
        let files = SchemaFileResolver::new(&tree, &layout, &LogReporter)
            .resolve(Path::new("/s"), &v("0.0.0"), &v("0.1.0"))
            .unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("/s/schema/t.pgsql"),
                PathBuf::from("/s/versions/0.1.0/apply/m.pgsql"),
            ]
        );
    }
}
