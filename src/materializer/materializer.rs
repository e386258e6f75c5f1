use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use compio::BufResult;
use compio::fs::{OpenOptions, Permissions};
use compio::io::AsyncWriteAtExt;
use snafu::prelude::*;
use tracing::{debug, error, info};

use crate::ext::one_line;
use crate::materializer::render_env_file;
use crate::store::Node;

/// Mode of every generated env file.
const FILE_MODE: u32 = 0o644;

/// Outcome of one materialization pass.
#[derive(Debug, Default)]
pub struct MaterializeReport {
    /// Group names whose file was written, in store order.
    pub written: Vec<String>,
    pub failures: Vec<MaterializeError>,
}

impl MaterializeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Writes one env file per group into the output directory.
#[derive(Debug, Clone)]
pub struct Materializer {
    output_dir: PathBuf,
}

impl Materializer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes a file for every child of `root`. A failing group is logged and
    /// recorded, the remaining groups are still written.
    pub async fn materialize(&self, root: &Node) -> MaterializeReport {
        let mut report = MaterializeReport::default();

        for group in root.children() {
            match self.write_group(group).await {
                Ok(path) => {
                    info!("Generated config file {}", path.display());
                    report.written.push(group.name().to_string());
                }
                Err(e) => {
                    error!(
                        "Failed to generate config file for group '{}': {}",
                        one_line(group.name(), false),
                        e
                    );
                    report.failures.push(e);
                }
            }
        }

        debug!(
            "Materialized {} of {} groups into {}",
            report.written.len(),
            root.children().len(),
            self.output_dir.display()
        );
        report
    }

    /// Replaces the file of `group` atomically: the content goes to a hidden
    /// temporary file next to the target, which is then renamed over it.
    /// Readers see either the old or the new content, never a partial write.
    pub async fn write_group(&self, group: &Node) -> Result<PathBuf, MaterializeError> {
        let name = group.name();
        ensure!(
            is_valid_group_name(name),
            InvalidGroupNameSnafu {
                name: one_line(name, false)
            }
        );

        let target = self.output_dir.join(name);
        let temp = self
            .output_dir
            .join(format!(".{name}.{}.tmp", std::process::id()));
        let contents = render_env_file(group);

        let written = write_synced(&temp, contents.into_bytes()).await;
        let result = match written {
            Ok(()) => compio::fs::rename(&temp, &target).await.context(PersistSnafu {
                path: target.clone(),
            }),
            Err(e) => Err(e),
        };

        if result.is_err() {
            // Nothing to clean up when the temporary file was never created.
            let _ = compio::fs::remove_file(&temp).await;
        }
        result.map(|()| target)
    }

    /// Deletes the files of groups that are gone upstream. Missing files are
    /// not an error.
    pub async fn prune<'a>(
        &self,
        stale_groups: impl IntoIterator<Item = &'a str>,
    ) -> Vec<MaterializeError> {
        let mut failures = Vec::new();

        for name in stale_groups {
            if !is_valid_group_name(name) {
                continue;
            }
            let path = self.output_dir.join(name);
            match compio::fs::remove_file(&path).await {
                Ok(()) => info!("Removed stale config file {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Stale config file {} already gone", path.display())
                }
                Err(e) => {
                    error!("Failed to remove stale config file {}: {}", path.display(), e);
                    failures.push(MaterializeError::PruneError { path, source: e });
                }
            }
        }

        failures
    }
}

/// Writes `contents` to a fresh file at `path` with [`FILE_MODE`] and flushes
/// it to disk.
async fn write_synced(path: &Path, contents: Vec<u8>) -> Result<(), MaterializeError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(path)
        .await
        .context(TempFileSnafu { path })?;

    let BufResult(written, _) = file.write_all_at(contents, 0).await;
    written.context(WriteSnafu { path })?;
    // The creation mode is subject to the umask.
    file.set_permissions(Permissions::from_mode(FILE_MODE))
        .await
        .context(WriteSnafu { path })?;
    file.sync_all().await.context(WriteSnafu { path })?;
    file.close().await.context(WriteSnafu { path })
}

/// The group name becomes a file name inside the output directory and must
/// not escape it.
fn is_valid_group_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MaterializeError {
    #[snafu(display("Group name '{}' cannot be used as a file name", name))]
    InvalidGroupName { name: String },
    #[snafu(display("Failed to create temporary file {}", path.display()))]
    TempFileError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write temporary file {}", path.display()))]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to move config file into place at {}", path.display()))]
    PersistError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to remove stale config file {}", path.display()))]
    PruneError {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use tempfile::TempDir;

    fn read_dir_files(dir: &Path) -> HashMap<String, String> {
        std::fs::read_dir(dir)
            .expect("Failed to list output dir")
            .map(|entry| {
                let entry = entry.expect("Failed to read dir entry");
                let name = entry.file_name().to_string_lossy().to_string();
                let contents = std::fs::read_to_string(entry.path()).expect("Failed to read file");
                (name, contents)
            })
            .collect()
    }

    #[compio::test]
    async fn writes_one_file_per_group_with_all_entries() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = Node::tree("/conf", vec![
            ("db", vec![("HOST", "localhost"), ("PORT", "5432")]),
            ("cache", vec![("URL", "redis://cache:6379")]),
            ("feature", vec![("A", "1"), ("B", "2"), ("C", "3")]),
        ]);

        let report = Materializer::new(temp_dir.path()).materialize(&root).await;

        assert!(report.is_complete());
        assert_eq!(report.written, vec!["db", "cache", "feature"]);
        let files = read_dir_files(temp_dir.path());
        assert_eq!(files.len(), 3);

        let feature_lines: BTreeSet<&str> = files["feature"].lines().collect();
        assert_eq!(feature_lines, BTreeSet::from(["A=1", "B=2", "C=3"]));
        assert_eq!(files["cache"], "URL=redis://cache:6379\n");
    }

    #[compio::test]
    async fn db_group_yields_host_and_port_lines() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = Node::tree("/conf", vec![("db", vec![("HOST", "localhost"), ("PORT", "5432")])]);

        Materializer::new(temp_dir.path()).materialize(&root).await;

        let contents = std::fs::read_to_string(temp_dir.path().join("db")).unwrap();
        assert_eq!(contents, "HOST=localhost\nPORT=5432\n");
    }

    #[compio::test]
    async fn materializing_twice_is_byte_identical() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = Node::tree("/conf", vec![
            ("db", vec![("HOST", "localhost"), ("PORT", "5432")]),
            ("app", vec![("MODE", "prod")]),
        ]);
        let materializer = Materializer::new(temp_dir.path());

        materializer.materialize(&root).await;
        let first = read_dir_files(temp_dir.path());
        materializer.materialize(&root).await;
        let second = read_dir_files(temp_dir.path());

        assert_eq!(first, second);
    }

    #[compio::test]
    async fn existing_file_is_overwritten_not_appended() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::write(temp_dir.path().join("db"), "OLD=1\nSTALE=2\n").unwrap();
        let root = Node::tree("/conf", vec![("db", vec![("HOST", "db1")])]);

        Materializer::new(temp_dir.path()).materialize(&root).await;

        let contents = std::fs::read_to_string(temp_dir.path().join("db")).unwrap();
        assert_eq!(contents, "HOST=db1\n");
    }

    #[compio::test]
    async fn files_get_world_readable_mode_and_no_temp_leftovers() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = Node::tree("/conf", vec![("db", vec![("HOST", "localhost")])]);

        Materializer::new(temp_dir.path()).materialize(&root).await;

        let mode = std::fs::metadata(temp_dir.path().join("db"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, FILE_MODE);
        assert_eq!(read_dir_files(temp_dir.path()).len(), 1);
    }

    #[compio::test]
    async fn unusable_group_names_are_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let materializer = Materializer::new(temp_dir.path());

        for name in ["", ".", ".."] {
            let group = Node::directory(name, vec![Node::leaf("X", "1")]);
            let result = materializer.write_group(&group).await;
            assert!(
                matches!(result, Err(MaterializeError::InvalidGroupName { .. })),
                "'{name}' was accepted"
            );
        }
        assert!(read_dir_files(temp_dir.path()).is_empty());
    }

    #[compio::test]
    async fn failing_group_does_not_stop_the_others() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        // A directory in place of the target file makes the rename fail.
        std::fs::create_dir(temp_dir.path().join("broken")).unwrap();
        std::fs::write(temp_dir.path().join("broken").join("keep"), "x").unwrap();
        let root = Node::tree("/conf", vec![
            ("broken", vec![("A", "1")]),
            ("db", vec![("HOST", "localhost")]),
        ]);

        let report = Materializer::new(temp_dir.path()).materialize(&root).await;

        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0],
            MaterializeError::PersistError { .. }
        ));
        assert_eq!(report.written, vec!["db"]);
        let contents = std::fs::read_to_string(temp_dir.path().join("db")).unwrap();
        assert_eq!(contents, "HOST=localhost\n");
    }

    #[compio::test]
    async fn missing_output_dir_fails_every_group() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let missing = temp_dir.path().join("missing");
        let root = Node::tree("/conf", vec![("db", vec![("HOST", "localhost")])]);

        let report = Materializer::new(&missing).materialize(&root).await;

        assert!(report.written.is_empty());
        assert!(matches!(
            report.failures[0],
            MaterializeError::TempFileError { .. }
        ));
    }

    #[compio::test]
    async fn prune_removes_only_named_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::write(temp_dir.path().join("old"), "A=1\n").unwrap();
        std::fs::write(temp_dir.path().join("keep"), "B=2\n").unwrap();

        let failures = Materializer::new(temp_dir.path())
            .prune(["old", "never-existed", ".."])
            .await;

        assert!(failures.is_empty());
        let files = read_dir_files(temp_dir.path());
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["keep"]);
    }

    #[compio::test]
    async fn prune_reports_entries_it_cannot_remove() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::create_dir(temp_dir.path().join("stuck")).unwrap();

        let failures = Materializer::new(temp_dir.path()).prune(["stuck"]).await;

        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], MaterializeError::PruneError { .. }));
        assert!(temp_dir.path().join("stuck").is_dir());
    }
}
