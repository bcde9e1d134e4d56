//! Discovery of priority executables from files and directory trees.

use anyhow::{Context, Result};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};

/// A priority executable found at setup.
///
/// Identity is the basename, compared case-insensitively. The list is built
/// once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PriorityExecutable {
    name: String,
    path: PathBuf,
}

impl PriorityExecutable {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| path.display().to_string());

        Self { name, path }
    }

    /// Basename of the executable.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the executable was discovered at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Case-insensitive basename match.
    pub fn matches(&self, executable: &str) -> bool {
        self.name.eq_ignore_ascii_case(executable)
    }
}

/// Collect priority executables from the given roots.
///
/// A root that is a plain file is taken as-is. A directory is searched
/// recursively for files with the executable bit set. Roots that cannot be
/// read are logged and skipped so the remaining roots still contribute.
pub fn list_executables(roots: &[PathBuf], ignored: &[String]) -> Vec<PriorityExecutable> {
    let mut executables = Vec::new();

    for root in roots {
        match list_root(root, ignored) {
            Ok(found) => executables.extend(found),
            Err(e) => {
                error!("error searching {} for executables: {e:#}", root.display());
            }
        }
    }

    executables
}

/// List the executables under a single root path.
pub fn list_root(root: &Path, ignored: &[String]) -> Result<Vec<PriorityExecutable>> {
    let metadata = fs::metadata(root)
        .with_context(|| format!("error checking if {} exists", root.display()))?;

    // A single file passed in directly is trusted without the executable
    // filter.
    if !metadata.is_dir() {
        return Ok(vec![PriorityExecutable::new(root.to_path_buf())]);
    }

    info!("searching {} for executables", root.display());

    let mut found = Vec::new();
    walk(root, ignored, &mut found)?;

    Ok(found)
}

fn walk(dir: &Path, ignored: &[String], out: &mut Vec<PriorityExecutable>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("error reading directory {}", dir.display()))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("error reading entry in {}", dir.display()))?;
        let path = entry.path();
        let metadata = entry
            .metadata()
            .with_context(|| format!("error reading metadata for {}", path.display()))?;

        if metadata.is_dir() {
            walk(&path, ignored, out)?;
            continue;
        }

        if !is_executable(&metadata) {
            continue;
        }

        let executable = PriorityExecutable::new(path);
        if is_ignored(ignored, executable.name()) {
            info!("ignoring priority {}", executable.name());
            continue;
        }

        out.push(executable);
    }

    Ok(())
}

fn is_ignored(ignored: &[String], name: &str) -> bool {
    ignored.iter().any(|i| i.eq_ignore_ascii_case(name))
}

fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}
