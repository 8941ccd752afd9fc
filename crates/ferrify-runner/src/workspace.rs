//! Build workspace
//!
//! One cargo project is reused for every compile attempt of a run. The
//! [`Workspace`] owns that directory; [`Workspace::lease`] hands out scoped
//! exclusive access whose drop removes build artifacts, so no attempt sees
//! another's `target/`.

use crate::error::Result;
use std::fmt::Write as _;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Dependencies every translation may use
pub const DEFAULT_DEPENDENCIES: &[(&str, &str)] = &[
    ("rand", "0.8.4"),
    ("libc", "0.2"),
    ("regex", "1.10.2"),
    ("lazy_static", "1.4.0"),
    ("once_cell", "1.19.0"),
];

/// Owned cargo project directory
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    crate_name: String,
}

impl Workspace {
    /// Take ownership of `root`; the crate is named after the directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("logs"))?;
        let crate_name = root
            .file_name()
            .map_or_else(|| "wspace".to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self { root, crate_name })
    }

    /// Project directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name cargo reports in `Compiling <name>` lines
    #[must_use]
    pub fn crate_name(&self) -> &str {
        &self.crate_name
    }

    /// `Cargo.toml`
    #[must_use]
    pub fn manifest(&self) -> PathBuf {
        self.root.join("Cargo.toml")
    }

    /// The single source unit
    #[must_use]
    pub fn source_file(&self) -> PathBuf {
        self.root.join("src").join("lib.rs")
    }

    /// Whether a project skeleton exists
    #[must_use]
    pub fn has_manifest(&self) -> bool {
        self.manifest().exists()
    }

    /// `logs/prog_<id>.<ext>`
    #[must_use]
    pub fn log_path(&self, log_id: &str, ext: &str) -> PathBuf {
        self.root.join("logs").join(format!("prog_{log_id}.{ext}"))
    }

    /// Append the default dependency set to the manifest
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read or written.
    pub fn add_default_dependencies(&self) -> Result<()> {
        let mut manifest = std::fs::read_to_string(self.manifest())?;
        if !manifest.contains("[dependencies]") {
            manifest.push_str("\n[dependencies]\n");
        } else if !manifest.ends_with('\n') {
            manifest.push('\n');
        }
        for (name, version) in DEFAULT_DEPENDENCIES {
            if !manifest.contains(&format!("\n{name} = ")) {
                let _ = writeln!(manifest, "{name} = \"{version}\"");
            }
        }
        std::fs::write(self.manifest(), manifest)?;
        Ok(())
    }

    /// Replace the source unit
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_source(&self, code: &str) -> Result<()> {
        let path = self.source_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, code)?;
        Ok(())
    }

    /// Current source unit
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_source(&self) -> Result<String> {
        Ok(std::fs::read_to_string(self.source_file())?)
    }

    /// Remove `target/`, ignoring a missing directory
    pub fn remove_build_artifacts(&self) {
        let target = self.root.join("target");
        if target.exists() {
            if let Err(e) = std::fs::remove_dir_all(&target) {
                tracing::warn!(path = %target.display(), error = %e, "could not remove build artifacts");
            }
        }
    }

    /// Exclusive scoped access; artifacts are removed when the lease ends
    pub fn lease(&mut self) -> WorkspaceLease<'_> {
        WorkspaceLease { workspace: self }
    }
}

/// Scoped exclusive access to a [`Workspace`]
#[derive(Debug)]
pub struct WorkspaceLease<'a> {
    workspace: &'a mut Workspace,
}

impl Deref for WorkspaceLease<'_> {
    type Target = Workspace;

    fn deref(&self) -> &Workspace {
        self.workspace
    }
}

impl Drop for WorkspaceLease<'_> {
    fn drop(&mut self) {
        self.workspace.remove_build_artifacts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::open(tmp.path().join("wspace")).unwrap();
        assert_eq!(ws.crate_name(), "wspace");
        assert!(ws.root().join("logs").is_dir());
        assert!(!ws.has_manifest());
        assert_eq!(
            ws.log_path("3", "err"),
            tmp.path().join("wspace/logs/prog_3.err")
        );
    }

    #[test]
    fn test_default_dependencies_appended_once() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::open(tmp.path().join("wspace")).unwrap();
        std::fs::write(
            ws.manifest(),
            "[package]\nname = \"wspace\"\n\n[dependencies]\n",
        )
        .unwrap();
        ws.add_default_dependencies().unwrap();
        ws.add_default_dependencies().unwrap();
        let manifest = std::fs::read_to_string(ws.manifest()).unwrap();
        assert_eq!(manifest.matches("[dependencies]").count(), 1);
        assert_eq!(manifest.matches("rand = \"0.8.4\"").count(), 1);
        assert!(manifest.contains("once_cell = \"1.19.0\""));
    }

    #[test]
    fn test_dependencies_header_added_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::open(tmp.path().join("w")).unwrap();
        std::fs::write(ws.manifest(), "[package]\nname = \"w\"").unwrap();
        ws.add_default_dependencies().unwrap();
        let manifest = std::fs::read_to_string(ws.manifest()).unwrap();
        assert!(manifest.contains("\n[dependencies]\nrand = "));
    }

    #[test]
    fn test_source_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::open(tmp.path().join("wspace")).unwrap();
        ws.write_source("pub fn f() {}").unwrap();
        assert_eq!(ws.read_source().unwrap(), "pub fn f() {}");
    }

    #[test]
    fn test_lease_removes_target_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ws = Workspace::open(tmp.path().join("wspace")).unwrap();
        std::fs::create_dir_all(ws.root().join("target/debug")).unwrap();
        {
            let lease = ws.lease();
            assert!(lease.root().join("target").exists());
        }
        assert!(!ws.root().join("target").exists());
    }

    #[test]
    fn test_lease_cleanup_on_early_return() {
        fn fails(ws: &mut Workspace) -> Result<()> {
            let lease = ws.lease();
            std::fs::create_dir_all(lease.root().join("target"))?;
            Err(crate::error::Error::InvalidState("boom".into()))
        }
        let tmp = tempfile::tempdir().unwrap();
        let mut ws = Workspace::open(tmp.path().join("wspace")).unwrap();
        assert!(fails(&mut ws).is_err());
        assert!(!ws.root().join("target").exists());
    }
}
