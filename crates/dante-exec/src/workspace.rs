use std::{
    fs,
    path::{Path, PathBuf},
};

use dante_model::JobId;
use tracing::{debug, warn};

use crate::WorkspaceError;

/// Allocates per-job scratch directories under a fixed root.
///
/// Workspaces are always removed by the daemon, for container tasks too: the
/// directory is bind-mounted, never handed to the runtime as a managed volume.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, owner-only directory for `job_id`.
    ///
    /// A leftover directory with the same name (from a crash before cleanup)
    /// is removed first.
    pub fn prepare(&self, job_id: &JobId) -> Result<Workspace, WorkspaceError> {
        let name = dir_name(job_id)?;
        fs::create_dir_all(&self.root).map_err(|e| WorkspaceError::io(&self.root, e))?;

        let path = self.root.join(name);
        if path.exists() {
            warn!(target: "dante.exec.workspace", path = %path.display(), "removing stale workspace");
            fs::remove_dir_all(&path).map_err(|e| WorkspaceError::io(&path, e))?;
        }
        create_private_dir(&path)?;
        debug!(target: "dante.exec.workspace", path = %path.display(), "workspace ready");
        Ok(Workspace { path, armed: true })
    }

    /// Removes a workspace directory and everything under it. Missing paths are fine.
    pub fn cleanup(path: &Path) -> Result<(), WorkspaceError> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(path, e)),
        }
    }
}

/// A prepared workspace. Dropping it removes the directory, so every exit
/// path, unwinding included, releases it.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    armed: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory now, reporting failures.
    pub fn cleanup(mut self) -> Result<(), WorkspaceError> {
        self.armed = false;
        WorkspaceManager::cleanup(&self.path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = WorkspaceManager::cleanup(&self.path)
        {
            warn!(target: "dante.exec.workspace", error = %e, "workspace cleanup on drop failed");
        }
    }
}

fn dir_name(job_id: &JobId) -> Result<String, WorkspaceError> {
    let raw = job_id.as_str();
    if raw.trim().is_empty() || raw == "." || raw == ".." || raw.contains(['/', '\\', '\0']) {
        return Err(WorkspaceError::InvalidJobId(raw.to_string()));
    }
    Ok(format!("job-{raw}"))
}

fn create_private_dir(path: &Path) -> Result<(), WorkspaceError> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        builder.mode(0o700);
        builder.create(path).map_err(|e| WorkspaceError::io(path, e))?;
        // The umask may have widened or narrowed the requested mode.
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .map_err(|e| WorkspaceError::io(path, e))?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        builder
            .create(path)
            .map_err(|e| WorkspaceError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_creates_private_dir() {
        let root = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(root.path().join("dante_tasks"));
        let ws = mgr.prepare(&JobId::from("j1")).unwrap();

        assert!(ws.path().is_dir());
        assert!(ws.path().starts_with(mgr.root()));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(ws.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn cleanup_removes_contents() {
        let root = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(root.path());
        let ws = mgr.prepare(&JobId::from("j2")).unwrap();
        fs::write(ws.path().join("out.txt"), "data").unwrap();
        let path = ws.path().to_path_buf();

        ws.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(root.path());
        let path = {
            let ws = mgr.prepare(&JobId::from("j3")).unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn drop_runs_during_unwind() {
        let root = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(root.path());
        let path = root.path().join("job-j4");

        let res = std::panic::catch_unwind(|| {
            let _ws = mgr.prepare(&JobId::from("j4")).unwrap();
            panic!("executor blew up");
        });
        assert!(res.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn stale_workspace_is_replaced() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join("job-j5");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old.txt"), "x").unwrap();

        let mgr = WorkspaceManager::new(root.path());
        let ws = mgr.prepare(&JobId::from("j5")).unwrap();
        assert!(!ws.path().join("old.txt").exists());
    }

    #[test]
    fn rejects_path_like_job_ids() {
        let root = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(root.path());
        for bad in ["", "..", "a/b", "x\\y"] {
            assert!(matches!(
                mgr.prepare(&JobId::from(bad)),
                Err(WorkspaceError::InvalidJobId(_))
            ));
        }
    }

    #[test]
    fn cleanup_of_missing_path_is_ok() {
        let root = tempfile::tempdir().unwrap();
        assert!(WorkspaceManager::cleanup(&root.path().join("nope")).is_ok());
    }
}
