//! Dynamic-container runtime seam.
//!
//! The actual execution container for isolated code is an external
//! collaborator. The host hands it a materialized artifact to install and
//! activate, and only ever reads the enabled signal back from the returned
//! handle; the runtime's internal model stays its own.

use crate::artifact::Artifact;

/// Opaque handle the runtime returns for an installed artifact.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    pub id: String,
    pub active: bool,
}

/// External module runtime collaborator.
pub trait ModuleRuntime: Send + Sync {
    fn install(&self, artifact: &Artifact) -> anyhow::Result<RuntimeHandle>;

    fn activate(&self, handle: &mut RuntimeHandle) -> anyhow::Result<()>;

    fn deactivate(&self, handle: &mut RuntimeHandle) -> anyhow::Result<()>;
}

/// Default runtime for hosts that execute nothing: every install succeeds
/// and activation just flips the handle.
pub struct NoopRuntime;

impl ModuleRuntime for NoopRuntime {
    fn install(&self, artifact: &Artifact) -> anyhow::Result<RuntimeHandle> {
        Ok(RuntimeHandle {
            id: artifact.path().display().to_string(),
            active: false,
        })
    }

    fn activate(&self, handle: &mut RuntimeHandle) -> anyhow::Result<()> {
        handle.active = true;
        Ok(())
    }

    fn deactivate(&self, handle: &mut RuntimeHandle) -> anyhow::Result<()> {
        handle.active = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn noop_runtime_installs_and_activates() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.txt");
        fs::write(&path, b"x").unwrap();
        let artifact = Artifact::open(&path).unwrap();

        let runtime = NoopRuntime;
        let mut handle = runtime.install(&artifact).unwrap();
        assert!(!handle.active);

        runtime.activate(&mut handle).unwrap();
        assert!(handle.active);

        runtime.deactivate(&mut handle).unwrap();
        assert!(!handle.active);
    }
}
