use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::Component;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".stencil")
    }

    pub fn version_file(&self) -> PathBuf {
        self.state_dir().join("version.json")
    }

    pub fn customizations_file(&self) -> PathBuf {
        self.state_dir().join("customizations.json")
    }

    pub fn history_file(&self) -> PathBuf {
        self.state_dir().join("history.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir().join("config.toml")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir().join("backups")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.state_dir().join("cache")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    pub fn component_dir(&self, component: Component) -> PathBuf {
        self.root.join(component.dir_name())
    }

    pub fn managed_dirs(&self) -> Vec<(Component, PathBuf)> {
        Component::ALL
            .iter()
            .map(|component| (*component, self.component_dir(*component)))
            .collect()
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.state_dir(),
            self.backups_dir(),
            self.cache_dir(),
            self.tmp_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
