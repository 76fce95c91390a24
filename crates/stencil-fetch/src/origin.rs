use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::LATEST;

/// Where template versions come from. Resolved once at fetcher
/// construction; callers never branch on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TemplateOrigin {
    Registry { index_url: String },
    Git { repo_url: String },
    Local { path: PathBuf },
}

impl TemplateOrigin {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Registry { .. } => "registry",
            Self::Git { .. } => "git",
            Self::Local { .. } => "local",
        }
    }

    pub fn location(&self) -> String {
        match self {
            Self::Registry { index_url } => index_url.clone(),
            Self::Git { repo_url } => repo_url.clone(),
            Self::Local { path } => path.display().to_string(),
        }
    }

    pub fn from_parts(kind: &str, location: &str) -> Result<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "registry" => Ok(Self::Registry {
                index_url: location.to_string(),
            }),
            "git" => Ok(Self::Git {
                repo_url: location.to_string(),
            }),
            "local" => Ok(Self::Local {
                path: PathBuf::from(location),
            }),
            other => anyhow::bail!("unknown origin kind: '{other}'"),
        }
    }
}

fn base_git_command() -> Command {
    let mut command = Command::new("git");
    command
        .arg("-c")
        .arg("core.autocrlf=false")
        .arg("-c")
        .arg("core.eol=lf");
    if cfg!(windows) {
        command.arg("-c").arg("core.longpaths=true");
    }
    command
}

/// Shallow checkout of `repo_url` at the ref for `version` ("latest" means
/// the default branch; anything else the `v<version>` tag).
pub(crate) fn git_shallow_clone(repo_url: &str, destination: &Path, version: &str) -> Result<()> {
    let mut command = base_git_command();
    command.arg("clone").arg("--depth").arg("1");
    if version != LATEST {
        command.arg("--branch").arg(format!("v{version}"));
    }
    let output = command
        .arg("--")
        .arg(repo_url)
        .arg(destination)
        .output()
        .with_context(|| format!("fetch-failed: could not launch git clone for {repo_url}"))?;
    if !output.status.success() {
        anyhow::bail!(
            "fetch-failed: git clone of {} failed: {}",
            repo_url,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
