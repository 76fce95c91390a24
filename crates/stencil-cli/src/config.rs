use std::fs;
use std::io;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stencil_core::ProjectLayout;
use stencil_fetch::TemplateOrigin;
use stencil_merge::MergeStrategy;

const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "config_version")]
    pub version: u32,
    pub source: SourceSection,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSection {
    pub kind: String,
    pub location: String,
}

impl ProjectConfig {
    pub fn for_origin(origin: &TemplateOrigin) -> Self {
        Self {
            version: CONFIG_VERSION,
            source: SourceSection {
                kind: origin.kind_label().to_string(),
                location: origin.location(),
            },
            strategy: default_strategy(),
        }
    }

    pub fn load(layout: &ProjectLayout) -> Result<Self> {
        let path = layout.config_file();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                anyhow::bail!(
                    "not-initialized: no configuration at {}; run 'stencil init'",
                    path.display()
                );
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading configuration {}", path.display()));
            }
        };

        toml::from_str(&raw)
            .with_context(|| format!("failed parsing configuration {}", path.display()))
    }

    pub fn save(&self, layout: &ProjectLayout) -> Result<()> {
        layout.ensure_base_dirs()?;
        let path = layout.config_file();
        let content = toml::to_string_pretty(self)
            .with_context(|| format!("failed serializing configuration {}", path.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing configuration {}", path.display()))
    }

    pub fn origin(&self) -> Result<TemplateOrigin> {
        TemplateOrigin::from_parts(&self.source.kind, &self.source.location)
    }

    pub fn merge_strategy(&self) -> Result<MergeStrategy> {
        MergeStrategy::parse(&self.strategy)
    }
}

fn config_version() -> u32 {
    CONFIG_VERSION
}

fn default_strategy() -> String {
    MergeStrategy::Auto.as_str().to_string()
}
