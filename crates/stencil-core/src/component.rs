use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Component {
    Rules,
    Templates,
    Workflows,
    GitHooks,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Rules,
        Component::Templates,
        Component::Workflows,
        Component::GitHooks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Templates => "templates",
            Self::Workflows => "workflows",
            Self::GitHooks => "git-hooks",
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Templates => "templates",
            Self::Workflows => "workflows",
            Self::GitHooks => "git-hooks",
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "rules" => Ok(Self::Rules),
            "templates" => Ok(Self::Templates),
            "workflows" => Ok(Self::Workflows),
            "git-hooks" | "hooks" => Ok(Self::GitHooks),
            other => Err(anyhow!("unknown component: '{other}'")),
        }
    }
}
