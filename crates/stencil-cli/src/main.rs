mod config;
mod flows;
mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stencil_core::{Component, ProjectLayout};
use stencil_fetch::TemplateOrigin;

use crate::flows::{ApplyOptions, ApplyStatus, Orchestrator};
use crate::render::{
    format_apply_lines, format_backup_create_lines, format_backup_list_lines,
    format_backup_verify_lines, format_cache_info_lines, format_check_lines,
    format_history_lines, format_init_lines, format_preview_lines, format_rollback_lines,
    format_status_lines,
};

#[derive(Parser, Debug)]
#[command(name = "stencil")]
#[command(about = "Template upgrade and synchronization engine", long_about = None)]
struct Cli {
    #[arg(long)]
    project_root: Option<PathBuf>,
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set up a project from a template origin
    Init {
        #[arg(long, default_value = "latest")]
        template_version: String,
        #[arg(long, default_value = "local")]
        source_kind: String,
        #[arg(long)]
        source: String,
    },
    Upgrade {
        #[command(subcommand)]
        command: UpgradeCommands,
    },
    /// Accept a conflicted file's present content as resolved
    Resolve { path: String },
    Status,
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    Version,
}

#[derive(Subcommand, Debug)]
enum UpgradeCommands {
    Check,
    Preview,
    Apply {
        #[arg(long)]
        component: Option<String>,
        #[arg(long)]
        auto: bool,
        #[arg(long)]
        force: bool,
    },
    Rollback {
        #[arg(long)]
        backup: Option<String>,
    },
    History,
}

#[derive(Subcommand, Debug)]
enum BackupCommands {
    Create {
        #[arg(long, default_value = "manual")]
        label: String,
    },
    List,
    Verify { name: String },
    Prune {
        #[arg(long, default_value_t = 5)]
        keep: usize,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    Info,
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = match &cli.project_root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("failed resolving current directory")?,
    };
    let layout = ProjectLayout::new(root);

    match cli.command {
        Commands::Init {
            template_version,
            source_kind,
            source,
        } => {
            let origin = TemplateOrigin::from_parts(&source_kind, &source)?;
            let report = flows::init(&layout, &origin, &template_version)?;
            print_lines(&format_init_lines(&report));
        }
        Commands::Upgrade { command } => match command {
            UpgradeCommands::Check => {
                let check = Orchestrator::open(layout)?.check()?;
                print_lines(&format_check_lines(&check));
            }
            UpgradeCommands::Preview => {
                let report = Orchestrator::open(layout)?.preview()?;
                print_lines(&format_preview_lines(&report, cli.verbose));
            }
            UpgradeCommands::Apply {
                component,
                auto,
                force,
            } => {
                let options = ApplyOptions {
                    component: component.as_deref().map(Component::parse).transpose()?,
                    auto,
                    force,
                };
                let report = Orchestrator::open(layout)?.apply(&options)?;
                print_lines(&format_apply_lines(&report, cli.verbose));
                if matches!(
                    report.status,
                    ApplyStatus::ConflictsPending | ApplyStatus::RolledBack
                ) {
                    std::process::exit(1);
                }
            }
            UpgradeCommands::Rollback { backup } => {
                let outcome = Orchestrator::open(layout)?.rollback(backup.as_deref())?;
                print_lines(&format_rollback_lines(&outcome));
            }
            UpgradeCommands::History => {
                let view = Orchestrator::open(layout)?.history()?;
                print_lines(&format_history_lines(&view));
            }
        },
        Commands::Resolve { path } => {
            let orchestrator = Orchestrator::open(layout)?;
            orchestrator.resolve(&path)?;
            println!("marked resolved: {path}");
            println!("re-run 'stencil upgrade apply' to commit the upgrade");
        }
        Commands::Status => {
            let report = Orchestrator::open(layout)?.status()?;
            print_lines(&format_status_lines(&report, cli.verbose));
        }
        Commands::Backup { command } => {
            let orchestrator = Orchestrator::open(layout)?;
            match command {
                BackupCommands::Create { label } => {
                    let outcome = orchestrator.create_backup(&label)?;
                    print_lines(&format_backup_create_lines(&outcome));
                }
                BackupCommands::List => {
                    let sets = orchestrator.list_backups()?;
                    print_lines(&format_backup_list_lines(&sets));
                }
                BackupCommands::Verify { name } => {
                    let checks = orchestrator.verify_backup(&name);
                    print_lines(&format_backup_verify_lines(&name, &checks));
                    if !checks.ok() {
                        std::process::exit(1);
                    }
                }
                BackupCommands::Prune { keep } => {
                    let removed = orchestrator.prune_backups(keep)?;
                    println!("pruned {removed} backup(s)");
                }
            }
        }
        Commands::Cache { command } => {
            let orchestrator = Orchestrator::open(layout)?;
            match command {
                CacheCommands::Info => {
                    let info = orchestrator.cache_info()?;
                    print_lines(&format_cache_info_lines(&info));
                }
                CacheCommands::Clear => {
                    let removed = orchestrator.clear_cache()?;
                    println!("cleared {removed} cached version(s)");
                }
            }
        }
        Commands::Version => {
            println!("{}", flows::TOOL_VERSION);
        }
    }

    Ok(())
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests;
