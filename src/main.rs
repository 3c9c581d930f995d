use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use workgrove::active::ActiveProjects;
use workgrove::config::{self, Config};
use workgrove::hierarchy::{self, Filter, Forest, MatchMode, ancestry};
use workgrove::migration::{self, MigrationOutcome};
use workgrove::store::{self, Store};

#[derive(Parser)]
#[command(
    name = "workgrove",
    version = env!("WORKGROVE_VERSION"),
    about = "Track projects and their hierarchies of work items"
)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the workgrove data directory
    Init,
    /// Create a project from a JSON file of the form {"project": {...}, "workItems": [...]}
    Import {
        /// Path to the JSON file
        file: PathBuf,
        /// Make the imported project the active one
        #[arg(long)]
        activate: bool,
    },
    /// List projects, most recently used first
    ListProjects,
    /// Make a project the active one
    Switch {
        /// Project id or name
        project: String,
    },
    /// Print the work item hierarchy of a project (default: the active project)
    Show {
        /// Project id or name
        project: Option<String>,
        /// Filter as kind=value (status, type, priority, tag, assignee); repeatable
        #[arg(short, long = "filter")]
        filters: Vec<String>,
        /// Let filters of the same kind match as alternatives
        #[arg(long)]
        any_within_kind: bool,
    },
    /// List the work items an item may be moved under
    Parents {
        /// Project id or name
        project: String,
        /// Work item id
        item: String,
    },
    /// Move a work item under a new parent, or to the top level when no parent is given
    SetParent {
        /// Project id or name
        project: String,
        /// Work item id
        item: String,
        /// New parent work item id
        parent: Option<String>,
    },
    /// Remove a project and all of its work items
    RemoveProject {
        /// Project id or name
        project: String,
    },
    /// Export a project as JSON
    Export {
        /// Project id or name
        project: String,
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import the legacy single-project file if it is present
    Migrate,
    /// Manage application settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print a setting
    Get { key: String },
    /// Store a setting; the value is parsed as JSON and falls back to a plain string
    Set { key: String, value: String },
    /// Remove a setting
    Unset { key: String },
    /// Print all settings
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load()?;
    init_logging(cli.verbose, &cfg);

    match cli.command {
        Commands::Init => {
            config::ensure_dirs()?;
            let store = open_store(&cfg)?;
            store.close()?;
            println!("workgrove initialized at {}", config::base_dir()?.display());
            Ok(())
        }
        Commands::Import { file, activate } => {
            let mut store = open_store(&cfg)?;
            let content = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let data: store::ProjectData = serde_json::from_str(&content)
                .with_context(|| format!("{} is not a valid project file", file.display()))?;
            let count = data.work_items.len();
            let id = store.create_project(data)?;
            if activate {
                ActiveProjects::new(&mut store).switch_to(&id)?;
            }
            println!("Imported project {id} with {count} work items");
            Ok(())
        }
        Commands::ListProjects => {
            let store = open_store(&cfg)?;
            let projects = store.get_all_projects()?;
            if projects.is_empty() {
                println!("No projects. Use `workgrove import <file>` to add one.");
            }
            for p in &projects {
                let marker = if p.is_active { "*" } else { " " };
                let counts = store
                    .get_metadata(&p.project.id)?
                    .map(|m| format!("{}/{} done", m.completed_work_items, m.total_work_items))
                    .unwrap_or_default();
                println!(
                    "{marker} {}  {} [{}] v{} {counts}",
                    p.project.name,
                    p.project.id,
                    p.project.status.as_str(),
                    p.version,
                );
            }
            Ok(())
        }
        Commands::Switch { project } => {
            let mut store = open_store(&cfg)?;
            let id = resolve_project(&store, &project)?;
            let snapshot = ActiveProjects::new(&mut store).switch_to(&id)?;
            println!(
                "Active project: {} ({} work items)",
                snapshot.project.name,
                snapshot.work_items.len()
            );
            Ok(())
        }
        Commands::Show {
            project,
            filters,
            any_within_kind,
        } => {
            let mut store = open_store(&cfg)?;
            let snapshot = match project {
                Some(project) => {
                    let id = resolve_project(&store, &project)?;
                    store.get_project(&id)?
                }
                None => ActiveProjects::new(&mut store)
                    .restore()?
                    .context("no projects yet; use `workgrove import <file>`")?,
            };
            let filters = filters
                .iter()
                .map(|f| f.parse::<Filter>().map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?;
            let mode = if any_within_kind {
                MatchMode::AnyWithinKind
            } else {
                cfg.filters.mode
            };

            let forest = Forest::build(&snapshot.work_items);
            for link in forest.rejected() {
                eprintln!(
                    "warning: ignoring parent {} of {} ({:?})",
                    link.parent_id, link.child_id, link.reason
                );
            }
            let filtered = hierarchy::filter_forest(&forest, &filters, mode);

            println!(
                "{}: {}/{} done",
                snapshot.project.name,
                snapshot.metadata.completed_work_items,
                snapshot.metadata.total_work_items
            );
            let mut out = std::io::stdout().lock();
            for (depth, item) in filtered.depth_first() {
                writeln!(out, "{}{item}  {}", "  ".repeat(depth + 1), item.id)?;
            }
            Ok(())
        }
        Commands::Parents { project, item } => {
            let store = open_store(&cfg)?;
            let id = resolve_project(&store, &project)?;
            let snapshot = store.get_project(&id)?;
            if !snapshot.work_items.iter().any(|w| w.id == item) {
                bail!("work item '{item}' not found in '{}'", snapshot.project.name);
            }
            let path = ancestry::ancestors_of(&item, &snapshot.work_items);
            if !path.is_empty() {
                println!("{item} is under: {}", path.join(" < "));
            }
            for candidate in ancestry::valid_parents_for(&item, &snapshot.work_items) {
                println!("  {}  {}", candidate.id, candidate.title);
            }
            Ok(())
        }
        Commands::SetParent {
            project,
            item,
            parent,
        } => {
            let mut store = open_store(&cfg)?;
            let id = resolve_project(&store, &project)?;
            let snapshot = store.get_project(&id)?;
            let version = snapshot.metadata.version;

            if !snapshot.work_items.iter().any(|w| w.id == item) {
                bail!("work item '{item}' not found in '{}'", snapshot.project.name);
            }
            if let Some(ref parent) = parent {
                if !snapshot.work_items.iter().any(|w| &w.id == parent) {
                    bail!("work item '{parent}' not found in '{}'", snapshot.project.name);
                }
                if !ancestry::can_reparent(&item, Some(parent), &snapshot.work_items) {
                    bail!("'{parent}' cannot be the parent of '{item}'");
                }
            }

            let mut data = snapshot.into_data();
            if let Some(target) = data.work_items.iter_mut().find(|w| w.id == item) {
                target.parent_id.clone_from(&parent);
            }
            let summary = store.update_project(&id, data, version)?;
            println!("Moved '{item}' (project now at version {})", summary.version);
            Ok(())
        }
        Commands::RemoveProject { project } => {
            let mut store = open_store(&cfg)?;
            let id = resolve_project(&store, &project)?;
            store.delete_project(&id)?;
            println!("Removed project {id}");
            Ok(())
        }
        Commands::Export { project, output } => {
            let store = open_store(&cfg)?;
            let id = resolve_project(&store, &project)?;
            let snapshot = store.get_project(&id)?;
            let json = serde_json::to_string_pretty(&snapshot)?;
            match output {
                Some(path) => {
                    fs::write(&path, &json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!(
                        "Exported {} work items to {}",
                        snapshot.work_items.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
            Ok(())
        }
        Commands::Migrate => {
            let mut store = open_db(&cfg)?;
            match migration::migrate_legacy(&mut store, &cfg.legacy_data_path()?) {
                MigrationOutcome::NoLegacyData => println!("No legacy data to migrate."),
                MigrationOutcome::Migrated { project_id } => {
                    println!("Migrated legacy data into project {project_id}");
                }
                MigrationOutcome::Failed(reason) => println!("Legacy data left in place: {reason}"),
            }
            Ok(())
        }
        Commands::Settings { action } => {
            let store = open_store(&cfg)?;
            match action {
                SettingsAction::Get { key } => match store.get_setting(&key)? {
                    Some(value) => println!("{value}"),
                    None => bail!("setting '{key}' is not set"),
                },
                SettingsAction::Set { key, value } => {
                    let value = serde_json::from_str(&value)
                        .unwrap_or(serde_json::Value::String(value));
                    store.set_setting(&key, &value)?;
                }
                SettingsAction::Unset { key } => {
                    if !store.delete_setting(&key)? {
                        println!("setting '{key}' was not set");
                    }
                }
                SettingsAction::List => {
                    for (key, value) in store.list_settings()? {
                        println!("{key} = {value}");
                    }
                }
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, cfg: &Config) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        cfg.log_level
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(tracing::Level::WARN)
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn open_db(cfg: &Config) -> Result<Store> {
    config::ensure_dirs()?;
    Store::open(&cfg.db_path()?)
}

/// Open the store and pick up any legacy data.
fn open_store(cfg: &Config) -> Result<Store> {
    let mut store = open_db(cfg)?;
    migration::migrate_legacy(&mut store, &cfg.legacy_data_path()?);
    Ok(store)
}

/// Accept either a project id or its exact name.
fn resolve_project(store: &Store, key: &str) -> Result<String> {
    let projects = store.get_all_projects()?;
    if let Some(p) = projects.iter().find(|p| p.project.id == key) {
        return Ok(p.project.id.clone());
    }
    let mut by_name = projects.into_iter().filter(|p| p.project.name == key);
    match (by_name.next(), by_name.next()) {
        (Some(p), None) => Ok(p.project.id),
        (Some(_), Some(_)) => bail!("several projects are named '{key}'; use the id instead"),
        (None, _) => bail!("project '{key}' not found"),
    }
}
