//! CLI entry point for the content memory.
//!
//! Provides commands for adding text, querying by similarity, and
//! maintaining the persisted index.

use anyhow::{Context, Result, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use content_memory::display::{THEME, create_results_table, create_stats_table};
use content_memory::memory::Metadata;
use content_memory::{MemoryError, MemoryService, SearchHit, Settings, logging};
use serde::Serialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Semantic content memory
#[derive(Parser)]
#[command(
    name = "content-memory",
    version = env!("CARGO_PKG_VERSION"),
    about = "Semantic content memory",
    long_about = "Embed text, store it in a persistent vector index, and query it by similarity.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .content-memory directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,

    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that open the content store
#[derive(Subcommand)]
enum StoreCommand {
    /// Embed and store one text
    #[command(
        about = "Embed and store a text",
        after_help = "Examples:\n  content-memory add \"Our spring launch recap\"\n  content-memory add \"Thread on Rust\" --id post-42 --meta platform=twitter"
    )]
    Add {
        /// Text to embed
        text: String,

        /// Content id (a UUID is generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Metadata entries as key=value
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Embed and store many texts in one batch
    #[command(
        about = "Import texts from a file, one per line",
        after_help = "Lines may be 'text' or 'id<TAB>text'. Use '-' to read from stdin."
    )]
    Import {
        /// File with one text per line
        file: PathBuf,
    },

    /// Search by text
    #[command(about = "Find stored texts similar to a query")]
    Search {
        /// Query text
        query: String,

        /// Maximum number of results (overrides config)
        #[arg(short)]
        k: Option<usize>,

        /// Minimum similarity (overrides config)
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Recommend records similar to a stored one
    #[command(about = "Find records similar to an existing content id")]
    Similar {
        /// Content id of the reference record
        content_id: String,

        /// Maximum number of results (overrides config)
        #[arg(short)]
        k: Option<usize>,

        /// Minimum similarity (overrides config)
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Remove records by content id
    #[command(about = "Remove records and rebuild the index")]
    Remove {
        /// Content ids to remove
        #[arg(required = true)]
        content_ids: Vec<String>,

        /// Leave ghost slots in place and skip the rebuild (single id only)
        #[arg(long)]
        no_rebuild: bool,
    },

    /// Rebuild the index from live records
    #[command(about = "Compact the index and renumber live records")]
    Rebuild,

    /// Show store statistics
    #[command(about = "Show record counts and consistency checks")]
    Stats,
}

#[derive(Debug, Serialize)]
struct RemoveOutput {
    requested: usize,
    removed: usize,
}

#[derive(Debug, Serialize)]
struct ImportOutput {
    imported: usize,
    failed: usize,
    content_ids: Vec<Option<String>>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(config_path) => Settings::load_from(config_path).unwrap_or_else(|e| {
            eprintln!(
                "Configuration error loading from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }),
        None => Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            Settings::default()
        }),
    };

    let level = if cli.verbose {
        "debug"
    } else {
        settings.logging.level.as_str()
    };
    logging::init(level);

    let json = cli.json;
    if let Err(e) = run(cli, settings).await {
        if json {
            println!("{}", error_response(&e));
        } else {
            eprintln!("{}", THEME.error_with_icon(&format!("{e:#}")));
            if let Some(memory_error) = e.downcast_ref::<MemoryError>() {
                for suggestion in memory_error.recovery_suggestions() {
                    eprintln!("  {suggestion}");
                }
            }
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(".", force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!(
                "{}",
                THEME.success_with_icon(&format!(
                    "Created configuration file at: {}",
                    THEME.apply(&THEME.path, path.display())
                ))
            );
            println!("Edit this file to customize your settings.");
            Ok(())
        }
        Commands::Config => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                println!("{}", THEME.apply(&THEME.header, "Current Configuration:"));
                println!("{}", "=".repeat(50));
                println!("{}", toml::to_string_pretty(&settings)?);
            }
            Ok(())
        }
        Commands::Store(command) => run_store_command(command, cli.json, &settings).await,
    }
}

async fn run_store_command(command: StoreCommand, json: bool, settings: &Settings) -> Result<()> {
    settings
        .validate()
        .map_err(|reason| MemoryError::ConfigError { reason })?;
    let service = MemoryService::from_settings(settings)?;
    let default_k = settings.store.default_k;
    let default_threshold = settings.store.default_threshold;

    match command {
        StoreCommand::Add { text, id, meta } => {
            let metadata = parse_metadata(&meta)?;
            let content_id = service.add_text(&text, id, Some(metadata)).await?;
            // Single adds only persist every Nth insert; a CLI run is one insert
            service.save()?;
            if json {
                println!("{}", serde_json::json!({ "content_id": content_id }));
            } else {
                println!(
                    "{}",
                    THEME.success_with_icon(&format!(
                        "Stored {}",
                        THEME.apply(&THEME.id, &content_id)
                    ))
                );
            }
        }

        StoreCommand::Import { file } => {
            let (ids, texts) = read_import_lines(&file)?;
            if texts.is_empty() {
                bail!("No texts found in {}", file.display());
            }
            let content_ids = service.add_texts(texts.as_slice(), ids, None).await?;
            let imported = content_ids.iter().filter(|id| id.is_some()).count();
            let output = ImportOutput {
                imported,
                failed: content_ids.len() - imported,
                content_ids,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!(
                    "{}",
                    THEME.success_with_icon(&format!("Imported {} texts", output.imported))
                );
                if output.failed > 0 {
                    println!(
                        "{}",
                        THEME.warning_with_icon(&format!(
                            "{} texts could not be embedded",
                            output.failed
                        ))
                    );
                }
            }
        }

        StoreCommand::Search {
            query,
            k,
            threshold,
        } => {
            let hits = service
                .search_text(
                    &query,
                    k.unwrap_or(default_k),
                    threshold.unwrap_or(default_threshold),
                )
                .await?;
            print_hits(&hits, json)?;
        }

        StoreCommand::Similar {
            content_id,
            k,
            threshold,
        } => {
            if !service.contains(&content_id) {
                bail!("No record with content id '{content_id}'");
            }
            let hits = service.similar_to(
                &content_id,
                k.unwrap_or(default_k),
                threshold.unwrap_or(default_threshold),
            )?;
            print_hits(&hits, json)?;
        }

        StoreCommand::Remove {
            content_ids,
            no_rebuild,
        } => {
            let removed = match content_ids.as_slice() {
                [single] => usize::from(service.remove(single, !no_rebuild)?),
                many => {
                    if no_rebuild {
                        bail!("--no-rebuild only applies to a single content id");
                    }
                    service.remove_batch(many)?
                }
            };
            let output = RemoveOutput {
                requested: content_ids.len(),
                removed,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else if removed == 0 {
                println!("{}", THEME.warning_with_icon("No matching records"));
            } else {
                println!(
                    "{}",
                    THEME.success_with_icon(&format!(
                        "Removed {removed} of {} content ids",
                        output.requested
                    ))
                );
            }
        }

        StoreCommand::Rebuild => {
            service.rebuild()?;
            let stats = service.statistics();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "{}",
                    THEME.success_with_icon(&format!(
                        "Rebuilt index with {} records",
                        stats.total_vectors
                    ))
                );
            }
        }

        StoreCommand::Stats => {
            let stats = service.statistics();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", create_stats_table(&stats));
            }
        }
    }

    Ok(())
}

/// JSON body printed for a failed command under `--json`.
fn error_response(error: &anyhow::Error) -> serde_json::Value {
    let memory_error = error.downcast_ref::<MemoryError>();
    serde_json::json!({
        "status": "error",
        "code": memory_error.map_or_else(|| "ERROR".to_string(), MemoryError::status_code),
        "message": format!("{error:#}"),
        "suggestions": memory_error
            .map(MemoryError::recovery_suggestions)
            .unwrap_or_default(),
    })
}

fn print_hits(hits: &[SearchHit], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hits)?);
    } else if hits.is_empty() {
        println!("{}", THEME.warning_with_icon("No results above the threshold"));
    } else {
        println!("{}", create_results_table(hits));
    }
    Ok(())
}

fn parse_metadata(entries: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("Metadata entry '{entry}' must look like key=value");
        };
        // Values that parse as JSON keep their type, anything else is a string
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        metadata.insert(key.trim().to_string(), value);
    }
    Ok(metadata)
}

/// Reads `text` or `id<TAB>text` lines. Content ids are only used when every
/// line carries one.
fn read_import_lines(file: &Path) -> Result<(Option<Vec<String>>, Vec<String>)> {
    let reader: Box<dyn BufRead> = if file.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let handle = std::fs::File::open(file)
            .with_context(|| format!("Failed to open {}", file.display()))?;
        Box::new(BufReader::new(handle))
    };

    let mut ids = Vec::new();
    let mut texts = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read {}", file.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((id, text)) if !id.trim().is_empty() => {
                ids.push(Some(id.trim().to_string()));
                texts.push(text.to_string());
            }
            _ => {
                ids.push(None);
                texts.push(line);
            }
        }
    }

    let ids = ids.into_iter().collect::<Option<Vec<_>>>();
    Ok((ids, texts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_carries_status_code() {
        let error = anyhow::Error::from(MemoryError::InconsistentState {
            reason: "index has 3 entries".into(),
        });
        let response = error_response(&error);
        assert_eq!(response["status"], "error");
        assert_eq!(response["code"], "INCONSISTENT_STATE");
        assert!(!response["suggestions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_error_response_for_other_errors() {
        let response = error_response(&anyhow::anyhow!("No texts found"));
        assert_eq!(response["code"], "ERROR");
        assert_eq!(response["message"], "No texts found");
        assert!(response["suggestions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_parse_metadata_keeps_json_types() {
        let metadata = parse_metadata(&["likes=12".into(), "platform=twitter".into()]).unwrap();
        assert_eq!(metadata["likes"], 12);
        assert_eq!(metadata["platform"], "twitter");
        assert!(parse_metadata(&["broken".into()]).is_err());
    }
}
