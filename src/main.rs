use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use catalog_ingest::db::{self, SqliteStore};
use catalog_ingest::error::ImportError;
use catalog_ingest::import::{self, ImportReport, Upload};
use catalog_ingest::parser::{DocumentParser, ParsedDocument};
use catalog_ingest::persist::{Collection, Persister};
use catalog_ingest::reader::Format;
use catalog_ingest::server;
use catalog_ingest::settings::Settings;

#[derive(Parser)]
#[command(name = "catalog_ingest", about = "Import Thai taxonomy and dictionary documents into the catalog")]
struct Cli {
    /// Settings file (default: ./catalog_ingest.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the catalog tables
    Init,
    /// Parse a file or a directory of files and optionally save the entries
    Import {
        path: PathBuf,
        /// Target collection (taxonomy, dictionary)
        #[arg(short, long)]
        collection: Collection,
        /// Write records; without this only a preview is produced
        #[arg(long)]
        commit: bool,
        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },
    /// Print the import envelope for one file without saving anything
    Preview {
        file: PathBuf,
        #[arg(short, long)]
        collection: Collection,
    },
    /// Run the upload endpoint
    Serve {
        /// Listen address (overrides settings)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show catalog statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            println!("Catalog ready at {}", settings.database_path.display());
            Ok(())
        }
        Commands::Import { path, collection, commit, recursive } => {
            let files = collect_files(&path, recursive);
            if files.is_empty() {
                println!("No supported documents under {}", path.display());
                return Ok(());
            }
            let parser = DocumentParser::new(&settings).context("Invalid garble or label patterns")?;
            let mut persister = if commit {
                let conn = db::connect(&settings.database_path)?;
                db::init_schema(&conn)?;
                Some(Persister::new(SqliteStore::new(conn), &settings.persist))
            } else {
                None
            };

            println!(
                "{} {} file(s) into {}...",
                if commit { "Importing" } else { "Previewing" },
                files.len(),
                collection
            );
            let counts = process_files(&files, &parser, &settings, collection, persister.as_mut());
            counts.print(commit);
            Ok(())
        }
        Commands::Preview { file, collection } => {
            let parser = DocumentParser::new(&settings).context("Invalid garble or label patterns")?;
            let upload = Upload::from_path(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let parsed = import::parse_upload(&parser, settings.max_upload_bytes, &upload)?;
            let report = import::preview(&parsed, collection, &upload.file_name);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            server::serve(&settings).await
        }
        Commands::Stats => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Taxa:        {}", s.taxa);
            println!("Dictionary:  {}", s.dictionary_entries);
            println!("Imports:     {}", s.imports);
            println!("Last import: {}", s.last_import.as_deref().unwrap_or("-"));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Files whose extension one of the readers understands.
fn collect_files(path: &Path, recursive: bool) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let walker = if recursive {
        walkdir::WalkDir::new(path)
    } else {
        walkdir::WalkDir::new(path).max_depth(1)
    };
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| Format::detect(name, None).is_ok())
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

#[derive(Default)]
struct ImportCounts {
    files: usize,
    failed_files: usize,
    entries: usize,
    saved: usize,
    warnings: usize,
}

impl ImportCounts {
    fn print(&self, commit: bool) {
        if commit {
            println!(
                "Saved {} of {} entries from {} file(s), {} unreadable, {} warnings.",
                self.saved, self.entries, self.files, self.failed_files, self.warnings,
            );
        } else {
            println!(
                "Parsed {} entries from {} file(s), {} unreadable, {} warnings. Nothing saved (use --commit).",
                self.entries, self.files, self.failed_files, self.warnings,
            );
        }
    }
}

fn load(path: &Path, parser: &DocumentParser, max_upload_bytes: usize) -> anyhow::Result<(String, ParsedDocument)> {
    let upload = Upload::from_path(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed = import::parse_upload(parser, max_upload_bytes, &upload)
        .map_err(|e: ImportError| anyhow::anyhow!("{}: {}", path.display(), e))?;
    Ok((upload.file_name, parsed))
}

fn process_files(
    files: &[PathBuf],
    parser: &DocumentParser,
    settings: &Settings,
    collection: Collection,
    mut persister: Option<&mut Persister<SqliteStore>>,
) -> ImportCounts {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut counts = ImportCounts::default();
    let mut reports: Vec<(String, ImportReport)> = Vec::new();

    for chunk in files.chunks(64) {
        let results: Vec<_> = chunk
            .par_iter()
            .map(|path| load(path, parser, settings.max_upload_bytes))
            .collect();

        for result in results {
            counts.files += 1;
            let (file_name, parsed) = match result {
                Ok(loaded) => loaded,
                Err(e) => {
                    counts.failed_files += 1;
                    pb.println(format!("skipped {}", e));
                    continue;
                }
            };
            let report = match persister.as_deref_mut() {
                Some(p) => import::commit(&parsed, collection, &file_name, p),
                None => import::preview(&parsed, collection, &file_name),
            };
            counts.entries += report.entries.len();
            counts.saved += report.created.len();
            counts.warnings += report.warnings.len()
                + report.entries.iter().map(|e| e.warnings.len()).sum::<usize>();
            reports.push((file_name, report));
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();

    for (file_name, report) in &reports {
        let marker = if report.ok { " " } else { "!" };
        println!("{} {:<32} {}", marker, truncate(file_name, 32), report.message);
        for entry in &report.entries {
            println!("    {:>3}. {}", entry.index, truncate(&entry.title, 60));
        }
        for warning in &report.warnings {
            println!("    warning: {}", truncate(warning, 100));
        }
    }
    counts
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
