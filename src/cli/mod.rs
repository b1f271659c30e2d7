//! # CLI Module
//!
//! Command-line interface for the FITS catalog.
//!
//! ## Usage
//! ```bash
//! # Register a root
//! fitscat root add archive /mnt/astro
//!
//! # Bring the catalog up to date
//! fitscat update
//!
//! # Only detect file changes of one root
//! fitscat scan archive --bad-marker reject
//!
//! # Catalog counts as JSON
//! fitscat stats --json
//! ```

use clap::{Parser, Subcommand};
use console::{style, Term};
use fits_catalog::core::extractor::{ExtractConfig, ExtractionReport};
use fits_catalog::core::grouper::GroupingOutcome;
use fits_catalog::core::pipeline::{Pipeline, PipelineBuilder, PipelineReport, RootReport};
use fits_catalog::core::store::{in_transaction, CatalogStore, SqliteStore};
use fits_catalog::error::Result;
use fits_catalog::events::{
    Event, EventChannel, EventSender, ExtractEvent, GroupEvent, PipelineEvent, ScanEvent,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

/// FITS Catalog - Keep your astrophotography archive catalogued
#[derive(Parser, Debug)]
#[command(name = "fitscat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Catalog database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage catalog roots
    Root {
        #[command(subcommand)]
        command: RootCommand,
    },

    /// Detect new, changed and removed files
    Scan {
        /// Roots to scan (all when omitted)
        roots: Vec<String>,

        /// Name prefix of files and folders to skip
        #[arg(long, default_value = "bad")]
        bad_marker: String,
    },

    /// Read headers of files not yet catalogued
    Extract {
        /// Header reading threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Files per transaction
        #[arg(long, default_value = "64")]
        batch_size: usize,
    },

    /// Group catalogued images into sets
    Group {
        /// Camera temperature tolerance in degrees
        #[arg(short, long, default_value = "1.0")]
        tolerance: f64,
    },

    /// Run every stage over all roots
    Update {
        /// Header reading threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Name prefix of files and folders to skip
        #[arg(long, default_value = "bad")]
        bad_marker: String,

        /// Camera temperature tolerance in degrees
        #[arg(short, long, default_value = "1.0")]
        tolerance: f64,

        /// JSON output for scripting
        #[arg(long)]
        json: bool,
    },

    /// Show catalog counts
    Stats {
        /// JSON output for scripting
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RootCommand {
    /// Register a folder under a unique name
    Add { name: String, path: PathBuf },

    /// List registered roots
    List {
        /// JSON output for scripting
        #[arg(long)]
        json: bool,
    },

    /// Point a root at a new location
    SetPath { name: String, path: PathBuf },
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    fits_catalog::init_tracing(if cli.verbose { "info" } else { "warn" });

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let store: Arc<dyn CatalogStore> = Arc::new(SqliteStore::open(&db_path)?);
    let term = Term::stderr();
    let verbose = cli.verbose;

    match cli.command {
        Commands::Root { command } => run_root(&term, store.as_ref(), command),
        Commands::Scan { roots, bad_marker } => {
            let pipeline = builder(store).bad_marker(&bad_marker).build()?;
            let reports = with_progress(verbose, |events| pipeline.scan_roots(&roots, events))?;
            print_root_reports(&term, &reports);
            Ok(())
        }
        Commands::Extract {
            workers,
            batch_size,
        } => {
            let defaults = ExtractConfig::default();
            let config = ExtractConfig {
                workers: workers.unwrap_or(defaults.workers),
                batch_size,
            };
            let pipeline = builder(store).extract_config(config).build()?;
            let report = with_progress(verbose, |events| pipeline.extract(events))?;
            print_extraction(&term, &report);
            print_errors(&term, &report.errors, verbose);
            Ok(())
        }
        Commands::Group { tolerance } => {
            let pipeline = builder(store).temperature_tolerance(tolerance).build()?;
            let outcome = with_progress(verbose, |events| pipeline.group(events))?;
            print_grouping(&term, &outcome);
            print_errors(&term, &outcome.errors, verbose);
            Ok(())
        }
        Commands::Update {
            workers,
            bad_marker,
            tolerance,
            json,
        } => {
            let mut builder = builder(store)
                .bad_marker(&bad_marker)
                .temperature_tolerance(tolerance);
            if let Some(workers) = workers {
                builder = builder.workers(workers);
            }
            let pipeline = builder.build()?;
            let report = with_progress(verbose && !json, |events| {
                pipeline.run_with_events(events)
            })?;

            if json {
                print_json(&report);
            } else {
                print_update(&term, &report, verbose);
            }
            Ok(())
        }
        Commands::Stats { json } => {
            let stats = store.stats()?;
            if json {
                print_json(&stats);
            } else {
                term.write_line(&format!("{}", style("Catalog").bold().underlined()))
                    .ok();
                for (label, count) in [
                    ("roots", stats.roots),
                    ("files", stats.files),
                    ("images", stats.images),
                    ("header cards", stats.image_meta),
                    ("sets", stats.image_sets),
                    ("grouped images", stats.classified_images),
                ] {
                    term.write_line(&format!("  {:>8} {}", style(count).cyan(), label))
                        .ok();
                }
            }
            Ok(())
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fits-catalog")
        .join("catalog.db")
}

fn builder(store: Arc<dyn CatalogStore>) -> PipelineBuilder {
    Pipeline::builder().store(store)
}

fn run_root(term: &Term, store: &dyn CatalogStore, command: RootCommand) -> Result<()> {
    match command {
        RootCommand::Add { name, path } => {
            let path = absolute(&path);
            let root = in_transaction(store, |tx| tx.add_root(&name, &path))?;
            term.write_line(&format!(
                "{} Added root {} at {}",
                style("✓").green().bold(),
                style(&root.name).cyan(),
                root.path.display()
            ))
            .ok();
        }
        RootCommand::List { json } => {
            let roots = store.roots()?;
            if json {
                print_json(&roots);
            } else if roots.is_empty() {
                term.write_line("  No roots registered").ok();
            } else {
                for root in roots {
                    println!("{}\t{}", root.name, root.path.display());
                }
            }
        }
        RootCommand::SetPath { name, path } => {
            let path = absolute(&path);
            let root = in_transaction(store, |tx| tx.set_root_path(&name, &path))?;
            term.write_line(&format!(
                "{} Root {} now at {}",
                style("✓").green().bold(),
                style(&root.name).cyan(),
                root.path.display()
            ))
            .ok();
        }
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Run `work` while rendering its events on a progress bar
fn with_progress<T>(verbose: bool, work: impl FnOnce(&EventSender) -> Result<T>) -> Result<T> {
    let (sender, receiver) = EventChannel::new();

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );

    let progress_clone = progress.clone();

    // Handle events in a separate thread
    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            render_event(&progress_clone, &event, verbose);
        }
    });

    let result = work(&sender);

    // Drop sender to signal event thread to finish
    drop(sender);
    event_thread.join().ok();
    progress.finish_and_clear();

    result
}

fn render_event(pb: &ProgressBar, event: &Event, verbose: bool) {
    match event {
        Event::Pipeline(PipelineEvent::PhaseChanged { phase }) => {
            pb.set_message(format!("{}", phase));
        }
        Event::Scan(ScanEvent::Progress(p)) => {
            pb.set_message(format!("{}: {}", p.root, p.current_dir));
            pb.tick();
        }
        Event::Scan(ScanEvent::Error {
            root,
            path,
            message,
        }) if verbose => {
            pb.println(format!("{} {}/{}: {}", style("!").yellow(), root, path, message));
        }
        Event::Extract(ExtractEvent::Started { total_files }) => {
            pb.set_length(*total_files as u64);
            pb.set_position(0);
        }
        Event::Extract(ExtractEvent::Progress(p)) => {
            pb.set_position(p.completed as u64);
            if verbose {
                pb.set_message(p.current_file.clone());
            }
        }
        Event::Extract(ExtractEvent::Error { path, message }) if verbose => {
            pb.println(format!("{} {}: {}", style("!").yellow(), path, message));
        }
        Event::Extract(ExtractEvent::BatchRolledBack { batch, message }) => {
            pb.println(format!(
                "{} batch {} rolled back: {}",
                style("✗").red(),
                batch,
                message
            ));
        }
        Event::Group(GroupEvent::Started { total_images }) => {
            pb.set_length(*total_images as u64);
            pb.set_position(0);
        }
        Event::Group(GroupEvent::Progress(p)) => {
            pb.set_position(p.processed as u64);
        }
        Event::Pipeline(PipelineEvent::Completed { .. })
        | Event::Pipeline(PipelineEvent::Cancelled) => {
            pb.finish_and_clear();
        }
        _ => {}
    }
}

fn print_root_reports(term: &Term, reports: &[RootReport]) {
    for report in reports {
        match &report.changes {
            Some(changes) => term.write_line(&format!(
                "{} {}: {} new, {} changed, {} removed",
                style("✓").green().bold(),
                style(&report.root).cyan(),
                changes.new_files,
                changes.changed_files,
                changes.removed_files
            )),
            None => term.write_line(&format!(
                "{} {}: skipped",
                style("✗").red().bold(),
                style(&report.root).cyan()
            )),
        }
        .ok();

        for error in &report.errors {
            term.write_line(&format!("    {} {}", style("!").yellow(), error))
                .ok();
        }
    }
}

fn print_extraction(term: &Term, report: &ExtractionReport) {
    term.write_line(&format!(
        "{} {} images catalogued from {} files",
        style("✓").green().bold(),
        style(report.images_created).cyan(),
        report.files_total
    ))
    .ok();

    if report.failed_files > 0 || report.failed_batches > 0 {
        term.write_line(&format!(
            "  {} unreadable files, {} rolled back batches",
            style(report.failed_files).yellow(),
            style(report.failed_batches).yellow()
        ))
        .ok();
    }
}

fn print_grouping(term: &Term, outcome: &GroupingOutcome) {
    term.write_line(&format!(
        "{} {} images grouped, {} new sets",
        style("✓").green().bold(),
        style(outcome.images_processed).cyan(),
        style(outcome.sets_created).cyan()
    ))
    .ok();

    if outcome.skipped > 0 {
        term.write_line(&format!(
            "  {} images left for manual grouping",
            style(outcome.skipped).dim()
        ))
        .ok();
    }
}

fn print_update(term: &Term, report: &PipelineReport, verbose: bool) {
    print_root_reports(term, &report.roots);
    if let Some(extraction) = &report.extraction {
        print_extraction(term, extraction);
    }
    if let Some(grouping) = &report.grouping {
        print_grouping(term, grouping);
    }

    if report.cancelled {
        term.write_line(&format!("{}", style("Update cancelled").yellow()))
            .ok();
    }
    term.write_line(&format!(
        "  done in {:.1}s",
        report.duration_ms as f64 / 1000.0
    ))
    .ok();

    let errors: Vec<String> = report
        .extraction
        .iter()
        .flat_map(|e| e.errors.iter().cloned())
        .chain(report.grouping.iter().flat_map(|g| g.errors.iter().cloned()))
        .collect();
    print_errors(term, &errors, verbose);
}

fn print_errors(term: &Term, errors: &[String], verbose: bool) {
    if errors.is_empty() {
        return;
    }

    if !verbose {
        term.write_line(&format!(
            "  {} problems, rerun with --verbose for details",
            style(errors.len()).yellow()
        ))
        .ok();
        return;
    }

    for error in errors {
        term.write_line(&format!("    {} {}", style("!").yellow(), error))
            .ok();
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode JSON: {}", e),
    }
}
