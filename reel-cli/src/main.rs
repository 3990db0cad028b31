//! Reel CLI Tool
//!
//! Command-line interface for building, repairing and inspecting
//! narration-paced timelines.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reel_assembly::{
    AssetResolver, DurationReconciler, FfprobeProbe, ImageNormalizer, MediaProbe,
    NarrationLocator, NoProbe, SequenceBuilder, SequenceRepairer,
};
use reel_core::{AssemblyConfig, ProjectStore, SegmentCatalog};
use reel_render::{Compositor, FinalizedSequence, PlanWriter, RenderPlan};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "reel")]
#[command(about = "Reel - narration-paced timeline assembly and repair")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to reel.toml in the project directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the timeline, reusing a fresh cache unless forced
    Build {
        /// Project directory
        project: PathBuf,

        /// Rebuild even when a fresh cache exists
        #[arg(long)]
        force: bool,
    },

    /// Validate and fix the status record and every cached sequence
    Repair {
        /// Project directory
        project: PathBuf,
    },

    /// Report problems in the cached sequence without changing it
    Analyze {
        /// Project directory
        project: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Back up and remove every cached sequence
    ClearCache {
        /// Project directory
        project: PathBuf,
    },

    /// Re-scan asset directories and update per-segment status
    RefreshStatus {
        /// Project directory
        project: PathBuf,
    },

    /// Write a frame-accurate render plan for an external encoder
    Plan {
        /// Project directory
        project: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the frames of every still
        #[arg(long)]
        frames: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build { project, force } => {
            let ctx = Project::open(&project, cli.config.as_deref())?;
            build(&ctx, force)?
        }
        Commands::Repair { project } => repair(&Project::open(&project, cli.config.as_deref())?)?,
        Commands::Analyze { project, json } => {
            analyze(&Project::open(&project, cli.config.as_deref())?, json)?
        }
        Commands::ClearCache { project } => {
            clear_cache(&Project::open(&project, cli.config.as_deref())?)?
        }
        Commands::RefreshStatus { project } => {
            refresh_status(&Project::open(&project, cli.config.as_deref())?)?
        }
        Commands::Plan {
            project,
            output,
            frames,
        } => {
            let ctx = Project::open(&project, cli.config.as_deref())?;
            plan(&ctx, &output, frames)?
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let default = format!("reel={level},reel_core={level},reel_assembly={level},reel_render={level},warn");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Everything a command needs for one project
struct Project {
    config: AssemblyConfig,
    store: ProjectStore,
    reconciler: DurationReconciler,
}

impl Project {
    fn open(project: &Path, config_path: Option<&Path>) -> Result<Self> {
        if !project.is_dir() {
            bail!("Project directory not found: {}", project.display());
        }

        let config = match config_path {
            Some(path) => AssemblyConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => AssemblyConfig::load_or_default(project).context("Failed to load reel.toml")?,
        };

        let probe: Box<dyn MediaProbe> = match FfprobeProbe::from_settings(&config.probe) {
            Some(probe) => Box::new(probe),
            None => {
                tracing::warn!("ffprobe not found; narration durations come from the catalog");
                Box::new(NoProbe)
            }
        };
        let locator = NarrationLocator::from_config(project, &config);
        let reconciler = DurationReconciler::new(probe, locator, &config.timeline);
        let store = ProjectStore::from_config(project, &config);

        Ok(Self {
            config,
            store,
            reconciler,
        })
    }

    fn normalizer(&self) -> ImageNormalizer {
        ImageNormalizer::new(self.config.render.clone())
    }

    fn repairer(&self) -> SequenceRepairer<'_> {
        SequenceRepairer::new(&self.reconciler)
    }

    /// The catalog when present; its absence only limits what can be checked
    fn catalog(&self) -> Result<Option<SegmentCatalog>> {
        match self.store.load_catalog() {
            Ok(catalog) => Ok(Some(catalog)),
            Err(reel_core::Error::MissingFile(path)) => {
                tracing::warn!(path = %path.display(), "no segment catalog");
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to load segment catalog"),
        }
    }
}

fn build(ctx: &Project, force: bool) -> Result<()> {
    let resolver = AssetResolver::from_config(ctx.store.root(), &ctx.config);
    let normalizer = ctx.normalizer();
    let built = SequenceBuilder::new(&ctx.reconciler, &normalizer)
        .build_project(&ctx.store, &resolver, force)
        .context("Build failed")?;

    for cache in &built.repair.caches_invalidated {
        println!("Invalidated stale cache: {}", cache.display());
    }
    match &built.build {
        Some(report) => {
            for entry in report.fallbacks() {
                println!("  {}: narration only ({:?})", entry.segment_id, entry.fallback);
            }
            if let Some(expected) = report.expected_total {
                println!("Narration total: {expected:.3}s");
            }
        }
        None => println!("Using cached sequence ({} entries)", built.sequence.len()),
    }
    for backup in &built.repair.backups {
        println!("Backed up previous sequence to {}", backup.display());
    }

    println!(
        "Timeline: {} entries, {:.3}s ({} repairs)",
        built.sequence.len(),
        built.sequence.total_duration(),
        built.repair.total_changes() - built.repair.caches_invalidated.len()
    );
    if built.saved {
        println!("Saved: {}", ctx.store.sequence_path().display());
    } else {
        println!("Cache unchanged: {}", ctx.store.sequence_path().display());
    }
    Ok(())
}

fn repair(ctx: &Project) -> Result<()> {
    let report = ctx
        .repairer()
        .repair_project(&ctx.store)
        .context("Repair failed")?;

    if report.is_clean() {
        println!("Nothing to repair");
        return Ok(());
    }
    println!("Status entries changed: {}", report.status_changes);
    println!("Duplicate boundaries dropped: {}", report.duplicates_dropped);
    println!("Durations fixed: {}", report.durations_fixed);
    println!("Entries retimed: {}", report.entries_retimed);
    println!("Entries downgraded: {}", report.entries_downgraded);
    for cache in &report.caches_invalidated {
        println!("Cache invalidated: {}", cache.display());
    }
    for backup in &report.backups {
        println!("Backup: {}", backup.display());
    }
    if !report.duplicate_interior.is_empty() {
        println!(
            "Segments used more than once: {}",
            report.duplicate_interior.join(", ")
        );
    }
    Ok(())
}

fn analyze(ctx: &Project, json: bool) -> Result<()> {
    let Some(sequence) = ctx
        .store
        .load_sequence()
        .context("Failed to read cached sequence")?
    else {
        bail!("No cached sequence in {}; run `reel build` first", ctx.store.root().display());
    };
    let catalog = ctx.catalog()?;
    let report = ctx.repairer().analyze(&sequence, catalog.as_ref());

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Entries: {}", report.entries);
    println!("  Narration only: {}", report.narration_only);
    println!("  Paired visuals: {} ({} stills)", report.paired, report.stills);
    match (report.expected_total, report.drift) {
        (Some(expected), Some(drift)) => println!(
            "Duration: {:.3}s (narration {expected:.3}s, drift {drift:+.3}s)",
            report.total_duration
        ),
        _ => println!("Duration: {:.3}s", report.total_duration),
    }
    for violation in &report.violations {
        println!("Violation: {violation}");
    }
    for issue in &report.duration_issues {
        println!(
            "Duration mismatch: {} recorded {:.3}s, {} {:.3}s",
            issue.segment_id, issue.recorded, issue.tier, issue.reconciled
        );
    }
    if !report.reused_narration.is_empty() {
        println!("Narration reused: {}", report.reused_narration.join(", "));
    }
    if report.is_clean() {
        println!("No problems found");
    }
    Ok(())
}

fn clear_cache(ctx: &Project) -> Result<()> {
    let caches = ctx.store.existing_caches();
    if caches.is_empty() {
        println!("No cached sequences");
        return Ok(());
    }
    for cache in caches {
        let backup = ctx
            .store
            .remove_with_backup(&cache)
            .with_context(|| format!("Failed to remove {}", cache.display()))?;
        match backup {
            Some(backup) => println!("Removed {} (backup {})", cache.display(), backup.display()),
            None => println!("Removed {}", cache.display()),
        }
    }
    Ok(())
}

fn refresh_status(ctx: &Project) -> Result<()> {
    let mut record = ctx
        .store
        .load_status()
        .context("Failed to load content status")?;
    let resolver = AssetResolver::from_config(ctx.store.root(), &ctx.config);

    let changes = ctx.repairer().refresh_status(&mut record, &resolver);
    if changes == 0 {
        println!("Status is up to date");
        return Ok(());
    }
    ctx.store
        .save_status(&record)
        .context("Failed to save content status")?;
    println!("Updated {changes} status entries");
    Ok(())
}

fn plan(ctx: &Project, output: &Path, frames: bool) -> Result<()> {
    let Some(sequence) = ctx
        .store
        .load_sequence()
        .context("Failed to read cached sequence")?
    else {
        bail!("No cached sequence in {}; run `reel build` first", ctx.store.root().display());
    };
    let expected = ctx.catalog()?.and_then(|c| c.narration_total());

    let finalized = FinalizedSequence::new(sequence, expected, ctx.config.timeline.tolerance_secs)
        .context("Sequence is not ready to render; run `reel repair`")?;
    let plan = RenderPlan::build(
        &finalized,
        ctx.store.root(),
        &ctx.config.render,
        &ctx.normalizer(),
    )
    .context("Failed to build render plan")?;

    let writer = PlanWriter::new().with_frames(frames);
    let written = writer
        .render(&plan, output)
        .with_context(|| format!("Failed to write plan to {}", output.display()))?;

    println!(
        "Plan: {} items, {} frames at {} fps ({:.3}s)",
        plan.items.len(),
        plan.total_frames,
        plan.fps,
        plan.duration_secs()
    );
    println!("Written: {}", written.display());
    Ok(())
}
