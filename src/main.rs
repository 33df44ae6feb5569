//! Mosaic Assembler - stitches transformed tiles into mosaics and
//! reconstructs volumes from registered slices.
//!
//! This binary wires the CLI to the library pipelines: it builds the compute
//! pool and the I/O runtime, installs a Ctrl-C handler that cancels the run
//! cleanly, and drives the pipeline from the main thread.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mosaic_assembler::{
    build_compute_pool, load_stos_files, CancelFlag, Cli, Command, FsRasterStore,
    MosaicConfig, MosaicDescriptor, MosaicPipeline, PipelineError, RunReport, VolumeConfig,
    VolumePipeline,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Mosaic(config) => run_mosaic(config),
        Command::Volume(config) => run_volume(config),
    }
}

// =============================================================================
// Shared Setup
// =============================================================================

/// Runtime resources for one run.
struct Executors {
    runtime: tokio::runtime::Runtime,
    pool: Arc<rayon::ThreadPool>,
    cancel: CancelFlag,
}

fn build_executors(threads: usize, io_workers: usize) -> Result<Executors, PipelineError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(io_workers.clamp(1, 4))
        .max_blocking_threads(io_workers.max(1))
        .thread_name("mosaic-io")
        .enable_all()
        .build()
        .map_err(|e| PipelineError::Configuration(format!("failed to build I/O runtime: {e}")))?;
    let pool = build_compute_pool(threads)?;

    let cancel = CancelFlag::new();
    let signal = cancel.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work and stopping");
            signal.cancel();
        }
    });

    Ok(Executors {
        runtime,
        pool,
        cancel,
    })
}

fn finish(result: Result<RunReport, PipelineError>) -> ExitCode {
    match result {
        Ok(report) => {
            report.log_summary();
            if report.is_degraded() {
                warn!("Run completed with missing inputs");
            }
            ExitCode::SUCCESS
        }
        Err(PipelineError::SaveFailure { failures }) => {
            error!("{} output image(s) failed to save:", failures.len());
            for failure in &failures {
                error!("  {}: {}", failure.path.display(), failure.message);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Mosaic Command
// =============================================================================

fn run_mosaic(config: MosaicConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let options = config.to_options();

    info!("Configuration:");
    info!("  Descriptor: {}", config.descriptor.display());
    info!("  Output: {}", options.output.display());
    match options.tile_size {
        Some((w, h)) => info!("  Tiling: {} x {} px", w, h),
        None => info!("  Tiling: off"),
    }
    info!(
        "  Loading: {}",
        if options.deferred { "deferred" } else { "resident" }
    );
    info!("  Feathering: {}", options.feathering);
    if let Some(limit) = options.max_resident {
        info!("  Resident ceiling: {} tile(s)", limit);
    }

    let descriptor = match MosaicDescriptor::load(&config.descriptor) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let executors = match build_executors(options.threads, options.io_workers) {
        Ok(executors) => executors,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let pipeline = MosaicPipeline::new(
        Arc::new(FsRasterStore::new()),
        executors.pool,
        executors.runtime.handle().clone(),
    )
    .with_cancel_flag(executors.cancel);

    finish(pipeline.run(&descriptor, &options))
}

// =============================================================================
// Volume Command
// =============================================================================

fn run_volume(config: VolumeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let options = config.to_options();

    info!("Configuration:");
    info!("  Stos files: {}", config.stos.len());
    info!("  Output directory: {}", options.output_dir.display());
    if let Some(dir) = &options.slice_dir {
        info!("  Slice directory: {}", dir.display());
    }
    for (slice, dir) in &options.slice_overrides {
        info!("    {} -> {}", slice, dir.display());
    }
    info!(
        "  Transforms: {}",
        if options.cascade { "cascaded to root" } else { "adjacent only" }
    );

    let records = match load_stos_files(&config.stos) {
        Ok(records) => records,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let executors = match build_executors(options.threads, options.io_workers) {
        Ok(executors) => executors,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let pipeline = VolumePipeline::new(
        Arc::new(FsRasterStore::new()),
        executors.pool,
        executors.runtime.handle().clone(),
    )
    .with_cancel_flag(executors.cancel);

    finish(pipeline.run(records, &options))
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "mosaic_assembler=debug"
    } else {
        "mosaic_assembler=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
