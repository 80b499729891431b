//! gtp5g Probe - Userspace Program
//!
//! Loads the gtp5g capture programs, attaches kprobes, drains the event
//! ring buffer, and exports a capture report.
//!
//! ## Usage
//!
//! ```bash
//! # Capture for 60 seconds and export to JSON
//! sudo ./gtp5g-probe run --duration 60 --output gtp5g-report.json
//!
//! # Use external eBPF object file
//! sudo ./gtp5g-probe run --ebpf-object target/bpfel-unknown-none/release/gtp5g-probe
//!
//! # Export to Prometheus format
//! sudo ./gtp5g-probe run --duration 60 --format prometheus --output gtp5g.prom
//!
//! # Drive the capture logic from 4 threads without a kernel
//! ./gtp5g-probe simulate --cpus 4 --invocations 100000 --drain
//! ```

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::{Args, Parser, Subcommand};
use gtp5g_common::{constants::RINGBUF_BYTE_SIZE, CallSite};
use gtp5g_probe_userspace::{
    channel::RingChannel,
    collector::EventCollector,
    events::{drain_channel, EventProcessor},
    exporter::ExporterType,
    loader::ProbeLoader,
    simulator::{SimulationConfig, Simulator},
    types::CaptureReport,
};
use log::{info, warn};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    signal,
    sync::{watch, Mutex},
    time::{sleep, Instant},
};

/// Event capture for the gtp5g GTP-U kernel module
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Attach to the running gtp5g module and capture events
    Run(RunArgs),
    /// Run the capture logic on host threads against an in-process ring
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output file for the report
    #[clap(short, long, default_value = "gtp5g-report.json")]
    output: PathBuf,

    /// Output format (json, prometheus)
    #[clap(short, long, default_value = "json")]
    format: String,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Duration to run the probe (in seconds, 0 = infinite)
    #[clap(short, long, default_value_t = 60)]
    duration: u64,

    /// Path to eBPF object file (if not embedded)
    #[clap(long)]
    ebpf_object: Option<PathBuf>,

    /// Progress reporting interval in seconds
    #[clap(long, default_value_t = 10)]
    progress_interval: u64,

    #[clap(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Number of simulated CPUs (one producer thread each)
    #[clap(long, default_value_t = 4)]
    cpus: u32,

    /// Handler invocations per CPU
    #[clap(long, default_value_t = 100_000)]
    invocations: u64,

    /// Ring size in bytes (power of two)
    #[clap(long, default_value_t = RINGBUF_BYTE_SIZE as usize)]
    ring_size: usize,

    /// Drain the ring concurrently with the producers
    #[clap(long)]
    drain: bool,

    #[clap(flatten)]
    output: OutputArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Command::Run(args) => args.output.verbose,
        Command::Simulate(args) => args.output.verbose,
    };

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    print_banner();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Simulate(args) => simulate(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let export_format: ExporterType = args.output.format.parse()?;

    info!("Starting gtp5g probe...");
    info!(
        "   Duration: {} seconds",
        if args.duration == 0 {
            "infinite".to_string()
        } else {
            args.duration.to_string()
        }
    );
    info!("   Output: {:?}", args.output.output);
    info!("   Format: {}", args.output.format);

    // Load eBPF program
    let mut loader = ProbeLoader::load(args.ebpf_object.clone())?;

    // Attach kprobes
    loader.attach_kprobes()?;

    let ring = loader.ring_buffer()?;
    let stats = loader.stats_reader()?;

    info!("Collecting events...");

    let collector = Arc::new(Mutex::new(EventCollector::new()));
    let processor = EventProcessor::new(Arc::clone(&collector), args.output.verbose);

    let (shutdown, shutdown_rx) = watch::channel(false);
    let reader = processor.spawn_ring_reader(ring, shutdown_rx)?;
    let progress = processor.spawn_progress_reporter(args.progress_interval);

    // Run for specified duration or until interrupted
    let start_time = Instant::now();

    if args.duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {
                info!("Duration reached, shutting down...");
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down...");
            }
        }
    } else {
        signal::ctrl_c().await?;
        info!("Interrupted, shutting down...");
    }

    let elapsed = start_time.elapsed().as_secs();
    progress.abort();

    // Freeze the counters and the ring before accounting for them
    if let Err(e) = loader.detach_kprobes() {
        warn!("Could not detach kprobes: {:#}", e);
    }

    let producer = match stats.read() {
        Ok(producer) => Some(producer),
        Err(e) => {
            warn!("Could not read producer counters: {:#}", e);
            None
        }
    };

    // The reader drains what is still buffered before it exits
    let _ = shutdown.send(true);
    reader.await.context("Ring buffer reader panicked")?;

    info!("Generating capture report...");

    let report = collector.lock().await.generate_report(elapsed, producer);
    export_format.build(args.output.output.clone()).export(&report)?;

    info!("Report written to {:?}", args.output.output);

    print_summary(&report);

    Ok(())
}

async fn simulate(args: SimulateArgs) -> Result<()> {
    let export_format: ExporterType = args.output.format.parse()?;
    let simulator = Simulator::new(SimulationConfig {
        cpus: args.cpus,
        invocations: args.invocations,
        call_sites: CallSite::ALL.to_vec(),
    })?;
    let (channel, consumer) = RingChannel::open(args.ring_size)?;

    info!("Starting simulation...");
    info!("   CPUs: {}", args.cpus);
    info!("   Invocations per CPU: {}", args.invocations);
    info!("   Ring size: {} bytes", channel.capacity());
    info!("   Concurrent drain: {}", args.drain);

    let collector = Arc::new(Mutex::new(EventCollector::new()));
    let processor = EventProcessor::new(Arc::clone(&collector), args.output.verbose);
    let stop = Arc::new(AtomicBool::new(false));

    let (reader, idle_consumer) = if args.drain {
        let reader = processor.spawn_channel_reader(consumer, Duration::from_millis(1), Arc::clone(&stop));
        (Some(reader), None)
    } else {
        (None, Some(consumer))
    };

    let start_time = Instant::now();

    let producers = Arc::clone(&channel);
    let outcome = tokio::task::spawn_blocking(move || simulator.run(&*producers))
        .await
        .context("Simulation task failed")??;

    stop.store(true, Ordering::Release);
    if let Some(reader) = reader {
        reader.await.context("Channel reader panicked")?;
    }
    if let Some(mut consumer) = idle_consumer {
        let mut collector = collector.lock().await;
        let mut buf = BytesMut::new();
        drain_channel(&mut consumer, &mut collector, &mut buf, args.output.verbose);
    }

    let elapsed = start_time.elapsed().as_secs();

    info!(
        "Producers finished: {} published, {} dropped",
        outcome.published,
        channel.dropped()
    );

    let report = collector.lock().await.generate_report(elapsed, Some(outcome.producer));
    export_format.build(args.output.output.clone()).export(&report)?;

    info!("Report written to {:?}", args.output.output);

    print_summary(&report);

    Ok(())
}

fn print_banner() {
    println!(
        r#"
╔═══════════════════════════════════════════════════╗
║        gtp5g Probe - GTP-U Event Capture          ║
║          kprobes + lock-free ring buffer          ║
╚═══════════════════════════════════════════════════╝
    "#
    );
}

fn print_summary(report: &CaptureReport) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Total events:       {}", report.total_events);
    info!("  Malformed records:  {}", report.malformed_records);
    info!("  Processes:          {}", report.processes.len());
    info!("  CPUs:               {}", report.cpus.len());
    info!("  Duration:           {} seconds", report.duration_seconds);
    info!("");
    info!("  Call Site Breakdown:");
    for call_site in CallSite::ALL {
        info!(
            "    {:<22} {:>8}",
            call_site.symbol(),
            report.call_sites.get(call_site)
        );
    }
    if let Some(producer) = report.producer {
        info!("");
        info!("  Producer Counters:");
        info!("    handler invocations:  {:>8}", producer.total_hits());
        info!("    dropped (ring full):  {:>8}", producer.dropped_events);
    }
    if let Some(loss) = report.estimated_loss {
        info!("    not received:         {:>8}", loss);
    }
    info!("");
    info!("  Processes:");
    for (tgid, process) in &report.processes {
        info!(
            "    {:>7} {:<16} threads={:<4} events={}",
            tgid, process.comm, process.threads, process.events
        );
    }
    info!("");
    info!("============================================");
}
