use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use log::{error, info};

use strata_sampler::basecall_adapter::BasecallAdapter;
use strata_sampler::classifier;
use strata_sampler::config::ExperimentConfig;
use strata_sampler::fragment_collection::FragmentCollection;
use strata_sampler::live_client::LiveReadsClient;
use strata_sampler::logging;
use strata_sampler::metrics;
use strata_sampler::read_processor::ReadProcessor;
use strata_sampler::regulator::ReadUntilRegulator;
use strata_sampler::simulation::{FakeProtocolService, SimulatedBasecallSubmitter, SimulatedLiveReadsClient};
use strata_sampler::strata::StrataBalancer;

/// Dynamic adaptive sampling regulator for a nanopore sequencer: classifies
/// reads into reference-genome strata in real time and ejects
/// overrepresented ones to converge on a target yield ratio.
#[derive(Debug, Parser)]
#[command(name = "strata-sampler", version, about)]
struct Cli {
    /// Path to the experiment TOML config.
    #[arg(long)]
    config: PathBuf,

    /// Bypass the live sequencer and replay FASTQ files from this directory
    /// instead, at a fixed 4 kHz sample rate.
    #[arg(long)]
    simulated_dir: Option<PathBuf>,

    /// Optional log file; stderr logging always happens regardless.
    #[arg(long)]
    log_filepath: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _logging_handle = logging::init_logging(cli.log_filepath.as_ref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal startup error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ExperimentConfig::load(&cli.config)?;

    let reference_sequences: Vec<(String, PathBuf)> = config
        .reference_sequences
        .iter()
        .map(|rs| (rs.path.to_string_lossy().into_owned(), rs.path.clone()))
        .collect();

    let classifier = classifier::build_classifier(&config.read_until.classifier, &reference_sequences)?;
    let alignment_classifier =
        classifier::build_always_on_classifier(&config.read_until.classifier, &reference_sequences)?;

    let (metrics_bus, metrics_handle) = metrics::spawn(&config.metrics_store)?;

    let stratum_keys = config.stratum_keys();
    let target_ratios: Vec<(String, u32)> = config
        .reference_sequences
        .iter()
        .map(|rs| (rs.path.to_string_lossy().into_owned(), rs.expected_ratio))
        .collect();

    let balancer = Arc::new(StrataBalancer::new(
        &stratum_keys,
        target_ratios,
        config.minimum_fragments_for_ratio_estimation,
        config.minimum_mapped_bases,
        config.minimum_reads_for_parameter_estimation,
        config.thinning_accelerator,
        alignment_classifier,
        classifier,
        metrics_bus.clone(),
    ));

    let fragments = Arc::new(FragmentCollection::new());
    let processor = Arc::new(ReadProcessor::new(
        config.read_processor.batch_size,
        config.read_processor.target_base_count,
        fragments.clone(),
    ));

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    {
        let shutdown_requested = shutdown_requested.clone();
        ctrlc::set_handler(move || {
            shutdown_requested.store(true, Ordering::SeqCst);
        })?;
    }

    let Some(simulated_dir) = &cli.simulated_dir else {
        // The real MinKNOW `read_until`/protocol gRPC client is an
        // external collaborator this crate only defines a contract
        // for (`live_client::LiveReadsClient`); wiring a concrete
        // implementation requires the vendor's generated client,
        // which is out of scope here. Run with --simulated-dir until
        // one is plugged in.
        anyhow::bail!(
            "no live sequencer client is wired up in this build; pass --simulated-dir to run in observation-only mode"
        );
    };
    let watch_dir = FakeProtocolService::new(simulated_dir.clone()).get_run_info().output_path;

    let watcher = strata_sampler::fastq_watcher::FastqWatcher::new(watch_dir.clone());
    let (watcher_shutdown_tx, watcher_shutdown_rx) = std::sync::mpsc::channel();

    let watcher_processor = processor.clone();
    let watcher_handle = std::thread::Builder::new()
        .name("fastq-watcher".to_owned())
        .spawn(move || watcher.run(&watcher_processor, &watcher_shutdown_rx))?;

    let processor_handle = {
        let processor = processor.clone();
        let balancer = balancer.clone();
        std::thread::Builder::new()
            .name("read-processor".to_owned())
            .spawn(move || processor.run(&balancer))?
    };

    let regulator_handle = {
        let balancer = balancer.clone();
        let fragments = fragments.clone();
        let metrics_bus = metrics_bus.clone();
        let shutdown_requested = shutdown_requested.clone();
        let depletion_chunks = config.read_until.depletion_chunks as u32;
        let throttle = config.read_until.throttle;
        let basecaller_config = config.read_until.basecaller.clone();
        let simulated_dir = watch_dir.clone();
        std::thread::Builder::new()
            .name("regulator".to_owned())
            .spawn(move || {
                let mut live_client = SimulatedLiveReadsClient::new(&simulated_dir, shutdown_requested);
                let mut submitter = SimulatedBasecallSubmitter::new();
                let adapter = BasecallAdapter::new(&basecaller_config, live_client.sample_rate(), throttle);
                let mut regulator =
                    ReadUntilRegulator::new(balancer, fragments, metrics_bus, depletion_chunks, throttle);
                regulator.run(&mut live_client, &mut submitter, &adapter, 4096);
            })?
    };

    info!("simulated-dir mode: replaying reads from {:?} against the regulator", cli.simulated_dir);
    while !shutdown_requested.load(Ordering::SeqCst) && !regulator_handle.is_finished() {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    shutdown_requested.store(true, Ordering::SeqCst);

    let _ = watcher_shutdown_tx.send(());
    let _ = watcher_handle.join();
    processor.quit();
    let _ = processor_handle.join();
    let _ = regulator_handle.join();
    metrics_bus.shutdown();
    let _ = metrics_handle.join();

    Ok(())
}
