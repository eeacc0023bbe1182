pub mod basecall_adapter;
pub mod classifier;
pub mod config;
pub mod errs;
pub mod estimator;
pub mod fastq_watcher;
pub mod fragment_collection;
pub mod live_client;
pub mod logging;
pub mod metrics;
pub mod nanopore_read;
pub mod read_processor;
pub mod regulator;
pub mod simulation;
pub mod strata;
