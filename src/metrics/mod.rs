mod store;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use log::error;

pub use store::MetricsStore;

/// A single event the metrics consumer thread persists. `None` on the
/// channel is the shutdown sentinel (see §4.7/§5): the consumer drains
/// whatever is still queued ahead of it, then closes the store.
#[derive(Debug, Clone)]
pub enum MetricCommand {
    RecordBasecalledRead {
        read_id: String,
        stratum: Option<String>,
        length: u64,
        ts: DateTime<Utc>,
    },
    RecordClassifiedRead {
        read_id: String,
        stratum: Option<String>,
        ts: DateTime<Utc>,
    },
    PrintMessage {
        text: String,
    },
}

impl MetricCommand {
    pub fn basecalled_read(read_id: impl Into<String>, stratum: impl Into<String>, length: u64) -> Self {
        Self::RecordBasecalledRead {
            read_id: read_id.into(),
            stratum: Some(stratum.into()),
            length,
            ts: Utc::now(),
        }
    }

    pub fn classified_read(read_id: impl Into<String>, stratum: Option<String>) -> Self {
        Self::RecordClassifiedRead {
            read_id: read_id.into(),
            stratum,
            ts: Utc::now(),
        }
    }

    pub fn print(text: impl Into<String>) -> Self {
        Self::PrintMessage { text: text.into() }
    }
}

/// Single-consumer, multi-producer handle onto the metrics command bus.
/// Cloning it is cheap (the underlying `crossbeam_channel::Sender` is
/// itself cloneable); every regulator/balancer/read-processor thread holds
/// its own clone.
#[derive(Clone)]
pub struct MetricsBus {
    sender: Sender<Option<MetricCommand>>,
}

impl MetricsBus {
    fn new(sender: Sender<Option<MetricCommand>>) -> Self {
        Self { sender }
    }

    pub fn send(&self, command: MetricCommand) {
        if self.sender.send(Some(command)).is_err() {
            error!("metrics consumer has shut down, dropping command");
        }
    }

    /// Sends the shutdown sentinel. Idempotent: a second call after the
    /// channel has been disconnected is a harmless no-op.
    pub fn shutdown(&self) {
        let _ = self.sender.send(None);
    }
}

/// Spawns the metrics consumer thread against a store rooted at `store_path`
/// and returns a `(bus, join_handle)` pair. The consumer is the sole writer
/// to the store; no external locking is required.
///
/// If the store itself fails to open, the consumer still starts: it drops
/// `RecordBasecalledRead`/`RecordClassifiedRead` commands with a logged
/// warning but keeps forwarding `PrintMessage` to stderr, so the
/// user-visible status stream (warm-up transitions, thinning decisions)
/// survives a broken metrics directory.
pub fn spawn(store_path: &std::path::Path) -> anyhow::Result<(MetricsBus, std::thread::JoinHandle<()>)> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let store = match MetricsStore::open(store_path) {
        Ok(store) => Some(store),
        Err(e) => {
            error!("metrics store failed to open at {store_path:?}: {e}; status messages will still print");
            None
        }
    };
    let handle = std::thread::Builder::new()
        .name("metrics-consumer".to_owned())
        .spawn(move || run_consumer(receiver, store))
        .expect("failed to spawn metrics consumer thread");
    Ok((MetricsBus::new(sender), handle))
}

fn run_consumer(receiver: Receiver<Option<MetricCommand>>, mut store: Option<MetricsStore>) {
    for command in receiver.iter() {
        match command {
            None => break,
            Some(MetricCommand::RecordBasecalledRead {
                read_id,
                stratum,
                length,
                ts,
            }) => match &mut store {
                Some(store) => {
                    if let Err(e) = store.append_basecalled_read(&read_id, stratum.as_deref(), length, ts) {
                        error!("failed to persist basecalled read event: {e}");
                    }
                }
                None => error!("dropping basecalled read event for {read_id}: metrics store unavailable"),
            },
            Some(MetricCommand::RecordClassifiedRead {
                read_id,
                stratum,
                ts,
            }) => match &mut store {
                Some(store) => {
                    if let Err(e) = store.append_classified_read(&read_id, stratum.as_deref(), ts) {
                        error!("failed to persist classified read event: {e}");
                    }
                }
                None => error!("dropping classified read event for {read_id}: metrics store unavailable"),
            },
            Some(MetricCommand::PrintMessage { text }) => {
                eprintln!("{text}");
            }
        }
    }
    if let Some(mut store) = store {
        if let Err(e) = store.close() {
            error!("failed to close metrics store: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_drains_and_closes_on_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, handle) = spawn(dir.path()).unwrap();
        bus.send(MetricCommand::basecalled_read("r1", "genome_a", 1000));
        bus.send(MetricCommand::classified_read("r1", Some("genome_a".to_owned())));
        bus.shutdown();
        handle.join().unwrap();

        let basecalled = std::fs::read_to_string(dir.path().join("basecalled_reads.tsv")).unwrap();
        assert!(basecalled.contains("r1"));
        let classified = std::fs::read_to_string(dir.path().join("classified_reads.tsv")).unwrap();
        assert!(classified.contains("r1"));
    }
}
