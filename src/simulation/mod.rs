mod fake_protocol;
mod simulated_client;

pub use fake_protocol::FakeProtocolService;
pub use simulated_client::{SimulatedBasecallSubmitter, SimulatedLiveReadsClient};
