pub mod types;
pub mod errors;
pub mod serde_helpers;
pub mod config;
pub mod endpoint;
pub mod devices;
pub mod capture;
#[cfg(test)]
mod capture_test;
pub mod chunker;
#[cfg(test)]
mod chunker_test;
pub mod transport;
pub mod publish;
#[cfg(test)]
mod loopback_test;
pub mod playback;
pub mod mock_ingest;
pub mod app;

pub use types::*;
pub use errors::*;
