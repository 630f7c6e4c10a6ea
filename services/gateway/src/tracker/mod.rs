pub mod connections;
pub mod error;
pub mod lease;

pub use connections::{ActiveStream, ConnectionTracker, DEFAULT_MAX_STREAMS_PER_TENANT};
pub use error::TrackerError;
pub use lease::Lease;
