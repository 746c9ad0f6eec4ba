pub mod backoff;
pub mod directory;
pub mod events;
pub mod master_version;
pub mod queue;
pub mod runner;
pub mod store;
pub mod transport;
pub mod upload;
