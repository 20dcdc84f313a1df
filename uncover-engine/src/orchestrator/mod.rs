//! Run orchestration: concurrent fan-out of queries to agents, fan-in of
//! their result streams, and duplicate suppression for the output path.

pub mod dedup;
pub mod service;

pub use dedup::{DedupCache, Fingerprint};
pub use service::Service;
