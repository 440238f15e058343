mod bucket;
mod queue;

pub use bucket::HostRateLimiter;
pub use queue::{EnqueueOutcome, Frontier, FrontierSnapshot};
