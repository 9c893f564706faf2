//! The sampling loop and attribution engine
//!
//! One tick: clock fires → all target threads stop → each thread's core is
//! looked up → per-core and global counter deltas are read → the models
//! split the global energy planes into per-core shares → each thread folds
//! its core's share into the `(core, instruction pointer)` bucket → the
//! target resumes → the clock rearms.
//!
//! Everything here runs on one thread. The sampler is the sole mutator of
//! the attribution table and the tracked-thread set, so neither needs a
//! lock; the only cross-context state is the clock's atomic flag.

pub mod attribution;
pub mod sampler;

pub use attribution::{AttributionTable, SampleStats};
pub use sampler::{RunOutcome, Sampler, SamplerConfig};
