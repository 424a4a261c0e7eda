pub mod pacer;
pub mod scheduler;

pub use pacer::OutputPacer;
pub use scheduler::{LatePolicy, OutputMode, OutputScheduler, OutputStats, PlaybackPhase};
