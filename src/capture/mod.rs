pub mod frame;
pub mod ingest;
pub mod pacer;

pub use frame::FrameBuffer;
pub use ingest::{IngestQueue, IngestStats, OldestFrame};
pub use pacer::{Field, IngestPacer};
