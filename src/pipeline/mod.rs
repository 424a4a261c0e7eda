pub mod ringbuf;

pub use ringbuf::FrameRing;
