//! Camera snapshot sampling
//!
//! A [`FrameSource`] yields the latest still frame (if any); the
//! [`VideoSampler`] polls it on a fixed cadence, JPEG-encodes what it gets
//! and hands the packet to a [`VideoSink`].

pub mod sampler;
pub mod source;

pub use sampler::{VideoSampler, VideoSink, VideoStats};
pub use source::{FrameSource, SnapshotFileSource};
