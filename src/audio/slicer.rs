//! # Frame Slicer
//!
//! Turns the capture device's small, irregular callbacks (typically 3-10 ms
//! of audio each) into fixed-size [`AudioFrame`]s.
//!
//! ## Behavior:
//! - Samples are written into a fixed-capacity buffer at a running index
//! - When the buffer fills, it is emitted as one frame and the index resets
//! - A partial frame is never emitted; leftover samples wait for the next push
//!
//! The slicer runs in the capture context and never blocks: emitted frames are
//! handed off through an unbounded channel by the caller.

use std::sync::Arc;

/// A fixed-length block of normalized samples.
///
/// Frames are immutable once produced. The samples live behind an `Arc` so
/// handing a frame between tasks never copies audio data.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Accumulates device callbacks into fixed-size frames.
#[derive(Debug)]
pub struct FrameSlicer {
    buffer: Vec<f32>,
    index: usize,
}

impl FrameSlicer {
    /// Create a slicer emitting frames of `frame_size` samples.
    ///
    /// A `frame_size` of zero is bumped to one; configuration validation
    /// rejects it before it gets here.
    pub fn new(frame_size: usize) -> Self {
        Self {
            buffer: vec![0.0; frame_size.max(1)],
            index: 0,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.buffer.len()
    }

    /// Samples written since the last emitted frame.
    pub fn pending(&self) -> usize {
        self.index
    }

    /// Feed one device callback's worth of samples.
    ///
    /// ## Returns:
    /// Every frame completed by this push, in order. Usually zero or one, but a
    /// callback larger than the frame size can complete several.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut remaining = samples;

        while !remaining.is_empty() {
            let space = self.buffer.len() - self.index;
            let take = space.min(remaining.len());
            self.buffer[self.index..self.index + take].copy_from_slice(&remaining[..take]);
            self.index += take;
            remaining = &remaining[take..];

            if self.index == self.buffer.len() {
                frames.push(AudioFrame::new(self.buffer.clone()));
                self.index = 0;
            }
        }

        frames
    }

    /// Drop any partially filled frame.
    pub fn reset(&mut self) {
        self.index = 0;
    }
}
