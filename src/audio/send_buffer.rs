//! # Send Buffer
//!
//! Accumulates [`AudioFrame`]s into a send window and flushes the whole window
//! as one outbound message once it holds at least the configured threshold of
//! samples (200 ms by default).
//!
//! ## Flush rules:
//! - The window's sample counter always equals the sum of its frame lengths
//! - A flush only happens when the counter is at or above the threshold
//! - A flush takes every buffered frame; there are no partial flushes
//! - After a flush the window and counter are back to empty

use crate::audio::pcm;
use crate::audio::slicer::AudioFrame;
use crate::protocol::ClientEvent;

/// One flushed send window, ready to go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedWindow {
    /// Number of samples contained in the window.
    pub sample_count: usize,
    /// Base64 of the window's 16-bit little-endian PCM.
    pub audio: String,
}

impl FlushedWindow {
    /// Wrap the payload in an `input_audio_buffer.append` event.
    pub fn into_event(self) -> ClientEvent {
        ClientEvent::InputAudioBufferAppend { audio: self.audio }
    }
}

/// The mutable send window.
#[derive(Debug)]
pub struct SendBuffer {
    frames: Vec<AudioFrame>,
    sample_count: usize,
    threshold: usize,
}

impl SendBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            frames: Vec::new(),
            sample_count: 0,
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append a frame to the window.
    pub fn accept(&mut self, frame: AudioFrame) {
        self.sample_count += frame.len();
        self.frames.push(frame);
    }

    /// Flush the window if it has reached the threshold.
    ///
    /// ## Process:
    /// 1. Concatenate all buffered frames in arrival order
    /// 2. Encode as 16-bit signed little-endian PCM
    /// 3. Base64-encode the bytes
    /// 4. Reset the window and counter to empty
    pub fn maybe_flush(&mut self) -> Option<FlushedWindow> {
        if self.sample_count < self.threshold || self.frames.is_empty() {
            return None;
        }

        let mut combined = Vec::with_capacity(self.sample_count);
        for frame in self.frames.drain(..) {
            combined.extend_from_slice(frame.samples());
        }
        let sample_count = self.sample_count;
        self.sample_count = 0;

        let audio = pcm::encode_base64(&pcm::encode_pcm16(&combined));
        Some(FlushedWindow {
            sample_count,
            audio,
        })
    }

    /// Discard the window without sending it.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.sample_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(len: usize, value: f32) -> AudioFrame {
        AudioFrame::new(vec![value; len])
    }

    fn decode(window: &FlushedWindow) -> Vec<f32> {
        let bytes = pcm::decode_base64(&window.audio).unwrap();
        pcm::decode_pcm16(&bytes).unwrap()
    }

    #[test]
    fn test_three_2000_sample_frames_flush_once() {
        let mut buffer = SendBuffer::new(4800);

        buffer.accept(frame(2000, 0.1));
        assert!(buffer.maybe_flush().is_none());
        buffer.accept(frame(2000, 0.2));
        assert!(buffer.maybe_flush().is_none());
        buffer.accept(frame(2000, 0.3));

        let window = buffer.maybe_flush().expect("window should flush at 6000 samples");
        assert_eq!(window.sample_count, 6000);
        assert!(buffer.is_empty());
        assert_eq!(buffer.sample_count(), 0);
        assert!(buffer.maybe_flush().is_none());
    }

    #[test]
    fn test_counter_matches_frame_lengths() {
        let mut buffer = SendBuffer::new(10_000);
        for len in [17, 4096, 3, 250] {
            buffer.accept(frame(len, 0.0));
        }
        assert_eq!(buffer.sample_count(), 17 + 4096 + 3 + 250);
        assert_eq!(buffer.frame_count(), 4);
    }

    #[test]
    fn test_flush_exactly_at_threshold() {
        let mut buffer = SendBuffer::new(4096);
        buffer.accept(frame(4096, 0.5));
        let window = buffer.maybe_flush().unwrap();
        assert_eq!(window.sample_count, 4096);
    }

    #[test]
    fn test_flushed_windows_concatenate_to_input() {
        let mut buffer = SendBuffer::new(4800);
        let mut input = Vec::new();
        let mut output = Vec::new();

        for i in 0..20 {
            let samples: Vec<f32> = (0..1000).map(|j| ((i * 1000 + j) % 200) as f32 / 400.0).collect();
            input.extend_from_slice(&samples);
            buffer.accept(AudioFrame::new(samples));
            if let Some(window) = buffer.maybe_flush() {
                assert!(window.sample_count >= buffer.threshold());
                output.extend(decode(&window));
            }
        }

        // 20 frames of 1000 → four flushes of 5000; nothing left over.
        assert_eq!(output.len(), input.len());
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() <= 1.0 / pcm::PCM16_SCALE);
        }
    }

    #[test]
    fn test_event_shape() {
        let mut buffer = SendBuffer::new(1);
        buffer.accept(frame(2, 0.0));
        let event = buffer.maybe_flush().unwrap().into_event();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAAAAA==");
    }
}
