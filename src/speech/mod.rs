//! Spoken playback of prayers.
//!
//! Components:
//! - `segment`: sentence segmentation with byte offsets for highlighting
//! - `capability`: the synthesizer trait and voice selection helpers
//! - `sequencer`: segment-by-segment playback with pause/stop and recovery
//! - `espeak`: espeak-ng + rodio implementation of the capability

pub mod capability;
pub mod espeak;
pub mod segment;
pub mod sequencer;
