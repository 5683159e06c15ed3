//! Domain types for the tubescribe pipeline.
//!
//! This module contains the core data structures:
//! - Item: Discovered work items and their lifecycle state
//! - Transcript: Transcription results (segments, speakers, confidence)
//! - Events: Immutable journal records of pipeline activity

pub mod events;
pub mod item;
pub mod transcript;

// Re-export commonly used types
pub use events::{EventType, PipelineEvent};
pub use item::{ItemState, NewItem, WorkItem};
pub use transcript::{Segment, SpeakerInfo, TransformResult, Word};
