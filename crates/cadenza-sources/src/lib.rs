//! Track-source resolution for Cadenza: classify a user-supplied audio
//! reference as directly playable or extraction-required, run the
//! extraction pipeline when needed, and report correlated progress.

pub mod progress;
pub mod resolver;

pub use progress::{ProgressEvent, ProgressSink, ProgressStage, ProgressTracker, ProgressView};
pub use resolver::{needs_extraction, ResolvedTrackSource, SourceType, TrackSourceResolver};
