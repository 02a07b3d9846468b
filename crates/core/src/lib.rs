//! Core library for the Muse visualiser.
//!
//! Each module owns one subsystem: the reactivity path (band isolation,
//! envelope, visual bindings) that runs once per display refresh, and the
//! export path (capture scheduling, still capture, the `ffmpeg` bridge) that
//! turns a played-back track into a video file. Hosts drive everything from
//! a single tick loop; nothing here spawns its own timers.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod envelope;
pub mod error;
pub mod export;
pub mod isolate;
pub mod mapping;
pub mod record;
pub mod render;
pub mod scene;
pub mod timeline;

pub use analysis::SpectrumAnalyzer;
pub use audio::{PlaybackTransport, Track, Transport};
pub use config::{AnalyzerConfig, AppConfig, ExportSettings, ReactivitySettings};
pub use envelope::EnvelopeState;
pub use error::{MuseError, Result};
pub use export::{ExportOrchestrator, ExportOutcome, ExportSession, ExportStatus};
pub use isolate::{FrequencyBand, FrequencySnapshot};
pub use mapping::{reactivity_value, MappingMatrix, ParameterUpdate, ReactivityChannel};
pub use record::{ContainerFormat, EncodedFrame, FrameSink, MemorySink, Recorder, RecordingSettings};
pub use render::{FrameSource, PulseRenderer, StillFormat};
pub use scene::{SceneInstance, SceneReadout};
pub use timeline::{CapturePhase, CaptureScheduler, StopReason};
