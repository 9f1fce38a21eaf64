pub mod admission;
pub mod capability;
pub mod config;
pub mod job;
pub mod orchestrator;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod slots;
pub mod trash;

pub use admission::{AdmissionDecision, AdmissionGate, AllowAll};
pub use capability::{Av1Encoder, EncoderCapabilities};
pub use config::{OutputFormat, OutputMode, ResolutionPreset, Settings, SettingsPatch};
pub use job::{Job, JobStatus};
pub use orchestrator::{BatchSnapshot, CommandError, OrchestratorHandle};
pub use planner::EncodePlan;
pub use runner::FfmpegRunner;
