//! Capture output to delivered artifacts

mod artifact;
mod orchestrator;

pub use artifact::{Artifact, ArtifactRole, ArtifactSink, DirectorySink, StoredArtifact};
pub use orchestrator::{DeliveryReport, DeliveryRequest, PipelineDefaults, PipelineOrchestrator};
