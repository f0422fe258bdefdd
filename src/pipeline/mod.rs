//! Per-delivery processing pipeline.

mod orchestrator;

pub use orchestrator::{Orchestrator, PipelineFailure, Stage};
