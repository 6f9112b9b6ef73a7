//! Shared state for the transport layer.

use std::sync::Arc;

use crate::pipeline::CarePipeline;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The assembled pipeline
    pub pipeline: Arc<CarePipeline>,
}

impl AppState {
    /// Wrap a pipeline for the router.
    pub fn new(pipeline: Arc<CarePipeline>) -> Self {
        Self { pipeline }
    }
}
