use crate::request::{RequestHandle, RequestPipeline};

#[derive(Clone, Debug)]
pub struct System {
    pipeline: RequestPipeline,
}

impl System {
    pub(crate) fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    /// Server clock, as reported by the backend.
    pub fn time(&self) -> RequestHandle {
        self.pipeline.get("system/time", None)
    }
}
