use serde_json::{json, Value};

use crate::request::{RequestHandle, RequestPipeline};

/// Application-wide key/value storage.
#[derive(Clone, Debug)]
pub struct KeyValues {
    pipeline: RequestPipeline,
}

impl KeyValues {
    pub(crate) fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    pub fn get(&self, key: &str) -> RequestHandle {
        self.pipeline.get(&format!("key/{key}"), None)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> RequestHandle {
        self.pipeline.post(
            &format!("key/{key}"),
            Some(json!({ "value": value.into() }).into()),
        )
    }
}
