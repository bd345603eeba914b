//! HTTP request pipeline: payload encoding, identity headers and response resolution.

mod payload;
mod pipeline;
pub(crate) mod transport;

pub use payload::{FieldValue, Fields, FormData, RequestData, SYNC_FIELD};
pub(crate) use payload::{decode_data_url, encode_uri_component, is_truthy};
pub use pipeline::{
    RequestHandle, RequestPipeline, HEADER_APP_ID, HEADER_APP_KEY, HEADER_AUTH_TOKEN,
    HEADER_ENDPOINT,
};
pub(crate) use pipeline::PipelineConfig;
pub use reqwest::Method;
