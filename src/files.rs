use crate::error::invalid_argument;
use crate::request::{decode_data_url, FieldValue, FormData, RequestHandle, RequestPipeline};

const FILES_SEGMENT: &str = "files";
const DEFAULT_FILE_NAME: &str = "dlApiFile";

/// Stored file uploads.
#[derive(Clone, Debug)]
pub struct Files {
    pipeline: RequestPipeline,
}

impl Files {
    pub(crate) fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    /// Uploads a file, blob or canvas as the `file` part of a multipart form.
    ///
    /// `file_name` wins over the name carried by a [`FieldValue::File`]; without either the
    /// part is named `dlApiFile`. Plain JSON values are rejected.
    pub fn upload(&self, data: FieldValue, file_name: Option<&str>) -> RequestHandle {
        let (bytes, own_name, content_type) = match data {
            FieldValue::File {
                bytes,
                file_name,
                content_type,
            } => (bytes, Some(file_name), content_type),
            FieldValue::Blob {
                bytes,
                content_type,
            } => (bytes, None, content_type),
            FieldValue::Canvas(data_url) => match decode_data_url(&data_url) {
                Ok((content_type, bytes)) => (bytes, None, Some(content_type)),
                Err(err) => return RequestHandle::ready(Err(err)),
            },
            FieldValue::Json(_) => {
                return RequestHandle::ready(Err(invalid_argument(
                    "uploads need a file, blob or canvas value",
                )))
            }
        };

        let name = file_name
            .map(str::to_string)
            .or(own_name)
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
        let form = FormData::new().file("file", bytes, name, content_type);
        self.pipeline.post(FILES_SEGMENT, Some(form.into()))
    }

    pub fn get(&self, id: &str) -> RequestHandle {
        self.pipeline.get(&format!("{FILES_SEGMENT}/{id}"), None)
    }

    pub fn remove(&self, id: &str) -> RequestHandle {
        self.pipeline.remove(&format!("{FILES_SEGMENT}/{id}"), None)
    }
}

#[cfg(test)]
mod tests {
    use crate::request::FieldValue;
    use crate::test_support::{start_mock_server, test_client};
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_sends_multipart_file_part() {
        let server = start_mock_server();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/files")
                .header_exists("content-type")
                .body_contains("name=\"file\"; filename=\"dlApiFile\"")
                .body_contains("Content-Type: image/png")
                .body_contains("PNGDATA");
            then.status(200).json_body(json!({"_id": 5, "path": "files/5.png"}));
        });

        let client = test_client(&server);
        let uploaded = client
            .files()
            .upload(FieldValue::blob(b"PNGDATA".to_vec(), "image/png"), None)
            .await
            .unwrap();

        mock.assert();
        assert_eq!(uploaded["_id"], json!(5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_decodes_canvas_data_url() {
        let server = start_mock_server();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/files")
                .body_contains("name=\"file\"; filename=\"avatar.png\"")
                .body_contains("Content-Type: image/png\r\n\r\nhello");
            then.status(200).json_body(json!({"_id": 6}));
        });

        let client = test_client(&server);
        let uploaded = client
            .files()
            .upload(
                FieldValue::canvas("data:image/png;base64,aGVsbG8="),
                Some("avatar.png"),
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(uploaded["_id"], json!(6));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_rejects_plain_values_before_sending() {
        let server = start_mock_server();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/files");
            then.status(200).json_body(json!({"_id": 7}));
        });

        let client = test_client(&server);
        let err = client
            .files()
            .upload(FieldValue::from("not a file"), None)
            .await
            .unwrap_err();

        assert_eq!(err.code_str(), "dl-api/invalid-argument");
        mock.assert_hits(0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_and_remove_address_file_by_id() {
        let server = start_mock_server();
        let get = server.mock(|when, then| {
            when.method(GET).path("/files/5");
            then.status(200).json_body(json!({"_id": 5}));
        });
        let remove = server.mock(|when, then| {
            when.method(DELETE).path("/files/5");
            then.status(200).json_body(json!({"success": true}));
        });

        let client = test_client(&server);
        client.files().get("5").await.unwrap();
        client.files().remove("5").await.unwrap();

        get.assert();
        remove.assert();
    }
}
