use serde_json::json;
use tracing::warn;

use crate::inference::multipart::{extract_boundary, extract_file};
use crate::inference::service::InferenceService;

/// Status code and JSON body of a classification request.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl EndpointResponse {
    fn detail(status: u16, message: impl Into<String>) -> Self {
        EndpointResponse { status, body: json!({ "detail": message.into() }) }
    }
}

fn is_image_type(content_type: &str) -> bool {
    content_type.trim().to_ascii_lowercase().starts_with("image/")
}

/// Pulls the image bytes out of a request body.
///
/// Accepts a raw `image/*` body or a `multipart/form-data` body whose file
/// part declares an `image/*` type. Anything else is rejected.
fn image_payload(content_type: Option<&str>, body: &[u8]) -> Result<Vec<u8>, String> {
    let content_type = content_type.ok_or("missing Content-Type; upload an image")?;
    if is_image_type(content_type) {
        return Ok(body.to_vec());
    }
    if content_type.to_ascii_lowercase().starts_with("multipart/form-data") {
        let boundary = extract_boundary(content_type).ok_or("multipart body without boundary")?;
        let part = extract_file(body, &boundary).ok_or("no file found in the upload")?;
        return match part.content_type.as_deref() {
            Some(t) if is_image_type(t) => Ok(part.data),
            Some(t) => Err(format!("uploaded file must be an image, got {}", t)),
            None => Err("uploaded file must declare an image content type".to_owned()),
        };
    }
    Err(format!("uploaded file must be an image, got {}", content_type))
}

/// Classification endpoint contract.
///
/// - non-image payload: 400, the model is never consulted
/// - undecodable image: 400
/// - success: 200 with `{"class": .., "confidence": ..}` (the sentinel
///   class when no model is loaded)
/// - any other failure: 500 with a `detail` message
pub fn classify_request(service: &InferenceService, content_type: Option<&str>, body: &[u8]) -> EndpointResponse {
    let bytes = match image_payload(content_type, body) {
        Ok(bytes) => bytes,
        Err(message) => return EndpointResponse::detail(400, message),
    };

    match service.classify(&bytes) {
        Ok(prediction) => EndpointResponse {
            status: 200,
            body: json!({ "class": prediction.class, "confidence": prediction.confidence }),
        },
        Err(e) if e.is_client_error() => EndpointResponse::detail(400, format!("could not read image: {}", e)),
        Err(e) => {
            warn!(error = %e, "classification failed");
            EndpointResponse::detail(500, format!("error processing image: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::taxonomy::FallbackClasses;
    use crate::inference::context::ArtifactPaths;

    fn unloaded() -> InferenceService {
        let dir = tempfile::tempdir().unwrap();
        InferenceService::start(
            ArtifactPaths { model: dir.path().join("m.json"), classes: dir.path().join("c.txt") },
            FallbackClasses::None,
        )
    }

    #[test]
    fn text_upload_is_rejected() {
        let resp = classify_request(&unloaded(), Some("text/plain"), b"hello");
        assert_eq!(resp.status, 400);
        assert!(resp.body["detail"].is_string());
    }

    #[test]
    fn multipart_text_part_is_rejected() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhi\r\n--b--\r\n";
        let resp = classify_request(&unloaded(), Some("multipart/form-data; boundary=b"), body);
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn missing_content_type_is_rejected() {
        assert_eq!(classify_request(&unloaded(), None, b"\x89PNG").status, 400);
    }

    #[test]
    fn broken_image_is_client_error() {
        let resp = classify_request(&unloaded(), Some("image/png"), b"not really a png");
        assert_eq!(resp.status, 400);
    }
}
