use std::io::{Cursor, Read};
use std::sync::Arc;

use serde_json::json;
use tiny_http::{Header, Method, Request, Response, StatusCode};
use tracing::{debug, warn};

use ferrite_food::inference::{classify_request, InferenceService, ServiceStatus};

/// Uploads larger than this are rejected before classification.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

pub fn json_response(status: u16, body: &serde_json::Value) -> Response<Cursor<Vec<u8>>> {
    let bytes = body.to_string().into_bytes();
    let len = bytes.len();
    Response::new(
        StatusCode(status),
        Header::from_bytes(b"Content-Type", b"application/json").into_iter().collect(),
        Cursor::new(bytes),
        Some(len),
        None,
    )
}

pub fn not_found() -> Response<Cursor<Vec<u8>>> {
    json_response(404, &json!({ "detail": "not found" }))
}

fn status_body(status: &ServiceStatus) -> serde_json::Value {
    serde_json::to_value(status).unwrap_or_else(|_| json!({ "status": "unknown" }))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_predict(request: &mut Request, service: &InferenceService) -> Response<Cursor<Vec<u8>>> {
    let content_type = request.headers().iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_owned());

    let mut body = Vec::new();
    let mut reader = request.as_reader().take(MAX_BODY_BYTES as u64 + 1);
    if let Err(e) = reader.read_to_end(&mut body) {
        warn!(error = %e, "failed to read request body");
        return json_response(400, &json!({ "detail": "could not read request body" }));
    }
    if body.len() > MAX_BODY_BYTES {
        return json_response(413, &json!({ "detail": "upload too large" }));
    }

    let response = classify_request(service, content_type.as_deref(), &body);
    json_response(response.status, &response.body)
}

fn handle_health(service: &InferenceService) -> Response<Cursor<Vec<u8>>> {
    let mut body = status_body(&service.status());
    if let Some(map) = body.as_object_mut() {
        map.insert("pretrained_backbone".into(), json!(service.backbone_pretrained()));
    }
    json_response(200, &body)
}

fn handle_reload(service: &InferenceService) -> Response<Cursor<Vec<u8>>> {
    let status = service.reload();
    let code = if matches!(status, ServiceStatus::Unavailable(_)) { 503 } else { 200 };
    json_response(code, &status_body(&status))
}

// ---------------------------------------------------------------------------
// Request dispatcher
// ---------------------------------------------------------------------------

/// Dispatches incoming requests to the appropriate handler.
pub fn dispatch(mut request: Request, service: Arc<InferenceService>) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    let path = url.split('?').next().unwrap_or("").trim_end_matches('/');
    debug!(method = %method, path, "request");

    let response = match (method, path) {
        (Method::Post, "/predict")  => handle_predict(&mut request, &service),
        (Method::Get,  "/health")   => handle_health(&service),
        (Method::Post, "/reload")   => handle_reload(&service),
        _ => not_found(),
    };

    if let Err(e) = request.respond(response) {
        warn!(error = %e, "failed to send response");
    }
}
