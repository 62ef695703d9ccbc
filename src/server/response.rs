use may_minihttp::Response;

use crate::dispatcher::{HandlerResponse, ResponseBody};

pub(crate) fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

// may_minihttp accepts &'static str headers only; the common cases avoid
// leaking a per-request allocation.
fn static_header(name: &str, value: &str) -> Option<&'static str> {
    match (name, value) {
        ("content-type", "application/json") => Some("Content-Type: application/json"),
        ("content-type", "text/html; charset=utf-8") => {
            Some("Content-Type: text/html; charset=utf-8")
        }
        ("content-type", "text/plain") => Some("Content-Type: text/plain"),
        ("content-type", "text/css") => Some("Content-Type: text/css"),
        ("content-type", "application/javascript") => {
            Some("Content-Type: application/javascript")
        }
        _ => None,
    }
}

/// Write a dispatcher response onto the wire.
pub fn write_handler_response(res: &mut Response, hr: HandlerResponse) {
    res.status_code(hr.status as usize, status_reason(hr.status));
    for (name, value) in &hr.headers {
        match static_header(name, value) {
            Some(header) => {
                res.header(header);
            }
            None => {
                let header = format!("{name}: {value}").into_boxed_str();
                res.header(Box::leak(header));
            }
        }
    }
    match hr.body {
        ResponseBody::Json(value) => match serde_json::to_vec(&value) {
            Ok(bytes) => {
                res.body_vec(bytes);
            }
            Err(_) => {
                res.status_code(500, status_reason(500));
                res.body_vec(b"{\"error\":\"serialization failed\"}".to_vec());
            }
        },
        ResponseBody::Html(s) => {
            res.body_vec(s.into_bytes());
        }
        ResponseBody::Bytes(bytes) => {
            res.body_vec(bytes);
        }
        ResponseBody::Empty => {}
    }
}
