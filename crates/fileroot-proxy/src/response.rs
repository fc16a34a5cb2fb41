//! Response model and wire encoding

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "File Not Found",
            Status::InternalServerError => "Internal Server Error",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// A complete response, written once and then the connection closes
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            content_type: content_type.into(),
            body,
        }
    }

    pub fn html(body: String) -> Self {
        Self::ok(HTML_CONTENT_TYPE, body.into_bytes())
    }

    /// An HTML error page embedding the numeric status
    pub fn error(status: Status) -> Self {
        let body = format!(
            "<html><body><h1>{} - {}</h1></body></html>",
            status.code(),
            status.reason()
        );
        Self {
            status,
            content_type: HTML_CONTENT_TYPE.to_string(),
            body: body.into_bytes(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = String::new();
        let _ = write!(
            head,
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status.code(),
            self.status.reason(),
            self.content_type,
            self.body.len()
        );

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_page_embeds_code() {
        let response = Response::error(Status::NotFound);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("404"));
        assert!(body.contains("File Not Found"));
        assert_eq!(response.content_type, HTML_CONTENT_TYPE);
    }

    #[test]
    fn test_wire_format() {
        let response = Response::ok("text/css", b"a{}".to_vec());
        let wire = String::from_utf8(response.to_bytes()).unwrap();
        assert_eq!(
            wire,
            "HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 3\r\nConnection: close\r\n\r\na{}"
        );
    }

    #[test]
    fn test_binary_body_is_preserved() {
        let body = vec![0u8, 159, 146, 150];
        let wire = Response::ok("image/png", body.clone()).to_bytes();
        assert!(wire.ends_with(&body));
    }
}
