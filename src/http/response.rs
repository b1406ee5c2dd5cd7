use std::collections::HashMap;

/// Status codes of responses the proxy generates itself.
///
/// Backend responses are relayed byte-for-byte and never pass through this type.
/// - `BadRequest` (400): Malformed inbound request
/// - `PayloadTooLarge` (413): Declared request body over the buffering limit
/// - `TooManyRequests` (429): Client exceeded its rate limit
/// - `NotImplemented` (501): Request framing the proxy cannot forward
/// - `BadGateway` (502): Backend could not be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 400 Bad Request
    BadRequest,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 429 Too Many Requests
    TooManyRequests,
    /// 501 Not Implemented
    NotImplemented,
    /// 502 Bad Gateway
    BadGateway,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use gatehouse::http::response::StatusCode;
    /// assert_eq!(StatusCode::TooManyRequests.as_u16(), 429);
    /// assert_eq!(StatusCode::BadGateway.as_u16(), 502);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::BadRequest => 400,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::TooManyRequests => 429,
            StatusCode::NotImplemented => 501,
            StatusCode::BadGateway => 502,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::BadRequest => "Bad Request",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::TooManyRequests => "Too Many Requests",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::BadGateway => "Bad Gateway",
        }
    }
}

/// A locally generated HTTP response ready to be sent to a client.
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// HTTP headers as key-value pairs
    pub headers: HashMap<String, String>,
    /// Response body as bytes
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::TooManyRequests)
///     .header("Content-Type", "text/plain; charset=utf-8")
///     .body(b"rate limit exceeded".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Builds the final Response.
    ///
    /// Adds a Content-Length header matching the body if one is not present.
    pub fn build(mut self) -> Response {
        self.headers
            .entry("Content-Length".to_string())
            .or_insert_with(|| self.body.len().to_string());

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Plain-text error response with the given status and message.
    pub fn error(status: StatusCode, message: &str) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("X-Content-Type-Options", "nosniff")
            .body(message.as_bytes().to_vec())
            .build()
    }

    /// 429 returned when a client is over its quota or cannot be identified.
    pub fn rate_limited() -> Self {
        Self::error(StatusCode::TooManyRequests, crate::proxy::RATE_LIMIT_MESSAGE)
    }

    /// 502 returned when the selected backend could not be relayed. The body is empty.
    pub fn bad_gateway() -> Self {
        ResponseBuilder::new(StatusCode::BadGateway).build()
    }

    pub fn bad_request() -> Self {
        Self::error(StatusCode::BadRequest, "bad request")
    }

    pub fn payload_too_large() -> Self {
        Self::error(StatusCode::PayloadTooLarge, "request body too large")
    }

    pub fn not_implemented() -> Self {
        Self::error(StatusCode::NotImplemented, "not implemented")
    }

    /// Marks the response as the last one on its connection.
    pub fn closing(mut self) -> Self {
        self.headers.insert("Connection".to_string(), "close".to_string());
        self
    }
}
