use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub const REQUEST_ERROR_TOTAL: &str = "import.request_error_total";
pub const RESPONSE_DURATION_NS: &str = "import.response_duration_ns";

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("invalid deflate stream: {0}")]
    CompressionError(String),
    /// Carries the raw header token, which is also the response body.
    #[error("{0}")]
    UnsupportedEncoding(String),
    #[error("failed to decode request: {0}")]
    RequestParsingError(#[from] serde_json::Error),

    #[error("timed out while reading request body")]
    BodyReadTimeout,
    #[error("failed to read request body: {0}")]
    BodyReadError(String),
    #[error("request body is larger than {0} bytes")]
    PayloadTooLarge(usize),

    #[error("import queue is full, please retry")]
    QueueFull,
    #[error("server is shutting down, please retry")]
    ShuttingDown,
}

impl ImportError {
    /// Value of the `cause` tag on `import.request_error_total`.
    pub fn cause(&self) -> &'static str {
        match self {
            ImportError::CompressionError(_) => "deflate",
            ImportError::UnsupportedEncoding(_) => "unknown_content_encoding",
            ImportError::RequestParsingError(_) => "json",
            ImportError::BodyReadTimeout => "timeout",
            ImportError::BodyReadError(_) | ImportError::PayloadTooLarge(_) => "body",
            ImportError::QueueFull => "queue_full",
            ImportError::ShuttingDown => "shutting_down",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ImportError::CompressionError(_)
            | ImportError::RequestParsingError(_)
            | ImportError::BodyReadError(_) => StatusCode::BAD_REQUEST,

            ImportError::UnsupportedEncoding(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ImportError::BodyReadTimeout => StatusCode::REQUEST_TIMEOUT,
            ImportError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,

            ImportError::QueueFull | ImportError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ImportError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn unsupported_encoding_body_is_the_raw_token() {
        let response = ImportError::UnsupportedEncoding("gzip".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"gzip");
    }

    #[test]
    fn client_faults_map_to_their_cause() {
        let parse_error = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let cases = [
            (
                ImportError::CompressionError("zlib: invalid header".to_string()),
                StatusCode::BAD_REQUEST,
                "deflate",
            ),
            (
                ImportError::UnsupportedEncoding("br".to_string()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unknown_content_encoding",
            ),
            (
                ImportError::RequestParsingError(parse_error),
                StatusCode::BAD_REQUEST,
                "json",
            ),
            (
                ImportError::BodyReadTimeout,
                StatusCode::REQUEST_TIMEOUT,
                "timeout",
            ),
            (
                ImportError::PayloadTooLarge(10),
                StatusCode::PAYLOAD_TOO_LARGE,
                "body",
            ),
            (
                ImportError::QueueFull,
                StatusCode::SERVICE_UNAVAILABLE,
                "queue_full",
            ),
        ];

        for (err, status, cause) in cases {
            assert_eq!(err.status(), status, "{err}");
            assert_eq!(err.cause(), cause, "{err}");
        }
    }
}
