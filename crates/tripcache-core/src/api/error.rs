use thiserror::Error;

/// Failure talking to the tracking backend. `endpoint` is the request URL.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{endpoint} rejected the API token (HTTP {status})")]
    Unauthorized { endpoint: String, status: u16 },

    #[error("{endpoint} has no data for this query: {body}")]
    NotFound { endpoint: String, body: String },

    #[error("{endpoint} still rate limited after {retries} retries")]
    RateLimited { endpoint: String, retries: u32 },

    #[error("{endpoint} failed with HTTP {status}: {body}")]
    Backend {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Could not reach the tracking backend: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Could not encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Unexpected payload from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Offline - no network requests are made")]
    Offline,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Map a non-success, non-429 response from `endpoint`.
    pub fn from_status(endpoint: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let endpoint = endpoint.to_string();
        let status = status.as_u16();
        match status {
            401 | 403 => ApiError::Unauthorized { endpoint, status },
            404 => ApiError::NotFound {
                endpoint,
                body: Self::truncate_body(body),
            },
            _ => ApiError::Backend {
                endpoint,
                status,
                body: Self::truncate_body(body),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    const PLOTMAPS: &str = "http://localhost:3000/api/plotmaps";

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ApiError::from_status(PLOTMAPS, StatusCode::FORBIDDEN, "nope"),
            ApiError::Unauthorized { status: 403, .. }
        ));
        match ApiError::from_status(PLOTMAPS, StatusCode::NOT_FOUND, "no such travel") {
            ApiError::NotFound { endpoint, body } => {
                assert_eq!(endpoint, PLOTMAPS);
                assert_eq!(body, "no such travel");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        match ApiError::from_status(PLOTMAPS, StatusCode::BAD_GATEWAY, "upstream down") {
            ApiError::Backend { status, body, .. } => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_messages_name_the_endpoint() {
        let err = ApiError::from_status(PLOTMAPS, StatusCode::IM_A_TEAPOT, "");
        assert_eq!(err.to_string(), format!("{} failed with HTTP 418: ", PLOTMAPS));
        let err = ApiError::RateLimited {
            endpoint: PLOTMAPS.to_string(),
            retries: 3,
        };
        assert!(err.to_string().ends_with("still rate limited after 3 retries"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.ends_with("(truncated, 800 total bytes)"));
        assert!(truncated.starts_with("éé"));
    }
}
