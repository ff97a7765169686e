#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
    Store(StoreError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
            Self::Store(err) => write!(f, "server store error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<StoreError> for ServerError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// HTTP projection of the shared error taxonomy. The body is always
/// `{"error": {"kind", "message", "retryable"}}`.
#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn status_for(kind: ErrorKind) -> StatusCode {
        match kind {
            ErrorKind::AgentUnknown => StatusCode::NOT_FOUND,
            ErrorKind::AgentUninitialized => StatusCode::CONFLICT,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::GroupClosed => StatusCode::GONE,
            ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            // Oracle trouble never surfaces on interactive paths; anything
            // that still reaches here is an internal condition.
            ErrorKind::OracleTimeout
            | ErrorKind::OracleMalformed
            | ErrorKind::TierBudgetExceeded => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        ApiError::invalid_argument(message).into()
    }
}

impl From<ApiError> for HttpApiError {
    fn from(error: ApiError) -> Self {
        Self {
            status: Self::status_for(error.kind),
            error,
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error }))).into_response()
    }
}
