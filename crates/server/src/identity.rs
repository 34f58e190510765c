//! Request identity and trace context middleware.
//!
//! Authentication happens in front of this service. The authenticating proxy
//! forwards the caller's identity in `x-warden-user`, which is recorded as
//! an opaque string on the restore it starts.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the opaque caller identity.
pub const USER_HEADER: &str = "x-warden-user";

/// Header carrying a client-chosen trace ID.
pub const TRACE_HEADER: &str = "x-trace-id";

/// Maximum length for trace IDs and identities; longer values are truncated.
const MAX_HEADER_VALUE_LEN: usize = 128;

/// Keep printable ASCII only, truncated by characters (not bytes).
fn sanitize(value: &str) -> String {
    value
        .chars()
        .take(MAX_HEADER_VALUE_LEN)
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect()
}

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, falling back to a
    /// fresh one if nothing printable is left after sanitizing.
    pub fn from_client(value: &str) -> Self {
        let sanitized = sanitize(value);
        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the caller, as forwarded by the authenticating proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity(pub String);

impl Identity {
    fn from_request(req: &Request) -> Option<Self> {
        req.headers()
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(sanitize)
            .filter(|user| !user.trim().is_empty())
            .map(Self)
    }
}

/// Records trace ID and identity in request extensions and runs the request
/// in a span carrying the trace ID.
pub async fn identity_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_default();
    let span = tracing::info_span!("request", trace_id = %trace_id);

    req.extensions_mut().insert(trace_id);
    if let Some(identity) = Identity::from_request(&req) {
        req.extensions_mut().insert(identity);
    }

    next.run(req).instrument(span).await
}
