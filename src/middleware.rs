use axum::http::Request;
use tower_http::trace::MakeSpan;
use tracing::Span;

/// Tags every request span with the listener that accepted it.
#[derive(Clone)]
pub struct ServiceRequestSpan {
    env: String,
    service: &'static str,
}

impl ServiceRequestSpan {
    pub fn new(env: &str, service: &'static str) -> Self {
        Self {
            env: env.to_string(),
            service,
        }
    }
}

impl<B> MakeSpan<B> for ServiceRequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "request",
            env = %self.env,
            service = self.service,
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}
