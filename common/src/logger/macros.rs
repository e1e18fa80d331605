use tracing::{Span, field};

use super::TraceId;

/// Create a root span for one inbound request (CLI command, HTTP call).
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        package_id = field::Empty,
        deliverer_id = field::Empty
    )
}

/// Create a child span (inherits trace_id from the enclosing root span).
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!("child", name = %name)
}
