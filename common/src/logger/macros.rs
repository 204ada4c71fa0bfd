use super::TraceId;
use tracing::{Level, Span, field};

/// Root span for a single inbound request, consumer batch, or promoter pass.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::span!(
        Level::INFO,
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        order_id = field::Empty,
        slot_id = field::Empty,
    )
}

/// Child span; inherits the parent's trace_id via tracing's span hierarchy.
pub fn child_span(name: &'static str) -> Span {
    tracing::span!(Level::INFO, "child", name = %name)
}
