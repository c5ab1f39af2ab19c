use std::collections::HashMap;

use opentelemetry::{propagation::TextMapPropagator, trace::TraceContextExt};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Carries a trace across task boundaries as a W3C `traceparent` string.
#[derive(Debug, Clone)]
pub struct TraceContext {
    otel_ctx: opentelemetry::Context,
}

impl TraceContext {
    pub fn current() -> Option<Self> {
        let ctx: opentelemetry::Context = Span::current().context();

        if ctx.span().span_context().is_valid() {
            Some(Self { otel_ctx: ctx })
        } else {
            None
        }
    }

    pub fn from_correlation_id(correlation_id: &str) -> Self {
        let mut carrier: HashMap<String, String> = HashMap::new();
        carrier.insert("traceparent".to_string(), correlation_id.to_string());

        Self {
            otel_ctx: TraceContextPropagator::default().extract(&carrier),
        }
    }

    /// Makes the current span a child of the given correlation id, if there is one.
    pub fn continue_from(correlation_id: &Option<String>) {
        if let Some(id) = correlation_id {
            let _ = Span::current().set_parent(Self::from_correlation_id(id).otel_ctx);
        }
    }

    pub fn current_correlation_id() -> Option<String> {
        Self::current().map(|c| c.correlation_id())
    }

    pub fn correlation_id(&self) -> String {
        let mut carrier: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::default().inject_context(&self.otel_ctx, &mut carrier);

        carrier.remove("traceparent").unwrap_or_default()
    }

    pub fn trace_id(&self) -> String {
        self.otel_ctx.span().span_context().trace_id().to_string()
    }

    pub fn span_id(&self) -> String {
        self.otel_ctx.span().span_context().span_id().to_string()
    }
}
