use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use std::{sync::Arc, time::Instant};
use tracing::field::{Field, Visit};
use tracing::info;
use tracing::Subscriber;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{format, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

pub const ACCESS_TARGET: &str = "http.access";

/// Call identifier the webhook handler attaches to its response so the
/// access log can name the call without reading the form body twice.
#[derive(Debug, Clone)]
pub struct CallSid(pub String);

#[derive(Clone)]
pub struct AccessLogEventFormat<T = SystemTime> {
    timer: T,
}

impl<T> AccessLogEventFormat<T>
where
    T: FormatTime,
{
    pub fn new(timer: T) -> Self {
        Self { timer }
    }
}

impl<T> Default for AccessLogEventFormat<T>
where
    T: FormatTime + Default,
{
    fn default() -> Self {
        Self {
            timer: T::default(),
        }
    }
}

#[derive(Default)]
struct AccessLogFields {
    call_sid: Option<String>,
    method: Option<String>,
    status: Option<u16>,
    cost_ms: Option<f64>,
    uri: Option<String>,
}

impl AccessLogFields {
    fn text(value: &Option<String>) -> &str {
        value.as_deref().unwrap_or("-")
    }

    fn status(&self) -> String {
        self.status
            .map(|value| value.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    fn cost(&self) -> String {
        self.cost_ms
            .map(|value| format!("{value:.3}ms"))
            .unwrap_or_else(|| "-".to_string())
    }

    fn set_text(&mut self, field: &Field, value: String) {
        match field.name() {
            "call_sid" => self.call_sid = Some(value),
            "method" => self.method = Some(value),
            "uri" => self.uri = Some(value),
            _ => {}
        }
    }
}

impl Visit for AccessLogFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set_text(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        self.set_text(field, rendered.trim_matches('"').to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "status" {
            self.status = Some(value as u16);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "status" {
            self.status = Some(value as u16);
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if field.name() == "cost_ms" {
            self.cost_ms = Some(value);
        }
    }
}

impl<S, N, T> FormatEvent<S, N> for AccessLogEventFormat<T>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
    T: FormatTime + Clone,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        if metadata.target() == ACCESS_TARGET {
            let mut fields = AccessLogFields::default();
            event.record(&mut fields);
            self.timer.format_time(&mut writer)?;
            writeln!(
                writer,
                " {} {} | {} | {} | {} | {} | {}",
                metadata.level(),
                metadata.target(),
                AccessLogFields::text(&fields.call_sid),
                AccessLogFields::text(&fields.method),
                fields.status(),
                fields.cost(),
                AccessLogFields::text(&fields.uri),
            )
        } else {
            format::Format::default()
                .with_timer(self.timer.clone())
                .with_target(true)
                .format_event(ctx, writer, event)
        }
    }
}

/// Pattern ending in `*` matches by prefix, anything else exactly.
pub fn should_skip_logging(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('*') {
            path.starts_with(prefix)
        } else {
            path == pattern
        }
    })
}

/// One access-log line per webhook hit, written once the handler returns.
pub async fn log_requests(
    State(skip_paths): State<Arc<Vec<String>>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().to_string();
    let request_path = req.uri().path().to_string();

    let response = next.run(req).await;

    if !should_skip_logging(&request_path, skip_paths.as_slice()) {
        let call_sid = response
            .extensions()
            .get::<CallSid>()
            .map(|sid| sid.0.as_str())
            .unwrap_or("-");
        info!(
            target: ACCESS_TARGET,
            call_sid,
            method = method.as_str(),
            status = response.status().as_u16(),
            cost_ms = started_at.elapsed().as_secs_f64() * 1_000.0,
            uri = uri.as_str(),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_patterns() {
        let patterns = vec!["/ping".to_string(), "/static/*".to_string()];
        assert!(should_skip_logging("/ping", &patterns));
        assert!(!should_skip_logging("/ping/x", &patterns));
        assert!(should_skip_logging("/static/app.js", &patterns));
        assert!(!should_skip_logging("/ivr/menu", &patterns));
        assert!(!should_skip_logging("/ivr", &[]));
    }
}
