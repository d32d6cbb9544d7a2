use super::middleware::request_log::CallSid;
use crate::app::AppState;
use crate::ivr::{CallContext, CallOutcome, Continuation, NodeRef, Resolver};
use crate::{notify, twiml};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Form, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use url::Url;

/// The provider fields the call flow reads. Everything else the provider
/// posts is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookForm {
    #[serde(rename = "Digits")]
    pub digits: Option<String>,
    #[serde(rename = "DialCallStatus")]
    pub dial_call_status: Option<String>,
    #[serde(rename = "RecordingUrl")]
    pub recording_url: Option<String>,
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
}

pub async fn ivr_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<WebhookForm>,
) -> Response {
    let call_sid = form.call_sid.clone().unwrap_or_default();
    let Continuation { node, loop_count } =
        Continuation::decode(uri.path()).unwrap_or_else(|e| {
            warn!(call_sid, "{}, falling back to the menu", e);
            Continuation::new(NodeRef::Menu, 0)
        });
    let outcome = form
        .dial_call_status
        .as_deref()
        .and_then(|status| match CallOutcome::from_status(status) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(call_sid, "{}, treating the forwarded call as ended", e);
                None
            }
        });

    let mut ctx = CallContext::new(node, state.now()).with_loop_count(loop_count);
    ctx.digits = form.digits;
    ctx.outcome = outcome;
    ctx.recording_url = form.recording_url.filter(|url| !url.is_empty());

    let mut response = match Resolver::new(&state.flow).resolve(&ctx) {
        Ok(directive) => {
            info!(
                call_sid,
                node = %ctx.node.label(),
                loop_count,
                digits = ctx.digits.as_deref(),
                steps = directive.steps.len(),
                "resolved"
            );
            notify::dispatch(state.sms.clone(), &directive, Some(&call_sid));
            let base = base_url(state.config.public_url.as_ref(), &headers);
            if base.is_none() {
                warn!(call_sid, "cannot build a base url, callbacks stay relative");
            }
            (
                [(header::CONTENT_TYPE, twiml::CONTENT_TYPE)],
                twiml::render(&directive, base.as_ref()),
            )
                .into_response()
        }
        Err(e) => {
            error!(call_sid, node = %ctx.node.label(), "call flow error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    };
    response.extensions_mut().insert(CallSid(call_sid));
    response
}

pub async fn ping() -> Response {
    Json(json!({
        "name": "ping",
        "invokedAt": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// The configured public URL, or one rebuilt from the proxy headers.
pub fn base_url(public_url: Option<&Url>, headers: &HeaderMap) -> Option<Url> {
    if let Some(url) = public_url {
        return Some(url.clone());
    }
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let host = get(header::HOST.as_str()).unwrap_or("localhost");
    let scheme = get("x-forwarded-proto")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");
    Url::parse(&format!("{}://{}", scheme, host)).ok()
}
