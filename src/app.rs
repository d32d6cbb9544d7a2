use crate::config::Config;
use crate::handler::middleware::request_log::log_requests;
use crate::ivr::CallFlow;
use crate::notify::{DisabledSms, SmsSender, TwilioSms};
use anyhow::Result;
use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub flow: Arc<CallFlow>,
    pub sms: Arc<dyn SmsSender>,
    pub token: CancellationToken,
    /// Pins the clock for hours evaluation; `None` means wall-clock time.
    pub current_time: Option<DateTime<Utc>>,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn now(&self) -> DateTime<Utc> {
        self.current_time.unwrap_or_else(Utc::now)
    }
}

#[derive(Default)]
pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub flow: Option<CallFlow>,
    pub sms: Option<Arc<dyn SmsSender>>,
    pub current_time: Option<DateTime<Utc>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses an already validated flow instead of building one from the config.
    pub fn with_call_flow(mut self, flow: CallFlow) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn with_sms_sender(mut self, sms: Arc<dyn SmsSender>) -> Self {
        self.sms = Some(sms);
        self
    }

    pub fn with_current_time(mut self, now: DateTime<Utc>) -> Self {
        self.current_time = Some(now);
        self
    }

    pub fn build(self) -> Result<AppState> {
        let config = self.config.unwrap_or_default();
        let flow = match self.flow {
            Some(flow) => flow,
            None => config.check()?,
        };
        let sms: Arc<dyn SmsSender> = match (self.sms, &config.twilio) {
            (Some(sms), _) => sms,
            (None, Some(twilio)) => Arc::new(TwilioSms::new(twilio)?),
            (None, None) => Arc::new(DisabledSms),
        };
        info!(
            timezone = %flow.timezone,
            actions = flow.actions.len(),
            calendars = flow.calendars.len(),
            "call flow loaded"
        );

        Ok(Arc::new(AppStateInner {
            config: Arc::new(config),
            flow: Arc::new(flow),
            sms,
            token: CancellationToken::new(),
            current_time: self.current_time,
        }))
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();
    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!("listening on http://{}", addr);

    let http_task = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    select! {
        http_result = http_task => {
            match http_result {
                Ok(_) => info!("Server shut down gracefully"),
                Err(e) => {
                    tracing::error!("Server error: {}", e);
                    return Err(anyhow::anyhow!("Server error: {}", e));
                }
            }
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    let skip_paths = Arc::new(state.config.log_skip_paths.clone().unwrap_or_default());

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);

    crate::handler::router()
        .with_state(state)
        .layer(middleware::from_fn_with_state(skip_paths, log_requests))
        .layer(cors)
}
