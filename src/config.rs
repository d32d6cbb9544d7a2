use crate::error::ConfigError;
use crate::ivr::CallFlow;
use anyhow::{anyhow, Error};
use serde::Deserialize;
use url::Url;

const TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub log_skip_paths: Option<Vec<String>>,
    /// Base for callback URLs. Derived from request headers when unset.
    pub public_url: Option<Url>,
    pub twilio: Option<TwilioConfig>,
    pub ivr: IvrSettings,
    /// Remaining top-level tables: the call-flow sections.
    #[serde(flatten)]
    pub flow: toml::Table,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IvrSettings {
    /// IANA zone used for every hours calendar.
    pub timezone: String,
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_twilio_api_base() -> String {
    TWILIO_API_BASE.to_string()
}

impl Default for IvrSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            log_level: Some("info".to_string()),
            log_file: None,
            log_skip_paths: None,
            public_url: None,
            twilio: None,
            ivr: IvrSettings::default(),
            flow: toml::Table::new(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    pub fn call_flow(&self) -> Result<CallFlow, ConfigError> {
        CallFlow::from_sections(&self.ivr.timezone, &self.flow)
    }

    /// Builds the call flow and checks that everything it needs at run time
    /// is configured.
    pub fn check(&self) -> Result<CallFlow, Error> {
        let flow = self.call_flow()?;
        if flow.has_voicemail() && self.twilio.is_none() {
            return Err(anyhow!(
                "voicemail actions send SMS alerts but no [twilio] section is configured"
            ));
        }
        Ok(flow)
    }
}
