use crate::config::TwilioConfig;
use crate::ivr::ResponseDirective;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Outbound text messages, used for voicemail alerts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, from: &str, to: &str, body: &str) -> Result<()>;
}

/// Sends through the Twilio Messages REST API.
pub struct TwilioSms {
    client: Client,
    url: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioSms {
    pub fn new(config: &TwilioConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::version::get_useragent())
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                config.api_base.trim_end_matches('/'),
                config.account_sid
            ),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl SmsSender for TwilioSms {
    async fn send(&self, from: &str, to: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", from), ("To", to), ("Body", body)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("twilio returned {}: {}", status, text));
        }
        Ok(())
    }
}

/// Used when no voicemail action exists and no provider is configured.
pub struct DisabledSms;

#[async_trait]
impl SmsSender for DisabledSms {
    async fn send(&self, _from: &str, to: &str, _body: &str) -> Result<()> {
        Err(anyhow!("sms to {} dropped: no [twilio] section configured", to))
    }
}

/// Sends every SMS step in `directive` on its own task. The webhook response
/// never waits on delivery.
pub fn dispatch(sender: Arc<dyn SmsSender>, directive: &ResponseDirective, call_sid: Option<&str>) {
    for (from, to, body) in directive.sms() {
        let sender = sender.clone();
        let (from, to, body) = (from.to_string(), to.to_string(), body.to_string());
        let call_sid = call_sid.unwrap_or_default().to_string();
        tokio::spawn(async move {
            let start_time = Instant::now();
            match sender.send(&from, &to, &body).await {
                Ok(()) => info!(
                    call_sid,
                    to,
                    elapsed = start_time.elapsed().as_millis(),
                    "voicemail alert sent"
                ),
                Err(e) => warn!(call_sid, to, "failed to send voicemail alert: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivr::Step;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_dispatch_sends_each_sms_step() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mock = MockSmsSender::new();
        mock.expect_send().times(1).returning(move |from, to, body| {
            let _ = tx.send((from.to_string(), to.to_string(), body.to_string()));
            Ok(())
        });

        let directive = ResponseDirective {
            steps: vec![
                Step::SendSms {
                    from: "+15550101".into(),
                    to: "+15550102".into(),
                    body: "New voicemail: https://r/1".into(),
                },
                Step::Hangup,
            ],
        };
        dispatch(Arc::new(mock), &directive, Some("CA1"));
        let sent = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("sms sent")
            .expect("channel open");
        assert_eq!(
            sent,
            (
                "+15550101".to_string(),
                "+15550102".to_string(),
                "New voicemail: https://r/1".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_dispatch_without_sms_sends_nothing() {
        let mut mock = MockSmsSender::new();
        mock.expect_send().times(0);
        let directive = ResponseDirective {
            steps: vec![Step::Hangup],
        };
        dispatch(Arc::new(mock), &directive, None);
        tokio::task::yield_now().await;
    }

    #[test]
    fn test_twilio_messages_url() {
        let sms = TwilioSms::new(&TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            api_base: "https://api.twilio.com/".into(),
        })
        .unwrap();
        assert_eq!(
            sms.url,
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[tokio::test]
    async fn test_disabled_sender_fails() {
        assert!(DisabledSms.send("+1", "+2", "hi").await.is_err());
    }
}
