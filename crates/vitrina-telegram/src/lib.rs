//! Telegram adapter (teloxide).
//!
//! Implements the `vitrina-core` transport and identity ports over the Bot
//! API. One [`TelegramChannel`] per credential.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use teloxide::{prelude::*, types::AllowedUpdate, ApiError, RequestError};
use tokio::time::sleep;
use tracing::{debug, warn};

pub mod convert;

use vitrina_core::{
    config::{ChannelCredentials, Config},
    domain::{BotIdentity, RawUpdate},
    errors::Error,
    ports::{IdentityPort, Transport},
    service::ChannelConnector,
    Result,
};

/// Slack on top of the server-side long-poll timeout before the HTTP client
/// gives up.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TelegramChannel {
    bot: Bot,
    token: String,
    api_url: String,
}

impl TelegramChannel {
    pub fn new(token: &str, api_url: &str, poll_timeout: Duration) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_timeout + CLIENT_TIMEOUT_MARGIN)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        let url = reqwest::Url::parse(api_url)
            .map_err(|e| Error::Config(format!("invalid TELEGRAM_API_URL {api_url:?}: {e}")))?;

        Ok(Self {
            bot: Bot::with_client(token, client).set_api_url(url),
            token: token.to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn download_url(&self, path: &str) -> String {
        file_download_url(&self.api_url, &self.token, path)
    }

    fn map_err(e: RequestError) -> Error {
        match e {
            RequestError::Api(api) => Error::Api {
                code: api_error_code(&api),
                description: api.to_string(),
            },
            RequestError::Network(e) => Error::Network(e.to_string()),
            RequestError::Io(e) => Error::Network(e.to_string()),
            RequestError::InvalidJson { source, .. } => {
                Error::MalformedResponse(source.to_string())
            }
            other => Error::External(format!("telegram error: {other}")),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        warn!(retry_after_secs = d.as_secs(), "rate limited by Bot API");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

pub fn file_download_url(api_url: &str, token: &str, path: &str) -> String {
    format!(
        "{}/file/bot{}/{}",
        api_url.trim_end_matches('/'),
        token,
        path.trim_start_matches('/')
    )
}

fn api_error_code(e: &ApiError) -> i32 {
    match e {
        ApiError::NotFound => 401, // "Unauthorized" (renamed InvalidToken in later teloxide-core)
        ApiError::TerminatedByOtherGetUpdates => 409,
        _ => 400,
    }
}

#[async_trait]
impl Transport for TelegramChannel {
    async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Option<Vec<RawUpdate>>> {
        let offset = i32::try_from(offset)
            .map_err(|_| Error::External(format!("update offset out of range: {offset}")))?;
        let timeout_secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);

        // Non-message updates still have to be fetched so the cursor moves
        // past them.
        let updates = self
            .with_retry(|| {
                self.bot
                    .get_updates()
                    .offset(offset)
                    .timeout(timeout_secs)
                    .allowed_updates(vec![AllowedUpdate::Message])
            })
            .await?;

        debug!(count = updates.len(), offset, "getUpdates returned");
        Ok(Some(updates.iter().map(convert::raw_update).collect()))
    }

    async fn file_url(&self, file_id: &str) -> Result<String> {
        let file = self
            .with_retry(|| self.bot.get_file(file_id.to_string()))
            .await?;
        Ok(self.download_url(&file.path))
    }
}

#[async_trait]
impl IdentityPort for TelegramChannel {
    async fn who_am_i(&self) -> Result<BotIdentity> {
        let me = self
            .with_retry(|| self.bot.get_me())
            .await
            .map_err(|e| Error::Identity(e.to_string()))?;
        Ok(BotIdentity {
            id: me.id.0 as i64,
            username: me.username().to_string(),
        })
    }
}

/// Builds one [`TelegramChannel`] per credential.
#[derive(Clone, Copy, Debug, Default)]
pub struct TelegramConnector;

impl ChannelConnector for TelegramConnector {
    fn connect(
        &self,
        creds: &ChannelCredentials,
        cfg: &Config,
    ) -> Result<(Arc<dyn Transport>, Arc<dyn IdentityPort>)> {
        let channel = Arc::new(TelegramChannel::new(
            &creds.token,
            &cfg.api_url,
            cfg.poll_timeout,
        )?);
        Ok((channel.clone(), channel))
    }
}
