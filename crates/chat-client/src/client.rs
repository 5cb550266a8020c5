//! Client facade

use crate::error::{ClientError, ClientResult};
use chat_common::{ClientConfig, GatewayConfig, ShardSetting};
use chat_gateway::{CoordinatorOptions, Shard, ShardCoordinator, ShardEvent};
use chat_rest::{Method, RequestDispatcher, RequestOptions, RestError};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 4096;

/// `GET /gateway/bot` response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the limit resets
    pub reset_after: u64,
    pub max_concurrency: u32,
}

/// REST dispatcher plus gateway shards behind one handle
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    rest: RequestDispatcher,
    events: broadcast::Sender<ShardEvent>,
    coordinator: Mutex<Option<ShardCoordinator>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.gateway.validate()?;
        let rest = RequestDispatcher::new(config.rest.clone(), Some(config.authorization()))?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                rest,
                events,
                coordinator: Mutex::new(None),
                forwarder: Mutex::new(None),
            }),
        })
    }

    /// Build a client from `CHAT_*` environment variables
    pub fn from_env() -> ClientResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn rest(&self) -> &RequestDispatcher {
        &self.inner.rest
    }

    /// Events of every shard, including those connected later
    pub fn events(&self) -> broadcast::Receiver<ShardEvent> {
        self.inner.events.subscribe()
    }

    pub fn coordinator(&self) -> Option<ShardCoordinator> {
        self.inner.coordinator.lock().clone()
    }

    pub fn shard(&self, id: u32) -> Option<Shard> {
        self.inner
            .coordinator
            .lock()
            .as_ref()
            .and_then(|coordinator| coordinator.shard(id).cloned())
    }

    /// Fetch the recommended gateway URL and shard layout
    pub async fn gateway_bot(&self) -> ClientResult<GatewayBot> {
        self.inner
            .rest
            .request_json(Method::GET, "/gateway/bot", RequestOptions::default())
            .await
            .map_err(|err| match err {
                RestError::Rest { status: 401, .. } | RestError::Http { status: 401, .. } => {
                    ClientError::InvalidToken
                }
                err => err.into(),
            })
    }

    /// Resolve the shard layout and start connecting every shard
    ///
    /// Returns once the shards are queued; readiness arrives as events.
    pub async fn connect(&self) -> ClientResult<()> {
        if self.inner.coordinator.lock().is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let gateway = &self.inner.config.gateway;
        let bot = if needs_bootstrap(gateway) {
            let bot = self.gateway_bot().await?;
            tracing::info!(
                url = %bot.url,
                shards = bot.shards,
                max_concurrency = bot.session_start_limit.max_concurrency,
                remaining = bot.session_start_limit.remaining,
                "Gateway bootstrap"
            );
            Some(bot)
        } else {
            None
        };

        let options = coordinator_options(&self.inner.config, bot.as_ref())?;
        let shards = options.last_shard - options.first_shard + 1;
        if let Some(limit) = bot.as_ref().map(|bot| &bot.session_start_limit) {
            if limit.remaining < shards {
                tracing::warn!(
                    remaining = limit.remaining,
                    shards,
                    reset_after_ms = limit.reset_after,
                    "Not enough session starts left for every shard"
                );
            }
        }

        let coordinator = ShardCoordinator::new(options)?;
        {
            let mut slot = self.inner.coordinator.lock();
            if slot.is_some() {
                return Err(ClientError::AlreadyConnected);
            }
            *slot = Some(coordinator.clone());
        }

        self.forward_events(&coordinator);
        coordinator.connect();
        Ok(())
    }

    fn forward_events(&self, coordinator: &ShardCoordinator) {
        let mut source = coordinator.subscribe();
        let sink = self.inner.events.clone();
        let task = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        let _ = sink.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event forwarding lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.inner.forwarder.lock().replace(task) {
            previous.abort();
        }
    }

    /// Close every shard without reconnecting
    pub fn disconnect(&self) {
        let coordinator = self.inner.coordinator.lock().take();
        if let Some(coordinator) = coordinator {
            coordinator.disconnect(false);
        }
        tracing::info!("Client disconnected");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self.forwarder.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("rest", &self.inner.config.rest.base_url)
            .field("coordinator", &self.coordinator())
            .finish_non_exhaustive()
    }
}

fn needs_bootstrap(gateway: &GatewayConfig) -> bool {
    gateway.url.is_none()
        || gateway.shards == ShardSetting::Auto
        || gateway.max_concurrency == ShardSetting::Auto
}

/// Combine configured values with the bootstrap response
fn coordinator_options(
    config: &ClientConfig,
    bot: Option<&GatewayBot>,
) -> ClientResult<CoordinatorOptions> {
    let gateway = &config.gateway;
    let url = gateway
        .url
        .clone()
        .or_else(|| bot.map(|bot| bot.url.clone()))
        .ok_or_else(|| {
            ClientError::Gateway(chat_gateway::GatewayError::InvalidConfig(
                "no gateway URL configured or resolved".to_string(),
            ))
        })?;
    let shard_count = gateway.shards.resolve(bot.map_or(1, |bot| bot.shards.max(1)));
    let max_concurrency = gateway
        .max_concurrency
        .resolve(bot.map_or(1, |bot| bot.session_start_limit.max_concurrency.max(1)));
    let last_shard = gateway
        .last_shard
        .unwrap_or_else(|| shard_count.saturating_sub(1));

    let token = config
        .token
        .strip_prefix("Bot ")
        .unwrap_or(&config.token)
        .to_string();

    Ok(
        CoordinatorOptions::new(url, token, shard_count, gateway.clone())
            .with_range(gateway.first_shard, last_shard)
            .with_max_concurrency(max_concurrency),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot() -> GatewayBot {
        serde_json::from_value(serde_json::json!({
            "url": "wss://gateway.example",
            "shards": 4,
            "session_start_limit": {
                "total": 1000,
                "remaining": 999,
                "reset_after": 14_400_000,
                "max_concurrency": 2
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_auto_layout_from_bootstrap() {
        let config = ClientConfig::new("Bot abc");
        assert!(needs_bootstrap(&config.gateway));

        let options = coordinator_options(&config, Some(&bot())).unwrap();
        assert_eq!(options.gateway_url, "wss://gateway.example");
        assert_eq!(options.shard_count, 4);
        assert_eq!(options.first_shard, 0);
        assert_eq!(options.last_shard, 3);
        assert_eq!(options.max_concurrency, 2);
        assert_eq!(options.token, "abc");
    }

    #[test]
    fn test_fixed_layout_overrides_bootstrap() {
        let mut config = ClientConfig::new("abc");
        config.gateway.shards = ShardSetting::Fixed(8);
        config.gateway.first_shard = 4;
        config.gateway.last_shard = Some(7);

        let options = coordinator_options(&config, Some(&bot())).unwrap();
        assert_eq!(options.shard_count, 8);
        assert_eq!((options.first_shard, options.last_shard), (4, 7));
        assert_eq!(options.max_concurrency, 2);
    }

    #[test]
    fn test_intents_carried_to_shards() {
        let mut config = ClientConfig::new("abc");
        config.gateway.intents = crate::Intents::GUILDS | crate::Intents::GUILD_MESSAGES;

        let options = coordinator_options(&config, Some(&bot())).unwrap();
        assert!(options.gateway.intents.contains(crate::Intents::GUILD_MESSAGES));
        assert!(!options.gateway.intents.contains(crate::Intents::GUILD_PRESENCES));
    }

    #[test]
    fn test_fully_configured_skips_bootstrap() {
        let mut config = ClientConfig::new("abc");
        config.gateway.url = Some("wss://configured.example".to_string());
        config.gateway.shards = ShardSetting::Fixed(1);
        config.gateway.max_concurrency = ShardSetting::Fixed(1);
        assert!(!needs_bootstrap(&config.gateway));

        let options = coordinator_options(&config, None).unwrap();
        assert_eq!(options.gateway_url, "wss://configured.example");
        assert_eq!(options.shard_count, 1);
    }

    #[tokio::test]
    async fn test_disconnect_before_connect() {
        let client = Client::new(ClientConfig::new("abc")).unwrap();
        assert!(client.coordinator().is_none());
        client.disconnect();
        assert!(client.shard(0).is_none());
    }
}
