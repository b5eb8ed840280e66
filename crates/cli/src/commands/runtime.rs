//! Shared wiring: configuration → log store, platform, provider, relay.

use chatrelay_agent::{BackfillEngine, Relay};
use chatrelay_channels::DiscordPlatform;
use chatrelay_config::AppConfig;
use chatrelay_core::event::EventBus;
use chatrelay_core::platform::{ChannelRef, ChatPlatform};
use chatrelay_core::provider::CompletionProvider;
use chatrelay_memory::LogStore;
use std::sync::Arc;
use tracing::{info, warn};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<LogStore>,
    pub platform: Option<Arc<dyn ChatPlatform>>,
    pub provider: Arc<dyn CompletionProvider>,
    pub event_bus: Arc<EventBus>,
}

impl Runtime {
    pub fn load() -> CliResult<Self> {
        let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
        Self::from_config(config)
    }

    pub fn from_config(config: AppConfig) -> CliResult<Self> {
        let store = Arc::new(LogStore::open(config.log_dir()));

        let platform: Option<Arc<dyn ChatPlatform>> = match DiscordPlatform::from_config(&config.discord) {
            Ok(discord) => Some(Arc::new(discord)),
            Err(e) => {
                info!(reason = %e, "Discord lookups disabled");
                None
            }
        };

        let router = chatrelay_providers::build_from_config(&config);
        let provider = router
            .default()
            .ok_or_else(|| format!("Provider '{}' is not configured", config.default_provider))?;

        Ok(Self {
            config,
            store,
            platform,
            provider,
            event_bus: Arc::new(EventBus::default()),
        })
    }

    /// Relay with the default capability providers, optionally wired to a
    /// backfill engine for per-message triggers.
    pub fn relay(&self, backfill: Option<BackfillEngine>) -> CliResult<Relay> {
        let registry = Arc::new(chatrelay_tools::default_registry(
            self.store.clone(),
            self.platform.clone(),
        ));
        let mut relay = Relay::from_config(
            self.provider.clone(),
            registry,
            self.store.clone(),
            &self.config,
        )?
        .with_event_bus(self.event_bus.clone());
        if let Some(engine) = backfill {
            relay = relay.with_backfill(engine);
        }
        Ok(relay)
    }

    /// Backfill engine over the configured platform, if there is one.
    pub fn backfill_engine(&self) -> Option<BackfillEngine> {
        let platform = self.platform.clone()?;
        Some(
            BackfillEngine::new(platform, self.store.clone(), self.config.backfill.clone())
                .with_event_bus(self.event_bus.clone()),
        )
    }

    pub fn watched_channels(&self) -> Vec<ChannelRef> {
        self.config
            .discord
            .channel_ids
            .iter()
            .map(ChannelRef::new)
            .collect()
    }

    /// Log the configuration problems that keep Discord features off.
    pub fn warn_discord_problems(&self) {
        for problem in self.config.validate_for_discord() {
            warn!("{problem}");
        }
    }
}
