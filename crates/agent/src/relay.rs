//! The relay: gateway-facing entry point for live conversations.
//!
//! Each conversation gets its own actor task owning its [`ContextWindow`].
//! Commands reach the actor through an `mpsc` queue, so turns of one
//! conversation are handled strictly in arrival order while different
//! conversations proceed concurrently. Log writes from every actor and from
//! backfill funnel through the per-target [`PersistedLog`](chatrelay_memory::PersistedLog)
//! writer.

use chatrelay_config::{AppConfig, RelayConfig};
use chatrelay_core::error::Error;
use chatrelay_core::event::{DomainEvent, EventBus};
use chatrelay_core::message::{ConversationId, Turn};
use chatrelay_core::platform::ChannelRef;
use chatrelay_core::provider::CompletionProvider;
use chatrelay_core::record::{AuthorClass, PersistedRecord, RecordOrigin};
use chatrelay_core::tool::ToolRegistry;
use chatrelay_memory::{LogStore, Statistics};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backfill::BackfillEngine;
use crate::dispatch::DispatchLoop;
use crate::window::ContextWindow;

/// Author name recorded for the relay's own replies.
pub const ASSISTANT_AUTHOR: &str = "assistant";

const COMMAND_QUEUE: usize = 64;

/// A message arriving from a chat platform or the HTTP gateway.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub conversation_id: ConversationId,
    pub author: String,
    pub text: String,
    /// Platform message id; generated when absent
    pub message_id: Option<String>,
    /// Platform timestamp; receipt time when absent
    pub timestamp: Option<DateTime<Utc>>,
    /// Channel the message was posted in (log target and backfill trigger)
    pub channel: Option<ChannelRef>,
}

impl InboundMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: ConversationId(conversation_id.into()),
            author: author.into(),
            text: text.into(),
            message_id: None,
            timestamp: None,
            channel: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_channel(mut self, channel: ChannelRef) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Log target: the channel when known, else the conversation id.
    fn target(&self) -> String {
        self.channel
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| self.conversation_id.to_string())
    }
}

enum Command {
    Inbound {
        message: InboundMessage,
        reply: oneshot::Sender<String>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
}

/// Shared, read-only state of every conversation actor.
#[derive(Clone)]
struct ActorContext {
    dispatch: DispatchLoop,
    store: Arc<LogStore>,
    config: RelayConfig,
    pinned: Vec<Turn>,
    event_bus: Arc<EventBus>,
    backfill: Option<BackfillEngine>,
}

pub struct Relay {
    ctx: Arc<ActorContext>,
    actors: Mutex<HashMap<ConversationId, mpsc::Sender<Command>>>,
}

impl Relay {
    /// Fails with a configuration error when the history cap cannot hold
    /// the pinned prefix.
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        model: impl Into<String>,
        registry: Arc<ToolRegistry>,
        log_store: Arc<LogStore>,
        config: RelayConfig,
    ) -> Result<Self, Error> {
        let mut pinned = vec![Turn::system(&config.system_prompt)];
        if !registry.is_empty() {
            pinned.push(Turn::system(registry.catalogue_prompt()));
        }
        // Validates cap against the prefix
        ContextWindow::new(pinned.clone(), config.history_cap)?;

        let dispatch = DispatchLoop::new(provider, model, registry).with_relay_config(&config);

        Ok(Self {
            ctx: Arc::new(ActorContext {
                dispatch,
                store: log_store,
                config,
                pinned,
                event_bus: Arc::new(EventBus::default()),
                backfill: None,
            }),
            actors: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<ToolRegistry>,
        log_store: Arc<LogStore>,
        config: &AppConfig,
    ) -> Result<Self, Error> {
        Ok(Self::new(
            provider,
            &config.default_model,
            registry,
            log_store,
            config.relay.clone(),
        )?
        .with_sampling(config.default_temperature, config.default_max_tokens))
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        let ctx = Arc::make_mut(&mut self.ctx);
        ctx.dispatch = ctx.dispatch.clone().with_event_bus(event_bus.clone());
        if let Some(engine) = ctx.backfill.take() {
            ctx.backfill = Some(engine.with_event_bus(event_bus.clone()));
        }
        ctx.event_bus = event_bus;
        self
    }

    /// Engine used when `backfill_on_message` is enabled.
    pub fn with_backfill(mut self, engine: BackfillEngine) -> Self {
        Arc::make_mut(&mut self.ctx).backfill = Some(engine);
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        let ctx = Arc::make_mut(&mut self.ctx);
        ctx.dispatch = ctx
            .dispatch
            .clone()
            .with_temperature(temperature)
            .with_max_tokens(max_tokens);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.ctx.event_bus
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.ctx.store
    }

    pub fn model(&self) -> &str {
        self.ctx.dispatch.model()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.ctx
            .dispatch
            .tools()
            .names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Handle one inbound message and return the reply text.
    pub async fn handle_inbound(&self, message: InboundMessage) -> Result<String, Error> {
        let actor = self.actor(&message.conversation_id).await?;
        let (reply, rx) = oneshot::channel();
        actor
            .send(Command::Inbound { message, reply })
            .await
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())
    }

    /// Truncate the conversation to its pinned prefix, after any in-flight
    /// dispatch.
    pub async fn reset_conversation(&self, id: &ConversationId) -> Result<(), Error> {
        let Some(actor) = self.existing_actor(id).await else {
            return Ok(());
        };
        let (reply, rx) = oneshot::channel();
        actor
            .send(Command::Reset { reply })
            .await
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())
    }

    /// Turns currently held for a conversation, `None` if it never spoke.
    pub async fn conversation_len(&self, id: &ConversationId) -> Option<usize> {
        let actor = self.existing_actor(id).await?;
        let (reply, rx) = oneshot::channel();
        actor.send(Command::Len { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn active_conversations(&self) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self.actors.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn statistics(&self) -> Result<Statistics, Error> {
        Ok(self.ctx.store.statistics().await?)
    }

    async fn existing_actor(&self, id: &ConversationId) -> Option<mpsc::Sender<Command>> {
        self.actors.lock().await.get(id).cloned()
    }

    async fn actor(&self, id: &ConversationId) -> Result<mpsc::Sender<Command>, Error> {
        let mut actors = self.actors.lock().await;
        if let Some(sender) = actors.get(id)
            && !sender.is_closed()
        {
            return Ok(sender.clone());
        }

        let window = ContextWindow::new(self.ctx.pinned.clone(), self.ctx.config.history_cap)?;
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        tokio::spawn(run_actor(self.ctx.clone(), id.clone(), window, rx));
        debug!(conversation_id = %id, "Started conversation actor");

        actors.insert(id.clone(), tx.clone());
        Ok(tx)
    }
}

fn actor_gone() -> Error {
    Error::Internal("conversation actor stopped".into())
}

async fn run_actor(
    ctx: Arc<ActorContext>,
    id: ConversationId,
    mut window: ContextWindow,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Inbound { message, reply } => {
                let answer = ctx.respond(&id, &mut window, message).await;
                let _ = reply.send(answer);
            }
            Command::Reset { reply } => {
                window.reset();
                info!(conversation_id = %id, "Conversation reset");
                let _ = reply.send(());
            }
            Command::Len { reply } => {
                let _ = reply.send(window.len());
            }
        }
    }
}

impl ActorContext {
    async fn respond(
        &self,
        id: &ConversationId,
        window: &mut ContextWindow,
        message: InboundMessage,
    ) -> String {
        let text = message.text.trim();
        if text.is_empty() {
            return self.config.empty_message_reply.clone();
        }

        let target = message.target();
        self.event_bus.publish(DomainEvent::MessageReceived {
            conversation_id: id.to_string(),
            author: message.author.clone(),
            content_preview: text.chars().take(80).collect(),
            timestamp: Utc::now(),
        });

        if self.config.persist_live {
            let record = PersistedRecord {
                timestamp: message.timestamp.unwrap_or_else(Utc::now),
                author: message.author.clone(),
                content: text.to_string(),
                message_id: message
                    .message_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                author_class: AuthorClass::User,
                origin: RecordOrigin::Live,
            };
            self.persist(&target, &record).await;
        }

        if self.config.backfill_on_message
            && let (Some(engine), Some(channel)) = (&self.backfill, &message.channel)
        {
            engine.run_if_idle(channel.clone());
        }

        let content = if self.config.prefix_author {
            format!("{}: {}", message.author, text)
        } else {
            text.to_string()
        };
        window.append(Turn::user(content));

        let outcome = self.dispatch.run(window, &id.0).await;
        self.event_bus.publish(DomainEvent::AnswerProduced {
            conversation_id: id.to_string(),
            terminal: outcome.terminal.to_string(),
            rounds: outcome.rounds,
            timestamp: Utc::now(),
        });

        if self.config.persist_live {
            let record = PersistedRecord {
                timestamp: Utc::now(),
                author: ASSISTANT_AUTHOR.into(),
                content: outcome.answer.clone(),
                message_id: Uuid::new_v4().to_string(),
                author_class: AuthorClass::Assistant,
                origin: RecordOrigin::Live,
            };
            self.persist(&target, &record).await;
        }

        outcome.answer
    }

    /// Best-effort write: a failure is logged and the record dropped.
    async fn persist(&self, target: &str, record: &PersistedRecord) {
        if let Err(e) = self.store.append(target, record).await {
            warn!(target, message_id = %record.message_id, error = %e, "Dropping unpersisted record");
            self.event_bus.publish(DomainEvent::PersistFailed {
                target: target.to_string(),
                message_id: record.message_id.clone(),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::CancellationSignal;
    use crate::test_helpers::{at, message, EchoTool, HistoryPlatform, ScriptedProvider};
    use chatrelay_config::BackfillConfig;
    use chatrelay_core::message::Role;
    use std::time::Duration;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        Arc::new(registry)
    }

    fn relay(provider: Arc<ScriptedProvider>, dir: &tempfile::TempDir) -> Relay {
        Relay::new(
            provider,
            "mock",
            registry(),
            Arc::new(LogStore::open(dir.path())),
            RelayConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn replies_and_persists_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::texts(&["Hi alice!"]));
        let relay = relay(provider.clone(), &dir);

        let reply = relay
            .handle_inbound(InboundMessage::new("general", "alice", "hello"))
            .await
            .unwrap();
        assert_eq!(reply, "Hi alice!");

        // persona, catalogue, prefixed user turn
        let request = &provider.requests()[0];
        assert_eq!(request.turns.len(), 3);
        assert_eq!(request.turns[0].role, Role::System);
        assert!(request.turns[1].content.contains("- echo:"));
        assert_eq!(request.turns[2], Turn::user("alice: hello"));

        let stats = relay.statistics().await.unwrap();
        assert_eq!(stats.total_persisted, 2);
        assert_eq!(stats.by_author_class.get("user"), Some(&1));
        assert_eq!(stats.by_author_class.get("assistant"), Some(&1));
    }

    #[tokio::test]
    async fn empty_message_skips_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::texts(&[]));
        let relay = relay(provider.clone(), &dir);

        let reply = relay
            .handle_inbound(InboundMessage::new("general", "alice", "   "))
            .await
            .unwrap();

        assert_eq!(reply, RelayConfig::default().empty_message_reply);
        assert_eq!(provider.call_count(), 0);
        assert_eq!(relay.statistics().await.unwrap().total_persisted, 0);
    }

    #[tokio::test]
    async fn turns_of_one_conversation_are_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::texts(&["one", "two"]));
        let relay = relay(provider.clone(), &dir);

        let (a, b) = tokio::join!(
            relay.handle_inbound(InboundMessage::new("general", "alice", "first")),
            relay.handle_inbound(InboundMessage::new("general", "bob", "second")),
        );
        a.unwrap();
        b.unwrap();

        // The second completion saw the whole first exchange
        let second = &provider.requests()[1];
        assert_eq!(second.turns.len(), 5);
        assert_eq!(second.turns[3].role, Role::Assistant);
        assert_eq!(relay.conversation_len(&ConversationId::from("general")).await, Some(6));
    }

    #[tokio::test]
    async fn conversations_keep_separate_windows() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::texts(&["a", "b"]));
        let relay = relay(provider.clone(), &dir);

        relay.handle_inbound(InboundMessage::new("one", "alice", "hi")).await.unwrap();
        relay.handle_inbound(InboundMessage::new("two", "bob", "hi")).await.unwrap();

        assert_eq!(provider.requests()[1].turns.len(), 3);
        assert_eq!(
            relay.active_conversations().await,
            vec![ConversationId::from("one"), ConversationId::from("two")]
        );
    }

    #[tokio::test]
    async fn reset_truncates_to_pinned_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::texts(&["hello"]));
        let relay = relay(provider, &dir);
        let id = ConversationId::from("general");

        relay.handle_inbound(InboundMessage::new("general", "alice", "hi")).await.unwrap();
        assert_eq!(relay.conversation_len(&id).await, Some(4));

        relay.reset_conversation(&id).await.unwrap();
        assert_eq!(relay.conversation_len(&id).await, Some(2));

        // Unknown conversations reset trivially
        relay.reset_conversation(&ConversationId::from("nobody")).await.unwrap();
        assert_eq!(relay.conversation_len(&ConversationId::from("nobody")).await, None);
    }

    #[tokio::test]
    async fn repeated_message_id_is_persisted_once() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::texts(&["one", "two"]));
        let relay = relay(provider, &dir);

        for _ in 0..2 {
            relay
                .handle_inbound(InboundMessage::new("general", "alice", "hi").with_message_id("m-1"))
                .await
                .unwrap();
        }

        let stats = relay.statistics().await.unwrap();
        assert_eq!(stats.by_author_class.get("user"), Some(&1));
        assert_eq!(stats.by_author_class.get("assistant"), Some(&2));
    }

    #[tokio::test]
    async fn persistence_failure_does_not_block_reply() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let provider = Arc::new(ScriptedProvider::texts(&["still here"]));
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let relay = Relay::new(
            provider,
            "mock",
            registry(),
            Arc::new(LogStore::open(blocker.path())),
            RelayConfig::default(),
        )
        .unwrap()
        .with_event_bus(bus);

        let reply = relay
            .handle_inbound(InboundMessage::new("general", "alice", "hi"))
            .await
            .unwrap();
        assert_eq!(reply, "still here");

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.as_ref(), DomainEvent::PersistFailed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 2);
    }

    #[test]
    fn cap_below_pinned_prefix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig {
            history_cap: 1,
            ..Default::default()
        };
        let result = Relay::new(
            Arc::new(ScriptedProvider::texts(&[])),
            "mock",
            registry(),
            Arc::new(LogStore::open(dir.path())),
            config,
        );
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_message_triggers_channel_backfill() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(dir.path()));
        let history = (1..=3).map(|n| message("general", &n.to_string(), n)).collect();
        let platform = Arc::new(HistoryPlatform::new(history));
        let engine = BackfillEngine::new(platform.clone(), store.clone(), BackfillConfig::default());
        let config = RelayConfig {
            persist_live: false,
            backfill_on_message: true,
            ..Default::default()
        };
        let relay = Relay::new(
            Arc::new(ScriptedProvider::texts(&["ok"])),
            "mock",
            registry(),
            store,
            config,
        )
        .unwrap()
        .with_backfill(engine.clone());

        relay
            .handle_inbound(
                InboundMessage::new("general", "alice", "hi").with_channel(ChannelRef::new("general")),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!platform.cursors().is_empty());
        assert_eq!(relay.statistics().await.unwrap().total_persisted, 3);
        // Completed runs release the channel
        assert!(!engine.is_running(&ChannelRef::new("general")));
        let report = engine
            .run(&ChannelRef::new("general"), &CancellationSignal::never())
            .await
            .unwrap();
        assert_eq!(report.persisted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn live_saves_leave_channel_history_to_backfill() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(dir.path()));
        let history = (1..=3).map(|n| message("general", &n.to_string(), n)).collect();
        let platform = Arc::new(HistoryPlatform::new(history));
        let engine = BackfillEngine::new(platform.clone(), store.clone(), BackfillConfig::default());
        let config = RelayConfig {
            persist_live: true,
            backfill_on_message: true,
            ..Default::default()
        };
        let relay = Relay::new(
            Arc::new(ScriptedProvider::texts(&["ok"])),
            "mock",
            registry(),
            store.clone(),
            config,
        )
        .unwrap()
        .with_backfill(engine);

        relay
            .handle_inbound(
                InboundMessage::new("general", "alice", "hi")
                    .with_channel(ChannelRef::new("general"))
                    .with_timestamp(at(4)),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(platform.cursors()[0], None);
        // three history messages, the inbound message and the reply
        assert_eq!(relay.statistics().await.unwrap().total_persisted, 5);
        let log = store.log("general").await.unwrap();
        assert_eq!(log.resume_point().await, Some(at(3)));
    }
}
