//! Client sessions and the table that keeps them alive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use novus_core::tool::{DeferredRequest, Registry, ToolSpec};
use novus_core::{Agent, AgentBuilder, AgentStage, RetryPolicy, TranscriptSource};
use novus_model::ModelProvider;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

/// Something that happened in a session, as pushed to its clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Text for the chat log. Assistant text arrives in deltas.
    Transcript {
        /// The text.
        text: String,
        /// Who it comes from.
        source: TranscriptSource,
    },
    /// The agent moved to another stage.
    Stage {
        /// The new stage.
        stage: AgentStage,
    },
    /// The client has to perform a frontend tool call and post its result.
    ToolCall(DeferredRequest),
    /// The agent has finished every queued turn.
    Idle,
}

impl SessionEvent {
    /// Returns the SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Transcript { .. } => "transcript",
            SessionEvent::Stage { .. } => "stage",
            SessionEvent::ToolCall(_) => "tool_call",
            SessionEvent::Idle => "idle",
        }
    }
}

/// Options applied to every new session.
#[derive(Clone, Debug, Default)]
pub struct SessionSettings {
    /// Instructions sent ahead of each conversation.
    pub system_prompt: String,
    /// Retry schedule of model requests.
    pub retry_policy: RetryPolicy,
    /// How long a deferred call waits for the client.
    pub deferred_timeout: Option<Duration>,
}

type BuilderFn = dyn Fn() -> AgentBuilder + Send + Sync;

/// Creates fully configured sessions.
///
/// The model provider and the tool registry are shared by every session,
/// nothing else is.
pub struct SessionFactory {
    new_builder: Box<BuilderFn>,
    registry: Arc<Registry>,
    settings: SessionSettings,
}

impl SessionFactory {
    /// Creates a factory.
    pub fn new<P>(
        provider: P,
        registry: Arc<Registry>,
        settings: SessionSettings,
    ) -> Self
    where
        P: ModelProvider + Clone + 'static,
    {
        Self {
            new_builder: Box::new(move || {
                AgentBuilder::with_model_provider(provider.clone())
            }),
            registry,
            settings,
        }
    }

    /// Returns the tools every session offers to the model.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates a new session with a fresh id.
    pub fn create(&self) -> Session {
        let id = Uuid::new_v4().to_string();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let agent = (self.new_builder)()
            .with_system_prompt(self.settings.system_prompt.clone())
            .with_registry(Arc::clone(&self.registry))
            .with_retry_policy(self.settings.retry_policy)
            .with_deferred_timeout(self.settings.deferred_timeout)
            .on_transcript({
                let events = events.clone();
                move |text, source| {
                    events
                        .send(SessionEvent::Transcript {
                            text: text.to_owned(),
                            source,
                        })
                        .ok();
                }
            })
            .on_stage_change({
                let events = events.clone();
                move |stage| {
                    events.send(SessionEvent::Stage { stage }).ok();
                }
            })
            .on_deferred_call({
                let events = events.clone();
                move |request| {
                    events.send(SessionEvent::ToolCall(request.clone())).ok();
                }
            })
            .on_idle({
                let events = events.clone();
                move || {
                    events.send(SessionEvent::Idle).ok();
                }
            })
            .build();

        info!("session {id} created");
        Session {
            id,
            agent,
            events,
            last_seen: Mutex::new(Instant::now()),
        }
    }
}

/// A chat session, like a window that displays messages and has an input
/// box.
///
/// The session owns one agent and fans its callbacks out to any number of
/// event subscribers.
pub struct Session {
    id: String,
    agent: Agent,
    events: broadcast::Sender<SessionEvent>,
    last_seen: Mutex<Instant>,
}

impl Session {
    /// Returns the session id.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the agent of this session.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Subscribes to the events emitted from now on.
    #[inline]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.touch();
        self.events.subscribe()
    }

    /// Records client activity, which keeps the session from being swept.
    pub fn touch(&self) {
        *self.lock_last_seen() = Instant::now();
    }

    /// Returns how long the session has gone without a client.
    ///
    /// A session with a live event subscriber is never idle.
    pub fn idle_for(&self) -> Option<Duration> {
        let mut last_seen = self.lock_last_seen();
        if self.events.receiver_count() > 0 {
            *last_seen = Instant::now();
            return None;
        }
        Some(last_seen.elapsed())
    }

    fn lock_last_seen(&self) -> MutexGuard<'_, Instant> {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.agent.cancel();
    }
}

/// The live sessions of the server.
pub struct Sessions {
    factory: SessionFactory,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl Sessions {
    /// Creates an empty table.
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            factory,
            sessions: Default::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a session and adds it to the table.
    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(self.factory.create());
        self.lock()
            .insert(session.id().to_owned(), Arc::clone(&session));
        session
    }

    /// Returns the session with this id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    /// Removes a session and cancels its agent.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.lock().remove(id)?;
        session.agent().cancel();
        info!("session {id} removed");
        Some(session)
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if there is no live session.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Describes the tools offered to the model, in presentation order.
    #[inline]
    pub fn tools(&self) -> Vec<ToolSpec> {
        self.factory.registry().describe_all()
    }

    /// Removes every session that has been idle for at least `grace`, which
    /// cancels its agent and releases its pending calls. Returns the ids of
    /// the removed sessions.
    pub fn sweep(&self, grace: Duration) -> Vec<String> {
        let expired: Vec<_> = self
            .lock()
            .values()
            .filter(|session| session.idle_for().is_some_and(|idle| idle >= grace))
            .map(|session| session.id().to_owned())
            .collect();
        for id in &expired {
            info!("session {id} idle for {grace:?}, removing");
            self.remove(id);
        }
        expired
    }

    /// Spawns a task that sweeps idle sessions until the table is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, grace: Duration) -> JoinHandle<()> {
        let sessions = Arc::downgrade(self);
        let period = (grace / 4).max(MIN_SWEEP_PERIOD);
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(sessions) = Weak::upgrade(&sessions) else {
                    break;
                };
                sessions.sweep(grace);
            }
            debug!("session sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use novus_test_model::{PresetResponse, TestModelProvider};
    use serde_json::json;
    use tokio::time::timeout;

    use super::*;

    async fn next_event(
        rx: &mut broadcast::Receiver<SessionEvent>,
    ) -> SessionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for an event")
            .unwrap()
    }

    fn sessions(provider: TestModelProvider) -> Sessions {
        let settings = SessionSettings {
            system_prompt: "You are a helpful assistant.".to_owned(),
            ..Default::default()
        };
        Sessions::new(SessionFactory::new(
            provider,
            Default::default(),
            settings,
        ))
    }

    #[test]
    fn test_event_wire_format() {
        let event = SessionEvent::Transcript {
            text: "Hello".to_owned(),
            source: TranscriptSource::Assistant,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "transcript", "text": "Hello", "source": "assistant" })
        );

        let event = SessionEvent::ToolCall(DeferredRequest {
            call_id: "call_1".to_owned(),
            tool_name: "set_theme_color".to_owned(),
            arguments: json!({ "theme_color": "indigo" }),
        });
        assert_eq!(event.name(), "tool_call");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "tool_call",
                "callId": "call_1",
                "toolName": "set_theme_color",
                "arguments": { "theme_color": "indigo" },
            })
        );

        let event = SessionEvent::Stage {
            stage: AgentStage::AwaitingFrontendResult,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "stage", "stage": "awaiting_frontend_result" })
        );
    }

    #[tokio::test]
    async fn test_session_events() {
        let mut provider = TestModelProvider::default();
        provider.add_response(PresetResponse::text("Hi there!"));

        let sessions = sessions(provider);
        let session = sessions.create();
        let mut rx = session.subscribe();
        session.agent().enqueue_user_input("Hello").unwrap();

        let mut events = vec![];
        loop {
            let event = next_event(&mut rx).await;
            let done = event == SessionEvent::Idle;
            events.push(event);
            if done {
                break;
            }
        }

        assert_eq!(
            events[0],
            SessionEvent::Transcript {
                text: "Hello".to_owned(),
                source: TranscriptSource::User,
            }
        );
        assert!(events.contains(&SessionEvent::Stage {
            stage: AgentStage::ModelThinking
        }));
        let reply: String = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Transcript {
                    text,
                    source: TranscriptSource::Assistant,
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(reply, "Hi there!");
    }

    #[tokio::test]
    async fn test_sweep_keeps_subscribed_sessions() {
        let sessions = sessions(TestModelProvider::default());
        let watched = sessions.create();
        let rx = watched.subscribe();
        let abandoned = sessions.create();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(watched.idle_for(), None);
        assert!(abandoned.idle_for().unwrap() >= Duration::from_millis(20));

        let removed = sessions.sweep(Duration::from_millis(10));
        assert_eq!(removed, [abandoned.id().to_owned()]);
        assert!(sessions.get(abandoned.id()).is_none());
        timeout(Duration::from_secs(5), abandoned.agent().stopped())
            .await
            .unwrap();

        // Activity restarts the clock once the last subscriber is gone.
        drop(rx);
        watched.touch();
        assert!(sessions.sweep(Duration::from_secs(60)).is_empty());
        assert!(sessions.get(watched.id()).is_some());
    }

    #[tokio::test]
    async fn test_remove_cancels_agent() {
        let sessions = sessions(TestModelProvider::default());
        let session = sessions.create();
        assert_eq!(sessions.len(), 1);
        assert!(sessions.get(session.id()).is_some());

        let removed = sessions.remove(session.id()).unwrap();
        timeout(Duration::from_secs(5), removed.agent().stopped())
            .await
            .unwrap();
        assert!(!session.agent().is_alive());
        assert!(sessions.is_empty());
        assert!(sessions.remove(session.id()).is_none());
    }
}
