use std::future::ready;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use novus_model::{ModelMessage, ToolCallResult};
use novus_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::tool::{
    DeferredRequest, FrontendResult, FrontendTool, Registry, ResolveError,
    Tool, ToolResult,
};
use crate::{Agent, AgentBuilder, AgentStage, RetryPolicy, TranscriptSource};

static EMPTY_SCHEMA: &Value = &Value::Null;

#[derive(Deserialize)]
struct PriceInput {
    symbol: String,
}

struct PriceTool;

impl Tool for PriceTool {
    type Input = PriceInput;

    fn name(&self) -> &str {
        "get_current_stock_price"
    }

    fn description(&self) -> &str {
        "Returns the current price of a stock."
    }

    fn parameter_schema(&self) -> &Value {
        EMPTY_SCHEMA
    }

    fn execute(
        &self,
        input: PriceInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok(format!("{}: 123.45", input.symbol)))
    }
}

#[derive(Deserialize)]
struct ProverbInput {
    #[allow(dead_code)]
    proverb: String,
}

struct ProverbTool;

impl FrontendTool for ProverbTool {
    type Input = ProverbInput;

    fn name(&self) -> &str {
        "add_proverb"
    }

    fn description(&self) -> &str {
        "Adds a proverb to the wall."
    }

    fn parameter_schema(&self) -> &Value {
        EMPTY_SCHEMA
    }
}

struct Harness {
    agent: Agent,
    provider: TestModelProvider,
    idle_rx: watch::Receiver<usize>,
    deferred_rx: mpsc::UnboundedReceiver<DeferredRequest>,
    transcripts: Arc<Mutex<Vec<(String, TranscriptSource)>>>,
}

impl Harness {
    fn new(provider: TestModelProvider) -> Self {
        Self::with_builder(provider, |builder| builder)
    }

    fn with_builder(
        provider: TestModelProvider,
        f: impl FnOnce(AgentBuilder) -> AgentBuilder,
    ) -> Self {
        let mut registry = Registry::default();
        registry.register_local(PriceTool).unwrap();
        registry.register_frontend(ProverbTool).unwrap();

        let (idle_tx, idle_rx) = watch::channel(0usize);
        let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();
        let transcripts = Arc::new(Mutex::new(vec![]));

        let builder = AgentBuilder::with_model_provider(provider.clone())
            .with_system_prompt("You are a helpful assistant.")
            .with_registry(Arc::new(registry))
            .with_retry_policy(RetryPolicy::never())
            .on_idle(move || {
                idle_tx.send_modify(|turns| *turns += 1);
            })
            .on_deferred_call(move |req| {
                deferred_tx.send(req.clone()).unwrap();
            })
            .on_transcript({
                let transcripts = Arc::clone(&transcripts);
                move |text, source| {
                    transcripts.lock().unwrap().push((text.to_owned(), source));
                }
            });
        let agent = f(builder).build();

        Self {
            agent,
            provider,
            idle_rx,
            deferred_rx,
            transcripts,
        }
    }

    async fn wait_idle(&mut self, turns: usize) {
        timeout(
            Duration::from_millis(500),
            self.idle_rx.wait_for(|v| *v >= turns),
        )
        .await
        .unwrap()
        .unwrap();
    }

    async fn next_deferred(&mut self) -> DeferredRequest {
        timeout(Duration::from_millis(500), self.deferred_rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn transcripts_from(&self, source: TranscriptSource) -> Vec<String> {
        self.transcripts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == source)
            .map(|(text, _)| text.clone())
            .collect()
    }
}

fn tool_result(msg: &ModelMessage) -> &ToolCallResult {
    match msg {
        ModelMessage::Tool(result) => result,
        other => panic!("expected a tool result, got {other:?}"),
    }
}

fn frontend_result(call_id: &str, tool_name: &str, text: &str) -> FrontendResult {
    FrontendResult {
        call_id: call_id.to_owned(),
        tool_name: tool_name.to_owned(),
        result: text.to_owned(),
    }
}

#[tokio::test]
async fn test_simple_message() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi, ".to_owned()),
        PresetEvent::MessageDelta("what can I do for you?".to_owned()),
    ]));

    let mut harness = Harness::new(model_provider);
    harness.agent.enqueue_user_input("Hello").unwrap();
    harness.wait_idle(1).await;

    assert_eq!(
        harness.transcripts_from(TranscriptSource::Assistant),
        ["Hi, ", "what can I do for you?"]
    );
    assert_eq!(harness.transcripts_from(TranscriptSource::User), ["Hello"]);

    let conversation = harness.agent.conversation().await.unwrap();
    let messages: Vec<_> =
        conversation.items().iter().map(|i| i.message().clone()).collect();
    assert_eq!(
        messages,
        [
            ModelMessage::System("You are a helpful assistant.".to_owned()),
            ModelMessage::User("Hello".to_owned()),
            ModelMessage::Assistant("Hi, what can I do for you?".to_owned()),
        ]
    );

    let requests = harness.provider.requests();
    let tool_names: Vec<_> =
        requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tool_names, ["get_current_stock_price", "add_proverb"]);
    assert_eq!(
        harness.agent.stage().await.unwrap(),
        AgentStage::AwaitingUserInput
    );
}

#[tokio::test]
async fn test_local_tool_round_trip() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call(
            "call_1",
            "get_current_stock_price",
            json!({ "symbol": "NVDA" }),
        ),
    ]));
    model_provider.add_response(PresetResponse::text("NVDA trades at 123.45."));

    let stages = Arc::new(Mutex::new(vec![]));
    let mut harness = Harness::with_builder(model_provider, |builder| {
        let stages = Arc::clone(&stages);
        builder.on_stage_change(move |stage| stages.lock().unwrap().push(stage))
    });
    harness.agent.enqueue_user_input("How is NVDA doing?").unwrap();
    harness.wait_idle(1).await;

    let requests = harness.provider.requests();
    assert_eq!(requests.len(), 2);
    let result = tool_result(requests[1].messages.last().unwrap());
    assert_eq!(result.id, "call_1");
    assert_eq!(result.content, "NVDA: 123.45");

    assert_eq!(
        *stages.lock().unwrap(),
        [
            AgentStage::ModelThinking,
            AgentStage::RunningTools,
            AgentStage::ModelThinking,
            AgentStage::AwaitingUserInput,
        ]
    );
}

#[tokio::test]
async fn test_deferred_call_resumes_with_exact_result() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call(
            "call_1",
            "add_proverb",
            json!({ "proverb": "Slow and steady wins the race." }),
        ),
    ]));
    model_provider.add_response(PresetResponse::text("Added it for you."));

    let mut harness = Harness::new(model_provider);
    harness.agent.enqueue_user_input("Add a proverb").unwrap();

    let req = harness.next_deferred().await;
    assert_eq!(req.call_id, "call_1");
    assert_eq!(req.tool_name, "add_proverb");
    assert_eq!(
        harness.agent.stage().await.unwrap(),
        AgentStage::AwaitingFrontendResult
    );
    assert_eq!(harness.agent.pending_tool_calls(), [req]);

    harness
        .agent
        .resolve_tool_call(frontend_result(
            "call_1",
            "add_proverb",
            "Proverb added to the wall.",
        ))
        .unwrap();
    harness.wait_idle(1).await;

    let requests = harness.provider.requests();
    let result = tool_result(requests[1].messages.last().unwrap());
    assert_eq!(result.id, "call_1");
    assert_eq!(result.content, "Proverb added to the wall.");
    assert!(harness.agent.pending_tool_calls().is_empty());
}

#[tokio::test]
async fn test_results_keep_request_order() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call(
            "call_a",
            "add_proverb",
            json!({ "proverb": "Haste makes waste." }),
        ),
        PresetEvent::tool_call(
            "call_b",
            "add_proverb",
            json!({ "proverb": "Look before you leap." }),
        ),
    ]));
    model_provider.add_response(PresetResponse::text("Both are up."));

    let mut harness = Harness::new(model_provider);
    harness.agent.enqueue_user_input("Add two proverbs").unwrap();
    harness.next_deferred().await;
    harness.next_deferred().await;

    harness
        .agent
        .resolve_tool_call(frontend_result("call_b", "add_proverb", "second"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.provider.requests().len(), 1);
    harness
        .agent
        .resolve_tool_call(frontend_result("call_a", "add_proverb", "first"))
        .unwrap();
    harness.wait_idle(1).await;

    let requests = harness.provider.requests();
    let messages = &requests[1].messages;
    let tail: Vec<_> = messages[messages.len() - 2..]
        .iter()
        .map(|msg| {
            let result = tool_result(msg);
            (result.id.as_str(), result.content.as_str())
        })
        .collect();
    assert_eq!(tail, [("call_a", "first"), ("call_b", "second")]);
}

#[tokio::test]
async fn test_resolve_errors() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call(
            "call_1",
            "add_proverb",
            json!({ "proverb": "Every cloud has a silver lining." }),
        ),
    ]));

    let mut harness = Harness::new(model_provider);
    harness.agent.enqueue_user_input("Add a proverb").unwrap();
    harness.next_deferred().await;

    assert_eq!(
        harness
            .agent
            .resolve_tool_call(frontend_result("call_9", "add_proverb", "ok")),
        Err(ResolveError::UnknownCall("call_9".to_owned()))
    );
    assert_eq!(
        harness
            .agent
            .resolve_tool_call(frontend_result("call_1", "set_theme_color", "ok")),
        Err(ResolveError::ToolMismatch {
            call_id: "call_1".to_owned(),
            expected: "add_proverb".to_owned(),
            actual: "set_theme_color".to_owned(),
        })
    );
    // A mismatched result leaves the call pending.
    assert_eq!(harness.agent.pending_tool_calls().len(), 1);
}

#[tokio::test]
async fn test_tool_errors_reach_the_model() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call(
            "call_1",
            "get_current_stock_price",
            json!({ "symbol": 42 }),
        ),
        PresetEvent::tool_call("call_2", "read_mail", json!({})),
    ]));
    model_provider.add_response(PresetResponse::text("Let me fix that."));

    let mut harness = Harness::new(model_provider);
    harness.agent.enqueue_user_input("Price of 42?").unwrap();
    harness.wait_idle(1).await;

    let requests = harness.provider.requests();
    let messages = &requests[1].messages;
    let invalid = tool_result(&messages[messages.len() - 2]);
    assert_eq!(invalid.id, "call_1");
    assert!(invalid.content.starts_with("Error: Invalid argument: "));
    let unknown = tool_result(&messages[messages.len() - 1]);
    assert_eq!(
        unknown.content,
        "Error: Unknown tool: no tool named `read_mail` is available"
    );
}

#[tokio::test]
async fn test_model_failure_is_reported() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::text("unreachable").with_failures(0));

    let mut harness = Harness::with_builder(model_provider, |builder| {
        builder.with_retry_policy(RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed_time: Some(Duration::from_millis(20)),
        })
    });
    harness.agent.enqueue_user_input("Hello").unwrap();
    harness.wait_idle(1).await;

    assert!(harness.provider.requests().len() > 1);
    let failures = harness.transcripts_from(TranscriptSource::Failure);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("rate limit exceeded"));

    let conversation = harness.agent.conversation().await.unwrap();
    assert!(matches!(
        conversation.items().last().unwrap().message(),
        ModelMessage::User(_)
    ));
}

#[tokio::test]
async fn test_unanswered_deferred_call_times_out() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call(
            "call_1",
            "add_proverb",
            json!({ "proverb": "Patience is a virtue." }),
        ),
    ]));
    model_provider.add_response(PresetResponse::text("The wall did not answer."));

    let mut harness = Harness::with_builder(model_provider, |builder| {
        builder.with_deferred_timeout(Some(Duration::from_millis(100)))
    });
    harness.agent.enqueue_user_input("Add a proverb").unwrap();

    let request = harness.next_deferred().await;
    assert_eq!(request.call_id, "call_1");
    assert_eq!(harness.agent.pending_tool_calls(), [request]);
    harness.wait_idle(1).await;

    let requests = harness.provider.requests();
    assert_eq!(requests.len(), 2);
    let result = tool_result(requests[1].messages.last().unwrap());
    assert_eq!(result.id, "call_1");
    assert_eq!(
        result.content,
        "Error: Frontend timeout: the user interface did not respond within 100ms"
    );
    assert!(harness.agent.pending_tool_calls().is_empty());
    assert_eq!(
        harness
            .agent
            .resolve_tool_call(frontend_result("call_1", "add_proverb", "late")),
        Err(ResolveError::UnknownCall("call_1".to_owned()))
    );
}

#[tokio::test]
async fn test_rejected_request_fails_at_once() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::text("unreachable").rejected());

    let mut harness = Harness::with_builder(model_provider, |builder| {
        builder.with_retry_policy(RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed_time: Some(Duration::from_secs(30)),
        })
    });
    harness.agent.enqueue_user_input("Hello").unwrap();
    harness.wait_idle(1).await;

    assert_eq!(harness.provider.requests().len(), 1);
    let failures = harness.transcripts_from(TranscriptSource::Failure);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("scripted rejection"), "{}", failures[0]);
    assert!(failures[0].contains("request rejected"), "{}", failures[0]);
}

#[tokio::test]
async fn test_queued_input_is_processed_later() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::text("First answer."));
    model_provider.add_response(PresetResponse::text("Second answer."));

    let mut harness = Harness::new(model_provider);
    harness.agent.enqueue_user_input("First").unwrap();
    harness.agent.enqueue_user_input("Second").unwrap();
    harness.wait_idle(1).await;

    let requests = harness.provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].messages[2..],
        [
            ModelMessage::Assistant("First answer.".to_owned()),
            ModelMessage::User("Second".to_owned()),
        ]
    );
}

#[tokio::test]
async fn test_round_limit() {
    let mut model_provider = TestModelProvider::default();
    for id in ["call_1", "call_2"] {
        model_provider.add_response(PresetResponse::with_events([
            PresetEvent::tool_call(
                id,
                "get_current_stock_price",
                json!({ "symbol": "AAPL" }),
            ),
        ]));
    }

    let mut harness = Harness::with_builder(model_provider, |builder| {
        builder.with_max_rounds(2)
    });
    harness.agent.enqueue_user_input("Loop forever").unwrap();
    harness.wait_idle(1).await;

    assert_eq!(harness.provider.requests().len(), 2);
    assert_eq!(harness.transcripts_from(TranscriptSource::Failure).len(), 1);
}

#[tokio::test]
async fn test_cancel_releases_pending_calls() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::tool_call(
            "call_1",
            "add_proverb",
            json!({ "proverb": "Actions speak louder than words." }),
        ),
    ]));

    let mut harness = Harness::new(model_provider);
    harness.agent.enqueue_user_input("Add a proverb").unwrap();
    harness.next_deferred().await;
    assert_eq!(harness.agent.pending_tool_calls().len(), 1);

    harness.agent.cancel();
    timeout(Duration::from_millis(500), harness.agent.stopped())
        .await
        .unwrap();

    assert!(!harness.agent.is_alive());
    assert!(harness.agent.pending_tool_calls().is_empty());
    assert_eq!(
        harness
            .agent
            .resolve_tool_call(frontend_result("call_1", "add_proverb", "ok")),
        Err(ResolveError::UnknownCall("call_1".to_owned()))
    );
    assert!(harness.agent.enqueue_user_input("Hello?").is_err());
    assert_eq!(harness.provider.requests().len(), 1);
}
