//! End-to-end behaviour of the dispatch service: queue ordering, retry and
//! fallback, cooldown bookkeeping, metrics and status events.

use async_trait::async_trait;
use futures::future::join_all;
use parple_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse};
use parple_dispatch::{
    Assistant, DegradeReason, DispatchConfig, DispatchEvent, DispatchOutcome, DispatchService,
};
use parple_models::ScriptedModel;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const PRIMARY: &str = "gemini-1.5-flash";
const FALLBACK: &str = "gemini-1.5-flash-8b";

/// Model that records when each call starts and how many overlap.
struct ProbeModel {
    id: String,
    latencies: Mutex<VecDeque<Duration>>,
    starts: Mutex<Vec<(String, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ProbeModel {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            latencies: Mutex::new(VecDeque::new()),
            starts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_latencies(self, latencies: &[u64]) -> Self {
        self.latencies.lock().unwrap().extend(latencies.iter().map(|ms| Duration::from_millis(*ms)));
        self
    }

    fn started_prompts(&self) -> Vec<String> {
        self.starts.lock().unwrap().iter().map(|(prompt, _)| prompt.clone()).collect()
    }

    fn start_times(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl Model for ProbeModel {
    async fn generate_text(
        &self,
        prompt: &str,
        _parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        self.starts.lock().unwrap().push((prompt.to_string(), Instant::now()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = self.latencies.lock().unwrap().pop_front().unwrap_or(Duration::from_millis(50));
        tokio::time::sleep(latency).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ModelResponse { content: format!("ok from {}", self.id), model_id: Some(self.id.clone()), usage: None })
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.generate_text(&last, parameters).await
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

fn quota_error() -> ModelError {
    ModelError::ModelResponseError("429 rate limit".to_string())
}

fn service_with(config: DispatchConfig, primary: Arc<dyn Model>, fallback: Arc<dyn Model>) -> DispatchService {
    DispatchService::new(config, primary, fallback).unwrap()
}

fn single_attempt() -> DispatchConfig {
    DispatchConfig { max_retries: 1, ..Default::default() }
}

fn status_of(service: &DispatchService, model: &str) -> parple_dispatch::ModelStatusSnapshot {
    service.get_model_status().models.into_iter().find(|m| m.model == model).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_requests_start_in_fifo_order_one_at_a_time() {
    let probe = Arc::new(ProbeModel::new(PRIMARY));
    let service = service_with(DispatchConfig::default(), probe.clone(), Arc::new(ScriptedModel::new(FALLBACK)));

    let questions: Vec<String> = (0..5).map(|i| format!("question-{i}")).collect();
    let answers = join_all(questions.iter().map(|q| service.generate_response(q))).await;

    assert!(answers.iter().all(|a| a == "ok from gemini-1.5-flash"));
    let started = probe.started_prompts();
    for (i, prompt) in started.iter().enumerate() {
        assert!(prompt.ends_with(&format!("question-{i}")), "entry {i} started out of order: {prompt}");
    }
    assert_eq!(started.len(), 5);
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_delay_between_queued_requests() {
    let probe = Arc::new(ProbeModel::new(PRIMARY));
    let service = service_with(DispatchConfig::default(), probe.clone(), Arc::new(ScriptedModel::new(FALLBACK)));

    join_all((0..3).map(|_| service.generate_companion_response("hi"))).await;

    let starts = probe.start_times();
    for pair in starts.windows(2) {
        // 50 ms of work plus the 1000 ms pause.
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(1050));
    }
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_queue_while_draining() {
    let probe = Arc::new(ProbeModel::new(PRIMARY).with_latencies(&[500, 500, 500]));
    let service = service_with(DispatchConfig::default(), probe, Arc::new(ScriptedModel::new(FALLBACK)));

    let background = service.clone();
    let handle = tokio::spawn(async move {
        join_all((0..3).map(|_| background.generate_response("busy"))).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = service.get_model_status();
    assert!(status.is_processing);
    assert_eq!(status.queue_length, 2);

    handle.await.unwrap();
    tokio::task::yield_now().await;
    let status = service.get_model_status();
    assert!(!status.is_processing);
    assert_eq!(status.queue_length, 0);
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_model_attempted_twice_then_apology() {
    let primary = Arc::new(ScriptedModel::failing(PRIMARY, ModelError::RequestError("connection refused".to_string())));
    let service = service_with(DispatchConfig::default(), primary.clone(), Arc::new(ScriptedModel::new(FALLBACK)));

    let text = service.generate_response("What is a MOSFET?").await;

    assert_eq!(text, Assistant::Study.fallback_text());
    assert_eq!(primary.call_count(), 2);
    let metrics = service.get_optimization_metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_outcome_is_distinguishable() {
    let primary = Arc::new(ScriptedModel::failing(PRIMARY, quota_error()));
    let service = service_with(DispatchConfig::default(), primary, Arc::new(ScriptedModel::new(FALLBACK)));

    let outcome = service.generate_companion_response_outcome("hey Bella").await;

    match outcome {
        DispatchOutcome::Degraded { text, reason: DegradeReason::QuotaExhausted { model, message } } => {
            assert_eq!(text, Assistant::Companion.fallback_text());
            assert_eq!(model, PRIMARY);
            assert!(message.contains("429 rate limit"));
        }
        other => panic!("expected quota degradation, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_quota_failures_in_one_call_stay_below_threshold() {
    let primary = Arc::new(ScriptedModel::failing(PRIMARY, quota_error()));
    let fallback = Arc::new(ScriptedModel::new(FALLBACK));
    let service = service_with(DispatchConfig::default(), primary.clone(), fallback.clone());

    service.generate_response("first").await;

    let status = status_of(&service, PRIMARY);
    assert_eq!(status.error_count, 2);
    assert!(!status.in_cooldown);
    // Both attempts re-selected the primary because it was not cooling down.
    assert_eq!(primary.call_count(), 2);
    assert_eq!(fallback.call_count(), 0);
    assert_eq!(service.get_optimization_metrics().quota_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_accumulates_across_calls() {
    let primary = Arc::new(ScriptedModel::failing(PRIMARY, quota_error()));
    let fallback = Arc::new(ScriptedModel::replying(FALLBACK, "fallback answer"));
    let service = service_with(single_attempt(), primary.clone(), fallback.clone());

    for expected_count in 1..=2 {
        service.generate_response("again").await;
        let status = status_of(&service, PRIMARY);
        assert_eq!(status.error_count, expected_count);
        assert!(!status.in_cooldown);
    }

    service.generate_response("third").await;
    let status = status_of(&service, PRIMARY);
    assert!(status.in_cooldown);
    assert_eq!(status.error_count, 0);
    assert!(status.cooldown_remaining_ms > 0);

    assert_eq!(service.get_current_model(), FALLBACK);
    let outcome = service.generate_response_outcome("fourth").await;
    assert!(matches!(outcome, DispatchOutcome::Answered { used_fallback: true, .. }));
    assert_eq!(primary.call_count(), 3);
    assert_eq!(fallback.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_expires_and_primary_returns() {
    let primary = Arc::new(
        ScriptedModel::replying(PRIMARY, "primary is back")
            .then_fail(quota_error())
            .then_fail(quota_error())
            .then_fail(quota_error()),
    );
    let service = service_with(single_attempt(), primary, Arc::new(ScriptedModel::new(FALLBACK)));

    for _ in 0..3 {
        service.generate_response("q").await;
    }
    assert_eq!(service.get_current_model(), FALLBACK);

    tokio::time::advance(Duration::from_secs(5 * 60) + Duration::from_millis(1)).await;

    assert_eq!(service.get_current_model(), PRIMARY);
    assert_eq!(service.generate_response("q").await, "primary is back");
}

#[tokio::test(start_paused = true)]
async fn test_both_models_cooling_down_uses_primary_as_last_resort() {
    let primary = Arc::new(ScriptedModel::failing(PRIMARY, quota_error()));
    let fallback = Arc::new(ScriptedModel::failing(FALLBACK, quota_error()));
    let service = service_with(single_attempt(), primary.clone(), fallback.clone());

    // Three calls cool the primary down, the next three cool the fallback down.
    for _ in 0..6 {
        service.generate_response("q").await;
    }
    assert!(status_of(&service, PRIMARY).in_cooldown);
    assert!(status_of(&service, FALLBACK).in_cooldown);

    assert_eq!(service.get_current_model(), PRIMARY);
    let text = service.generate_response("q").await;
    assert_eq!(text, Assistant::Study.fallback_text());
    assert_eq!(primary.call_count(), 4);
    assert_eq!(fallback.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_average_response_time_is_mean_of_successes() {
    let probe = Arc::new(ProbeModel::new(PRIMARY).with_latencies(&[100, 300, 500, 700]));
    let service = service_with(DispatchConfig::default(), probe, Arc::new(ScriptedModel::new(FALLBACK)));

    for _ in 0..4 {
        service.generate_response("time me").await;
    }

    let metrics = service.get_optimization_metrics();
    assert_eq!(metrics.successful_requests, 4);
    assert!((metrics.average_response_time_ms - 400.0).abs() < 1.0, "average was {}", metrics.average_response_time_ms);

    let report = service.get_metrics_report();
    assert!((report.success_rate - 1.0).abs() < f64::EPSILON);
    assert_eq!(report.recommendations, vec!["Operating normally".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_reset_model_status_is_idempotent() {
    let primary = Arc::new(ScriptedModel::failing(PRIMARY, quota_error()));
    let fallback = Arc::new(ScriptedModel::failing(FALLBACK, quota_error()));
    let service = service_with(single_attempt(), primary, fallback);

    for _ in 0..5 {
        service.generate_response("q").await;
    }

    service.reset_model_status(None);
    let first = service.get_model_status().models;
    service.reset_model_status(None);
    let second = service.get_model_status().models;

    assert_eq!(first, second);
    for model in second {
        assert_eq!(model.error_count, 0);
        assert!(!model.in_cooldown);
        assert!(model.last_used.is_none());
    }
    assert_eq!(service.get_current_model(), PRIMARY);
}

#[tokio::test(start_paused = true)]
async fn test_reset_metrics() {
    let service = service_with(
        DispatchConfig::default(),
        Arc::new(ScriptedModel::new(PRIMARY)),
        Arc::new(ScriptedModel::new(FALLBACK)),
    );
    service.generate_response("q").await;
    assert_eq!(service.get_optimization_metrics().total_requests, 1);

    service.reset_metrics();

    let metrics = service.get_optimization_metrics();
    assert_eq!(metrics.total_requests, 0);
    assert_eq!(metrics.successful_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_see_state_changes() {
    let primary = Arc::new(ScriptedModel::failing(PRIMARY, quota_error()));
    let service = service_with(single_attempt(), primary, Arc::new(ScriptedModel::new(FALLBACK)));
    let mut events = service.subscribe();

    for _ in 0..3 {
        service.generate_response("q").await;
    }

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(seen.iter().any(|e| matches!(e, DispatchEvent::QueueDepthChanged { processing: true, .. })));
    assert_eq!(seen.iter().filter(|e| matches!(e, DispatchEvent::ModelFailed { .. })).count(), 3);
    assert!(seen.contains(&DispatchEvent::CooldownStarted { model: PRIMARY.to_string(), cooldown_ms: 300_000 }));
    assert!(
        seen.iter().any(|e| matches!(e, DispatchEvent::MetricsUpdated { metrics } if metrics.failed_requests == 3))
    );
}
