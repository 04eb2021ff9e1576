//! HTTP route handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use codebox_core::api::{
    explain_or_fallback, DispatchEvent, DispatchEventKind, ExplainRequest, Explanation, Job, JobId,
    Lifecycle,
};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;

use crate::http::{models::*, state::AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/jobs", post(submit_handler))
        .route("/api/v1/jobs/:id", get(job_handler))
        .route("/api/v1/jobs/:id/events", get(job_events_handler))
        .route("/api/v1/explain", post(explain_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/shutdown", post(shutdown_handler))
        .with_state(state)
}

/// POST /api/v1/jobs
async fn submit_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), HttpServerError> {
    state.record_request("/api/v1/jobs");

    if state.dispatcher.lifecycle() == Lifecycle::Stopped {
        state.record_error();
        return Err(HttpServerError::Unavailable("dispatcher is stopped".into()));
    }

    // Registering under the ledger lock keeps the pump from applying this
    // job's first event before the job exists.
    let job_id = {
        let mut ledger = state.ledger();
        let id = state.dispatcher.submit(req.source.clone());
        ledger.register(id.clone(), req.source);
        id
    };
    tracing::debug!(target: "codebox.http", job_id = %job_id, "job accepted");

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

/// GET /api/v1/jobs/:id
async fn job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, HttpServerError> {
    state.record_request("/api/v1/jobs/:id");
    let id = JobId::from(id);
    let job = state.ledger().get(&id).cloned();
    job.map(Json).ok_or_else(|| {
        state.record_error();
        HttpServerError::NotFound(id.to_string())
    })
}

/// Events that reproduce what already happened to `job`.
fn replay_events(job: &Job) -> Vec<DispatchEvent> {
    let mut events = Vec::new();
    // jobs closed straight from the queue never started
    if job.started_at.is_some() {
        events.push(DispatchEvent::new(job.id.clone(), DispatchEventKind::Started));
    }
    events.extend(
        job.output
            .iter()
            .cloned()
            .map(|line| DispatchEvent::output(job.id.clone(), line)),
    );
    if let Some(record) = job.terminal_record() {
        events.push(DispatchEvent::finished(job.id.clone(), record));
    }
    events
}

fn sse_event(event: &DispatchEvent) -> Result<Event, axum::Error> {
    let name = match event.kind {
        DispatchEventKind::Started => "started",
        DispatchEventKind::Output { .. } => "output",
        DispatchEventKind::Finished { .. } => "finished",
    };
    Event::default().event(name).json_data(event)
}

/// GET /api/v1/jobs/:id/events
async fn job_events_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, HttpServerError> {
    state.record_request("/api/v1/jobs/:id/events");
    let id = JobId::from(id);

    // Snapshot and subscribe under one lock so no event falls in between.
    let (replay, mut updates) = {
        let ledger = state.ledger();
        let Some(job) = ledger.get(&id) else {
            state.record_error();
            return Err(HttpServerError::NotFound(id.to_string()));
        };
        (replay_events(job), state.updates.subscribe())
    };
    let finished = replay.last().is_some_and(DispatchEvent::is_terminal);

    let stream = async_stream::stream! {
        for event in &replay {
            yield sse_event(event);
        }
        if !finished {
            loop {
                match updates.recv().await {
                    Ok(event) if event.job_id == id => {
                        let terminal = event.is_terminal();
                        yield sse_event(&event);
                        if terminal {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            target: "codebox.http",
                            job_id = %id,
                            skipped,
                            "event subscriber lagged"
                        );
                        yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /api/v1/explain
async fn explain_handler(
    State(state): State<AppState>,
    Json(req): Json<ExplainBody>,
) -> Json<Explanation> {
    state.record_request("/api/v1/explain");
    let Some(explainer) = state.services.explainer.as_ref() else {
        return Json(Explanation::fallback());
    };
    let request = ExplainRequest::from_detail(&req.source, &req.error);
    Json(explain_or_fallback(explainer.as_ref(), &request).await)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let lifecycle = state.dispatcher.lifecycle();
    let stats = state.stats.read().unwrap_or_else(|p| p.into_inner());
    let status = match lifecycle {
        Lifecycle::Ready => "healthy",
        Lifecycle::Stopped => "stopped",
        Lifecycle::Cold | Lifecycle::Initializing => "starting",
    };

    Json(HealthResponse {
        status: status.into(),
        ready: lifecycle == Lifecycle::Ready,
        lifecycle,
        session_id: state.session_id.clone(),
        uptime_seconds: stats.uptime_seconds(),
        requests_handled: stats.requests_total,
        timestamp: Local::now().to_rfc3339(),
    })
}

/// POST /api/v1/shutdown
async fn shutdown_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let _ = state.shutdown_tx.send(());

    Json(serde_json::json!({
        "success": true,
        "message": "Shutdown signal sent"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use codebox_core::api::{
        Dispatcher, DispatcherConfig, ErrorDetail, ErrorExplainer, ExplainError, JobStatus,
    };
    use codebox_plugins::Services;
    use codebox_testkit::ScriptedFactory;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    struct CannedExplainer;

    #[async_trait]
    impl ErrorExplainer for CannedExplainer {
        fn name(&self) -> &str {
            "canned"
        }

        async fn explain(&self, req: &ExplainRequest) -> Result<Explanation, ExplainError> {
            req.validate()?;
            Ok(Explanation {
                friendly_message: format!("{} happened", req.error.error_type),
                fix_suggestion: "fix it".into(),
                corrected_line: None,
            })
        }
    }

    fn test_state(services: Services) -> AppState {
        let (dispatcher, events) =
            Dispatcher::start(DispatcherConfig::default(), Arc::new(ScriptedFactory::new()));
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = AppState::new("test-session".into(), dispatcher, services, 16, shutdown_tx);
        state.spawn_event_pump(events, None);
        state
    }

    async fn wait_finished(state: &AppState, id: &JobId) -> Job {
        for _ in 0..200 {
            if let Some(job) = state.ledger().get(id).filter(|j| j.is_finished()) {
                return job.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never finished");
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_fetch_job() {
        let state = test_state(Services::default());
        let (status, Json(resp)) = submit_handler(
            State(state.clone()),
            Json(SubmitRequest {
                source: "print a\neprint b".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        let job = wait_finished(&state, &resp.job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output.len(), 2);
        assert_eq!(job.output[1].text, "b");

        let Json(fetched) = job_handler(State(state.clone()), Path(resp.job_id.to_string()))
            .await
            .unwrap();
        assert_eq!(fetched.id, resp.job_id);
        assert_eq!(state.stats.read().unwrap().requests_total, 2);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let app = create_router(test_state(Services::default()));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/jobs/exec_missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_event_stream_of_finished_job() {
        let state = test_state(Services::default());
        let (_, Json(resp)) = submit_handler(
            State(state.clone()),
            Json(SubmitRequest {
                source: "print one\nraise ValueError: bad @2".into(),
            }),
        )
        .await
        .unwrap();
        wait_finished(&state, &resp.job_id).await;

        let app = create_router(state);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/jobs/{}/events", resp.job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_string(resp).await;
        let names: Vec<&str> = body
            .lines()
            .filter_map(|l| l.strip_prefix("event: "))
            .collect();
        assert_eq!(names, vec!["started", "output", "finished"]);
        assert!(body.contains("\"error_type\":\"ValueError\""));
    }

    #[tokio::test]
    async fn test_event_stream_follows_running_job() {
        let state = test_state(Services::default());
        let (_, Json(resp)) = submit_handler(
            State(state.clone()),
            Json(SubmitRequest {
                source: "print early\nsleep 50\nprint late".into(),
            }),
        )
        .await
        .unwrap();

        let app = create_router(state);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/jobs/{}/events", resp.job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_string(resp).await;
        let early = body.find("early").unwrap();
        let late = body.find("late").unwrap();
        assert!(early < late);
        assert!(body.trim_end().ends_with('}'));
        assert_eq!(body.matches("event: finished").count(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_unavailable() {
        let state = test_state(Services::default());
        state.dispatcher.shutdown();
        state.dispatcher.stopped().await;

        let result = submit_handler(
            State(state.clone()),
            Json(SubmitRequest {
                source: "print x".into(),
            }),
        )
        .await;
        assert!(matches!(result, Err(HttpServerError::Unavailable(_))));
        assert_eq!(state.stats.read().unwrap().errors_total, 1);
    }

    #[tokio::test]
    async fn test_explain_uses_configured_explainer() {
        let services = Services {
            explainer: Some(Arc::new(CannedExplainer)),
        };
        let state = test_state(services);
        let Json(expl) = explain_handler(
            State(state),
            Json(ExplainBody {
                source: "print(x)".into(),
                error: ErrorDetail {
                    error_type: "NameError".into(),
                    message: "name 'x' is not defined".into(),
                    line_number: 1,
                    line_text: "print(x)".into(),
                },
            }),
        )
        .await;
        assert_eq!(expl.friendly_message, "NameError happened");
    }

    #[tokio::test]
    async fn test_explain_without_explainer_falls_back() {
        let state = test_state(Services::default());
        let Json(expl) = explain_handler(
            State(state),
            Json(ExplainBody {
                source: String::new(),
                error: ErrorDetail::timeout(10_000),
            }),
        )
        .await;
        assert_eq!(expl, Explanation::fallback());
    }

    #[tokio::test]
    async fn test_health_handler() {
        let state = test_state(Services::default());
        state.dispatcher.wait_ready().await;
        let response = health_handler(State(state.clone())).await;

        assert_eq!(response.0.status, "healthy");
        assert!(response.0.ready);
        assert_eq!(response.0.session_id, "test-session");
        assert!(response.0.uptime_seconds >= 0.0);
    }

    #[tokio::test]
    async fn test_shutdown_handler() {
        let state = test_state(Services::default());
        let mut shutdown_rx = state.shutdown_tx.subscribe();

        let response = shutdown_handler(State(state)).await;
        assert_eq!(response.0["success"], true);
        assert!(shutdown_rx.try_recv().is_ok());
    }
}
