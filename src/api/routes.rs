use super::dto::{
    CancelOrderRequest, CandlesQuery, EventsStreamQuery, HealthResponse, OrderActionAccepted, OrderEvent,
    OrdersQuery, PlaceOrderRequest,
};
use super::ApiState;
use crate::error::{WeaverError, WeaverResult};
use crate::event_log::{EventType, QueryFilter};
use crate::model::envelope::EnvelopeDraft;
use crate::model::{CreateRunRequest, Run, StrategyAction};
use crate::sse::SseFrame;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const ORDER_EVENT_TYPES: [EventType; 8] = [
    EventType::OrdersCreated,
    EventType::OrdersSubmitted,
    EventType::OrdersAccepted,
    EventType::OrdersPartiallyFilled,
    EventType::OrdersFilled,
    EventType::OrdersCancelled,
    EventType::OrdersRejected,
    EventType::OrdersExpired,
];

fn correlation_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/runs", get(list_runs).post(create_run))
        .route("/api/v1/runs/:id", get(get_run).delete(delete_run))
        .route("/api/v1/runs/:id/start", post(start_run))
        .route("/api/v1/runs/:id/stop", post(stop_run))
        .route("/api/v1/runs/:id/stats", get(get_run_stats))
        .route("/api/v1/orders", get(list_orders).post(place_order))
        .route("/api/v1/orders/cancel", post(cancel_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/candles", get(get_candles))
        .route("/api/v1/events/stream", get(stream_events))
        .with_state(state)
        .layer(axum::middleware::from_fn(super::middleware::correlation_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn list_runs(State(state): State<Arc<ApiState>>) -> Json<Vec<Run>> {
    Json(state.run_manager.list_runs())
}

async fn create_run(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateRunRequest>,
) -> WeaverResult<(StatusCode, Json<Run>)> {
    let run = state.run_manager.create_run(req).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn get_run(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> WeaverResult<Json<Run>> {
    Ok(Json(state.run_manager.get_run(&id)?))
}

async fn delete_run(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> WeaverResult<StatusCode> {
    state.run_manager.delete_run(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_run(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> WeaverResult<StatusCode> {
    state.run_manager.start_run(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_run(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> WeaverResult<StatusCode> {
    state.run_manager.stop_run(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_run_stats(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> WeaverResult<impl IntoResponse> {
    state.run_manager.get_run(&id)?;
    match state.run_manager.get_stats(&id) {
        Some(stats) => Ok(Json(stats).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Publishes a mode-agnostic order intent; the Domain Router translates it into
/// `backtest.PlaceOrder` or `live.PlaceOrder` depending on the run's mode. Idempotent on
/// `client_order_id` downstream, so a retried POST with the same id is always safe.
async fn place_order(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderRequest>,
) -> WeaverResult<(StatusCode, Json<OrderActionAccepted>)> {
    state.run_manager.get_run(&req.run_id)?;
    let action = StrategyAction::PlaceOrder {
        client_order_id: req.client_order_id,
        symbol: req.symbol,
        side: req.side,
        order_type: req.order_type,
        qty: req.qty,
        limit_price: req.limit_price,
        stop_price: req.stop_price,
        time_in_force: req.time_in_force,
    };
    let mut draft = EnvelopeDraft::new(
        EventType::StrategyPlaceRequest,
        "api",
        Some(req.run_id),
        serde_json::to_value(&action).expect("StrategyAction always serializes"),
    );
    if let Some(cid) = correlation_id(&headers) {
        draft = draft.with_correlation_id(cid);
    }
    let envelope = state.event_log.append(draft).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(OrderActionAccepted {
            accepted: true,
            correlation_id: envelope.correlation_id,
        }),
    ))
}

async fn cancel_order(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<CancelOrderRequest>,
) -> WeaverResult<(StatusCode, Json<OrderActionAccepted>)> {
    state.run_manager.get_run(&req.run_id)?;
    let action = StrategyAction::CancelOrder {
        client_order_id: req.client_order_id,
    };
    let mut draft = EnvelopeDraft::new(
        EventType::StrategyCancelRequest,
        "api",
        Some(req.run_id),
        serde_json::to_value(&action).expect("StrategyAction always serializes"),
    );
    if let Some(cid) = correlation_id(&headers) {
        draft = draft.with_correlation_id(cid);
    }
    let envelope = state.event_log.append(draft).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(OrderActionAccepted {
            accepted: true,
            correlation_id: envelope.correlation_id,
        }),
    ))
}

async fn list_orders(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<OrdersQuery>,
) -> WeaverResult<Json<Vec<OrderEvent>>> {
    state.run_manager.get_run(&q.run_id)?;
    let envelopes = state
        .event_log
        .query(QueryFilter {
            types: ORDER_EVENT_TYPES.to_vec(),
            run_id: Some(q.run_id),
            since: None,
            until: None,
            limit: None,
        })
        .await?;
    Ok(Json(
        envelopes
            .into_iter()
            .map(|e| OrderEvent {
                offset: e.offset,
                event_type: e.event_type.as_str().to_string(),
                appended_at: e.appended_at,
                payload: e.payload,
            })
            .collect(),
    ))
}

async fn get_order(
    State(state): State<Arc<ApiState>>,
    Path(order_id): Path<String>,
    Query(q): Query<OrdersQuery>,
) -> WeaverResult<Json<Vec<OrderEvent>>> {
    state.run_manager.get_run(&q.run_id)?;
    let envelopes = state
        .event_log
        .query(QueryFilter {
            types: ORDER_EVENT_TYPES.to_vec(),
            run_id: Some(q.run_id),
            since: None,
            until: None,
            limit: None,
        })
        .await?;
    let matching: Vec<OrderEvent> = envelopes
        .into_iter()
        .filter(|e| e.payload.get("order_id").and_then(|v| v.as_str()) == Some(order_id.as_str()))
        .map(|e| OrderEvent {
            offset: e.offset,
            event_type: e.event_type.as_str().to_string(),
            appended_at: e.appended_at,
            payload: e.payload,
        })
        .collect();
    if matching.is_empty() {
        return Err(WeaverError::NotFound(format!("no such order {order_id}")));
    }
    Ok(Json(matching))
}

async fn get_candles(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<CandlesQuery>,
) -> WeaverResult<impl IntoResponse> {
    let timeframe: crate::model::Timeframe = q
        .timeframe
        .parse()
        .map_err(|e: String| WeaverError::Validation(e))?;
    let bars = state
        .bar_repository
        .get_bars(&q.symbol, timeframe, q.start, q.end)
        .await?;
    Ok(Json(bars))
}

/// `Last-Event-ID` is the browser `EventSource` reconnection contract: on reconnect it
/// resends the id of the last event it saw, and we resume from just after it.
async fn stream_events(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<EventsStreamQuery>,
    headers: HeaderMap,
) -> WeaverResult<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>> {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let frames = state.sse.subscribe(q.run_id, last_event_id).await?;
    let events = frames.map(|frame| {
        Ok(match frame {
            SseFrame::Event(envelope) => SseEvent::default()
                .id(envelope.offset.to_string())
                .event(envelope.event_type.as_str())
                .json_data(&envelope)
                .unwrap_or_else(|_| SseEvent::default().event("error")),
            SseFrame::Heartbeat => SseEvent::default().comment("heartbeat"),
        })
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
