use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::service::{RelayService, RelayStatus, StateChange};

pub struct AppState<B: GpioBackend> {
    pub service: Arc<RelayService<B>>,
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

#[derive(Serialize)]
struct SetStateResponse {
    success: bool,
    #[serde(flatten)]
    status: RelayStatus,
}

#[derive(Serialize)]
struct LabelsResponse {
    labels: BTreeMap<u32, String>,
}

#[derive(Serialize)]
struct SetLabelResponse {
    success: bool,
    index: u32,
    label: String,
}

#[derive(Deserialize, Default)]
struct EventsQuery {
    index: Option<u32>,
}

/// Text frame for one broadcast item, or `None` when the subscriber filtered it out.
fn event_frame(
    item: Result<StateChange, BroadcastStreamRecvError>,
    index_filter: Option<u32>,
) -> Option<String> {
    match item {
        Ok(change) if index_filter.is_none_or(|i| i == change.index) => {
            serde_json::to_string(&change).ok()
        }
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(n)) => Some(
            serde_json::json!({
                "error": "lagged",
                "message": format!("Event stream lagged by {n} messages"),
            })
            .to_string(),
        ),
    }
}

/// Forwards state changes to one websocket client until either side hangs up.
async fn stream_state_changes(
    mut session: Session,
    mut client: MessageStream,
    rx: broadcast::Receiver<StateChange>,
    index_filter: Option<u32>,
) {
    let mut changes = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client.recv() => match msg {
                Some(Ok(Message::Ping(bytes))) => {
                    let _ = session.pong(&bytes).await;
                }
                Some(Ok(Message::Close(reason))) => {
                    let _ = session.close(reason).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
            item = changes.next() => {
                let Some(item) = item else { return };
                let Some(frame) = event_frame(item, index_filter) else { continue };
                if session.text(frame).await.is_err() {
                    warn!("Event subscriber disconnected");
                    return;
                }
            }
        }
    }
}

impl<B: GpioBackend + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/gpio")
                    .route(web::get().to(all_states::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpio/{index}")
                    .route(web::get().to(get_state::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpio/{index}/{state}")
                    .route(web::post().to(set_state::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/labels")
                    .route(web::get().to(all_labels::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/labels/{index}")
                    .route(web::post().to(set_label::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/events")
                    .route(web::get().to(events_ws::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn all_states<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.service.get_all_states()))
}

async fn get_state<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let index = parse_index(&req, &state.service)?;
    let status = state.service.get_state(index)?;

    if status.state.is_none() {
        return Err(AppError::HardwareFault(format!(
            "Failed to read relay {index}"
        )));
    }

    Ok(web::Json(status))
}

async fn set_state<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let index = parse_index(&req, &state.service)?;
    let value = parse_state(&req)?;
    let status = state.service.set_state(index, value)?;

    Ok(web::Json(SetStateResponse {
        success: true,
        status,
    }))
}

async fn all_labels<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(LabelsResponse {
        labels: state.service.labels(),
    }))
}

async fn set_label<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let index = parse_index(&req, &state.service)?;
    let text = parse_label_payload(&body)?;
    let label = state.service.set_label(index, &text)?;

    Ok(web::Json(SetLabelResponse {
        success: true,
        index,
        label,
    }))
}

async fn events_ws<B: GpioBackend + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<EventsQuery>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, actix_web::Error> {
    let rx = state.service.subscribe();
    let index_filter = query.index;
    let (response, session, client_stream) = actix_ws::handle(&req, stream)?;

    actix_web::rt::spawn(async move {
        stream_state_changes(session, client_stream, rx, index_filter).await;
    });

    Ok(response)
}

fn parse_index<B: GpioBackend>(
    req: &HttpRequest,
    service: &RelayService<B>,
) -> Result<u32, AppError> {
    let raw = req.match_info().get("index").unwrap_or_default();
    service.pins().parse_index(raw)
}

fn parse_state(req: &HttpRequest) -> Result<u8, AppError> {
    let raw = req.match_info().get("state").unwrap_or_default();
    raw.trim()
        .parse::<u8>()
        .ok()
        .filter(|s| *s <= 1)
        .ok_or_else(|| AppError::InvalidState("Use 0 (LOW) or 1 (HIGH)".into()))
}

/// Accepts only a JSON object whose `label` member is a string.
fn parse_label_payload(body: &[u8]) -> Result<String, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidLabel("Empty label payload".into()));
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidLabel(format!("Invalid label payload: {e}")))?;

    let Value::Object(mut fields) = payload else {
        return Err(AppError::InvalidLabel("Payload must be a JSON object".into()));
    };
    match fields.remove("label") {
        Some(Value::String(text)) => Ok(text),
        _ => Err(AppError::InvalidLabel("Must be a non-empty string".into())),
    }
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}

