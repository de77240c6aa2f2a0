//! The HTTP API, all under /api. Every endpoint answers with JSON.

use std::{fmt::Display, path::PathBuf, sync::Arc};

use bytes::Bytes;
use futures::{sink::SinkExt, stream::StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::{body::Body, Method, Request, Response, StatusCode};
use hyper_tungstenite::{is_upgrade_request, tungstenite::Message, upgrade, HyperWebsocket};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    host::Host,
    interface::{
        version_from_wire, ErrorResponse, FetchError, HostNotification, RawEvent, NO_VERSION,
    },
    web::util::{json, json_ok},
};

pub async fn call<B>(host: Arc<Host>, mut request: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let service = ApiService::new(host);

    match (request.method(), request.uri().path()) {
        (&Method::GET, "/api/roots") => service.handle_api_roots(),
        (&Method::GET, "/api/changes") => service.handle_api_changes(&request),
        (&Method::GET, "/api/socket") => {
            if is_upgrade_request(&request) {
                service.handle_api_socket(&mut request)
            } else {
                json(
                    ErrorResponse::bad_request(
                        "/api/socket must be called as a websocket upgrade request",
                    ),
                    StatusCode::BAD_REQUEST,
                )
            }
        }
        (&Method::POST, "/api/events") => service.handle_api_events(request).await,

        (_method, path) => json(
            ErrorResponse::not_found(format!("Route not found: {}", path)),
            StatusCode::NOT_FOUND,
        ),
    }
}

/// Answer to `POST /api/events`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsAccepted {
    pub accepted: usize,
}

struct ApiService {
    host: Arc<Host>,
}

impl ApiService {
    fn new(host: Arc<Host>) -> Self {
        Self { host }
    }

    fn handle_api_roots(&self) -> Response<Full<Bytes>> {
        json_ok(self.host.root_infos())
    }

    /// `GET /api/changes?root=<path>&since=<version or -1>`
    fn handle_api_changes<B>(&self, request: &Request<B>) -> Response<Full<Bytes>> {
        let query = request.uri().query().unwrap_or_default();

        let mut root = None;
        let mut since = NO_VERSION;

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "root" => root = Some(PathBuf::from(value.into_owned())),
                "since" => match value.parse() {
                    Ok(version) => since = version,
                    Err(err) => {
                        return json(
                            ErrorResponse::bad_request(format!("Malformed version: {}", err)),
                            StatusCode::BAD_REQUEST,
                        );
                    }
                },
                _ => {}
            }
        }

        let Some(root) = root else {
            return json(
                ErrorResponse::bad_request("Missing 'root' query parameter"),
                StatusCode::BAD_REQUEST,
            );
        };

        match self.host.changes_since(&root, version_from_wire(since)) {
            Ok(response) => json_ok(response),
            Err(err @ FetchError::UnknownRoot(_)) => {
                json(ErrorResponse::not_found(err.to_string()), StatusCode::NOT_FOUND)
            }
            Err(err) => json(
                ErrorResponse::internal_error(err.to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }

    /// Raw events from an external watcher, as a JSON array.
    async fn handle_api_events<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let body = match request.into_body().collect().await {
            Ok(body) => body.to_bytes(),
            Err(err) => {
                return json(
                    ErrorResponse::bad_request(format!("Could not read body: {}", err)),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let events: Vec<RawEvent> = match serde_json::from_slice(&body) {
            Ok(events) => events,
            Err(err) => {
                return json(
                    ErrorResponse::bad_request(format!("Malformed events: {}", err)),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let accepted = events.len();
        for event in events {
            self.host.send_event(event);
        }

        json_ok(EventsAccepted { accepted })
    }

    fn handle_api_socket<B>(&self, request: &mut Request<B>) -> Response<Full<Bytes>> {
        let (response, websocket) = match upgrade(request, None) {
            Ok(result) => result,
            Err(err) => {
                return json(
                    ErrorResponse::internal_error(format!("WebSocket upgrade failed: {}", err)),
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        };

        // Subscribe before answering so nothing sent after the upgrade is lost.
        let notifications = self.host.subscribe();
        let host = Arc::clone(&self.host);

        tokio::spawn(async move {
            if let Err(err) = handle_websocket_subscription(host, websocket, notifications).await {
                log::error!("Error in websocket subscription: {}", err);
            }
        });

        response
    }
}

/// Forwards host notifications to one websocket client as JSON text frames.
async fn handle_websocket_subscription(
    host: Arc<Host>,
    websocket: HyperWebsocket,
    mut notifications: broadcast::Receiver<HostNotification>,
) -> anyhow::Result<()> {
    let mut websocket = websocket.await?;
    log::debug!("WebSocket subscription established");

    loop {
        tokio::select! {
            result = notifications.recv() => {
                let batch = match result {
                    Ok(notification) => vec![notification],
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("WebSocket client lagged by {} notifications", missed);
                        // The client can't know what it missed, so every root
                        // is announced as changed and it re-pulls.
                        host.root_paths()
                            .into_iter()
                            .map(|root_path| HostNotification::WorkspaceChanged { root_path })
                            .collect()
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        log::debug!("Host shut down; closing WebSocket subscription");
                        let _ = websocket.send(Message::Close(None)).await;
                        break;
                    }
                };

                for notification in batch {
                    let text = serde_json::to_string(&notification)?;
                    if websocket.send(Message::Text(text.into())).await.is_err() {
                        log::debug!("WebSocket subscription closed by client");
                        return Ok(());
                    }
                }
            }

            message = websocket.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => {
                        log::debug!("WebSocket subscription closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        log::error!("WebSocket error: {}", err);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
