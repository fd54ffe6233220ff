//! The mocked HTTP surface: every path not under `/__admin` is matched
//! against the mapping store and answered by the response generator.

use crate::collections::{self, OrderedMultiMap};
use crate::error::Error;
use crate::generator::{self, GenerateOutcome, GeneratorContext};
use crate::mapping::{Mapping, ResponseBodySpec, ResponseSpec};
use crate::matching;
use crate::model::{FaultDirective, RequestMessage, ResponseMessage};
use crate::reqlog::{LogEntry, LogOutcome};
use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use base64::Engine;
use futures_util::stream;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new().fallback(any(handle_mock_request))
}

async fn handle_mock_request(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, request: Request) -> Response {
    // Cancellation here only covers this handler's own lifetime (client
    // disconnect detection needs the connection-level hook main.rs wires up
    // for graceful shutdown); see DESIGN.md.
    let cancel = CancellationToken::new();
    match process(&state, addr, request, &cancel).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn process(state: &AppState, addr: SocketAddr, request: Request, cancel: &CancellationToken) -> Result<Response, Error> {
    let (parts, body) = request.into_parts();
    let raw_body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| Error::bad_request(e.to_string()))?;
    let raw_body = decompress(&parts.headers, raw_body.to_vec())?;

    let mut headers = OrderedMultiMap::new(true);
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.push(name.as_str(), value);
        }
    }
    let query = parts
        .uri
        .query()
        .map(collections::parse_query_string)
        .unwrap_or_else(|| OrderedMultiMap::new(false));

    let request_message = RequestMessage::new(
        parts.uri.to_string(),
        parts.uri.path().to_string(),
        parts.method.to_string(),
        headers,
        query,
        raw_body,
        addr.ip().to_string(),
    );

    let settings = state.settings();
    let snapshot = state.store.snapshot();
    let outcome = matching::run_matching(&snapshot, &state.scenarios, &request_message, settings.match_config());

    let mut save_as_mapping: Option<Arc<Mapping>> = None;

    let (response_message, log_outcome) = match outcome.winner {
        Some(mapping) => {
            matching::apply_scenario_transition(&mapping, &state.scenarios);
            let scenario_state = mapping
                .scenario
                .as_ref()
                .map(|clause| (clause.name.clone(), state.scenarios.state_of(&clause.name)));
            let ctx = GeneratorContext {
                templates: &state.templates,
                http_client: &state.http_client,
                scenario_state,
                global_delay: settings.global_delay(),
            };
            match generator::generate(&mapping, &request_message, ctx, cancel).await? {
                GenerateOutcome::Response(response) => {
                    generator::dispatch_webhooks(&mapping, state.http_client.clone());
                    if mapping
                        .response
                        .proxy
                        .as_ref()
                        .is_some_and(|p| p.save_mapping_on_first_hit)
                    {
                        save_as_mapping = Some(mapping.clone());
                    }
                    (response, LogOutcome::Matched { mapping_id: mapping.id })
                }
                GenerateOutcome::Canceled => (ResponseMessage::default(), LogOutcome::Canceled),
            }
        }
        None => {
            let top_candidates = outcome
                .top_candidates()
                .iter()
                .map(|c| (c.mapping_id, c.title.clone(), c.score))
                .collect();
            // No mapping's own delay applies here (there's no mapping), but
            // the store-wide global delay still must: §4.10 adds it to
            // *every* response, not just matched ones.
            if let Some(delay) = settings.global_delay() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            (ResponseMessage::not_found(), LogOutcome::Unmatched { top_candidates })
        }
    };

    if let Some(proxy_mapping) = &save_as_mapping {
        save_observed_response(&state.store, proxy_mapping, &request_message, &response_message);
    }

    state.log.append(LogEntry {
        id: Uuid::new_v4(),
        status: response_message.status,
        outcome: log_outcome,
        request: request_message,
    });

    Ok(to_axum_response(response_message))
}

/// Proxy mode's "save mapping on first hit": persist the observed upstream
/// response as a new static mapping, one priority step ahead of the proxy
/// mapping that produced it, so the next identical request is served
/// statically instead of round-tripping upstream again (§4.7).
fn save_observed_response(
    store: &crate::store::MappingStore,
    proxy_mapping: &Mapping,
    request: &RequestMessage,
    response: &ResponseMessage,
) {
    let body = response.body.to_bytes().unwrap_or_default();
    let headers = response
        .wire_headers()
        .into_iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("content-type"))
        .collect();

    let saved = Mapping::builder()
        .with_title(format!("saved: {} {}", request.method, request.path))
        .with_priority(proxy_mapping.priority.saturating_sub(1))
        .with_method(request.method.clone())
        .with_path_equal_to(request.path.clone())
        .with_response(ResponseSpec {
            status: response.status,
            headers,
            body: ResponseBodySpec::Base64(base64::engine::general_purpose::STANDARD.encode(&body)),
            ..ResponseSpec::default()
        })
        .build();
    let _ = store.add(saved);
}

fn decompress(headers: &HeaderMap, body: Vec<u8>) -> Result<Vec<u8>, Error> {
    use std::io::Read;

    let encoding = headers
        .get(axum::http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match encoding {
        "gzip" => {
            let mut decoded = Vec::new();
            flate2::read::GzDecoder::new(&body[..])
                .read_to_end(&mut decoded)
                .map_err(|e| Error::bad_request(format!("invalid gzip body: {e}")))?;
            Ok(decoded)
        }
        "deflate" => {
            let mut decoded = Vec::new();
            flate2::read::DeflateDecoder::new(&body[..])
                .read_to_end(&mut decoded)
                .map_err(|e| Error::bad_request(format!("invalid deflate body: {e}")))?;
            Ok(decoded)
        }
        _ => Ok(body),
    }
}

/// Turn a generated response into a real HTTP response, delivering any fault
/// directive by ending the body stream early rather than writing a clean,
/// well-terminated body (§4.10).
fn to_axum_response(message: ResponseMessage) -> Response {
    let status = StatusCode::from_u16(message.status).unwrap_or(StatusCode::OK);
    let wire_headers = message.wire_headers();

    let body = match message.fault {
        Some(FaultDirective::EmptyResponse) => Body::empty(),
        Some(FaultDirective::AbortAfterBytes { bytes }) => {
            let full = message.body.to_bytes().unwrap_or_default();
            let truncated: Vec<u8> = full.into_iter().take(bytes).collect();
            Body::from_stream(stream::iter(vec![Ok::<_, io::Error>(Bytes::from(truncated))]))
        }
        Some(FaultDirective::MalformedResponse) => {
            let full = message.body.to_bytes().unwrap_or_default();
            let half = full.len() / 2;
            let head = Bytes::from(full[..half].to_vec());
            Body::from_stream(stream::iter(vec![
                Ok::<_, io::Error>(head),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "malformed response fault")),
            ]))
        }
        None => Body::from(message.body.to_bytes().unwrap_or_default()),
    };

    let mut builder = Response::builder().status(status);
    for (key, value) in wire_headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&value)) {
            builder = builder.header(name, value);
        }
    }
    builder.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
