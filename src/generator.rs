//! Turns a winning mapping plus a request into a wire-ready response.
//!
//! Static, templated, proxy and callback paths all funnel into the same
//! delay/fault/webhook pipeline so the behavior after the body is built is
//! identical regardless of how the body was produced.

use crate::collections::OrderedMultiMap;
use crate::error::Error;
use crate::mapping::{FaultConfig, Mapping, ProxyConfig, ResponseBodySpec, ResponseSpec};
use crate::model::{FaultDirective, RequestMessage, ResponseBody, ResponseMessage};
use crate::template::{TemplateContext, TemplateEngine};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct GeneratorContext<'a> {
    pub templates: &'a TemplateEngine,
    pub http_client: &'a reqwest::Client,
    pub scenario_state: Option<(String, String)>,
    /// Store-wide delay added after the per-mapping delay (§4.10).
    pub global_delay: Option<Duration>,
}

pub enum GenerateOutcome {
    Response(ResponseMessage),
    /// The inbound request was canceled (client disconnect or shutdown)
    /// before a response could be produced.
    Canceled,
}

/// Build and return a response for `mapping`, honoring delay and
/// cancellation. Proxy I/O happens without holding any store lock; the
/// caller only ever passes in an `Arc<Mapping>`'s borrowed contents.
pub async fn generate(
    mapping: &Mapping,
    request: &RequestMessage,
    ctx: GeneratorContext<'_>,
    cancel: &CancellationToken,
) -> Result<GenerateOutcome, Error> {
    let spec = &mapping.response;

    let mut response = if let Some(proxy) = &spec.proxy {
        match proxy_response(proxy, request, ctx.http_client, cancel).await? {
            Some(response) => response,
            None => return Ok(GenerateOutcome::Canceled),
        }
    } else if let Some(callback) = &spec.callback {
        callback.handle(request)
    } else {
        build_response(spec, request, &ctx)?
    };

    if let Some(fault) = &spec.fault {
        apply_fault(fault, &mut response);
    }

    if cancel.is_cancelled() {
        return Ok(GenerateOutcome::Canceled);
    }

    let delay = combine_delays([mapping.timing.resolve(), response.delay, ctx.global_delay]);
    if let Some(delay) = delay {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Ok(GenerateOutcome::Canceled),
        }
    }

    Ok(GenerateOutcome::Response(response))
}

/// Sum every `Some` delay in `delays` (a mapping's own timing, a `Timeout`
/// fault, the store-wide global delay); `None` if none of them are set.
fn combine_delays(delays: [Option<Duration>; 3]) -> Option<Duration> {
    delays.into_iter().flatten().reduce(|a, b| a + b)
}

fn build_response(
    spec: &ResponseSpec,
    request: &RequestMessage,
    ctx: &GeneratorContext<'_>,
) -> Result<ResponseMessage, Error> {
    let mut headers = OrderedMultiMap::new(true);
    for (key, value) in &spec.headers {
        headers.push(key.clone(), value.clone());
    }

    let body = if spec.use_template {
        let tctx = TemplateContext::new(request, ctx.scenario_state.clone());
        match &spec.body {
            ResponseBodySpec::Text(text) => ResponseBody::Text(ctx.templates.render(text, &tctx)?),
            ResponseBodySpec::Json(value) => ResponseBody::Json(ctx.templates.render_json(value, &tctx)?),
            other => static_body(other)?,
        }
    } else {
        static_body(&spec.body)?
    };

    if !headers.contains_key("content-type") && !matches!(body, ResponseBody::Empty) {
        headers.push("content-type", spec.body.content_type());
    }

    Ok(ResponseMessage {
        status: spec.status,
        headers,
        body,
        delay: None,
        fault: None,
    })
}

fn static_body(spec: &ResponseBodySpec) -> Result<ResponseBody, Error> {
    Ok(match spec {
        ResponseBodySpec::Empty => ResponseBody::Empty,
        ResponseBodySpec::Text(s) => ResponseBody::Text(s.clone()),
        ResponseBodySpec::Json(v) => ResponseBody::Json(v.clone()),
        ResponseBodySpec::Base64(_) | ResponseBodySpec::File(_) => {
            ResponseBody::Raw(spec.to_bytes().map_err(|e| Error::bad_request(e.to_string()))?)
        }
    })
}

/// `None` return means the caller's cancellation token fired mid-flight.
async fn proxy_response(
    proxy: &ProxyConfig,
    request: &RequestMessage,
    client: &reqwest::Client,
    cancel: &CancellationToken,
) -> Result<Option<ResponseMessage>, Error> {
    let base = proxy.upstream_base_url.trim_end_matches('/');
    let url = format!("{base}{}", request.path);
    let method = reqwest::Method::from_bytes(request.method.as_bytes()).unwrap_or(reqwest::Method::GET);

    let mut builder = client.request(method, url);
    for (key, value) in request.headers.iter() {
        if key.eq_ignore_ascii_case("host") {
            continue;
        }
        builder = builder.header(key, value);
    }
    if !request.body.raw.is_empty() {
        builder = builder.body(request.body.raw.clone());
    }

    let sent = tokio::select! {
        result = builder.send() => result,
        _ = cancel.cancelled() => return Ok(None),
    };
    let upstream = sent?;

    let status = upstream.status().as_u16();
    let mut headers = OrderedMultiMap::new(true);
    for (name, value) in upstream.headers() {
        if let Ok(value) = value.to_str() {
            headers.push(name.as_str(), value);
        }
    }

    let bytes = tokio::select! {
        result = upstream.bytes() => result,
        _ = cancel.cancelled() => return Ok(None),
    };
    let body = bytes?;

    Ok(Some(ResponseMessage {
        status,
        headers,
        body: ResponseBody::Proxied(body.to_vec()),
        delay: None,
        fault: None,
    }))
}

fn apply_fault(fault: &FaultConfig, response: &mut ResponseMessage) {
    match fault {
        FaultConfig::Error { status, message } => {
            response.status = *status;
            if let Some(message) = message {
                response.body = ResponseBody::Text(message.clone());
            }
        }
        FaultConfig::Timeout { duration_ms } => {
            response.delay = Some(Duration::from_millis(*duration_ms));
        }
        FaultConfig::EmptyResponse => {
            response.fault = Some(FaultDirective::EmptyResponse);
        }
        FaultConfig::MalformedResponse => {
            response.fault = Some(FaultDirective::MalformedResponse);
        }
        FaultConfig::AbortAfterBytes { bytes } => {
            response.fault = Some(FaultDirective::AbortAfterBytes { bytes: *bytes });
        }
        FaultConfig::Corrupt { probability } => {
            if rand::thread_rng().gen_bool(probability.clamp(0.0, 1.0)) {
                if let Ok(mut bytes) = response.body.to_bytes() {
                    for byte in bytes.iter_mut().step_by(7) {
                        *byte ^= 0xff;
                    }
                    response.body = ResponseBody::Raw(bytes);
                }
            }
        }
    }
}

/// Fire a mapping's configured webhooks after the response has been sent.
/// Always asynchronous; `use_webhooks_fire_and_forget` only controls whether
/// delivery failures are logged or silently dropped.
pub fn dispatch_webhooks(mapping: &Mapping, client: reqwest::Client) {
    for webhook in mapping.webhooks.clone() {
        let client = client.clone();
        let fire_and_forget = mapping.use_webhooks_fire_and_forget;
        tokio::spawn(async move {
            let method = reqwest::Method::from_bytes(webhook.method.as_bytes()).unwrap_or(reqwest::Method::POST);
            let mut builder = client.request(method, &webhook.url);
            for (key, value) in &webhook.headers {
                builder = builder.header(key, value);
            }
            if let Some(body) = &webhook.body {
                if let Ok(bytes) = body.to_bytes() {
                    builder = builder.header("content-type", body.content_type()).body(bytes);
                }
            }
            if let Err(err) = builder.send().await {
                if !fire_and_forget {
                    warn!(url = %webhook.url, error = %err, "webhook delivery failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_delays_sums_every_delay_that_is_set() {
        let combined = combine_delays([
            Some(Duration::from_millis(100)),
            Some(Duration::from_millis(25)),
            Some(Duration::from_millis(50)),
        ]);
        assert_eq!(combined, Some(Duration::from_millis(175)));
    }

    #[test]
    fn combine_delays_is_none_when_none_are_set() {
        assert_eq!(combine_delays([None, None, None]), None);
    }

    #[test]
    fn timeout_fault_feeds_the_delay_pipeline() {
        let mut response = ResponseMessage::default();
        apply_fault(&FaultConfig::Timeout { duration_ms: 250 }, &mut response);
        assert_eq!(response.delay, Some(Duration::from_millis(250)));
    }

    #[test]
    fn error_fault_overrides_status_and_body() {
        let fault = FaultConfig::Error {
            status: 503,
            message: Some("down for maintenance".into()),
        };
        let mut response = ResponseMessage::default();
        apply_fault(&fault, &mut response);
        assert_eq!(response.status, 503);
        assert!(matches!(response.body, ResponseBody::Text(ref s) if s == "down for maintenance"));
    }

    #[test]
    fn malformed_response_fault_sets_the_wire_directive() {
        let mut response = ResponseMessage::default();
        apply_fault(&FaultConfig::MalformedResponse, &mut response);
        assert_eq!(response.fault, Some(FaultDirective::MalformedResponse));
    }
}
