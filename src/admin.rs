//! The `/__admin` surface: wire JSON schema, conversion to/from the internal
//! `Mapping` type, and the axum router that serves it.

use crate::error::Error;
use crate::mapping::{FaultConfig, Mapping, ProxyConfig, ResponseBodySpec, ResponseSpec, ScenarioClause, Timing};
use crate::matcher::{Case, MatchBehavior, MatchTree, Matcher, Operator, Predicate, Target};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mappings", get(list_mappings).post(add_mapping).delete(reset_mappings))
        .route("/mappings/:id", put(update_mapping).delete(delete_mapping))
        .route("/requests", get(list_requests).delete(reset_requests))
        .route("/requests/find", post(find_requests))
        .route("/scenarios/:name/state", post(set_scenario_state))
        .route("/settings", get(get_settings).put(put_settings))
}

// ---- wire schema -----------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WireRequestPattern {
    pub method: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "urlPath")]
    pub url_path: Option<String>,
    #[serde(rename = "urlPattern")]
    pub url_pattern: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, WirePredicate>,
    #[serde(default)]
    pub cookies: HashMap<String, WirePredicate>,
    #[serde(default, rename = "queryParameters")]
    pub query_parameters: HashMap<String, WirePredicate>,
    pub body: Option<WirePredicate>,
}

/// One leaf predicate, in the wire format posted/returned by the admin API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WirePredicate {
    Equals { value: String, #[serde(default)] case_insensitive: bool },
    Contains { value: String, #[serde(default)] case_insensitive: bool },
    StartsWith { value: String, #[serde(default)] case_insensitive: bool },
    EndsWith { value: String, #[serde(default)] case_insensitive: bool },
    Regex { pattern: String },
    Wildcard { pattern: String, #[serde(default)] case_insensitive: bool },
    JsonPath { expression: String },
    JsonPartial { expected: Value },
    XPath { expression: String, #[serde(default)] expected: Option<String> },
    LinqExpression { expression: String },
    Presence { #[serde(default = "default_true")] expect_present: bool },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WireRandomDelay {
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WireResponse {
    #[serde(default = "default_status")]
    pub status: u16,
    pub body: Option<String>,
    #[serde(rename = "bodyAsJson")]
    pub body_as_json: Option<Value>,
    #[serde(rename = "base64Body")]
    pub base64_body: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub delay: Option<u64>,
    #[serde(rename = "randomDelay")]
    pub random_delay: Option<WireRandomDelay>,
    /// `"malformedResponse"`, `"emptyResponse"`, or `"abortAfterBytes:<n>"`.
    pub fault: Option<String>,
    #[serde(rename = "proxyUrl")]
    pub proxy_url: Option<String>,
    #[serde(default, rename = "useTemplate")]
    pub use_template: bool,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireMapping {
    pub id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub request: WireRequestPattern,
    #[serde(default)]
    pub response: WireResponse,
    #[serde(rename = "scenarioName")]
    pub scenario_name: Option<String>,
    #[serde(rename = "requiredScenarioState")]
    pub required_scenario_state: Option<String>,
    #[serde(rename = "newScenarioState")]
    pub new_scenario_state: Option<String>,
}

fn wire_predicate_to_matcher(target: Target, predicate: &WirePredicate) -> Result<Matcher, Error> {
    Ok(match predicate {
        WirePredicate::Equals { value, case_insensitive } => Matcher::string_op(
            target,
            Operator::Equals,
            case_of(*case_insensitive),
            MatchBehavior::AcceptOnMatch,
            value.clone(),
        ),
        WirePredicate::Contains { value, case_insensitive } => Matcher::string_op(
            target,
            Operator::Contains,
            case_of(*case_insensitive),
            MatchBehavior::AcceptOnMatch,
            value.clone(),
        ),
        WirePredicate::StartsWith { value, case_insensitive } => Matcher::string_op(
            target,
            Operator::StartsWith,
            case_of(*case_insensitive),
            MatchBehavior::AcceptOnMatch,
            value.clone(),
        ),
        WirePredicate::EndsWith { value, case_insensitive } => Matcher::string_op(
            target,
            Operator::EndsWith,
            case_of(*case_insensitive),
            MatchBehavior::AcceptOnMatch,
            value.clone(),
        ),
        WirePredicate::Regex { pattern } => Matcher::regex(target, MatchBehavior::AcceptOnMatch, pattern.clone())?,
        WirePredicate::Wildcard { pattern, case_insensitive } => {
            Matcher::wildcard(target, case_of(*case_insensitive), MatchBehavior::AcceptOnMatch, pattern.clone())?
        }
        WirePredicate::JsonPath { expression } => Matcher::json_path(MatchBehavior::AcceptOnMatch, expression.clone()),
        WirePredicate::JsonPartial { expected } => Matcher::json_partial(MatchBehavior::AcceptOnMatch, expected.clone()),
        WirePredicate::XPath { expression, expected } => {
            Matcher::xpath(MatchBehavior::AcceptOnMatch, expression.clone(), expected.clone())
        }
        WirePredicate::LinqExpression { expression } => {
            Matcher::linq_expression(MatchBehavior::AcceptOnMatch, expression.clone())
        }
        WirePredicate::Presence { expect_present } => Matcher::presence(target, *expect_present),
    })
}

fn case_of(case_insensitive: bool) -> Case {
    if case_insensitive {
        Case::Insensitive
    } else {
        Case::Sensitive
    }
}

fn parse_fault(raw: &str) -> Option<FaultConfig> {
    if raw == "malformedResponse" {
        return Some(FaultConfig::MalformedResponse);
    }
    if raw == "emptyResponse" {
        return Some(FaultConfig::EmptyResponse);
    }
    if let Some(count) = raw.strip_prefix("abortAfterBytes:") {
        return count.parse().ok().map(|bytes| FaultConfig::AbortAfterBytes { bytes });
    }
    None
}

/// Convert a posted wire mapping into the internal representation. Fallible
/// only because a regex/glob/xpath pattern on the wire can be malformed.
pub fn to_mapping(wire: WireMapping) -> Result<Mapping, Error> {
    let mut builder = Mapping::builder();
    if let Some(id) = wire.id {
        builder = builder.with_id(id);
    }
    if let Some(title) = wire.title {
        builder = builder.with_title(title);
    }
    builder = builder.with_priority(wire.priority);

    if let Some(method) = &wire.request.method {
        builder = builder.with_matcher(MatchTree::Leaf(Matcher::exact(Target::Method, Case::Insensitive, method.clone())));
    }
    if let Some(path) = &wire.request.url_path {
        builder = builder.with_matcher(MatchTree::Leaf(Matcher::exact(Target::Path, Case::Sensitive, path.clone())));
    } else if let Some(pattern) = &wire.request.url_pattern {
        builder = builder.with_matcher(MatchTree::Leaf(Matcher::regex(
            Target::Path,
            MatchBehavior::AcceptOnMatch,
            pattern.clone(),
        )?));
    } else if let Some(url) = &wire.request.url {
        builder = builder.with_matcher(MatchTree::Leaf(Matcher::exact(Target::Path, Case::Sensitive, url.clone())));
    }
    for (name, predicate) in &wire.request.headers {
        builder = builder.with_matcher(MatchTree::Leaf(wire_predicate_to_matcher(
            Target::Header(name.clone()),
            predicate,
        )?));
    }
    for (name, predicate) in &wire.request.cookies {
        builder = builder.with_matcher(MatchTree::Leaf(wire_predicate_to_matcher(
            Target::Cookie(name.clone()),
            predicate,
        )?));
    }
    for (name, predicate) in &wire.request.query_parameters {
        builder = builder.with_matcher(MatchTree::Leaf(wire_predicate_to_matcher(
            Target::Query(name.clone()),
            predicate,
        )?));
    }
    if let Some(predicate) = &wire.request.body {
        let target = match predicate {
            WirePredicate::JsonPartial { .. } | WirePredicate::JsonPath { .. } | WirePredicate::LinqExpression { .. } => {
                Target::BodyAsJson
            }
            _ => Target::BodyAsString,
        };
        builder = builder.with_matcher(MatchTree::Leaf(wire_predicate_to_matcher(target, predicate)?));
    }

    let mut response = ResponseSpec {
        status: wire.response.status,
        use_template: wire.response.use_template,
        ..ResponseSpec::default()
    };
    for (key, value) in &wire.response.headers {
        response.headers.push((key.clone(), value.clone()));
    }
    response.body = if let Some(json) = wire.response.body_as_json.clone() {
        ResponseBodySpec::Json(json)
    } else if let Some(b64) = &wire.response.base64_body {
        ResponseBodySpec::Base64(b64.clone())
    } else if let Some(text) = &wire.response.body {
        ResponseBodySpec::Text(text.clone())
    } else {
        ResponseBodySpec::Empty
    };
    if let Some(url) = &wire.response.proxy_url {
        response.proxy = Some(ProxyConfig {
            upstream_base_url: url.clone(),
            client_cert_path: None,
            save_mapping_on_first_hit: false,
        });
    }
    if let Some(raw) = &wire.response.fault {
        response.fault = parse_fault(raw);
    }

    let timing = Timing {
        fixed_delay_ms: wire.response.delay,
        random_delay_ms: wire.response.random_delay.as_ref().map(|r| (r.min, r.max)),
    };

    builder = builder.with_response(response).with_timing(timing);

    if let Some(name) = wire.scenario_name {
        builder = builder.with_scenario(ScenarioClause {
            name,
            required_state: wire.required_scenario_state,
            new_state: wire.new_scenario_state,
        });
    }

    Ok(builder.build())
}

/// Render a matcher's predicate back to its wire form. `None` for `Custom`,
/// which has no wire representation.
fn matcher_to_wire_predicate(matcher: &Matcher) -> Option<WirePredicate> {
    let case_insensitive = matcher.case == Case::Insensitive;
    Some(match &matcher.predicate {
        Predicate::Presence { expect_present } => WirePredicate::Presence {
            expect_present: *expect_present,
        },
        Predicate::StringOp { operator, expected } => match operator {
            Operator::Equals => WirePredicate::Equals { value: expected.clone(), case_insensitive },
            Operator::Contains => WirePredicate::Contains { value: expected.clone(), case_insensitive },
            Operator::StartsWith => WirePredicate::StartsWith { value: expected.clone(), case_insensitive },
            Operator::EndsWith => WirePredicate::EndsWith { value: expected.clone(), case_insensitive },
        },
        Predicate::Wildcard { pattern, .. } => WirePredicate::Wildcard {
            pattern: pattern.clone(),
            case_insensitive,
        },
        Predicate::Regex { pattern, .. } => WirePredicate::Regex { pattern: pattern.clone() },
        Predicate::JsonPath { expression } => WirePredicate::JsonPath { expression: expression.clone() },
        Predicate::JsonPartial { expected } => WirePredicate::JsonPartial { expected: expected.clone() },
        Predicate::XPath { expression, expected } => WirePredicate::XPath {
            expression: expression.clone(),
            expected: expected.clone(),
        },
        Predicate::LinqExpression { expression } => WirePredicate::LinqExpression {
            expression: expression.clone(),
        },
        Predicate::Custom(_) => return None,
    })
}

/// Fold one leaf matcher into the wire request pattern being built, writing
/// to the field its `target` corresponds to. Targets with no wire-schema
/// field (`Url`, `AbsoluteUrl`, `ContentType`, `ClientIp`) are dropped.
fn fold_leaf_into_request(pattern: &mut WireRequestPattern, matcher: &Matcher) {
    let Some(wire_predicate) = matcher_to_wire_predicate(matcher) else {
        return;
    };
    match &matcher.target {
        Target::Method => {
            if let WirePredicate::Equals { value, .. } = &wire_predicate {
                pattern.method = Some(value.clone());
            }
        }
        Target::Path => match &wire_predicate {
            WirePredicate::Equals { value, .. } => pattern.url_path = Some(value.clone()),
            WirePredicate::Regex { pattern: regex } => pattern.url_pattern = Some(regex.clone()),
            _ => {}
        },
        Target::Header(name) => {
            pattern.headers.insert(name.clone(), wire_predicate);
        }
        Target::Cookie(name) => {
            pattern.cookies.insert(name.clone(), wire_predicate);
        }
        Target::Query(name) => {
            pattern.query_parameters.insert(name.clone(), wire_predicate);
        }
        Target::BodyAsString | Target::BodyAsJson | Target::BodyAsBytes => {
            pattern.body = Some(wire_predicate);
        }
        Target::Url | Target::AbsoluteUrl | Target::ContentType | Target::ClientIp => {}
    }
}

/// Render an internal mapping back to its wire form for `GET /mappings`.
/// Best-effort: a mapping built with an `any-of` tree or a custom matcher has
/// no exact wire representation and is summarized rather than reproduced.
pub fn from_mapping(mapping: &Mapping) -> WireMapping {
    let mut request = WireRequestPattern::default();
    match &mapping.tree {
        MatchTree::Leaf(matcher) => fold_leaf_into_request(&mut request, matcher),
        MatchTree::AllOf(children) => {
            for child in children {
                if let MatchTree::Leaf(matcher) = child {
                    fold_leaf_into_request(&mut request, matcher);
                }
            }
        }
        MatchTree::AnyOf(_) => {}
    }

    WireMapping {
        id: Some(mapping.id),
        title: mapping.title.clone(),
        priority: mapping.priority,
        request,
        response: WireResponse {
            status: mapping.response.status,
            use_template: mapping.response.use_template,
            ..WireResponse::default()
        },
        scenario_name: mapping.scenario.as_ref().map(|s| s.name.clone()),
        required_scenario_state: mapping.scenario.as_ref().and_then(|s| s.required_state.clone()),
        new_scenario_state: mapping.scenario.as_ref().and_then(|s| s.new_state.clone()),
    }
}

// ---- routes ------------------------------------------------------------

async fn list_mappings(State(state): State<AppState>) -> impl IntoResponse {
    let mappings: Vec<WireMapping> = state.store.list().iter().map(|m| from_mapping(m)).collect();
    Json(mappings)
}

async fn add_mapping(State(state): State<AppState>, Json(wire): Json<WireMapping>) -> Result<impl IntoResponse, Error> {
    let mapping = to_mapping(wire)?;
    state.store.add(mapping).map_err(|e| Error::bad_request(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Mapping added" }))))
}

async fn update_mapping(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(wire): Json<WireMapping>,
) -> Result<impl IntoResponse, Error> {
    let mut mapping = to_mapping(wire)?;
    mapping.id = id;
    state.store.update(mapping).map_err(|_| Error::MappingNotFound(id))?;
    Ok(Json(json!({ "message": "Mapping updated" })))
}

async fn delete_mapping(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, Error> {
    state.store.delete(id).map_err(|_| Error::MappingNotFound(id))?;
    Ok(Json(json!({ "message": "Mapping deleted" })))
}

async fn reset_mappings(State(state): State<AppState>) -> impl IntoResponse {
    state.store.reset();
    Json(json!({ "message": "Mappings reset" }))
}

#[derive(Debug, Serialize)]
struct WireLogEntry {
    id: Uuid,
    method: String,
    url: String,
    status: u16,
    matched_mapping_id: Option<Uuid>,
}

async fn list_requests(State(state): State<AppState>) -> impl IntoResponse {
    let entries: Vec<WireLogEntry> = state
        .log
        .list(None)
        .into_iter()
        .map(|entry| WireLogEntry {
            id: entry.id,
            method: entry.request.method.clone(),
            url: entry.request.path.clone(),
            status: entry.status,
            matched_mapping_id: match entry.outcome {
                crate::reqlog::LogOutcome::Matched { mapping_id } => Some(mapping_id),
                _ => None,
            },
        })
        .collect();
    Json(entries)
}

async fn reset_requests(State(state): State<AppState>) -> impl IntoResponse {
    state.log.reset();
    Json(json!({ "message": "Requests reset" }))
}

#[derive(Debug, Deserialize)]
struct FindRequestsBody {
    #[serde(default)]
    url_path: Option<String>,
}

async fn find_requests(
    State(state): State<AppState>,
    Json(body): Json<FindRequestsBody>,
) -> Result<impl IntoResponse, Error> {
    let tree = match &body.url_path {
        Some(path) => MatchTree::Leaf(Matcher::exact(Target::Path, Case::Sensitive, path.clone())),
        None => MatchTree::AllOf(Vec::new()),
    };
    let entries: Vec<WireLogEntry> = state
        .log
        .list(Some(&tree))
        .into_iter()
        .map(|entry| WireLogEntry {
            id: entry.id,
            method: entry.request.method.clone(),
            url: entry.request.path.clone(),
            status: entry.status,
            matched_mapping_id: match entry.outcome {
                crate::reqlog::LogOutcome::Matched { mapping_id } => Some(mapping_id),
                _ => None,
            },
        })
        .collect();
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
struct SetScenarioStateBody {
    state: String,
}

async fn set_scenario_state(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SetScenarioStateBody>,
) -> impl IntoResponse {
    state.scenarios.set_state(&name, body.state);
    Json(json!({ "message": "Scenario state updated" }))
}

async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.settings())
}

async fn put_settings(
    State(state): State<AppState>,
    Json(new_settings): Json<crate::settings::Settings>,
) -> impl IntoResponse {
    *state.settings.write().unwrap() = new_settings;
    Json(json!({ "message": "Settings updated" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_mapping_builds_a_path_and_method_matcher() {
        let wire = WireMapping {
            id: None,
            title: None,
            priority: 0,
            request: WireRequestPattern {
                method: Some("GET".into()),
                url_path: Some("/foo".into()),
                ..WireRequestPattern::default()
            },
            response: WireResponse {
                status: 200,
                body: Some("hi".into()),
                ..WireResponse::default()
            },
            scenario_name: None,
            required_scenario_state: None,
            new_scenario_state: None,
        };
        let mapping = to_mapping(wire).unwrap();
        assert_eq!(mapping.response.status, 200);
        assert!(matches!(mapping.response.body, ResponseBodySpec::Text(ref s) if s == "hi"));
    }

    #[test]
    fn from_mapping_round_trips_method_and_path() {
        let wire = WireMapping {
            id: None,
            title: Some("example".into()),
            priority: 5,
            request: WireRequestPattern {
                method: Some("GET".into()),
                url_path: Some("/foo".into()),
                ..WireRequestPattern::default()
            },
            response: WireResponse {
                status: 200,
                body: Some("hi".into()),
                ..WireResponse::default()
            },
            scenario_name: None,
            required_scenario_state: None,
            new_scenario_state: None,
        };
        let mapping = to_mapping(wire).unwrap();
        let rendered = from_mapping(&mapping);
        assert_eq!(rendered.request.method.as_deref(), Some("GET"));
        assert_eq!(rendered.request.url_path.as_deref(), Some("/foo"));
    }

    #[test]
    fn from_mapping_round_trips_header_predicates() {
        let mut headers = HashMap::new();
        headers.insert(
            "X-Api-Key".to_string(),
            WirePredicate::Equals { value: "secret".into(), case_insensitive: false },
        );
        let wire = WireMapping {
            id: None,
            title: None,
            priority: 0,
            request: WireRequestPattern { headers, ..WireRequestPattern::default() },
            response: WireResponse::default(),
            scenario_name: None,
            required_scenario_state: None,
            new_scenario_state: None,
        };
        let mapping = to_mapping(wire).unwrap();
        let rendered = from_mapping(&mapping);
        assert!(matches!(
            rendered.request.headers.get("X-Api-Key"),
            Some(WirePredicate::Equals { value, .. }) if value == "secret"
        ));
    }

    #[test]
    fn parse_fault_recognizes_abort_after_bytes() {
        let fault = parse_fault("abortAfterBytes:12").unwrap();
        assert!(matches!(fault, FaultConfig::AbortAfterBytes { bytes: 12 }));
    }

    #[test]
    fn parse_fault_rejects_unknown_strings() {
        assert!(parse_fault("somethingElse").is_none());
    }
}
