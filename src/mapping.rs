//! A mapping: one `(matcher tree -> response template)` rule plus metadata.
//!
//! Mappings are immutable once built. The store only ever replaces a mapping
//! wholesale by id; see [`crate::store::MappingStore`].

use crate::matcher::{Case, MatchBehavior, MatchTree, Matcher, Operator, Target};
use crate::model::RequestMessage;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Fixed or uniform-random delay configuration, drawn fresh on every call to
/// [`Timing::resolve`]. `max` is inclusive; see DESIGN.md (Open Questions).
#[derive(Debug, Clone, Default)]
pub struct Timing {
    pub fixed_delay_ms: Option<u64>,
    pub random_delay_ms: Option<(u64, u64)>,
}

impl Timing {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fixed(ms: u64) -> Self {
        Self {
            fixed_delay_ms: Some(ms),
            random_delay_ms: None,
        }
    }

    pub fn random(min_ms: u64, max_ms: u64) -> Self {
        Self {
            fixed_delay_ms: None,
            random_delay_ms: Some((min_ms, max_ms)),
        }
    }

    pub fn resolve(&self) -> Option<Duration> {
        if let Some(fixed) = self.fixed_delay_ms {
            if fixed > 0 {
                return Some(Duration::from_millis(fixed));
            }
        }
        if let Some((min, max)) = self.random_delay_ms {
            if max > min {
                let ms = rand::thread_rng().gen_range(min..=max);
                return Some(Duration::from_millis(ms));
            } else if min > 0 {
                return Some(Duration::from_millis(min));
            }
        }
        None
    }
}

/// Gates a mapping's eligibility on the named scenario's current state, and
/// optionally advances it once the mapping is chosen.
#[derive(Debug, Clone)]
pub struct ScenarioClause {
    pub name: String,
    pub required_state: Option<String>,
    pub new_state: Option<String>,
}

/// User-configured fault simulation. `MalformedResponse`, `EmptyResponse` and
/// `AbortAfterBytes` become a [`crate::model::FaultDirective`] the transport
/// delivers at the wire level; the others are ordinary (if unusual)
/// responses built like any other.
#[derive(Debug, Clone)]
pub enum FaultConfig {
    Error { status: u16, message: Option<String> },
    Timeout { duration_ms: u64 },
    EmptyResponse,
    MalformedResponse,
    AbortAfterBytes { bytes: usize },
    /// Scrambles the body bytes with the given probability per request.
    Corrupt { probability: f64 },
}

/// A static response body, before any templating is applied.
#[derive(Debug, Clone)]
pub enum ResponseBodySpec {
    Empty,
    Text(String),
    Json(serde_json::Value),
    Base64(String),
    File(std::path::PathBuf),
}

impl ResponseBodySpec {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBodySpec::Empty => Ok(Vec::new()),
            ResponseBodySpec::Text(s) => Ok(s.clone().into_bytes()),
            ResponseBodySpec::Json(v) => Ok(serde_json::to_vec(v)?),
            ResponseBodySpec::Base64(s) => {
                use base64::Engine;
                Ok(base64::engine::general_purpose::STANDARD.decode(s)?)
            }
            ResponseBodySpec::File(path) => Ok(std::fs::read(path)?),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBodySpec::Empty => "text/plain",
            ResponseBodySpec::Text(_) => "text/plain",
            ResponseBodySpec::Json(_) => "application/json",
            ResponseBodySpec::Base64(_) => "application/octet-stream",
            ResponseBodySpec::File(_) => "application/octet-stream",
        }
    }
}

/// User-provided response function, for the callback path (§4.7).
pub trait ResponseCallback: std::fmt::Debug + Send + Sync {
    fn handle(&self, request: &RequestMessage) -> crate::model::ResponseMessage;
}

/// Proxy-mode configuration: forward the request to `upstream_base_url`.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub upstream_base_url: String,
    /// Path to a client certificate to present to the upstream. Loading and
    /// presenting it is the transport's job; this crate only carries the
    /// configuration through (see DESIGN.md).
    pub client_cert_path: Option<String>,
    pub save_mapping_on_first_hit: bool,
}

/// A webhook fired after the response is sent.
#[derive(Debug, Clone)]
pub struct Webhook {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<ResponseBodySpec>,
}

#[derive(Debug, Clone)]
pub struct ResponseSpec {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBodySpec,
    pub use_template: bool,
    pub proxy: Option<ProxyConfig>,
    pub callback: Option<Arc<dyn ResponseCallback>>,
    pub fault: Option<FaultConfig>,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: ResponseBodySpec::Empty,
            use_template: false,
            proxy: None,
            callback: None,
            fault: None,
        }
    }
}

/// One request-pattern-to-response rule. Immutable once constructed;
/// updates go through [`crate::store::MappingStore::update`], which replaces
/// the whole mapping by id.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub id: Uuid,
    pub title: Option<String>,
    pub priority: i32,
    pub tree: MatchTree,
    pub response: ResponseSpec,
    pub scenario: Option<ScenarioClause>,
    pub timing: Timing,
    pub webhooks: Vec<Webhook>,
    pub use_webhooks_fire_and_forget: bool,
}

impl Mapping {
    pub fn builder() -> MappingBuilder {
        MappingBuilder::default()
    }
}

/// A value-constructing builder: every `with_*` call consumes `self` and
/// returns a new builder carrying the accumulated configuration: see
/// DESIGN.md's note on re-architecting the source's fluent, mutating
/// builders this way.
#[derive(Debug, Default)]
pub struct MappingBuilder {
    id: Option<Uuid>,
    title: Option<String>,
    priority: i32,
    matchers: Vec<MatchTree>,
    response: ResponseSpec,
    scenario: Option<ScenarioClause>,
    timing: Timing,
    webhooks: Vec<Webhook>,
    fire_and_forget: bool,
}

impl MappingBuilder {
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_method(self, method: impl Into<String>) -> Self {
        self.with_matcher(MatchTree::Leaf(Matcher::exact(
            Target::Method,
            Case::Insensitive,
            method.into(),
        )))
    }

    pub fn with_path_equal_to(self, path: impl Into<String>) -> Self {
        self.with_matcher(MatchTree::Leaf(Matcher::exact(Target::Path, Case::Sensitive, path.into())))
    }

    pub fn with_path_matching(self, pattern: impl Into<String>) -> anyhow::Result<Self> {
        Ok(self.with_matcher(MatchTree::Leaf(Matcher::regex(
            Target::Path,
            MatchBehavior::AcceptOnMatch,
            pattern.into(),
        )?)))
    }

    pub fn with_header(self, name: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        self.with_matcher(MatchTree::Leaf(Matcher::string_op(
            Target::Header(name.into()),
            operator,
            Case::Insensitive,
            MatchBehavior::AcceptOnMatch,
            value.into(),
        )))
    }

    pub fn with_matcher(mut self, tree: MatchTree) -> Self {
        self.matchers.push(tree);
        self
    }

    pub fn with_response(mut self, response: ResponseSpec) -> Self {
        self.response = response;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.response.status = status;
        self
    }

    pub fn with_body(mut self, body: ResponseBodySpec) -> Self {
        self.response.body = body;
        self
    }

    pub fn with_scenario(mut self, scenario: ScenarioClause) -> Self {
        self.scenario = Some(scenario);
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_webhook(mut self, webhook: Webhook) -> Self {
        self.webhooks.push(webhook);
        self
    }

    pub fn with_fire_and_forget_webhooks(mut self, fire_and_forget: bool) -> Self {
        self.fire_and_forget = fire_and_forget;
        self
    }

    pub fn build(self) -> Mapping {
        let tree = match self.matchers.len() {
            0 => MatchTree::AllOf(Vec::new()),
            1 => self.matchers.into_iter().next().unwrap(),
            _ => MatchTree::AllOf(self.matchers),
        };
        Mapping {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            title: self.title,
            priority: self.priority,
            tree,
            response: self.response,
            scenario: self.scenario,
            timing: self.timing,
            webhooks: self.webhooks,
            use_webhooks_fire_and_forget: self.fire_and_forget,
        }
    }
}
