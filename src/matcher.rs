//! Request matchers and the boolean tree that combines them.
//!
//! A [`Matcher`] is a leaf predicate over one request field; a [`MatchTree`]
//! combines matchers with `all-of` (product of scores) and `any-of` (max of
//! scores). Scores live in `[0.0, 1.0]`, with `1.0` a perfect match.

use crate::jsonpartial;
use crate::model::RequestMessage;
use crate::xpath;
use std::fmt;
use std::sync::Arc;

/// Which request field a matcher reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Url,
    AbsoluteUrl,
    Path,
    Method,
    Query(String),
    Header(String),
    Cookie(String),
    ContentType,
    ClientIp,
    BodyAsString,
    BodyAsJson,
    BodyAsBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Sensitive,
    Insensitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchBehavior {
    AcceptOnMatch,
    RejectOnMatch,
}

/// Embedder-supplied predicate, for the `Custom` matcher variant.
pub trait CustomMatcher: fmt::Debug + Send + Sync {
    fn score(&self, request: &RequestMessage) -> f64;
}

/// The comparison a matcher performs, once a field value has been resolved.
///
/// `Matches`/`NotMatches` from the matcher contract are deliberately not a
/// separate operator here: `Regex` already is "matches", and
/// `MatchBehavior::RejectOnMatch` already generalizes negation across every
/// predicate kind, so a ninth operator would just duplicate that. See
/// DESIGN.md.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Field must/must not be present, independent of its value.
    Presence { expect_present: bool },
    StringOp { operator: Operator, expected: String },
    Wildcard {
        pattern: String,
        compiled: globset::GlobMatcher,
    },
    Regex {
        pattern: String,
        compiled: regex::Regex,
    },
    /// At least one node in the request's JSON body satisfies the path.
    JsonPath { expression: String },
    /// Fraction of specified leaves equal in the request JSON; `"*"` in an
    /// expected leaf skips equality for that leaf.
    JsonPartial { expected: serde_json::Value },
    /// Deliberately tiny XPath subset; see `xpath` module.
    XPath {
        expression: String,
        expected: Option<String>,
    },
    /// Restricted "LINQ-style" predicate: evaluated as a JsonPath boolean
    /// test against the request's JSON body. The Rust ecosystem has no LINQ
    /// expression evaluator, so this reuses the JsonPath engine rather than
    /// fabricating a dependency; see DESIGN.md.
    LinqExpression { expression: String },
    Custom(Arc<dyn CustomMatcher>),
}

#[derive(Debug, Clone)]
pub struct Matcher {
    pub target: Target,
    pub case: Case,
    pub match_behavior: MatchBehavior,
    pub predicate: Predicate,
}

#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("invalid regex pattern {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

impl Matcher {
    pub fn presence(target: Target, expect_present: bool) -> Self {
        Self {
            target,
            case: Case::Sensitive,
            match_behavior: MatchBehavior::AcceptOnMatch,
            predicate: Predicate::Presence { expect_present },
        }
    }

    pub fn string_op(
        target: Target,
        operator: Operator,
        case: Case,
        behavior: MatchBehavior,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            target,
            case,
            match_behavior: behavior,
            predicate: Predicate::StringOp {
                operator,
                expected: expected.into(),
            },
        }
    }

    pub fn exact(target: Target, case: Case, expected: impl Into<String>) -> Self {
        Self::string_op(target, Operator::Equals, case, MatchBehavior::AcceptOnMatch, expected)
    }

    /// `*` matches any run, `?` matches one character, anchored to the whole
    /// field value.
    pub fn wildcard(
        target: Target,
        case: Case,
        behavior: MatchBehavior,
        pattern: impl Into<String>,
    ) -> Result<Self, MatcherError> {
        let pattern = pattern.into();
        let compiled = globset::GlobBuilder::new(&pattern)
            .case_insensitive(case == Case::Insensitive)
            .literal_separator(false)
            .build()
            .map_err(|source| MatcherError::InvalidGlob {
                pattern: pattern.clone(),
                source,
            })?
            .compile_matcher();
        Ok(Self {
            target,
            case,
            match_behavior: behavior,
            predicate: Predicate::Wildcard { pattern, compiled },
        })
    }

    pub fn regex(
        target: Target,
        behavior: MatchBehavior,
        pattern: impl Into<String>,
    ) -> Result<Self, MatcherError> {
        let pattern = pattern.into();
        let compiled = regex::Regex::new(&pattern).map_err(|source| MatcherError::InvalidRegex {
            pattern: pattern.clone(),
            source,
        })?;
        Ok(Self {
            target,
            case: Case::Sensitive,
            match_behavior: behavior,
            predicate: Predicate::Regex { pattern, compiled },
        })
    }

    pub fn json_path(behavior: MatchBehavior, expression: impl Into<String>) -> Self {
        Self {
            target: Target::BodyAsJson,
            case: Case::Sensitive,
            match_behavior: behavior,
            predicate: Predicate::JsonPath {
                expression: expression.into(),
            },
        }
    }

    pub fn json_partial(behavior: MatchBehavior, expected: serde_json::Value) -> Self {
        Self {
            target: Target::BodyAsJson,
            case: Case::Sensitive,
            match_behavior: behavior,
            predicate: Predicate::JsonPartial { expected },
        }
    }

    pub fn xpath(
        behavior: MatchBehavior,
        expression: impl Into<String>,
        expected: Option<String>,
    ) -> Self {
        Self {
            target: Target::BodyAsString,
            case: Case::Sensitive,
            match_behavior: behavior,
            predicate: Predicate::XPath {
                expression: expression.into(),
                expected,
            },
        }
    }

    pub fn linq_expression(behavior: MatchBehavior, expression: impl Into<String>) -> Self {
        Self {
            target: Target::BodyAsJson,
            case: Case::Sensitive,
            match_behavior: behavior,
            predicate: Predicate::LinqExpression {
                expression: expression.into(),
            },
        }
    }

    pub fn custom(target: Target, behavior: MatchBehavior, matcher: Arc<dyn CustomMatcher>) -> Self {
        Self {
            target,
            case: Case::Sensitive,
            match_behavior: behavior,
            predicate: Predicate::Custom(matcher),
        }
    }

    /// `score(request) -> [0,1]`, honoring `match_behavior`.
    pub fn score(&self, request: &RequestMessage) -> f64 {
        let raw = self.evaluate(request).clamp(0.0, 1.0);
        match self.match_behavior {
            MatchBehavior::AcceptOnMatch => raw,
            MatchBehavior::RejectOnMatch => 1.0 - raw,
        }
    }

    fn evaluate(&self, request: &RequestMessage) -> f64 {
        match &self.predicate {
            Predicate::Presence { expect_present } => {
                let present = self.field_present(request);
                if present == *expect_present {
                    1.0
                } else {
                    0.0
                }
            }
            Predicate::StringOp { operator, expected } => match self.field_string(request) {
                Some(value) => score_string_op(*operator, &value, expected, self.case),
                None => 0.0,
            },
            Predicate::Wildcard { compiled, .. } => match self.field_string(request) {
                Some(value) => {
                    if compiled.is_match(value) {
                        1.0
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            },
            Predicate::Regex { compiled, .. } => match self.field_string(request) {
                Some(value) => {
                    if compiled.is_match(&value) {
                        1.0
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            },
            Predicate::JsonPath { expression } => score_json_path(request, expression),
            Predicate::JsonPartial { expected } => {
                jsonpartial::score(request.body.json.as_ref(), expected)
            }
            Predicate::XPath { expression, expected } => score_xpath(request, expression, expected.as_deref()),
            Predicate::LinqExpression { expression } => score_json_path(request, expression),
            Predicate::Custom(matcher) => matcher.score(request),
        }
    }

    fn field_present(&self, request: &RequestMessage) -> bool {
        match &self.target {
            Target::Url | Target::AbsoluteUrl | Target::Path | Target::Method | Target::ClientIp => true,
            Target::Query(name) => request.query.contains_key(name),
            Target::Header(name) => request.headers.contains_key(name),
            Target::Cookie(name) => request.cookies.contains_key(name),
            Target::ContentType => request.headers.contains_key("content-type"),
            Target::BodyAsString | Target::BodyAsBytes => !request.body.is_empty(),
            Target::BodyAsJson => request.body.json.is_some(),
        }
    }

    fn field_string(&self, request: &RequestMessage) -> Option<String> {
        match &self.target {
            Target::Url => Some(request.path.clone()),
            Target::AbsoluteUrl => Some(request.absolute_url.clone()),
            Target::Path => Some(request.path.clone()),
            Target::Method => Some(request.method.clone()),
            Target::ClientIp => Some(request.client_ip.clone()),
            Target::Query(name) => request.query.get(name).map(str::to_owned),
            Target::Header(name) => request.headers.get(name).map(str::to_owned),
            Target::Cookie(name) => request.cookies.get(name).cloned(),
            Target::ContentType => request
                .headers
                .get("content-type")
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_owned()),
            Target::BodyAsString | Target::BodyAsBytes => request.body.text.clone(),
            Target::BodyAsJson => request.body.json.as_ref().map(|v| v.to_string()),
        }
    }
}

fn score_string_op(operator: Operator, value: &str, expected: &str, case: Case) -> f64 {
    let (v, e) = match case {
        Case::Sensitive => (value.to_string(), expected.to_string()),
        Case::Insensitive => (value.to_lowercase(), expected.to_lowercase()),
    };
    let matched = match operator {
        Operator::Equals => v == e,
        Operator::Contains => v.contains(&e),
        Operator::StartsWith => v.starts_with(&e),
        Operator::EndsWith => v.ends_with(&e),
    };
    if matched {
        1.0
    } else {
        0.0
    }
}

fn score_json_path(request: &RequestMessage, expression: &str) -> f64 {
    use jsonpath_rust::JsonPath;

    let Some(json) = request.body.json.as_ref() else {
        return 0.0;
    };
    let Ok(path) = JsonPath::try_from(expression) else {
        return 0.0;
    };
    let results = path.find(json);
    if results.is_null() {
        0.0
    } else {
        1.0
    }
}

fn score_xpath(request: &RequestMessage, expression: &str, expected: Option<&str>) -> f64 {
    let Some(body) = request.body.text.as_ref() else {
        return 0.0;
    };
    match xpath::extract(body, expression) {
        Some(value) => match expected {
            Some(expected) => {
                if value == expected {
                    1.0
                } else {
                    0.0
                }
            }
            None => 1.0,
        },
        None => 0.0,
    }
}

/// Boolean composition of matchers. The root of a mapping is an `all-of` of
/// per-field matchers.
#[derive(Debug, Clone)]
pub enum MatchTree {
    Leaf(Matcher),
    AllOf(Vec<MatchTree>),
    AnyOf(Vec<MatchTree>),
}

impl MatchTree {
    /// Product of child scores for `all-of` (an explicit zero short-circuits
    /// the rest); max of child scores for `any-of`.
    pub fn score(&self, request: &RequestMessage) -> f64 {
        match self {
            MatchTree::Leaf(matcher) => matcher.score(request),
            MatchTree::AllOf(children) => {
                let mut total = 1.0;
                for child in children {
                    let s = child.score(request);
                    if s == 0.0 {
                        return 0.0;
                    }
                    total *= s;
                }
                total
            }
            MatchTree::AnyOf(children) => children
                .iter()
                .map(|child| child.score(request))
                .fold(0.0_f64, f64::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::OrderedMultiMap;
    use crate::model::RequestMessage;

    fn req(path: &str, method: &str, body: &str) -> RequestMessage {
        let mut headers = OrderedMultiMap::new(true);
        headers.push("Content-Type", "application/json");
        RequestMessage::new(
            format!("http://host{path}"),
            path.to_string(),
            method.to_string(),
            headers,
            OrderedMultiMap::new(false),
            body.as_bytes().to_vec(),
            "127.0.0.1".to_string(),
        )
    }

    #[test]
    fn exact_path_match() {
        let m = Matcher::exact(Target::Path, Case::Sensitive, "/foo");
        assert_eq!(m.score(&req("/foo", "GET", "")), 1.0);
        assert_eq!(m.score(&req("/bar", "GET", "")), 0.0);
    }

    #[test]
    fn reject_on_match_inverts_score() {
        let m = Matcher::string_op(
            Target::Path,
            Operator::Equals,
            Case::Sensitive,
            MatchBehavior::RejectOnMatch,
            "/foo",
        );
        assert_eq!(m.score(&req("/foo", "GET", "")), 0.0);
        assert_eq!(m.score(&req("/bar", "GET", "")), 1.0);
    }

    #[test]
    fn absent_field_scores_zero_unless_presence_check() {
        let m = Matcher::exact(Target::Header("x-missing".into()), Case::Sensitive, "val");
        assert_eq!(m.score(&req("/", "GET", "")), 0.0);

        let presence = Matcher::presence(Target::Header("x-missing".into()), false);
        assert_eq!(presence.score(&req("/", "GET", "")), 1.0);
    }

    #[test]
    fn wildcard_is_anchored() {
        let m = Matcher::wildcard(Target::Path, Case::Sensitive, MatchBehavior::AcceptOnMatch, "/api/*").unwrap();
        assert_eq!(m.score(&req("/api/users", "GET", "")), 1.0);
        assert_eq!(m.score(&req("/other/api/users", "GET", "")), 0.0);
    }

    #[test]
    fn all_of_is_product_with_zero_short_circuit() {
        let tree = MatchTree::AllOf(vec![
            MatchTree::Leaf(Matcher::exact(Target::Method, Case::Sensitive, "GET")),
            MatchTree::Leaf(Matcher::exact(Target::Path, Case::Sensitive, "/foo")),
        ]);
        assert_eq!(tree.score(&req("/foo", "GET", "")), 1.0);
        assert_eq!(tree.score(&req("/bar", "GET", "")), 0.0);
    }

    #[test]
    fn any_of_is_max() {
        let tree = MatchTree::AnyOf(vec![
            MatchTree::Leaf(Matcher::exact(Target::Path, Case::Sensitive, "/foo")),
            MatchTree::Leaf(Matcher::exact(Target::Path, Case::Sensitive, "/bar")),
        ]);
        assert_eq!(tree.score(&req("/bar", "GET", "")), 1.0);
        assert_eq!(tree.score(&req("/baz", "GET", "")), 0.0);
    }

    #[test]
    fn json_path_matches_any_node() {
        let m = Matcher::json_path(MatchBehavior::AcceptOnMatch, "$.name");
        assert_eq!(m.score(&req("/", "POST", r#"{"name":"ada"}"#)), 1.0);
        assert_eq!(m.score(&req("/", "POST", r#"{"other":"x"}"#)), 0.0);
    }

    #[test]
    fn content_type_matcher_ignores_charset() {
        let m = Matcher::exact(Target::ContentType, Case::Insensitive, "application/json");
        assert_eq!(m.score(&req("/", "POST", "{}")), 1.0);
    }
}
