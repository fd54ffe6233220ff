//! Template engine for dynamic responses.
//!
//! Uses Handlebars for template rendering against the request document tree
//! (`request.*`) plus the small set of generator helpers (`now`, `guid`,
//! `random`, ...).

use crate::model::RequestMessage;
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::HashMap;

/// The `request.*` document tree exposed to templates.
#[derive(Debug, Serialize)]
pub struct RequestView {
    pub method: String,
    pub url: String,
    pub path: String,
    pub absoluteurl: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(rename = "bodyAsJson", skip_serializing_if = "Option::is_none")]
    pub body_as_json: Option<serde_json::Value>,
}

impl From<&RequestMessage> for RequestView {
    fn from(req: &RequestMessage) -> Self {
        Self {
            method: req.method.clone(),
            url: req.path.clone(),
            path: req.path.clone(),
            absoluteurl: req.absolute_url.clone(),
            query: req.query.to_map(),
            headers: req.headers.to_map(),
            cookies: req.cookies.clone(),
            body: req.body.text.clone(),
            body_as_json: req.body.json.clone(),
        }
    }
}

/// Current state of the scenario a mapping belongs to, if any.
#[derive(Debug, Serialize)]
pub struct ScenarioView {
    pub name: String,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct TemplateContext {
    pub request: RequestView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<ScenarioView>,
}

impl TemplateContext {
    pub fn new(request: &RequestMessage, scenario: Option<(String, String)>) -> Self {
        Self {
            request: RequestView::from(request),
            scenario: scenario.map(|(name, state)| ScenarioView { name, state }),
        }
    }
}

pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("uuid", Box::new(guid_helper));
        handlebars.register_helper("guid", Box::new(guid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Responses aren't HTML; don't let handlebars escape quotes/ampersands.
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, handlebars::RenderError> {
        self.handlebars.render_template(template, ctx)
    }

    /// Render every string leaf of a JSON value that contains `{{`, leaving
    /// the rest (numbers, bools, already-literal strings) untouched.
    pub fn render_json(
        &self,
        value: &serde_json::Value,
        ctx: &TemplateContext,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        match value {
            serde_json::Value::String(s) => {
                if s.contains("{{") {
                    Ok(serde_json::Value::String(self.render(s, ctx)?))
                } else {
                    Ok(value.clone())
                }
            }
            serde_json::Value::Array(arr) => {
                let rendered: Result<Vec<_>, _> = arr.iter().map(|v| self.render_json(v, ctx)).collect();
                Ok(serde_json::Value::Array(rendered?))
            }
            serde_json::Value::Object(obj) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in obj {
                    rendered.insert(k.clone(), self.render_json(v, ctx)?);
                }
                Ok(serde_json::Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let param = h.param(0).map(|v| v.value());
    match param {
        Some(v) => out.write(&serde_json::to_string_pretty(v).unwrap_or_default())?,
        None => out.write("")?,
    }
    Ok(())
}

fn guid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    out.write(&uuid::Uuid::new_v4().to_string())?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;

    let format = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");
    out.write(&Utc::now().format(format).to_string())?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);
    let value = if max > min { rand::thread_rng().gen_range(min..=max) } else { min };
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let default = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    if let Some(v) = value {
        if !v.is_null() {
            if let Some(s) = v.as_str() {
                if !s.is_empty() {
                    out.write(s)?;
                    return Ok(());
                }
            } else {
                out.write(&v.to_string())?;
                return Ok(());
            }
        }
    }

    out.write(default)?;
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::OrderedMultiMap;

    fn request_with(path: &str, query: &[(&str, &str)], body: Option<&str>) -> RequestMessage {
        let mut q = OrderedMultiMap::new(false);
        for (k, v) in query {
            q.push(*k, *v);
        }
        let mut headers = OrderedMultiMap::new(true);
        headers.push("content-type", "application/json");
        RequestMessage::new(
            format!("http://example.test{path}"),
            path.to_string(),
            "GET".into(),
            headers,
            q,
            body.unwrap_or("").as_bytes().to_vec(),
            "127.0.0.1".into(),
        )
    }

    #[test]
    fn renders_query_parameter() {
        let engine = TemplateEngine::new();
        let req = request_with("/list", &[("page", "1")], None);
        let ctx = TemplateContext::new(&req, None);
        let result = engine.render("Page: {{request.query.page}}", &ctx).unwrap();
        assert_eq!(result, "Page: 1");
    }

    #[test]
    fn renders_body_as_json_field() {
        let engine = TemplateEngine::new();
        let req = request_with("/users", &[], Some(r#"{"name":"John"}"#));
        let req = RequestMessage::new(
            req.absolute_url,
            req.path,
            "POST".into(),
            req.headers,
            req.query,
            r#"{"name":"John"}"#.as_bytes().to_vec(),
            req.client_ip,
        );
        let ctx = TemplateContext::new(&req, None);
        let result = engine.render("Name: {{request.bodyAsJson.name}}", &ctx).unwrap();
        assert_eq!(result, "Name: John");
    }

    #[test]
    fn renders_scenario_state() {
        let engine = TemplateEngine::new();
        let req = request_with("/", &[], None);
        let ctx = TemplateContext::new(&req, Some(("checkout".into(), "Paid".into())));
        let result = engine.render("State: {{scenario.state}}", &ctx).unwrap();
        assert_eq!(result, "State: Paid");
    }

    #[test]
    fn guid_helper_emits_a_valid_uuid() {
        let engine = TemplateEngine::new();
        let req = request_with("/", &[], None);
        let ctx = TemplateContext::new(&req, None);
        let result = engine.render("ID: {{guid}}", &ctx).unwrap();
        let id = &result[4..];
        assert_eq!(id.len(), 36);
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn default_helper_falls_back_on_missing_query_param() {
        let engine = TemplateEngine::new();
        let req = request_with("/", &[], None);
        let ctx = TemplateContext::new(&req, None);
        let result = engine
            .render("Value: {{default request.query.missing \"fallback\"}}", &ctx)
            .unwrap();
        assert_eq!(result, "Value: fallback");
    }

    #[test]
    fn random_helper_handles_an_inverted_range_without_panicking() {
        let engine = TemplateEngine::new();
        let req = request_with("/", &[], None);
        let ctx = TemplateContext::new(&req, None);
        let result = engine.render("{{random 10 5}}", &ctx).unwrap();
        assert_eq!(result, "10");
    }

    #[test]
    fn render_json_only_rewrites_templated_string_leaves() {
        let engine = TemplateEngine::new();
        let req = request_with("/users/123", &[], None);
        let ctx = TemplateContext::new(&req, None);
        let json = serde_json::json!({
            "path": "{{request.path}}",
            "static": "no template",
            "count": 3,
        });
        let result = engine.render_json(&json, &ctx).unwrap();
        assert_eq!(result["path"], "/users/123");
        assert_eq!(result["static"], "no template");
        assert_eq!(result["count"], 3);
    }
}
