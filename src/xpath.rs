//! A deliberately small XPath subset for the `XPath` matcher.
//!
//! The crate ecosystem has no general XPath evaluator; `quick-xml` (already
//! used elsewhere for response bodies) gives us an event-based XML reader we
//! can walk ourselves. Supported expressions: absolute element paths
//! (`/a/b/c`), an optional trailing `@attr` to read an attribute, and an
//! optional trailing `text()` to read element text. Predicates, wildcards,
//! and relative axes are not supported; see DESIGN.md.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Element(String),
    Attribute(String),
    Text,
}

fn parse_expr(expr: &str) -> Vec<Step> {
    expr.trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Some(attr) = s.strip_prefix('@') {
                Step::Attribute(attr.to_string())
            } else if s == "text()" {
                Step::Text
            } else {
                Step::Element(s.to_string())
            }
        })
        .collect()
}

/// Evaluate `expr` against `xml`, returning the first matching text/attribute
/// value, or `None` if the document is malformed or nothing matches.
pub fn extract(xml: &str, expr: &str) -> Option<String> {
    let steps = parse_expr(expr);
    let (element_path, tail) = match steps.split_last() {
        Some((Step::Attribute(name), rest)) => (rest.to_vec(), Step::Attribute(name.clone())),
        Some((Step::Text, rest)) => (rest.to_vec(), Step::Text),
        Some(_) => (steps.clone(), Step::Text),
        None => return None,
    };

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut depth_stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();
    let mut pending_attr: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                depth_stack.push(name);
                if depth_stack == element_path {
                    if let Step::Attribute(attr_name) = &tail {
                        for a in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
                            if key == *attr_name {
                                return a
                                    .unescape_value()
                                    .ok()
                                    .map(|v| v.into_owned());
                            }
                        }
                        return None;
                    }
                    pending_attr = Some(String::new());
                }
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                depth_stack.push(name);
                if depth_stack == element_path {
                    if let Step::Attribute(attr_name) = &tail {
                        for a in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
                            if key == *attr_name {
                                return a
                                    .unescape_value()
                                    .ok()
                                    .map(|v| v.into_owned());
                            }
                        }
                        depth_stack.pop();
                        return None;
                    }
                }
                depth_stack.pop();
            }
            Ok(Event::Text(t)) => {
                if depth_stack == element_path && matches!(tail, Step::Text) {
                    if let Ok(text) = t.unescape() {
                        pending_attr.get_or_insert_with(String::new).push_str(&text);
                    }
                }
            }
            Ok(Event::End(_)) => {
                if depth_stack == element_path && matches!(tail, Step::Text) {
                    if let Some(text) = pending_attr.take() {
                        return Some(text);
                    }
                }
                depth_stack.pop();
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_element_text() {
        let xml = "<root><name>Ada</name></root>";
        assert_eq!(extract(xml, "/root/name/text()"), Some("Ada".to_string()));
    }

    #[test]
    fn extracts_attribute() {
        let xml = r#"<root><user id="42"/></root>"#;
        assert_eq!(extract(xml, "/root/user/@id"), Some("42".to_string()));
    }

    #[test]
    fn missing_path_returns_none() {
        let xml = "<root><name>Ada</name></root>";
        assert_eq!(extract(xml, "/root/missing/text()"), None);
    }

    #[test]
    fn malformed_xml_returns_none() {
        assert_eq!(extract("not xml at all", "/root/text()"), None);
    }
}
