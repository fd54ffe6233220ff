//! stublash: a standalone, programmable HTTP stub server.
//!
//! Request matching, response templates, scenario state machines, and
//! failure simulation, served over a real HTTP listener plus an admin API
//! rooted at `/__admin`.
//!
//! # Features
//!
//! - **Request matching**: path, method, headers, query, cookies, body
//!   (string, JSON path, JSON partial, XPath, wildcard, regex)
//! - **Response generation**: static, Handlebars-templated, proxied, or
//!   user-supplied callback bodies
//! - **Scenarios**: per-name state machines gating mapping eligibility
//! - **Latency and fault injection**: fixed/random delay, malformed/empty/
//!   truncated responses
//! - **Request log**: bounded, queryable history of served requests

pub mod admin;
pub mod collections;
pub mod config;
pub mod error;
pub mod generator;
pub mod http;
pub mod jsonpartial;
pub mod mapping;
pub mod matcher;
pub mod matching;
pub mod model;
pub mod reqlog;
pub mod scenario;
pub mod settings;
pub mod state;
pub mod template;
pub mod xpath;

pub use error::Error;
pub use mapping::Mapping;
pub use settings::Settings;
pub use state::AppState;
