//! CLI surface and static-mapping-directory loading (§6).

use crate::admin;
use crate::settings::Settings;
use crate::state::AppState;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "stublash", about = "Standalone programmable HTTP stub server", version)]
pub struct Args {
    /// Port the mock surface listens on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Bind address for the mock surface.
    #[arg(long = "urls", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Port the admin surface listens on; defaults to `--port`.
    #[arg(long)]
    pub admin: Option<u16>,

    /// Load one mapping per JSON file from this directory at startup.
    #[arg(long)]
    pub read_static_mappings: Option<PathBuf>,

    /// Re-scan the static mappings directory periodically for changes.
    #[arg(long)]
    pub watch_static_mappings: bool,

    /// Proxy every unmatched request to this upstream instead of 404ing.
    #[arg(long)]
    pub proxy_all: Option<String>,

    /// Persist proxied responses as new static mappings on first hit.
    #[arg(long)]
    pub save_mapping: bool,

    /// Accept the best-scoring mapping even below the perfect threshold.
    #[arg(long)]
    pub allow_partial_mapping: bool,

    /// Extra delay, in milliseconds, added to every response.
    #[arg(long)]
    pub request_logging_delay: Option<u64>,

    /// Print the resolved settings and exit.
    #[arg(long)]
    pub print_config: bool,

    /// Validate the static mappings directory (if any) and exit.
    #[arg(long)]
    pub validate: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'L', long, default_value = "info")]
    pub log_level: tracing::Level,
}

impl Args {
    pub fn admin_port(&self) -> u16 {
        self.admin.unwrap_or(self.port)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            global_delay_ms: self.request_logging_delay.unwrap_or(0),
            allow_partial_mapping: self.allow_partial_mapping,
            ..Settings::default()
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.bind_address, self.port).parse()?)
    }
}

/// Build the combined mock + admin router, already bound to `state`. Used
/// when `--admin` is unset or equal to `--port`, so both surfaces share one
/// listener.
pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .nest("/__admin", admin::router())
        .merge(crate::http::router())
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// The mocked surface alone, for the split-listener case (`--admin` names a
/// different port than `--port`).
pub fn mock_app(state: AppState) -> axum::Router {
    crate::http::router()
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// The `/__admin` surface alone, for the split-listener case.
pub fn admin_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .nest("/__admin", admin::router())
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// `--proxy-all <url>`: install a lowest-priority catch-all mapping that
/// proxies every otherwise-unmatched request to `upstream`, instead of
/// falling back to 404. Matches nothing explicitly (an empty `all-of` tree
/// scores 1.0 against any request per [`crate::mapping::Mapping::builder`]),
/// so any mapping with a real predicate and equal-or-lower priority still
/// wins first.
pub fn install_proxy_all_fallback(state: &AppState, upstream: &str, save_mapping: bool) {
    use crate::mapping::{Mapping, ProxyConfig, ResponseSpec};

    let mapping = Mapping::builder()
        .with_title("proxy-all fallback")
        .with_priority(i32::MAX)
        .with_response(ResponseSpec {
            proxy: Some(ProxyConfig {
                upstream_base_url: upstream.to_string(),
                client_cert_path: None,
                save_mapping_on_first_hit: save_mapping,
            }),
            ..ResponseSpec::default()
        })
        .build();
    let _ = state.store.add(mapping);
}

/// Namespace for deriving a static mapping's id from its file path when the
/// file itself doesn't set one, so the same file always maps to the same id
/// across a `--watch-static-mappings` rescan instead of minting a fresh UUID
/// (and a fresh store entry) every poll.
const STATIC_MAPPING_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8b, 0x3a, 0x6f, 0x21, 0x0c, 0x4e, 0x4a, 0x9d, 0xb1, 0x7a, 0x5e, 0x2d, 0x9f, 0x61, 0x0c, 0x44,
]);

/// Parse every `*.json` file in `dir` as one mapping and load it into the
/// store. Used at startup and, under `--watch-static-mappings`, on every
/// poll. Invalid files are skipped with a warning rather than aborting the
/// whole load.
pub fn load_static_mappings_dir(dir: &Path, state: &AppState) -> anyhow::Result<usize> {
    let mut loaded = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let mut wire: admin::WireMapping = match serde_json::from_str(&contents) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(file = ?path, error = %e, "skipping invalid static mapping file");
                continue;
            }
        };
        if wire.id.is_none() {
            wire.id = Some(Uuid::new_v5(&STATIC_MAPPING_NAMESPACE, path.to_string_lossy().as_bytes()));
        }
        match admin::to_mapping(wire) {
            Ok(mapping) => {
                state.load_static_mapping(mapping);
                loaded += 1;
            }
            Err(e) => warn!(file = ?path, error = %e, "skipping static mapping with invalid matcher"),
        }
    }
    Ok(loaded)
}

/// Re-scan `dir` on a fixed interval for as long as the process runs. The
/// corpus has no filesystem-watcher crate to ground an inotify/kqueue-based
/// implementation on, so this polls instead; see DESIGN.md.
pub fn spawn_static_mappings_watcher(dir: PathBuf, state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            interval.tick().await;
            match load_static_mappings_dir(&dir, &state) {
                Ok(count) => info!(count, "rescanned static mappings directory"),
                Err(e) => warn!(error = %e, "failed to rescan static mappings directory"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_every_json_file_in_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mapping_json = r#"{
            "request": { "method": "GET", "urlPath": "/hello" },
            "response": { "status": 200, "body": "hi" }
        }"#;
        let mut file = std::fs::File::create(dir.path().join("hello.json")).unwrap();
        file.write_all(mapping_json.as_bytes()).unwrap();

        let state = AppState::new(Settings::default());
        let loaded = load_static_mappings_dir(dir.path(), &state).unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(state.store.list().len(), 1);
    }

    #[test]
    fn rescanning_an_id_less_file_does_not_duplicate_the_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let mapping_json = r#"{
            "request": { "method": "GET", "urlPath": "/hello" },
            "response": { "status": 200, "body": "hi" }
        }"#;
        std::fs::write(dir.path().join("hello.json"), mapping_json).unwrap();

        let state = AppState::new(Settings::default());
        load_static_mappings_dir(dir.path(), &state).unwrap();
        load_static_mappings_dir(dir.path(), &state).unwrap();
        load_static_mappings_dir(dir.path(), &state).unwrap();

        assert_eq!(state.store.list().len(), 1);
    }

    #[test]
    fn skips_invalid_json_without_failing_the_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), b"not json").unwrap();

        let state = AppState::new(Settings::default());
        let loaded = load_static_mappings_dir(dir.path(), &state).unwrap();
        assert_eq!(loaded, 0);
        assert_eq!(state.store.list().len(), 0);
    }

    #[test]
    fn proxy_all_fallback_is_installed_at_the_lowest_priority() {
        let state = AppState::new(Settings::default());
        install_proxy_all_fallback(&state, "http://upstream.test", false);

        let mappings = state.store.list();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].priority, i32::MAX);
        assert!(mappings[0].response.proxy.is_some());
    }
}
