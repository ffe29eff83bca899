//! Heist daemon entrypoint.
//!
//! A single-process service that owns the heist engine for every community:
//! a socket listener with strict request validation, SQLite-backed records
//! and ledger, an in-memory notification feed and the vault recovery thread.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use heist_core::{
    ConfigUpdate, EngineSettings, HeistError, HeistService, ServiceParts, Target,
};
use heist_protocol::{
    parse_params, BailoutParams, CommunityParams, ConfigUpdateParams, ErrorInfo, FeedParams,
    MemberParams, Method, Request, Response, TargetParams, ThemeParams, MAX_FEED_LIMIT,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde::Serialize;
use serde_json::Value;

mod db;
mod feed;
mod settings;
mod views;

use db::Db;
use feed::Feed;
use views::{ConfigView, MemberView};

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Clone)]
struct Daemon {
    service: HeistService,
    db: Arc<Db>,
    feed: Arc<Feed>,
}

fn main() {
    init_logging();

    let settings = match settings::load_settings(None) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(error = %err, "Failed to load heist settings; using defaults");
            EngineSettings::default()
        }
    };

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path, settings.defaults.opening_balance) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let feed = Arc::new(Feed::new(MAX_FEED_LIMIT));
    let service = HeistService::new(
        settings.clone(),
        ServiceParts {
            store: db.clone(),
            ledger: db.clone(),
            directory: db.clone(),
            sink: feed.clone(),
        },
    );
    let loaded = service.load_targets();
    info!(
        targets = loaded,
        vault_tick_secs = settings.vault.tick_secs,
        poll_interval_ms = settings.session.poll_interval_ms,
        "Heist engine ready"
    );

    let _vault_recovery = match service.spawn_vault_recovery() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "Failed to start vault recovery; vaults will not refill");
            None
        }
    };

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Heist daemon started");

    let daemon = Daemon { service, db, feed };
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let daemon = daemon.clone();
                thread::spawn(move || handle_connection(stream, daemon));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("HEIST_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".heist").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".heist").join("daemon").join("heist.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, daemon: Daemon) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &daemon);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, daemon: &Daemon) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let params = request.params;
    let service = &daemon.service;

    match request.method {
        Method::GetHealth => Response::ok(
            id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "vault_tick_secs": service.settings().vault.tick_secs,
            }),
        ),
        Method::StartEvent => with_params(id, params, |p: MemberParams| {
            remember_name(daemon, &p);
            domain(service.start_event(&p.community_id, &p.member_id))
        }),
        Method::JoinEvent => with_params(id, params, |p: MemberParams| {
            remember_name(daemon, &p);
            domain(service.join_event(&p.community_id, &p.member_id))
        }),
        Method::ResetEvent => with_params(id, params, |p: CommunityParams| {
            let reset = service.reset_event(&p.community_id);
            Ok(serde_json::json!({ "reset": reset }))
        }),
        Method::ListTargets => with_params(id, params, |p: CommunityParams| {
            to_value(&service.list_targets(&p.community_id))
        }),
        Method::UpsertTarget => with_params(id, params, |p: TargetParams| {
            domain(service.upsert_target(Target {
                community_id: p.community_id,
                target_id: p.target_id,
                crew_size: p.crew_size,
                success: p.success,
                vault: p.vault,
                vault_max: p.vault_max,
            }))
        }),
        Method::GetMemberStats => with_params(id, params, |p: MemberParams| {
            remember_name(daemon, &p);
            to_value(&member_view(daemon, &p.community_id, &p.member_id))
        }),
        Method::Bailout => with_params(id, params, |p: BailoutParams| {
            domain(service.bailout(&p.community_id, &p.payer_id, p.member_id.as_deref()))
        }),
        Method::Revive => with_params(id, params, |p: MemberParams| {
            service.revive(&p.community_id, &p.member_id).map_err(domain_error)?;
            to_value(&member_view(daemon, &p.community_id, &p.member_id))
        }),
        Method::ClearMember => with_params(id, params, |p: MemberParams| {
            service.clear_member(&p.community_id, &p.member_id);
            to_value(&member_view(daemon, &p.community_id, &p.member_id))
        }),
        Method::GetConfig => with_params(id, params, |p: CommunityParams| {
            to_value(&ConfigView::new(&service.config(&p.community_id)))
        }),
        Method::UpdateConfig => with_params(id, params, |p: ConfigUpdateParams| {
            let update = ConfigUpdate {
                heist_cost: p.cost,
                bail_base: p.bail,
                sentence_base: p.sentence_secs.map(Duration::from_secs),
                police_alert: p.patrol_secs.map(Duration::from_secs),
                death_duration: p.death_secs.map(Duration::from_secs),
                wait_time: p.wait_secs.map(Duration::from_secs),
            };
            let config = service
                .update_config(&p.community_id, &update)
                .map_err(domain_error)?;
            to_value(&ConfigView::new(&config))
        }),
        Method::ListThemes => with_params(id, params, |p: CommunityParams| {
            let active = service.config(&p.community_id).theme;
            Ok(serde_json::json!({
                "themes": service.list_themes(&p.community_id),
                "active": active,
            }))
        }),
        Method::SetTheme => with_params(id, params, |p: ThemeParams| {
            let config = service
                .set_theme(&p.community_id, &p.theme_id)
                .map_err(domain_error)?;
            to_value(&ConfigView::new(&config))
        }),
        Method::GetFeed => with_params(id, params, |p: FeedParams| {
            to_value(&daemon.feed.recent(&p.community_id, p.effective_limit()))
        }),
    }
}

/// Parses params, runs `op`, and wraps either outcome in a response.
fn with_params<P, F>(id: Option<String>, params: Option<Value>, op: F) -> Response
where
    P: serde::de::DeserializeOwned + heist_protocol::Validate,
    F: FnOnce(P) -> Result<Value, ErrorInfo>,
{
    let parsed = match parse_params::<P>(params) {
        Ok(parsed) => parsed,
        Err(err) => return Response::error_with_info(id, err),
    };
    match op(parsed) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error_with_info(id, err),
    }
}

fn domain<T: Serialize>(result: Result<T, HeistError>) -> Result<Value, ErrorInfo> {
    let value = result.map_err(domain_error)?;
    to_value(&value)
}

fn domain_error(err: HeistError) -> ErrorInfo {
    tracing::debug!(code = err.code(), error = %err, "Request rejected");
    ErrorInfo::new(err.code(), err.to_string())
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ErrorInfo> {
    serde_json::to_value(value).map_err(|err| {
        ErrorInfo::new(
            "serialization_error",
            format!("Failed to serialize response: {}", err),
        )
    })
}

fn remember_name(daemon: &Daemon, params: &MemberParams) {
    let Some(name) = params.display_name.as_deref() else {
        return;
    };
    if name.trim().is_empty() {
        return;
    }
    if let Err(err) = daemon
        .db
        .record_display_name(&params.community_id, &params.member_id, name)
    {
        warn!(
            community = %params.community_id,
            member = %params.member_id,
            error = %err,
            "Failed to record display name"
        );
    }
}

fn member_view(daemon: &Daemon, community_id: &str, member_id: &str) -> MemberView {
    MemberView {
        display_name: heist_core::MemberDirectory::display_name(
            daemon.db.as_ref(),
            community_id,
            member_id,
        ),
        balance: daemon.service.balance(community_id, member_id),
        stats: daemon.service.member_stats(community_id, member_id),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
