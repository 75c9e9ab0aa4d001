//! Git smart HTTP protocol surface
//!
//! Routes:
//! - GET  /info/refs?service=git-upload-pack  (generate a commit, advertise refs)
//! - POST /git-upload-pack                    (serve a packfile for the wants)
//! - POST /git-receive-pack                   (always refused)
//! - anything else                            (404, no dumb protocol)

use axum::{
    body::{Body, Bytes},
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::generator::CommitGenerator;
use crate::object::ObjectId;
use crate::pack::PackBuilder;
use crate::protocol::{
    format_capabilities, parse_capabilities, sideband, sideband_pkt, PktLineReader,
    PktLineWriter, SIDEBAND_CHUNK, UPLOAD_PACK_CAPABILITIES,
};
use crate::storage::GitStorage;
use crate::Result;

pub const UPLOAD_PACK_SERVICE: &str = "git-upload-pack";

const ADVERTISEMENT_CONTENT_TYPE: &str = "application/x-git-upload-pack-advertisement";
const RESULT_CONTENT_TYPE: &str = "application/x-git-upload-pack-result";

/// Shared server state: the store plus the generator behind its mutex.
/// The mutex serializes whole `generate()` calls, which is what makes
/// ref advances totally ordered across concurrent fetches.
pub struct AppState {
    pub storage: Arc<GitStorage>,
    pub generator: Mutex<CommitGenerator>,
}

/// Build the router over a repository
pub fn router(storage: Arc<GitStorage>) -> Router {
    let state = Arc::new(AppState {
        generator: Mutex::new(CommitGenerator::new(storage.clone())),
        storage,
    });

    Router::new()
        .route("/info/refs", get(info_refs))
        .route("/git-upload-pack", post(upload_pack))
        .route("/git-receive-pack", post(receive_pack))
        .fallback(not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(req: Request, next: Next) -> Response {
    info!(
        method = %req.method(),
        path = %req.uri().path(),
        query = req.uri().query().unwrap_or(""),
        "request"
    );
    next.run(req).await
}

/// Build the ref advertisement: service banner, flush, then one line per
/// ref with the capability list attached to the first
pub fn handle_info_refs(storage: &GitStorage) -> Result<Vec<u8>> {
    let mut writer = PktLineWriter::new();

    writer.write_str(&format!("# service={}", UPLOAD_PACK_SERVICE))?;
    writer.flush();

    let refs = storage.get_refs()?;
    let caps = format_capabilities(UPLOAD_PACK_CAPABILITIES);

    let mut first = true;
    for (name, hex) in &refs {
        if first {
            writer.write_str(&format!("{} {}\0{}", hex, name, caps))?;
            first = false;
        } else {
            writer.write_str(&format!("{} {}", hex, name))?;
        }
    }

    writer.flush();
    Ok(writer.into_bytes())
}

/// Parse want/have/done, answer with NAK and the packfile.
///
/// `have` lines are accepted and ignored: there is no negotiation, the
/// client gets everything reachable from its wants. Only the first want
/// line's capabilities are honored.
pub fn handle_upload_pack(storage: &GitStorage, body: &[u8]) -> Result<Vec<u8>> {
    let mut reader = PktLineReader::new(body);
    let mut wants = Vec::new();
    let mut capabilities: Option<Vec<String>> = None;

    while let Some(line) = reader.read_string()? {
        if let Some(rest) = line.strip_prefix("want ") {
            let mut parts = rest.splitn(2, ' ');
            let hex = parts.next().unwrap_or(rest);
            if capabilities.is_none() {
                capabilities = Some(parse_capabilities(parts.next().unwrap_or("")));
            }
            if let Some(oid) = ObjectId::from_hex(hex) {
                wants.push(oid);
            }
        } else if line.starts_with("have ") {
            // Ignored: common objects are never acknowledged.
        } else if line == "done" {
            break;
        }
    }

    let mut response = PktLineWriter::new();
    response.write_str("NAK")?;

    let mut builder = PackBuilder::new(storage);
    for oid in wants {
        builder.want(oid);
    }
    let pack = builder.build()?;

    let side_band = capabilities
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|c| c == "side-band" || c == "side-band-64k");

    if side_band {
        // Channel 1 carries pack data, chunked to fit pkt-line frames
        for chunk in pack.chunks(SIDEBAND_CHUNK) {
            response.write_raw(&sideband_pkt(sideband::DATA, chunk)?);
        }
        response.flush();
    } else {
        // Raw pack bytes, no framing and no trailing flush
        response.write_raw(&pack);
    }

    Ok(response.into_bytes())
}

#[derive(Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

async fn info_refs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InfoRefsQuery>,
) -> Response {
    if query.service.as_deref() != Some(UPLOAD_PACK_SERVICE) {
        return (StatusCode::FORBIDDEN, "Service not supported").into_response();
    }

    // Generate a new commit before advertising refs. The lock spans the
    // whole call so concurrent fetches see strictly ordered tips.
    let (commit, counter) = {
        let generator = state.generator.lock().await;
        match generator.generate() {
            Ok(commit) => (commit, generator.counter()),
            Err(e) => {
                error!(error = %e, "failed to generate commit");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                    .into_response();
            }
        }
    };
    info!(sha = %commit, counter, "generated new commit");

    match handle_info_refs(&state.storage) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, ADVERTISEMENT_CONTENT_TYPE)
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from(body))
            .unwrap(),
        Err(e) => {
            error!(error = %e, "failed to advertise refs");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

async fn upload_pack(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match handle_upload_pack(&state.storage, &body) {
        Ok(response) => {
            info!(bytes = response.len(), "completed upload-pack");
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, RESULT_CONTENT_TYPE)
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from(response))
                .unwrap()
        }
        Err(e) => {
            error!(error = %e, "upload-pack failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

async fn receive_pack() -> Response {
    info!("rejecting push attempt");
    (StatusCode::FORBIDDEN, "Push access denied").into_response()
}

async fn not_found() -> StatusCode {
    // Smart protocol only; the dumb-protocol file surface is not served
    StatusCode::NOT_FOUND
}
