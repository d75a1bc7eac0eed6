mod gallery;
mod page;
mod session;
mod workflow;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use axum_extra::extract::CookieJar;
use facecap_common::config::Config;
use facecap_common::params::{BoxColor, DetectionParams};
use facecap_vision::{camera, detect};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::gallery::{Gallery, GalleryError};
use crate::session::{session_cookie, session_id, SessionHandle, SessionStore};
use crate::workflow::{Event, Notice, Session, Workflow};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    workflow: Arc<Workflow>,
    sessions: SessionStore,
    columns: usize,
}

type FormFields = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The caller's session plus the cookie to set if it was just created.
fn session_for(state: &AppState, jar: &CookieJar) -> (SessionHandle, Option<Uuid>) {
    let workflow = Arc::clone(&state.workflow);
    let (id, session, created) = state
        .sessions
        .resolve(session_id(jar), move || workflow.new_session());
    (session, created.then_some(id))
}

fn with_cookie(jar: CookieJar, new_id: Option<Uuid>, response: Response) -> Response {
    match new_id {
        Some(id) => (jar.add(session_cookie(id)), response).into_response(),
        None => response,
    }
}

fn png(bytes: Vec<u8>) -> Response {
    (
        [
            (CONTENT_TYPE, HeaderValue::from_static("image/png")),
            (CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        bytes,
    )
        .into_response()
}

/// Run `event` against the caller's session off the async runtime, then
/// send the browser back to the page for a full re-render.
async fn dispatch(
    state: Arc<AppState>,
    jar: CookieJar,
    make_event: impl FnOnce(&mut Session) -> Option<Event> + Send + 'static,
) -> Response {
    let (session, new_id) = session_for(&state, &jar);
    let workflow = Arc::clone(&state.workflow);
    let mut guard = session.lock_owned().await;
    let result = tokio::task::spawn_blocking(move || {
        if let Some(event) = make_event(&mut *guard) {
            debug!(?event, "applying event");
            workflow.apply(&mut *guard, event);
        }
    })
    .await;

    match result {
        Ok(()) => with_cookie(jar, new_id, Redirect::to("/").into_response()),
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn params_from_form(form: &FormFields, fallback: &DetectionParams) -> Result<DetectionParams, String> {
    let scale = form
        .get("scale_factor")
        .cloned()
        .unwrap_or_else(|| fallback.scale_factor.to_string());
    let neighbors = form
        .get("min_neighbors")
        .cloned()
        .unwrap_or_else(|| fallback.min_neighbors.to_string());
    let color = form
        .get("color")
        .cloned()
        .unwrap_or_else(|| fallback.color.to_string());
    DetectionParams::from_inputs(&scale, &neighbors, &color).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET / — render the page for the caller's session
async fn index(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let (session, new_id) = session_for(&state, &jar);
    let workflow = Arc::clone(&state.workflow);
    let columns = state.columns;
    debug!(sessions = state.sessions.len(), "rendering page");

    let mut guard = session.lock_owned().await;
    let result = tokio::task::spawn_blocking(move || {
        let view = workflow.view(&mut *guard);
        let html = page::render(&view, columns);
        html
    })
    .await;

    match result {
        Ok(html) => with_cookie(jar, new_id, Html(html).into_response()),
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /capture — update the controls, grabbing a frame if the camera is armed
async fn capture(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<FormFields>,
) -> impl IntoResponse {
    dispatch(state, jar, move |session| {
        match params_from_form(&form, &session.params) {
            Ok(params) if form.contains_key("arm") => Some(Event::Capture(params)),
            Ok(params) => Some(Event::SetParams(params)),
            Err(message) => {
                session.notify(Notice::Error(message));
                None
            }
        }
    })
    .await
}

/// POST /discard — drop the current capture
async fn discard(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    dispatch(state, jar, |_| Some(Event::Discard)).await
}

/// POST /save — write the current capture to the gallery
async fn save(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<FormFields>,
) -> impl IntoResponse {
    let name = form.get("name").cloned().unwrap_or_default();
    dispatch(state, jar, move |_| Some(Event::Save { name })).await
}

/// POST /delete — remove the ticked images if deletion was confirmed
async fn delete(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<FormFields>,
) -> impl IntoResponse {
    let mut selected: Vec<String> = form
        .keys()
        .filter_map(|k| k.strip_prefix(page::PICK_PREFIX))
        .map(str::to_string)
        .collect();
    selected.sort_by(|a, b| b.cmp(a));
    let confirmed = form.contains_key("confirm");
    dispatch(state, jar, move |_| {
        Some(Event::Delete {
            selected,
            confirmed,
        })
    })
    .await
}

/// GET /capture.png — the caller's current annotated frame
async fn capture_png(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let Some(session) = session_id(&jar).and_then(|id| state.sessions.get(id)) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let guard = session.lock_owned().await;
    let result = tokio::task::spawn_blocking(move || {
        let encoded = guard.captured().map(|frame| frame.encode_png());
        encoded
    })
    .await;

    match result {
        Ok(Some(Ok(bytes))) => png(bytes),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Ok(Some(Err(e))) => {
            error!(error = %e, "PNG encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /images/:name — one gallery file
async fn gallery_image(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    let workflow = Arc::clone(&state.workflow);
    let result = tokio::task::spawn_blocking(move || workflow.gallery().read(&name)).await;

    match result {
        Ok(Ok(Some(bytes))) => png(bytes),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(GalleryError::InvalidName(name))) => {
            (StatusCode::BAD_REQUEST, format!("invalid image name {name:?}")).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "gallery read failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/capture", post(capture))
        .route("/discard", post(discard))
        .route("/save", post(save))
        .route("/delete", post(delete))
        .route("/capture.png", get(capture_png))
        .route("/images/:name", get(gallery_image))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let color: BoxColor = match config.defaults.box_color.parse() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "bad defaults.box_color");
            std::process::exit(1);
        }
    };
    let defaults = DetectionParams::new(
        config.defaults.scale_factor,
        config.defaults.min_neighbors,
        color,
    );

    let gallery = match Gallery::open(&config.gallery.dir, config.gallery.overwrite) {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "failed to open gallery directory");
            std::process::exit(1);
        }
    };

    let detector = match detect::from_config(&config.detector) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to load face cascade");
            std::process::exit(1);
        }
    };

    let camera = camera::from_config(&config.camera);
    info!(
        camera = camera.name(),
        gallery = %gallery.dir().display(),
        overwrite = config.gallery.overwrite,
        scale_factor = defaults.scale_factor,
        min_neighbors = defaults.min_neighbors,
        "workflow ready"
    );

    let workflow = Workflow::new(
        camera,
        detector,
        gallery,
        defaults,
        config.defaults.box_thickness,
    );
    let state = Arc::new(AppState {
        workflow: Arc::new(workflow),
        sessions: SessionStore::new(Duration::from_secs(config.server.session_ttl_secs)),
        columns: config.gallery.columns,
    });

    let app = router(state);
    let addr = config.server.bind.clone();
    info!(addr = %addr, "facecap server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}
