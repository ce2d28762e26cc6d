// Copyright 2024-2025 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! HTTP server giving remote clients access to a local destination.
//!
//! Clients log in with an access key if the destination has an
//! `auth.json`, then back up, verify, list and restore sets in their own
//! namespace. Status lines from long operations are streamed back as
//! they're produced.

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::instance::Instance;
use crate::monitor::channel::ChannelMonitor;
use crate::monitor::Monitor;
use crate::remote::TOKEN_SCHEME;
use crate::{Error, FsType, LocalBackup, Result, TargetOptions, AUTH_FILENAME};

pub mod auth;
mod handlers;
pub mod ops;

use auth::{AuthDb, Sessions};
use ops::OpRegistry;

/// Default time after which an unused session, and any backup it was
/// running, is dropped.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(900);

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub destination: PathBuf,
    pub bind: SocketAddr,
    /// Layout for a new destination, or to check against an existing one.
    pub fstype: Option<FsType>,
    pub fast: bool,
    pub token_ttl: Duration,
    /// How often idle sessions are looked for.
    pub sweep_interval: Duration,
}

impl ServeOptions {
    pub fn new(destination: impl Into<PathBuf>, bind: SocketAddr) -> ServeOptions {
        ServeOptions {
            destination: destination.into(),
            bind,
            fstype: None,
            fast: false,
            token_ttl: DEFAULT_TOKEN_TTL,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// The authenticated client of a request.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: Option<String>,
}

/// Shared state of the server, cloned into each handler.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ServerInner>,
}

pub struct ServerInner {
    pub target: Arc<LocalBackup>,
    /// Access keys; None if the server is open to everyone.
    pub auth: Option<AuthDb>,
    sessions: Mutex<Sessions>,
    pub ops: tokio::sync::Mutex<OpRegistry>,
    pub token_ttl: Duration,
}

impl AppState {
    pub fn new(target: Arc<LocalBackup>, auth: Option<AuthDb>, token_ttl: Duration) -> AppState {
        AppState {
            inner: Arc::new(ServerInner {
                target,
                auth,
                sessions: Mutex::new(Sessions::default()),
                ops: tokio::sync::Mutex::new(OpRegistry::default()),
                token_ttl,
            }),
        }
    }

    /// Open or create the destination and load its access keys.
    pub fn open(options: &ServeOptions) -> Result<AppState> {
        let target_options = TargetOptions {
            fstype: options.fstype,
            fast: options.fast,
            ..Default::default()
        };
        let target = LocalBackup::open(&options.destination, &target_options, true)?;
        let auth = AuthDb::load(&options.destination.join(AUTH_FILENAME))?;
        if auth.is_none() {
            warn!("No {AUTH_FILENAME}: serving without authentication");
        }
        Ok(AppState::new(Arc::new(target), auth, options.token_ttl))
    }

    pub fn target(&self) -> &Arc<LocalBackup> {
        &self.inner.target
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        match self.inner.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("Session lock poisoned; continuing");
                poisoned.into_inner()
            }
        }
    }

    /// Exchange an access key for a token.
    pub fn login(&self, access_key: &str, addr: IpAddr) -> Result<String> {
        let now = Instant::now();
        let Some(auth) = &self.inner.auth else {
            return Ok(self.sessions().anonymous(addr, now));
        };
        let account = auth.account(access_key, addr).ok_or(Error::AccessDenied)?;
        info!(user = account.userid, %addr, "Login");
        Ok(self.sessions().login(&account.userid, addr, now))
    }

    /// The session of a request, if it may proceed.
    pub fn authenticate(&self, token: Option<&str>, addr: IpAddr) -> Option<Session> {
        let now = Instant::now();
        let mut sessions = self.sessions();
        if self.inner.auth.is_none() {
            let token = sessions.anonymous(addr, now);
            return Some(Session { token, user: None });
        }
        let token = token?;
        let user = sessions.authenticate(token, addr, now)?;
        Some(Session {
            token: token.to_owned(),
            user,
        })
    }

    /// End a session, abandoning any backup it was running.
    pub async fn logout(&self, token: &str) {
        self.sessions().logout(token);
        self.drop_ops_of(&[token.to_owned()]).await;
    }

    /// Expire idle sessions and abandon their backups.
    ///
    /// Returns the number of sessions expired.
    pub async fn expire_idle(&self) -> usize {
        let expired = self
            .sessions()
            .expire(self.inner.token_ttl, Instant::now());
        if !expired.is_empty() {
            self.drop_ops_of(&expired).await;
        }
        expired.len()
    }

    async fn drop_ops_of(&self, tokens: &[String]) {
        let instances = self.inner.ops.lock().await.remove_owned_by(tokens);
        for mut instance in instances {
            info!(set = instance.set_name(), "Abandon backup of expired session");
            if let Err(err) = instance.abandon().await {
                warn!("Failed to abandon backup: {err}");
            }
        }
    }
}

/// An error from a handler, sent to the client with a matching status.
#[derive(Debug)]
pub struct ServerError(pub Error);

impl From<Error> for ServerError {
    fn from(err: Error) -> ServerError {
        ServerError(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> ServerError {
        ServerError(Error::from(err))
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotRunning { .. } => StatusCode::NOT_FOUND,
            err if err.is_not_found() => StatusCode::NOT_FOUND,
            Error::OpConflict { .. }
            | Error::BackupRunning { .. }
            | Error::CleanWhileRunning { .. }
            | Error::AccessDenied => StatusCode::FORBIDDEN,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::BadRequest(_)
            | Error::InvalidKey(_)
            | Error::InvalidStamp(_)
            | Error::InvalidSetName { .. }
            | Error::InvalidUserId { .. }
            | Error::Glob { .. }
            | Error::SerializeJson { .. }
            | Error::FileChangedDuringBackup { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self.0);
        } else {
            info!(%status, error = %self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/fs/has/{key}", get(handlers::has))
        .route("/fs/put/{hash}/{size}", post(handlers::put))
        .route("/fs/get/{key}", get(handlers::get_object))
        .route("/fs/clean", get(handlers::clean))
        .route("/fsck", get(handlers::fsck))
        .route("/backup/create/{set}", post(handlers::create))
        .route("/backup/log/{set}/source", post(handlers::log_source))
        .route("/backup/log/{set}/entry", post(handlers::log_entry))
        .route("/backup/finish/{set}", post(handlers::finish))
        .route("/backup/complete/{set}/{when}", post(handlers::complete))
        .route("/backup/abandon/{set}", post(handlers::abandon))
        .route("/verify/{set}/{when}", get(handlers::verify))
        .route("/list", get(handlers::list))
        .route("/list/{set}", get(handlers::list_set))
        .route("/list/{set}/{when}", get(handlers::list_files))
        .route("/restore/get/{set}/{when}", post(handlers::restore_get))
        .route("/auth/logout", post(handlers::logout))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let public = Router::new().route("/auth/login", post(handlers::login));

    public
        .merge(gated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let prefix = format!("{TOKEN_SCHEME} ");
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(&prefix))
        .map(|token| token.trim().to_owned());
    match state.authenticate(token.as_deref(), addr.ip()) {
        Some(session) => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        None => ServerError(Error::Unauthorized).into_response(),
    }
}

/// Run an operation in the background, streaming the lines it emits as a
/// plain-text response.
///
/// An error from the operation is sent as a final `ERROR` line, since the
/// response status has already been sent.
pub(crate) fn stream_lines<F, Fut>(work: F) -> Response
where
    F: FnOnce(Arc<ChannelMonitor>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    let monitor = Arc::new(ChannelMonitor::new(sender));
    tokio::spawn(async move {
        if let Err(err) = work(Arc::clone(&monitor)).await {
            monitor.error(err);
        }
        debug!(counters = ?monitor.counters().nonzero(), "Streamed operation finished");
    });
    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        receiver
            .recv()
            .await
            .map(|line| (Ok::<_, Infallible>(Bytes::from(line)), receiver))
    });
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Start dropping idle sessions periodically.
pub fn spawn_sweeper(state: AppState, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            state.expire_idle().await;
        }
    })
}

/// Serve on an already-bound listener until the process is stopped.
pub async fn serve_listener(
    listener: TcpListener,
    state: AppState,
    sweep_interval: Duration,
) -> Result<()> {
    let sweeper = spawn_sweeper(state.clone(), sweep_interval);
    let result = axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;
    sweeper.abort();
    result.map_err(Error::from)
}

pub async fn serve(options: ServeOptions) -> Result<()> {
    let state = AppState::open(&options)?;
    let listener = TcpListener::bind(options.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        destination = ?options.destination,
        "Serving"
    );
    serve_listener(listener, state, options.sweep_interval).await
}
