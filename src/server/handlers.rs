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

//! Request handlers for the sync protocol.

use std::fs::File;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::ops::{OpId, OpKind};
use super::{stream_lines, AppState, ServerError, Session};
use crate::filter::FilterSpec;
use crate::instance::{Instance, VerifyOptions};
use crate::key::{hash_file, is_valid_hash};
use crate::manifest::{BackupsDir, Entry, Line, RunStatus};
use crate::monitor::void::VoidMonitor;
use crate::objects::{ObjectStore, PutOutcome, SeenCache};
use crate::{blocking, compress, Error, Filter, ListOptions, ObjectKey, Stamp, When, TMP_PREFIX};

type HandlerResult<T> = std::result::Result<T, ServerError>;

fn op_id(session: &Session, set: &str) -> OpId {
    (session.user.clone(), set.to_owned())
}

fn parse_when(when: &str) -> crate::Result<When> {
    when.parse()
}

/// True for `1`, `true` or `yes`.
fn flag(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("1" | "true" | "yes"))
}

/// Parse a key and normalize it for the store's layout.
fn store_key(state: &AppState, text: &str) -> crate::Result<ObjectKey> {
    let key: ObjectKey = text.parse()?;
    Ok(state
        .target()
        .store()
        .key(&key.hash, key.variant, key.size))
}

pub(super) async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    access_key: String,
) -> HandlerResult<String> {
    Ok(state.login(access_key.trim(), addr.ip())?)
}

pub(super) async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> StatusCode {
    state.logout(&session.token).await;
    StatusCode::OK
}

pub(super) async fn has(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> HandlerResult<StatusCode> {
    let key = store_key(&state, &key)?;
    let store = state.target().store().clone();
    Ok(if blocking(move || Ok(store.exists(&key))).await? {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    })
}

/// Receive a gzip object upload.
///
/// The upload is checked against the hash and size in the URL. If variant 0
/// is free the gzip stream is stored as it is; otherwise the content goes
/// through the usual comparison and variant allocation.
pub(super) async fn put(
    State(state): State<AppState>,
    Path((hash, size)): Path<(String, u64)>,
    body: Body,
) -> HandlerResult<Json<PutOutcome>> {
    if !is_valid_hash(&hash) {
        return Err(Error::InvalidKey(hash).into());
    }
    let objects = state.target().objects().clone();
    let upload = tempfile::Builder::new()
        .prefix(TMP_PREFIX)
        .tempfile_in(objects.content_store().root())?;
    let mut writer = tokio::fs::File::from_std(upload.reopen()?);
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| Error::BadRequest(format!("Upload failed: {err}")))?;
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;
    drop(writer);
    let outcome = blocking(move || store_upload(&objects, upload.path(), &hash, size)).await?;
    Ok(Json(outcome))
}

/// Check a received gzip stream against its claimed hash and size, and
/// store it.
fn store_upload(
    objects: &ObjectStore,
    upload: &std::path::Path,
    hash: &str,
    size: u64,
) -> crate::Result<PutOutcome> {
    let store = objects.content_store();
    let mut plain = tempfile::Builder::new()
        .prefix(TMP_PREFIX)
        .tempfile_in(store.root())?;
    let plain_size = compress::decompress(File::open(upload)?, plain.as_file_mut())
        .map_err(|err| Error::BadRequest(format!("Upload is not a gzip stream: {err}")))?;
    let plain_hash = hash_file(plain.path())?;
    if plain_size != size || plain_hash != hash {
        return Err(Error::BadRequest(format!(
            "Upload has hash {plain_hash} and size {plain_size}, not {hash} and {size}"
        )));
    }
    let key = store.key(hash, 0, size);
    let outcome = if store.exists(&key) {
        objects.put(
            plain.path(),
            size,
            hash,
            0,
            &mut SeenCache::default(),
            &VoidMonitor,
        )?
    } else {
        let stored = objects.put_precompressed(upload, &key)?;
        PutOutcome { variant: 0, stored }
    };
    debug!(%key, ?outcome, "Received object");
    Ok(outcome)
}

pub(super) async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> HandlerResult<Response> {
    let key = store_key(&state, &key)?;
    let store = state.target().store().clone();
    let file = blocking(move || store.open_compressed(&key)).await?;
    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(file)));
    Ok(([(CONTENT_TYPE, "application/gzip")], body).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct FlagsQuery {
    dry_run: Option<String>,
    verbose: Option<String>,
}

pub(super) async fn clean(
    State(state): State<AppState>,
    Query(query): Query<FlagsQuery>,
) -> HandlerResult<Response> {
    let target = Arc::clone(state.target());
    target.check_none_running()?;
    let dry_run = flag(&query.dry_run);
    Ok(stream_lines(move |monitor| async move {
        blocking(move || target.clean(dry_run, monitor.as_ref()).map(|_| ())).await
    }))
}

pub(super) async fn fsck(
    State(state): State<AppState>,
    Query(query): Query<FlagsQuery>,
) -> HandlerResult<Response> {
    let target = Arc::clone(state.target());
    target.check_none_running()?;
    let verbose = flag(&query.verbose);
    Ok(stream_lines(move |monitor| async move {
        blocking(move || target.fsck(verbose, monitor.as_ref()).map(|_| ())).await
    }))
}

pub(super) async fn create(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(set): Path<String>,
) -> HandlerResult<String> {
    let id = op_id(&session, &set);
    let mut ops = state.inner.ops.lock().await;
    ops.check_free(&id, &session.token, OpKind::Backup)?;
    let mut instance = state.target().instance(session.user.as_deref(), &set)?;
    instance.create_new_instance().await?;
    Ok(ops.begin_backup(id, &session.token, instance)?)
}

pub(super) async fn log_source(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(set): Path<String>,
    Json(root): Json<String>,
) -> HandlerResult<StatusCode> {
    let mut ops = state.inner.ops.lock().await;
    let instance = ops.backup_instance(&op_id(&session, &set), &session.token)?;
    instance.write_source(&root).await?;
    Ok(StatusCode::OK)
}

pub(super) async fn log_entry(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(set): Path<String>,
    Json(entry): Json<Entry>,
) -> HandlerResult<StatusCode> {
    let mut ops = state.inner.ops.lock().await;
    let instance = ops.backup_instance(&op_id(&session, &set), &session.token)?;
    instance.write_entry(&entry).await?;
    Ok(StatusCode::OK)
}

pub(super) async fn finish(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(set): Path<String>,
    status: String,
) -> HandlerResult<StatusCode> {
    let status = RunStatus::parse_tail(status.trim());
    let mut ops = state.inner.ops.lock().await;
    let instance = ops.backup_instance(&op_id(&session, &set), &session.token)?;
    instance.finish(&status).await?;
    Ok(StatusCode::OK)
}

pub(super) async fn complete(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((set, when)): Path<(String, String)>,
) -> HandlerResult<StatusCode> {
    let started: Stamp = when.parse()?;
    let mut instance = state
        .inner
        .ops
        .lock()
        .await
        .end_backup(&op_id(&session, &set), &session.token)?;
    if let Err(err) = instance.complete(started).await {
        warn!(set, "Failed to seal backup: {err}");
        instance.abandon().await?;
        return Err(err.into());
    }
    Ok(StatusCode::OK)
}

pub(super) async fn abandon(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(set): Path<String>,
) -> HandlerResult<StatusCode> {
    let mut instance = state
        .inner
        .ops
        .lock()
        .await
        .end_backup(&op_id(&session, &set), &session.token)?;
    instance.abandon().await?;
    Ok(StatusCode::OK)
}

pub(super) async fn verify(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((set, when)): Path<(String, String)>,
    Query(query): Query<FlagsQuery>,
) -> HandlerResult<Response> {
    let when = parse_when(&when)?;
    let instance = state.target().instance(session.user.as_deref(), &set)?;
    instance.backups().resolve(&set, &when)?;
    let options = VerifyOptions {
        when,
        verbose: flag(&query.verbose),
        ..Default::default()
    };
    Ok(stream_lines(move |monitor| async move {
        instance.verify(&options, monitor).await.map(|_| ())
    }))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListQuery {
    sources: Option<String>,
    since: Option<String>,
    /// Filter rules separated by newlines.
    filters: Option<String>,
    when: Option<String>,
}

impl ListQuery {
    fn options(self, set: Option<String>, when: Option<When>) -> crate::Result<ListOptions> {
        let rules: Vec<&str> = self
            .filters
            .as_deref()
            .unwrap_or_default()
            .lines()
            .filter(|rule| !rule.is_empty())
            .collect();
        let when = match (when, self.when.as_deref()) {
            (Some(when), _) => Some(when),
            (None, Some(when)) => Some(parse_when(when)?),
            (None, None) => None,
        };
        Ok(ListOptions {
            set,
            when,
            filter: Filter::new(&rules)?,
            sources: flag(&self.sources),
            since: self
                .since
                .as_deref()
                .map(str::parse::<Stamp>)
                .transpose()?,
        })
    }
}

fn list_response(
    state: &AppState,
    session: &Session,
    options: ListOptions,
) -> HandlerResult<Response> {
    let target = Arc::clone(state.target());
    let backups = target.backups_dir(session.user.as_deref())?;
    if let (Some(set), Some(when)) = (&options.set, &options.when) {
        backups.resolve(set, when)?;
    }
    let user = session.user.clone();
    Ok(stream_lines(move |monitor| async move {
        blocking(move || target.list(user.as_deref(), &options, monitor.as_ref())).await
    }))
}

pub(super) async fn list(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<ListQuery>,
) -> HandlerResult<Response> {
    let options = query.options(None, None)?;
    list_response(&state, &session, options)
}

pub(super) async fn list_set(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(set): Path<String>,
    Query(query): Query<ListQuery>,
) -> HandlerResult<Response> {
    let options = query.options(Some(set), None)?;
    list_response(&state, &session, options)
}

pub(super) async fn list_files(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((set, when)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> HandlerResult<Response> {
    let options = query.options(Some(set), Some(parse_when(&when)?))?;
    list_response(&state, &session, options)
}

/// Send the lines of a manifest, less entries ignored by the filter in the
/// body, for the client to restore from.
pub(super) async fn restore_get(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((set, when)): Path<(String, String)>,
    body: Bytes,
) -> HandlerResult<String> {
    let spec: FilterSpec = if body.iter().all(u8::is_ascii_whitespace) {
        FilterSpec::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| Error::BadRequest(format!("Invalid filter: {err}")))?
    };
    let filter = Filter::try_from(&spec)?;
    let when = parse_when(&when)?;
    let id = op_id(&session, &set);
    state
        .inner
        .ops
        .lock()
        .await
        .begin_restore(&id, &session.token)?;
    let result = {
        let backups = state.target().backups_dir(session.user.as_deref());
        blocking(move || restore_listing(&backups?, &set, &when, &filter)).await
    };
    state
        .inner
        .ops
        .lock()
        .await
        .end_restore(&id, &session.token);
    Ok(result?)
}

fn restore_listing(
    backups: &BackupsDir,
    set: &str,
    when: &When,
    filter: &Filter,
) -> crate::Result<String> {
    let lines = backups.lines(set, when)?;
    let mut text = String::new();
    for line in lines {
        if let Line::Entry(entry) = &line {
            if filter.ignores(&entry.path) {
                continue;
            }
        }
        text.push_str(&line.to_string());
        text.push('\n');
    }
    Ok(text)
}
