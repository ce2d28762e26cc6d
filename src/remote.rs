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

//! HTTP client for a `hoard serve` server.
//!
//! Each call is one request; there is no persistent connection state beyond
//! the session token returned by login.

use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::{Stream, TryStreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Body, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, instrument, trace};
use url::Url;

use crate::objects::PutOutcome;
use crate::{compress, Error, ObjectKey, Result};

/// Scheme of the `Authorization` header carrying a session token.
pub const TOKEN_SCHEME: &str = "token";

pub struct RemoteClient {
    base: Url,
    http: reqwest::Client,
    token: Mutex<Option<String>>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base", &self.base.as_str())
            .finish()
    }
}

impl RemoteClient {
    pub fn new(location: &str) -> Result<RemoteClient> {
        let base = Url::parse(location).map_err(|source| Error::Url {
            url: location.to_owned(),
            source,
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::BadRequest(format!("{location} is not a server URL")));
        }
        let http = reqwest::Client::builder()
            .user_agent(format!("hoard/{}", crate::version()))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(RemoteClient {
            base,
            http,
            token: Mutex::new(None),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// The URL of an endpoint, with each segment escaped.
    pub fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::BadRequest(format!("{} is not a server URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|token| token.clone())
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = token;
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.token().is_some()
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let builder = self.http.request(method, self.url(segments)?);
        Ok(match self.token() {
            Some(token) => builder.header(AUTHORIZATION, format!("{TOKEN_SCHEME} {token}")),
            None => builder,
        })
    }

    pub(crate) fn get(&self, segments: &[&str]) -> Result<RequestBuilder> {
        self.request(Method::GET, segments)
    }

    pub(crate) fn post(&self, segments: &[&str]) -> Result<RequestBuilder> {
        self.request(Method::POST, segments)
    }

    /// Send a request, failing unless the server returned success.
    pub(crate) async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        check_status(builder.send().await?).await
    }

    pub(crate) async fn text(&self, builder: RequestBuilder) -> Result<String> {
        Ok(self.send(builder).await?.text().await?)
    }

    pub(crate) async fn post_json<T: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        value: &T,
    ) -> Result<String> {
        let body = serde_json::to_vec(value)?;
        let builder = self
            .post(segments)?
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.text(builder).await
    }

    pub(crate) async fn post_text(&self, segments: &[&str], text: String) -> Result<String> {
        let builder = self
            .post(segments)?
            .header(CONTENT_TYPE, "text/plain")
            .body(text);
        self.text(builder).await
    }

    /// Receive a response body of text lines as it arrives, passing each
    /// line without its terminator to `each`.
    pub(crate) async fn lines(
        &self,
        builder: RequestBuilder,
        each: impl FnMut(String) + Send,
    ) -> Result<()> {
        let response = self.send(builder).await?;
        read_lines(response.bytes_stream().map_err(io::Error::other), each).await?;
        Ok(())
    }

    /// Exchange an access key for a session token.
    #[instrument(skip_all)]
    pub async fn login(&self, access_key: &str) -> Result<()> {
        let builder = self
            .post(&["auth", "login"])?
            .header(CONTENT_TYPE, "text/plain")
            .body(access_key.to_owned());
        let token = match self.text(builder).await {
            Ok(token) => token,
            Err(Error::Remote { status: 403, .. }) => return Err(Error::AccessDenied),
            Err(err) => return Err(err),
        };
        debug!("Logged in");
        self.set_token(Some(token.trim().to_owned()));
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        if self.is_logged_in() {
            self.send(self.post(&["auth", "logout"])?).await?;
            self.set_token(None);
        }
        Ok(())
    }

    pub async fn has(&self, key: &ObjectKey) -> Result<bool> {
        let response = self.get(&["fs", "has", &key.to_string()])?.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => check_status(response).await.map(|_| true),
        }
    }

    /// Upload a file unless an object with its hash and size is already
    /// present.
    ///
    /// As with the server's own dedup, presence of variant 0 is trusted
    /// without comparing content.
    #[instrument(skip(self))]
    pub async fn put_object(&self, path: &Path, size: u64, hash: &str) -> Result<PutOutcome> {
        if self.has(&ObjectKey::new(hash, 0, size)).await? {
            return Ok(PutOutcome {
                variant: 0,
                stored: false,
            });
        }
        let owned = path.to_owned();
        let compressed = crate::blocking(move || compress_to_temp(&owned)).await?;
        let body = Body::wrap_stream(ReaderStream::new(tokio::fs::File::from_std(compressed)));
        let builder = self
            .post(&["fs", "put", hash, &size.to_string()])?
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body);
        let outcome: PutOutcome = self.send(builder).await?.json().await?;
        trace!(?outcome, "Uploaded");
        Ok(outcome)
    }

    /// Download an object, writing its plain content to `out`.
    pub async fn get_object(&self, key: &ObjectKey, out: &mut (dyn Write + Send)) -> Result<u64> {
        let mut response = self.send(self.get(&["fs", "get", &key.to_string()])?).await?;
        let read_err = |source| Error::ReadObject {
            key: key.clone(),
            source,
        };
        let mut decoder = GzDecoder::new(CountingWriter { inner: out, count: 0 });
        while let Some(chunk) = response.chunk().await? {
            decoder.write_all(&chunk).map_err(read_err)?;
        }
        let writer = decoder.finish().map_err(read_err)?;
        Ok(writer.count)
    }
}

/// Gzip a file into an anonymous temporary file, ready to read from the start.
fn compress_to_temp(path: &Path) -> Result<File> {
    let input = File::open(path).map_err(|source| Error::ReadSource {
        path: path.to_owned(),
        source,
    })?;
    let mut temp = tempfile::tempfile()?;
    compress::compress(input, &mut temp).map_err(|source| Error::ReadSource {
        path: path.to_owned(),
        source,
    })?;
    temp.rewind()?;
    Ok(temp)
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let message = response.text().await.unwrap_or_default().trim().to_owned();
    debug!(%status, %url, %message, "Request failed");
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Unauthorized);
    }
    Err(Error::Remote {
        status: status.as_u16(),
        url,
        message,
    })
}

struct CountingWriter<'a> {
    inner: &'a mut (dyn Write + Send),
    count: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Pass each text line of a byte stream, without its terminator, to `each`.
async fn read_lines<S>(stream: S, mut each: impl FnMut(String) + Send) -> io::Result<()>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut lines = StreamReader::new(Box::pin(stream)).lines();
    while let Some(line) = lines.next_line().await? {
        each(line);
    }
    Ok(())
}
