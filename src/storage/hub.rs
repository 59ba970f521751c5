//! Hub-style dataset repository store.
//!
//! Talks to a Hugging Face compatible HTTP API: directory listings come
//! from the `tree` endpoint (paginated through `Link` headers), single
//! entries from `paths-info`, contents from `resolve`, and every mutation
//! is one NDJSON commit.  Keys are `<owner>/<repo>/<path>`: the first two
//! segments name the repository.
//!
//! The [`ObjectStore`] contract is blocking, so each call drives its
//! request to completion on the ambient tokio runtime from the worker
//! pool thread it runs on.

use std::collections::HashMap;
use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LINK, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::backend::{
    join_key, parent_key, LastModified, ObjectReader, ObjectStore, ObjectWriter, RemoteObject,
    StoreConnector, StoreError, StoreResult,
};
use crate::config::HubConfig;
use crate::paths::{encode_path, encode_segment};

/// Connection settings shared by every session handle.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub endpoint: String,
    pub repo_type: String,
    pub revision: String,
    pub listing_ttl: Duration,
}

impl From<&HubConfig> for HubSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            repo_type: config.repo_type.clone(),
            revision: config.revision.clone(),
            listing_ttl: Duration::from_secs(config.listing_ttl_secs),
        }
    }
}

impl HubSettings {
    fn api_repo(&self, repo: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.endpoint,
            self.repo_type,
            encode_path(repo)
        )
    }

    fn revision(&self) -> String {
        encode_segment(&self.revision)
    }

    fn tree_url(&self, repo: &str, path: &str, recursive: bool) -> String {
        let mut url = format!("{}/tree/{}", self.api_repo(repo), self.revision());
        if !path.is_empty() {
            url.push('/');
            url.push_str(&encode_path(path));
        }
        url.push_str(if recursive {
            "?recursive=true&expand=true"
        } else {
            "?expand=true"
        });
        url
    }

    fn paths_info_url(&self, repo: &str) -> String {
        format!("{}/paths-info/{}", self.api_repo(repo), self.revision())
    }

    fn commit_url(&self, repo: &str) -> String {
        format!("{}/commit/{}", self.api_repo(repo), self.revision())
    }

    fn resolve_url(&self, repo: &str, path: &str) -> String {
        // Model repositories live at the top level of the site.
        let prefix = if self.repo_type == "models" {
            self.endpoint.clone()
        } else {
            format!("{}/{}", self.endpoint, self.repo_type)
        };
        format!(
            "{prefix}/{}/resolve/{}/{}",
            encode_path(repo),
            self.revision(),
            encode_path(path)
        )
    }
}

/// Split a key into `(repository id, path inside the repository)`.
fn split_key(key: &str) -> StoreResult<(String, String)> {
    let mut parts = key.trim_matches('/').splitn(3, '/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => Ok((
            format!("{owner}/{name}"),
            parts.next().unwrap_or_default().to_string(),
        )),
        _ => Err(StoreError::Backend(anyhow::anyhow!(
            "key does not name a repository: {key}"
        ))),
    }
}

/// Drive `future` to completion from a worker pool thread.
fn block_on<F: Future>(future: F) -> StoreResult<F::Output> {
    let handle = tokio::runtime::Handle::try_current()
        .context("hub store used outside a tokio runtime")?;
    Ok(handle.block_on(future))
}

/// Map a non-success response to a store error.
fn check(resp: Response, key: &str) -> StoreResult<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else if status == StatusCode::NOT_FOUND {
        Err(StoreError::NotFound(key.to_string()))
    } else {
        Err(StoreError::Backend(anyhow::anyhow!(
            "hub returned HTTP {status} for {key}"
        )))
    }
}

/// Extract the `rel="next"` target of a `Link` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == "rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "lastCommit", default)]
    last_commit: Option<LastCommit>,
}

#[derive(Debug, Deserialize)]
struct LastCommit {
    date: Option<String>,
}

impl TreeEntry {
    fn into_object(self, repo: &str) -> RemoteObject {
        let key = join_key(repo, &self.path);
        let modified = self
            .last_commit
            .and_then(|c| c.date)
            .map(LastModified::Iso);
        if self.kind == "directory" {
            RemoteObject::directory(key, modified)
        } else {
            RemoteObject::file(key, self.size, modified)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(rename = "lastModified", default)]
    last_modified: Option<String>,
}

type ListingKey = (String, String);

/// Short-lived cache of non-recursive directory listings.
struct ListingCache {
    ttl: Duration,
    entries: Mutex<HashMap<ListingKey, (Instant, Vec<RemoteObject>)>>,
}

impl ListingCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::default(),
        }
    }

    fn get(&self, token: &str, dir: &str) -> Option<Vec<RemoteObject>> {
        let entries = self.entries.lock().ok()?;
        let (stored, listing) = entries.get(&(token.to_string(), dir.to_string()))?;
        (stored.elapsed() < self.ttl).then(|| listing.clone())
    }

    fn put(&self, token: &str, dir: &str, listing: &[RemoteObject]) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
            entries.insert(
                (token.to_string(), dir.to_string()),
                (Instant::now(), listing.to_vec()),
            );
        }
    }

    /// Drop the listing of `prefix`, of everything beneath it, and of its
    /// parent, for every token.
    fn evict(&self, prefix: &str) {
        let below = format!("{prefix}/");
        let parent = parent_key(prefix);
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(_, dir), _| {
                !(dir == prefix || dir.starts_with(&below) || dir == parent)
            });
        }
    }
}

/// Builds per-session [`HubStore`] handles over one HTTP client.
pub struct HubConnector {
    client: Client,
    settings: Arc<HubSettings>,
    cache: Arc<ListingCache>,
}

impl HubConnector {
    pub fn new(config: &HubConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("hubdav/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build hub HTTP client")?;
        let settings = HubSettings::from(config);
        let cache = Arc::new(ListingCache::new(settings.listing_ttl));
        Ok(Self {
            client,
            settings: Arc::new(settings),
            cache,
        })
    }
}

impl StoreConnector for HubConnector {
    fn connect(&self, token: &str) -> Arc<dyn ObjectStore> {
        Arc::new(HubStore {
            client: self.client.clone(),
            settings: Arc::clone(&self.settings),
            cache: Arc::clone(&self.cache),
            token: token.to_string(),
        })
    }
}

/// One session's view of the hub, authenticated with its bearer token.
#[derive(Clone)]
pub struct HubStore {
    client: Client,
    settings: Arc<HubSettings>,
    cache: Arc<ListingCache>,
    token: String,
}

impl HubStore {
    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.header(AUTHORIZATION, format!("Bearer {}", self.token))
        }
    }

    fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let resp = block_on(self.authed(request).send())?
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("hub request failed: {e}")))?;
        Ok(resp)
    }

    fn json<T: serde::de::DeserializeOwned>(&self, resp: Response) -> StoreResult<T> {
        block_on(resp.json::<T>())?
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("unreadable hub response: {e}")))
    }

    fn stat_repo(&self, key: &str, repo: &str) -> StoreResult<RemoteObject> {
        let resp = self.send(self.client.get(self.settings.api_repo(repo)))?;
        let info: RepoInfo = self.json(check(resp, key)?)?;
        Ok(RemoteObject::directory(
            key,
            info.last_modified.map(LastModified::Iso),
        ))
    }

    fn fetch_tree(&self, key: &str, repo: &str, path: &str, recursive: bool) -> StoreResult<Vec<RemoteObject>> {
        let mut url = Some(self.settings.tree_url(repo, path, recursive));
        let mut out = Vec::new();
        while let Some(page) = url.take() {
            let resp = check(self.send(self.client.get(&page))?, key)?;
            url = resp
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);
            let entries: Vec<TreeEntry> = self.json(resp)?;
            out.extend(entries.into_iter().map(|e| e.into_object(repo)));
        }
        Ok(out)
    }

    fn commit(&self, key: &str, repo: &str, summary: String, operations: Vec<serde_json::Value>) -> StoreResult<()> {
        let mut body = commit_header(&summary)?.to_vec();
        for line in operations {
            serde_json::to_writer(&mut body, &line)
                .map_err(|e| StoreError::Backend(anyhow::anyhow!("commit encoding failed: {e}")))?;
            body.push(b'\n');
        }
        self.post_commit(key, repo, reqwest::Body::from(body))
    }

    fn post_commit(&self, key: &str, repo: &str, body: reqwest::Body) -> StoreResult<()> {
        let request = self
            .client
            .post(self.settings.commit_url(repo))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        check(self.send(request)?, key)?;
        Ok(())
    }
}

/// The NDJSON line every commit starts with.
fn commit_header(summary: &str) -> StoreResult<Bytes> {
    let header = serde_json::json!({
        "key": "header",
        "value": { "summary": summary, "description": "" },
    });
    let mut line = serde_json::to_vec(&header)
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("commit encoding failed: {e}")))?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// Raw bytes read per base64 block; a multiple of 3 so blocks encode
/// without padding and concatenate into one valid string.
const COMMIT_BLOCK: usize = 48 * 1024;

/// Commit body for one file upload, encoded from the spool as it is sent.
fn upload_body(
    header: Bytes,
    path: &str,
    spool: std::fs::File,
) -> StoreResult<impl Stream<Item = io::Result<Bytes>> + Send + 'static> {
    let path = serde_json::to_string(path)
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("commit encoding failed: {e}")))?;
    let open = Bytes::from(format!(
        "{{\"key\":\"file\",\"value\":{{\"path\":{path},\"encoding\":\"base64\",\"content\":\""
    ));
    let blocks = stream::try_unfold(Some(tokio::fs::File::from_std(spool)), next_block);
    Ok(stream::iter([Ok(header), Ok(open)])
        .chain(blocks)
        .chain(stream::once(async { Ok(Bytes::from_static(b"\"}}\n")) })))
}

/// Encode the next full block of the spool; a short block ends the stream.
async fn next_block(
    spool: Option<tokio::fs::File>,
) -> io::Result<Option<(Bytes, Option<tokio::fs::File>)>> {
    let Some(mut spool) = spool else {
        return Ok(None);
    };
    let mut block = vec![0u8; COMMIT_BLOCK];
    let mut filled = 0;
    while filled < COMMIT_BLOCK {
        let n = spool.read(&mut block[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    let encoded = base64::engine::general_purpose::STANDARD.encode(&block[..filled]);
    let rest = (filled == COMMIT_BLOCK).then_some(spool);
    Ok(Some((Bytes::from(encoded), rest)))
}

impl ObjectStore for HubStore {
    fn stat(&self, key: &str) -> StoreResult<RemoteObject> {
        let (repo, path) = split_key(key)?;
        if path.is_empty() {
            return self.stat_repo(key, &repo);
        }
        let request = self
            .client
            .post(self.settings.paths_info_url(&repo))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(format!(
                "paths={}&expand=true",
                encode_segment(&path)
            ));
        let resp = check(self.send(request)?, key)?;
        let entries: Vec<TreeEntry> = self.json(resp)?;
        entries
            .into_iter()
            .find(|e| e.path == path)
            .map(|e| e.into_object(&repo))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn list(&self, key: &str, recursive: bool) -> StoreResult<Vec<RemoteObject>> {
        if !recursive {
            if let Some(listing) = self.cache.get(&self.token, key) {
                return Ok(listing);
            }
        }
        let (repo, path) = split_key(key)?;
        let listing = self.fetch_tree(key, &repo, &path, recursive)?;
        if !recursive {
            self.cache.put(&self.token, key, &listing);
        }
        Ok(listing)
    }

    fn open_read(&self, key: &str) -> StoreResult<Box<dyn ObjectReader>> {
        let (repo, path) = split_key(key)?;
        if path.is_empty() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(Box::new(HubReader {
            store: self.clone(),
            url: self.settings.resolve_url(&repo, &path),
            pos: 0,
            response: None,
            pending: Bytes::new(),
            exhausted: false,
        }))
    }

    fn open_write(&self, key: &str) -> StoreResult<Box<dyn ObjectWriter>> {
        let (repo, path) = split_key(key)?;
        if path.is_empty() {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "cannot write a repository root: {key}"
            )));
        }
        Ok(Box::new(HubWriter {
            store: self.clone(),
            key: key.to_string(),
            repo,
            path,
            spool: tempfile::tempfile()?,
        }))
    }

    fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        let target = self.stat(key)?;
        let (repo, path) = split_key(key)?;
        if path.is_empty() {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "cannot delete a repository root: {key}"
            )));
        }
        let operation = if target.is_dir() {
            if !recursive {
                return Err(StoreError::Backend(anyhow::anyhow!(
                    "directory delete requires recursion: {key}"
                )));
            }
            serde_json::json!({ "key": "deletedFolder", "value": { "path": path } })
        } else {
            serde_json::json!({ "key": "deletedFile", "value": { "path": path } })
        };
        self.commit(key, &repo, format!("Delete {path}"), vec![operation])
    }

    fn invalidate(&self, prefix: &str) -> StoreResult<()> {
        self.cache.evict(prefix);
        Ok(())
    }
}

/// Streams a file through `resolve`, re-requesting with `Range` on seek.
struct HubReader {
    store: HubStore,
    url: String,
    pos: u64,
    response: Option<Response>,
    pending: Bytes,
    exhausted: bool,
}

impl HubReader {
    fn request(&self) -> io::Result<Option<Response>> {
        let mut request = self.store.client.get(&self.url);
        if self.pos > 0 {
            request = request.header(RANGE, format!("bytes={}-", self.pos));
        }
        let resp = self.store.send(request).map_err(io::Error::other)?;
        if resp.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(None);
        }
        check(resp, &self.url).map(Some).map_err(io::Error::other)
    }
}

impl Read for HubReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            if self.exhausted {
                return Ok(0);
            }
            if self.response.is_none() {
                self.response = self.request()?;
                if self.response.is_none() {
                    self.exhausted = true;
                    continue;
                }
            }
            let Some(resp) = self.response.as_mut() else {
                continue;
            };
            match block_on(resp.chunk()).map_err(io::Error::other)? {
                Ok(Some(chunk)) => self.pending = chunk,
                Ok(None) => self.exhausted = true,
                Err(e) => return Err(io::Error::other(e)),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending = self.pending.slice(n..);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for HubReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => self
                .pos
                .checked_add_signed(delta)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?,
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "seek from end is not supported",
                ))
            }
        };
        if target != self.pos {
            self.pos = target;
            self.response = None;
            self.pending = Bytes::new();
            self.exhausted = false;
        }
        Ok(self.pos)
    }
}

/// Spools the upload to an anonymous temp file and commits it on `finish`.
struct HubWriter {
    store: HubStore,
    key: String,
    repo: String,
    path: String,
    spool: std::fs::File,
}

impl ObjectWriter for HubWriter {
    fn write_chunk(&mut self, data: &[u8]) -> StoreResult<()> {
        Ok(self.spool.write_all(data)?)
    }

    fn finish(self: Box<Self>) -> StoreResult<()> {
        let HubWriter {
            store,
            key,
            repo,
            path,
            mut spool,
        } = *self;
        spool.flush()?;
        spool.seek(SeekFrom::Start(0))?;
        let bytes = spool.metadata()?.len();
        debug!(key = %key, bytes, "committing upload");
        let header = commit_header(&format!("Upload {path}"))?;
        let body = upload_body(header, &path, spool)?;
        store.post_commit(&key, &repo, reqwest::Body::wrap_stream(body))
    }
}
