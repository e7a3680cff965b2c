//! Retrieval across edge nodes with fallback, racing and an optional origin of last resort.
//!
//! A [`Client`] holds the configuration, the transport and the current node list. Each call
//! to [`Client::retrieve`] takes a snapshot of the node list and walks it: nodes are tried one
//! at a time, or a window of them at once in [`Mode::Race`]. Every attempt extracts the entity
//! from the start; bytes the caller already received are skipped, so a node failing halfway
//! through is replaced without repeating or losing bytes.
//!
//! # Example
//!
//! ```no_run
//! # async fn wrapper() -> n0_snafu::Result {
//! use futures_util::StreamExt;
//! use iroh_retrieval::{Client, Config, Node, RetrieveOptions};
//!
//! let client = Client::new(Config::default());
//! client.set_nodes(vec![Node::new("https://node.example")]);
//! let mut stream = client.retrieve(
//!     "bafkreifjjcie6lypi6ny7amxnfftagclbuxndqonfipmb64f2km2devei4",
//!     RetrieveOptions::default(),
//! )?;
//! while let Some(chunk) = stream.next().await {
//!     let chunk = chunk?;
//!     println!("{} bytes", chunk.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::{
    fmt,
    pin::pin,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use futures_util::{
    Stream, StreamExt, TryStreamExt,
    future::{self, Either},
    stream::{BoxStream, FuturesUnordered},
};
use n0_future::time::{self, Elapsed};
use nested_enum_utils::common_fields;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, IntoError, OptionExt, ResultExt, Snafu};
use tokio_util::{io::StreamReader, sync::CancellationToken};
use tracing::{debug, warn};
use url::Url;

use self::{
    attempt::AttemptLog,
    checkpoint::{AttemptCursor, ByteCheckpoint},
};
use crate::{
    auth::{self, AuthError},
    config::Config,
    extract::{ExtractError, extract},
    fetch::{
        ConnectTimeoutSnafu, FetchError, FetchRequest, FetchResponse, Fetcher, Format,
        HttpFetcher, InvalidUrlSnafu, request_url,
    },
    node::{Node, NodeSelector},
    path::{ContentPath, PathError},
    range::{ContentRange, RangeError, RangeSlicer},
    source::BlockSource,
    store::{KeyValueStore, MemoryStore, NODES_KEY},
};

mod attempt;
mod checkpoint;

/// The bytes of a retrieval, in order.
///
/// Ends after the last byte, or with exactly one error.
pub type RetrieveStream = BoxStream<'static, Result<Bytes, RetrieveError>>;

/// How nodes are tried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// One node at a time, in ranked order.
    #[default]
    Sequential,
    /// A window of nodes at once, the first to answer wins.
    Race,
}

/// Per request overrides of the client configuration.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Nodes to use instead of the client's node list.
    pub nodes: Option<Vec<Node>>,
    #[allow(missing_docs)]
    pub mode: Mode,
    /// Overrides [`Config::fallback_limit`].
    pub fallback_limit: Option<usize>,
    /// Only these bytes of the entity.
    pub range: Option<ContentRange>,
    /// Aborts the retrieval.
    pub cancel: Option<CancellationToken>,
}

impl RetrieveOptions {
    /// Uses `nodes` instead of the client's node list.
    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    /// Races nodes instead of trying them one by one.
    pub fn race(mut self) -> Self {
        self.mode = Mode::Race;
        self
    }

    /// Allows `limit` attempts after the first.
    pub fn with_fallback_limit(mut self, limit: usize) -> Self {
        self.fallback_limit = Some(limit);
        self
    }

    /// Restricts the retrieval to `range`.
    pub fn with_range(mut self, range: impl Into<ContentRange>) -> Self {
        self.range = Some(range.into());
        self
    }

    /// Aborts the retrieval once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Failure of a single attempt against a node or origin.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum AttemptError {
    #[snafu(transparent)]
    Fetch { source: FetchError },
    #[snafu(transparent)]
    Extract { source: ExtractError },
    #[snafu(display("range does not fit the origin response"))]
    OriginRange { source: RangeError },
}

impl AttemptError {
    /// Whether no other node can do better, so fallback should stop.
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            AttemptError::Fetch { source, .. } => source.is_gone(),
            AttemptError::Extract { source, .. } => matches!(
                source,
                ExtractError::PathNotFound { .. }
                    | ExtractError::InvalidRange { .. }
                    | ExtractError::Unsupported { .. }
            ),
            AttemptError::OriginRange { .. } => true,
        }
    }
}

/// Errors surfaced to the caller of [`Client::retrieve`].
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum RetrieveError {
    #[snafu(display("invalid content path"))]
    InvalidPath { source: PathError },
    #[snafu(display("invalid range"))]
    InvalidRange { source: RangeError },
    #[snafu(display("failed to obtain an auth token"))]
    Auth { source: AuthError },
    #[snafu(display("retrieval cancelled"))]
    Cancelled {},
    #[snafu(display("no nodes to retrieve from"))]
    NoNodes {},
    #[snafu(display("all attempts to fetch content have failed, last error: {source}"))]
    AllAttemptsFailed {
        attempts: usize,
        source: AttemptError,
    },
}

/// Errors from loading the node list.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum NodeListError {
    #[snafu(display("no orchestrator configured"))]
    NoOrchestrator {},
    #[snafu(transparent)]
    Fetch { source: FetchError },
    #[snafu(display("invalid node list"))]
    Decode { source: serde_json::Error },
    #[snafu(display("timed out loading the node list"))]
    Timeout { source: Elapsed },
}

/// Retrieves verified content from edge nodes.
///
/// Cloning is cheap, clones share the node list.
#[derive(Debug)]
pub struct Client<F = HttpFetcher> {
    inner: Arc<Inner<F>>,
}

impl<F> Clone for Client<F> {
    fn clone(&self) -> Self {
        Client {
            inner: self.inner.clone(),
        }
    }
}

#[derive(Debug)]
struct Inner<F> {
    config: Config,
    fetcher: F,
    store: Arc<dyn KeyValueStore>,
    nodes: RwLock<Arc<NodeSelector>>,
}

/// Builds a [`Client`].
#[derive(Debug)]
pub struct Builder<F = HttpFetcher> {
    config: Config,
    fetcher: F,
    store: Option<Arc<dyn KeyValueStore>>,
    nodes: Vec<Node>,
}

impl Builder<HttpFetcher> {
    fn new(config: Config) -> Self {
        Builder {
            config,
            fetcher: HttpFetcher::new(),
            store: None,
            nodes: Vec::new(),
        }
    }
}

impl<F: Fetcher> Builder<F> {
    /// Sends requests through `fetcher`.
    pub fn fetcher<G: Fetcher>(self, fetcher: G) -> Builder<G> {
        Builder {
            config: self.config,
            fetcher,
            store: self.store,
            nodes: self.nodes,
        }
    }

    /// Caches the node list and auth token in `store`.
    ///
    /// Defaults to a [`MemoryStore`].
    pub fn store(mut self, store: impl KeyValueStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Starts out with `nodes`.
    pub fn nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Creates the client.
    pub fn build(self) -> Client<F> {
        let selector = self.config.selector(self.nodes);
        Client {
            inner: Arc::new(Inner {
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(MemoryStore::default())),
                fetcher: self.fetcher,
                nodes: RwLock::new(Arc::new(selector)),
                config: self.config,
            }),
        }
    }
}

impl Client {
    /// A client talking HTTP, without nodes.
    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    /// Starts building a client.
    pub fn builder(config: Config) -> Builder {
        Builder::new(config)
    }
}

impl<F: Fetcher> Client<F> {
    /// The configuration the client was built with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The current node list.
    pub fn nodes(&self) -> Arc<NodeSelector> {
        self.inner.selector()
    }

    /// Replaces the node list.
    ///
    /// Retrievals already running keep using the list they started with.
    pub fn set_nodes(&self, nodes: Vec<Node>) {
        self.inner.set_nodes(nodes);
    }

    /// Loads the node list from the orchestrator, returning the number of nodes.
    ///
    /// A list cached in the store is applied first if it arrives before the orchestrator
    /// answers. The orchestrator's list always replaces it and is cached in turn.
    pub async fn refresh_nodes(&self) -> Result<usize, NodeListError> {
        self.inner.refresh_nodes().await
    }

    /// Starts retrieving `path`, a CID followed by optional `/`-separated segments.
    ///
    /// The path and range are checked before any request is made. Nothing happens until the
    /// returned stream is polled.
    pub fn retrieve(
        &self,
        path: &str,
        opts: RetrieveOptions,
    ) -> Result<RetrieveStream, RetrieveError> {
        let path: ContentPath = path.parse().context(InvalidPathSnafu)?;
        if let Some(range) = &opts.range {
            range.validate().context(InvalidRangeSnafu)?;
        }

        let config = &self.inner.config;
        let key = path.to_string();
        let (candidates, bootstrap) = match opts.nodes {
            Some(nodes) if !nodes.is_empty() => (config.selector(nodes).candidates(&key), None),
            _ => {
                let selector = self.inner.selector();
                let bootstrap = config
                    .cdn_url
                    .as_ref()
                    .filter(|_| selector.is_empty())
                    .map(|url| Node::new(url.as_str()));
                (selector.candidates(&key), bootstrap)
            }
        };
        let plan = Plan {
            bootstrap,
            candidates,
            next: 0,
            window: match opts.mode {
                Mode::Sequential => 1,
                Mode::Race => config.race_window.max(1),
            },
            fallback_limit: opts.fallback_limit.unwrap_or(config.fallback_limit),
            failures: 0,
            stopped: false,
            origin: config.customer_origin.clone(),
        };
        debug!(%path, mode = ?opts.mode, candidates = plan.candidates.len(), "starting retrieval");

        let retrieval = Retrieval {
            inner: self.inner.clone(),
            key,
            path,
            range: opts.range,
            cancel: opts.cancel.unwrap_or_default(),
        };
        Ok(retrieval.run(plan).boxed())
    }

    /// Retrieves `path` into a single buffer.
    pub async fn retrieve_to_bytes(
        &self,
        path: &str,
        opts: RetrieveOptions,
    ) -> Result<Bytes, RetrieveError> {
        let mut stream = self.retrieve(path, opts)?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl<F: Fetcher> Inner<F> {
    fn selector(&self) -> Arc<NodeSelector> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_nodes(&self, nodes: Vec<Node>) {
        let selector = Arc::new(self.config.selector(nodes));
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = selector;
    }

    #[tracing::instrument(skip_all)]
    async fn refresh_nodes(&self) -> Result<usize, NodeListError> {
        let url = self
            .config
            .orchestrator_url
            .clone()
            .context(NoOrchestratorSnafu)?;
        let cached = pin!(self.cached_nodes());
        let fetched = pin!(self.fetch_nodes(url));
        let nodes = match future::select(cached, fetched).await {
            Either::Left((cached, fetched)) => {
                if let Some(nodes) = cached.filter(|nodes| !nodes.is_empty()) {
                    debug!(count = nodes.len(), "using cached node list");
                    self.set_nodes(nodes);
                }
                fetched.await
            }
            Either::Right((fetched, _)) => fetched,
        }?;

        let count = nodes.len();
        match serde_json::to_string(&nodes) {
            Ok(json) => {
                if let Err(err) = self.store.set(NODES_KEY, json).await {
                    warn!("failed to cache node list: {err:#}");
                }
            }
            Err(err) => warn!("failed to encode node list: {err:#}"),
        }
        self.set_nodes(nodes);
        debug!(count, "loaded node list");
        Ok(count)
    }

    async fn cached_nodes(&self) -> Option<Vec<Node>> {
        match self.store.get(NODES_KEY).await {
            Ok(json) => json.and_then(|json| {
                serde_json::from_str(&json)
                    .inspect_err(|err| warn!("ignoring invalid cached node list: {err:#}"))
                    .ok()
            }),
            Err(err) => {
                warn!("failed to read cached node list: {err:#}");
                None
            }
        }
    }

    async fn fetch_nodes(&self, url: Url) -> Result<Vec<Node>, NodeListError> {
        let response = time::timeout(
            self.config.connect_timeout,
            self.fetcher.fetch(FetchRequest::new(url)),
        )
        .await
        .context(TimeoutSnafu)??;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).context(DecodeSnafu)
    }
}

/// What the next attempt goes to.
#[derive(Debug)]
enum Target {
    /// The CDN, used while no nodes are known.
    Bootstrap(Node),
    /// One node, or a window of nodes raced against each other.
    Nodes(Vec<Node>),
    /// The customer origin, unverified.
    Origin(Url),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Bootstrap(node) => write!(f, "cdn {}", node.url),
            Target::Nodes(nodes) => {
                for (i, node) in nodes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&node.url)?;
                }
                Ok(())
            }
            Target::Origin(url) => write!(f, "origin {url}"),
        }
    }
}

/// The order of attempts of one retrieval.
#[derive(Debug)]
struct Plan {
    bootstrap: Option<Node>,
    candidates: Vec<Node>,
    next: usize,
    window: usize,
    fallback_limit: usize,
    failures: usize,
    stopped: bool,
    origin: Option<Url>,
}

impl Plan {
    fn next_target(&mut self) -> Option<Target> {
        if let Some(node) = self.bootstrap.take() {
            return Some(Target::Bootstrap(node));
        }
        if !self.stopped && self.failures <= self.fallback_limit && self.next < self.candidates.len()
        {
            let end = (self.next + self.window).min(self.candidates.len());
            let nodes = self.candidates[self.next..end].to_vec();
            self.next = end;
            return Some(Target::Nodes(nodes));
        }
        self.origin.take().map(Target::Origin)
    }

    fn record_failure(&mut self, target: &Target, unrecoverable: bool) {
        if matches!(target, Target::Nodes(_)) {
            self.failures += 1;
        }
        if unrecoverable {
            self.stopped = true;
        }
    }
}

/// An attempt that produced a response and is streaming its bytes.
struct Attempt {
    chunks: BoxStream<'static, Result<Bytes, AttemptError>>,
    log: AttemptLog,
    cancel: CancellationToken,
}

/// State of one call to [`Client::retrieve`].
struct Retrieval<F> {
    inner: Arc<Inner<F>>,
    key: String,
    path: ContentPath,
    range: Option<ContentRange>,
    cancel: CancellationToken,
}

impl<F: Fetcher> Retrieval<F> {
    fn run(self, mut plan: Plan) -> impl Stream<Item = Result<Bytes, RetrieveError>> + Send + 'static {
        async_stream::try_stream! {
            self.ensure_live()?;
            let token = self.token().await?;
            let mut checkpoint = ByteCheckpoint::default();
            let mut attempts = 0;
            let mut last_error = None;

            while let Some(target) = plan.next_target() {
                self.ensure_live()?;
                attempts += 1;
                debug!(%target, attempt = attempts, delivered = checkpoint.delivered(), "starting attempt");

                let mut attempt = match self.open(&target, token.clone()).await {
                    Ok(attempt) => attempt,
                    Err(err) => {
                        self.ensure_live()?;
                        self.record_failure(&mut plan, &target, &err).await;
                        last_error = Some(err);
                        continue;
                    }
                };

                let mut cursor = AttemptCursor::default();
                let outcome = loop {
                    let next = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => CancelledSnafu.fail(),
                        next = attempt.chunks.next() => Ok(next),
                    };
                    match next? {
                        Some(Ok(chunk)) => {
                            if let Some(chunk) = checkpoint.admit(&mut cursor, chunk) {
                                yield chunk;
                            }
                        }
                        Some(Err(err)) => break Err(err),
                        None => break Ok(()),
                    }
                };

                match outcome {
                    Ok(()) => {
                        attempt.log.finish(None);
                        debug!(%target, attempts, bytes = checkpoint.delivered(), "retrieval complete");
                        return;
                    }
                    Err(err) => {
                        attempt.cancel.cancel();
                        attempt.log.finish(Some(&err));
                        self.ensure_live()?;
                        self.record_failure(&mut plan, &target, &err).await;
                        last_error = Some(err);
                    }
                }
            }

            self.ensure_live()?;
            exhausted(attempts, last_error)?;
        }
    }

    fn ensure_live(&self) -> Result<(), RetrieveError> {
        snafu::ensure!(!self.cancel.is_cancelled(), CancelledSnafu);
        Ok(())
    }

    async fn token(&self) -> Result<Option<String>, RetrieveError> {
        let config = &self.inner.config;
        let (Some(auth_url), Some(client_key)) = (&config.auth_url, &config.client_key) else {
            return Ok(None);
        };
        let fetch = auth::get_token(
            &self.inner.fetcher,
            self.inner.store.as_ref(),
            auth_url,
            client_key,
            self.cancel.child_token(),
            config.connect_timeout,
        );
        let token = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return CancelledSnafu.fail(),
            token = fetch => token.context(AuthSnafu)?,
        };
        Ok(Some(token))
    }

    async fn record_failure(&self, plan: &mut Plan, target: &Target, err: &AttemptError) {
        let unrecoverable = err.is_unrecoverable();
        debug!(%target, unrecoverable, "attempt failed: {err:#}");
        plan.record_failure(target, unrecoverable);

        if matches!(target, Target::Bootstrap(_))
            && !unrecoverable
            && self.inner.config.orchestrator_url.is_some()
        {
            match self.inner.refresh_nodes().await {
                Ok(_) => plan.candidates = self.inner.selector().candidates(&self.key),
                Err(err) => warn!("failed to load nodes after cdn failure: {err:#}"),
            }
        }
    }

    async fn open(&self, target: &Target, token: Option<String>) -> Result<Attempt, AttemptError> {
        match target {
            Target::Bootstrap(node) => self.open_node(node, token, self.cancel.child_token()).await,
            Target::Nodes(nodes) => match nodes.as_slice() {
                [node] => self.open_node(node, token, self.cancel.child_token()).await,
                nodes => self.race(nodes, token).await,
            },
            Target::Origin(origin) => self.open_origin(origin).await,
        }
    }

    /// Opens all `nodes` at once and keeps the first that answers.
    async fn race(&self, nodes: &[Node], token: Option<String>) -> Result<Attempt, AttemptError> {
        let cancels: Vec<CancellationToken> =
            nodes.iter().map(|_| self.cancel.child_token()).collect();
        let mut pending: FuturesUnordered<_> = nodes
            .iter()
            .zip(cancels.iter().cloned())
            .enumerate()
            .map(|(i, (node, cancel))| {
                let token = token.clone();
                async move { (i, self.open_node(node, token, cancel).await) }
            })
            .collect();

        let mut last_error = None;
        while let Some((i, res)) = pending.next().await {
            match res {
                Ok(attempt) => {
                    debug!(winner = %nodes[i].url, "race won");
                    for (j, cancel) in cancels.iter().enumerate() {
                        if j != i {
                            cancel.cancel();
                        }
                    }
                    return Ok(attempt);
                }
                Err(err) if err.is_unrecoverable() => {
                    debug!(node = %nodes[i].url, "race contender failed for good: {err:#}");
                    for cancel in &cancels {
                        cancel.cancel();
                    }
                    return Err(err);
                }
                Err(err) => {
                    debug!(node = %nodes[i].url, "race contender failed: {err:#}");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| FetchError::other("empty race window").into()))
    }

    async fn open_node(
        &self,
        node: &Node,
        token: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Attempt, AttemptError> {
        let url = request_url(&node.url, &self.path, Format::Car).context(InvalidUrlSnafu)?;
        let mut log = AttemptLog::start(url.clone(), node.id.clone());
        match self.open_car(url, token, cancel.clone(), &mut log).await {
            Ok(chunks) => Ok(Attempt {
                chunks,
                log,
                cancel,
            }),
            Err(err) => {
                cancel.cancel();
                log.finish(Some(&err));
                Err(err)
            }
        }
    }

    async fn open_car(
        &self,
        url: Url,
        token: Option<String>,
        cancel: CancellationToken,
        log: &mut AttemptLog,
    ) -> Result<BoxStream<'static, Result<Bytes, AttemptError>>, AttemptError> {
        let response = self.send(url, token, cancel).await?;
        log.response(&response);
        let counter = log.counter();
        let body = response
            .body
            .inspect_ok(move |chunk| {
                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            })
            .map_err(std::io::Error::other);
        let source = BlockSource::new(StreamReader::new(body), self.inner.config.block_timeout)
            .await
            .map_err(ExtractError::from)?;
        Ok(extract(self.path.clone(), source, self.range)
            .err_into()
            .boxed())
    }

    async fn open_origin(&self, origin: &Url) -> Result<Attempt, AttemptError> {
        let url = request_url(origin.as_str(), &self.path, Format::Raw).context(InvalidUrlSnafu)?;
        let cancel = self.cancel.child_token();
        let mut log = AttemptLog::start(url.clone(), None);
        match self.open_raw(url, cancel.clone(), &mut log).await {
            Ok(chunks) => Ok(Attempt {
                chunks,
                log,
                cancel,
            }),
            Err(err) => {
                cancel.cancel();
                log.finish(Some(&err));
                Err(err)
            }
        }
    }

    async fn open_raw(
        &self,
        url: Url,
        cancel: CancellationToken,
        log: &mut AttemptLog,
    ) -> Result<BoxStream<'static, Result<Bytes, AttemptError>>, AttemptError> {
        let response = self.send(url, None, cancel).await?;
        log.response(&response);
        let slicer = match self.range {
            None => RangeSlicer::full(),
            Some(range) => {
                let range = match response.content_length {
                    Some(size) => range.normalize(size),
                    None => range.normalize_unbounded(),
                };
                RangeSlicer::new(range.context(OriginRangeSnafu)?)
            }
        };
        Ok(passthrough(response.body, slicer, log.counter()).boxed())
    }

    /// Sends the request, bounded by the connect timeout.
    async fn send(
        &self,
        url: Url,
        token: Option<String>,
        cancel: CancellationToken,
    ) -> Result<FetchResponse, AttemptError> {
        let request = FetchRequest {
            url: url.clone(),
            token,
            cancel,
        };
        let response = time::timeout(
            self.inner.config.connect_timeout,
            self.inner.fetcher.fetch(request),
        )
        .await
        .map_err(|_| ConnectTimeoutSnafu { url }.build())??;
        Ok(response)
    }
}

/// Unverified origin bytes, cut down to the range.
fn passthrough(
    mut body: BoxStream<'static, Result<Bytes, FetchError>>,
    mut slicer: RangeSlicer,
    counter: Arc<AtomicU64>,
) -> impl Stream<Item = Result<Bytes, AttemptError>> + Send + 'static {
    async_stream::try_stream! {
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            if let Some(part) = slicer.slice(chunk) {
                yield part;
            }
            if slicer.is_done() {
                break;
            }
        }
    }
}

fn exhausted(attempts: usize, last_error: Option<AttemptError>) -> Result<(), RetrieveError> {
    match last_error {
        Some(source) => Err(AllAttemptsFailedSnafu { attempts }.into_error(source)),
        None => NoNodesSnafu.fail(),
    }
}
