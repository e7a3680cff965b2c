//! Transport to edge nodes and origins.
//!
//! The [`Fetcher`] trait is the seam between retrieval logic and HTTP: it performs one GET
//! and hands back the status, a few response headers and the body as a byte stream.
//! [`HttpFetcher`] implements it on top of `reqwest`.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt, stream::BoxStream};
use http::HeaderMap;
use nested_enum_utils::common_fields;
use snafu::{Backtrace, IntoError, ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::path::ContentPath;

/// Header set by edge nodes to `HIT` when the response came from their cache.
pub const CACHE_STATUS_HEADER: &str = "saturn-cache-status";
/// Header carrying the id of the node that served the response.
pub const NODE_ID_HEADER: &str = "saturn-node-id";
/// Header carrying the id of the transfer on the serving node.
pub const TRANSFER_ID_HEADER: &str = "saturn-transfer-id";

/// Response format requested from a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Format {
    /// A CAR stream of the entity, verified block by block.
    #[display("car")]
    Car,
    /// The raw entity bytes, as served by customer origins.
    #[display("raw")]
    Raw,
}

/// Builds the request URL for `path` on the node at `base`.
///
/// A `base` without a scheme is taken to be `https`.
pub fn request_url(base: &str, path: &ContentPath, format: Format) -> Result<Url, url::ParseError> {
    let base = if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else {
        format!("https://{base}")
    };
    let mut url = Url::parse(&format!("{}/ipfs/{path}", base.trim_end_matches('/')))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("format", &format.to_string());
        if format == Format::Car {
            query.append_pair("dag-scope", "entity");
        }
    }
    Ok(url)
}

/// A single GET request.
#[derive(derive_more::Debug, Clone)]
pub struct FetchRequest {
    /// Where to fetch from.
    pub url: Url,
    /// Bearer token to authenticate with.
    #[debug(skip)]
    pub token: Option<String>,
    /// Aborts the request, including the body transfer.
    pub cancel: CancellationToken,
}

impl FetchRequest {
    /// An unauthenticated request that is never cancelled.
    pub fn new(url: Url) -> Self {
        FetchRequest {
            url,
            token: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Response headers that end up in attempt logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    /// Whether the node served the response from its cache.
    pub cache_hit: bool,
    /// Id of the serving node.
    pub node_id: Option<String>,
    /// Id of the transfer on the serving node.
    pub transfer_id: Option<String>,
}

impl ResponseInfo {
    /// Extracts the info from response headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        };
        ResponseInfo {
            cache_hit: get(CACHE_STATUS_HEADER).as_deref() == Some("HIT"),
            node_id: get(NODE_ID_HEADER),
            transfer_id: get(TRANSFER_ID_HEADER),
        }
    }
}

/// A successful response with a streaming body.
#[derive(derive_more::Debug)]
pub struct FetchResponse {
    /// HTTP status, always a success code.
    pub status: u16,
    #[allow(missing_docs)]
    pub info: ResponseInfo,
    /// Declared body length.
    pub content_length: Option<u64>,
    /// The body. Errors end the stream.
    #[debug(skip)]
    pub body: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl FetchResponse {
    /// A `200` response with the given body.
    pub fn new(body: BoxStream<'static, Result<Bytes, FetchError>>) -> Self {
        FetchResponse {
            status: 200,
            info: ResponseInfo::default(),
            content_length: None,
            body,
        }
    }

    /// Reads the whole body.
    pub async fn bytes(self) -> Result<Bytes, FetchError> {
        let mut buf = BytesMut::new();
        let mut body = self.body;
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

/// Errors from fetching.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    #[snafu(display("non OK response received: {status}"))]
    Status { status: u16 },
    #[snafu(display("timed out connecting to {url}"))]
    ConnectTimeout { url: Url },
    #[snafu(display("request failed: {source}"))]
    Transport { source: reqwest::Error },
    #[snafu(display("response body failed: {source}"))]
    Body { source: reqwest::Error },
    #[snafu(display("invalid request URL"))]
    InvalidUrl { source: url::ParseError },
    #[snafu(display("request cancelled"))]
    Cancelled {},
    #[snafu(display("{message}"))]
    Other { message: String },
}

impl FetchError {
    /// A non success status.
    pub fn status(status: u16) -> Self {
        StatusSnafu { status }.build()
    }

    /// An error not covered by the other variants.
    pub fn other(message: impl Into<String>) -> Self {
        OtherSnafu { message }.build()
    }

    /// The request was cancelled.
    pub fn cancelled() -> Self {
        CancelledSnafu.build()
    }

    /// Whether the node answered `410 Gone`, meaning the content will not be served anywhere.
    pub fn is_gone(&self) -> bool {
        matches!(self, FetchError::Status { status: 410, .. })
    }
}

/// Performs GET requests.
///
/// Implementations return an error for any non success status, and must stop the transfer
/// once the request's cancellation token fires.
#[async_trait]
pub trait Fetcher: Send + Sync + Debug + 'static {
    /// Performs the request.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

#[async_trait]
impl<T: Fetcher> Fetcher for Arc<T> {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.as_ref().fetch(request).await
    }
}

/// A [`Fetcher`] over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fetcher using `client`.
    pub fn with_client(client: reqwest::Client) -> Self {
        HttpFetcher { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[tracing::instrument(skip_all, fields(url = %request.url))]
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut builder = self.client.get(request.url.clone());
        if let Some(token) = &request.token {
            builder = builder.bearer_auth(token);
        }
        let response = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(FetchError::cancelled()),
            res = builder.send() => res.context(TransportSnafu)?,
        };

        let status = response.status();
        snafu::ensure!(
            status.is_success(),
            StatusSnafu {
                status: status.as_u16()
            }
        );
        let info = ResponseInfo::from_headers(response.headers());
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map_err(|source| BodySnafu.into_error(source))
            .take_until(request.cancel.cancelled_owned());

        Ok(FetchResponse {
            status: status.as_u16(),
            info,
            content_length,
            body: body.boxed(),
        })
    }
}
