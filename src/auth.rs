//! Bearer tokens for authenticated node requests.

use data_encoding::BASE64URL_NOPAD;
use n0_future::time::{self, Duration, Elapsed, SystemTime};
use nested_enum_utils::common_fields;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use snafu::{Backtrace, ResultExt, Snafu};
use tracing::{debug, warn};
use url::Url;

use crate::{
    fetch::{FetchError, FetchRequest, Fetcher},
    store::{KeyValueStore, TOKEN_KEY},
};

/// Errors from obtaining a token.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum AuthError {
    #[snafu(transparent)]
    Fetch { source: FetchError },
    #[snafu(display("invalid auth response"))]
    Decode { source: serde_json::Error },
    #[snafu(display("auth endpoint refused to issue a token: {message}"))]
    Refused { message: String },
    #[snafu(display("auth endpoint did not answer in time"))]
    Timeout { source: Elapsed },
}

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    message: Option<String>,
}

/// Whether `token` is a JWT that has not expired at `now`.
///
/// The signature is not checked; nodes do that.
pub fn is_token_valid(token: &str, now: SystemTime) -> bool {
    let Some(payload) = token.split('.').nth(1) else {
        return false;
    };
    let Ok(decoded) = BASE64URL_NOPAD.decode(payload.trim_end_matches('=').as_bytes()) else {
        return false;
    };
    let Ok(claims) = serde_json::from_slice::<Claims>(&decoded) else {
        return false;
    };
    let Some(exp) = claims.exp else {
        return false;
    };
    let now = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    exp > now
}

/// Returns the stored token if it is still valid, or fetches a new one.
///
/// The request is aborted through `cancel` and must answer within `connect_timeout`.
#[tracing::instrument(skip_all)]
pub async fn get_token<F: Fetcher>(
    fetcher: &F,
    store: &dyn KeyValueStore,
    auth_url: &Url,
    client_key: &str,
    cancel: CancellationToken,
    connect_timeout: Duration,
) -> Result<String, AuthError> {
    match store.get(TOKEN_KEY).await {
        Ok(Some(token)) if is_token_valid(&token, SystemTime::now()) => return Ok(token),
        Ok(_) => {}
        Err(err) => warn!("failed to read stored token: {err:#}"),
    }

    let mut url = auth_url.clone();
    url.query_pairs_mut().append_pair("clientKey", client_key);
    let request = FetchRequest {
        url,
        token: None,
        cancel,
    };
    let response = time::timeout(connect_timeout, fetcher.fetch(request))
        .await
        .context(TimeoutSnafu)??;
    let body = response.bytes().await?;
    let response: TokenResponse = serde_json::from_slice(&body).context(DecodeSnafu)?;
    let Some(token) = response.token else {
        return RefusedSnafu {
            message: response
                .message
                .unwrap_or_else(|| "failed to refresh token".to_string()),
        }
        .fail();
    };
    debug!("fetched new token");
    if let Err(err) = store.set(TOKEN_KEY, token.clone()).await {
        warn!("failed to store token: {err:#}");
    }
    Ok(token)
}
