use std::{
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use n0_future::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use crate::fetch::{FetchResponse, ResponseInfo};

/// Record of one request to a node or origin, emitted once when the attempt ends.
#[derive(Debug)]
pub(crate) struct AttemptLog {
    url: Url,
    node_id: Option<String>,
    started: Instant,
    ttfb: Option<Duration>,
    status: Option<u16>,
    info: ResponseInfo,
    bytes: Arc<AtomicU64>,
    finished: bool,
}

impl AttemptLog {
    pub(crate) fn start(url: Url, node_id: Option<String>) -> Self {
        AttemptLog {
            url,
            node_id,
            started: Instant::now(),
            ttfb: None,
            status: None,
            info: ResponseInfo::default(),
            bytes: Default::default(),
            finished: false,
        }
    }

    /// Notes the arrival of response headers.
    pub(crate) fn response(&mut self, response: &FetchResponse) {
        self.ttfb = Some(self.started.elapsed());
        self.status = Some(response.status);
        self.info = response.info.clone();
    }

    /// Counter for body bytes received.
    pub(crate) fn counter(&self) -> Arc<AtomicU64> {
        self.bytes.clone()
    }

    pub(crate) fn finish(mut self, error: Option<&dyn Display>) {
        self.finished = true;
        self.emit(error);
    }

    fn emit(&self, error: Option<&dyn Display>) {
        let node_id = self.info.node_id.as_deref().or(self.node_id.as_deref());
        debug!(
            url = %self.url,
            node_id,
            status = self.status,
            cache_hit = self.info.cache_hit,
            transfer_id = self.info.transfer_id.as_deref(),
            ttfb_ms = self.ttfb.map(|d| d.as_millis() as u64),
            bytes = self.bytes.load(Ordering::Relaxed),
            duration_ms = self.started.elapsed().as_millis() as u64,
            error = error.map(tracing::field::display),
            "fetch attempt finished"
        );
    }
}

impl Drop for AttemptLog {
    fn drop(&mut self) {
        if !self.finished {
            self.emit(Some(&"abandoned"));
        }
    }
}
