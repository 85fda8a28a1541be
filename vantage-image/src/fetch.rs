use crate::ImageFormat;
use std::fmt;

#[derive(Clone, PartialEq, Debug)]
pub struct FetchRequest {
    pub url: String,
    pub format: ImageFormat,
    pub width: u32,
}

/// What the host reports about a finished fetch and decode
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct FetchResponse {
    pub transferred_bytes: u64,
    pub duration_ms: f64,
}

#[derive(Clone, PartialEq, Debug)]
pub struct FetchFailure {
    pub url: String,
    pub reason: String,
}

impl std::error::Error for FetchFailure {}

impl fmt::Display for FetchFailure {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "fetching {} failed: {}", self.url, self.reason)
    }
}

pub type FetchCallback = Box<dyn FnOnce(Result<FetchResponse, FetchFailure>)>;

/// Handed to the [`Fetcher`] with each request. Resolve it exactly once with `complete` or
/// `fail`. Dropping it unresolved counts as a failure.
pub struct FetchOp {
    url: String,
    callback: Option<FetchCallback>,
}

impl FetchOp {
    pub fn new(
        url: impl Into<String>,
        callback: FetchCallback,
    ) -> Self {
        FetchOp {
            url: url.into(),
            callback: Some(callback),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn complete(
        mut self,
        response: FetchResponse,
    ) {
        if let Some(callback) = self.callback.take() {
            (callback)(Ok(response));
        }
    }

    pub fn fail(
        mut self,
        reason: impl Into<String>,
    ) {
        self.resolve_failed(reason.into());
    }

    fn resolve_failed(
        &mut self,
        reason: String,
    ) {
        if let Some(callback) = self.callback.take() {
            (callback)(Err(FetchFailure {
                url: self.url.clone(),
                reason,
            }));
        }
    }
}

impl Drop for FetchOp {
    fn drop(&mut self) {
        if self.callback.is_some() {
            log::warn!("FetchOp for {} dropped without being resolved", self.url);
            self.resolve_failed("dropped without a result".to_string());
        }
    }
}

impl fmt::Debug for FetchOp {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("FetchOp").field("url", &self.url).finish()
    }
}

/// The host's network fetch primitive, including decoding the image
pub trait Fetcher {
    fn fetch(
        &self,
        request: FetchRequest,
        fetch_op: FetchOp,
    );
}
