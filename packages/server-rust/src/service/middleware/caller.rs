//! Reads the caller's role and mode from request headers.
//!
//! Values already present on the context win; header values may be
//! comma-separated lists, of which the first entry is used.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::service::config::PipelineConfig;
use crate::service::request::{HandlerResponse, RouteError, RouteRequest};

#[derive(Debug, Clone)]
pub struct CallerLayer {
    config: Arc<PipelineConfig>,
}

impl CallerLayer {
    #[must_use]
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for CallerLayer {
    type Service = CallerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallerService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallerService<S> {
    inner: S,
    config: Arc<PipelineConfig>,
}

fn first_entry(value: &str) -> Option<String> {
    value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<S> Service<RouteRequest> for CallerService<S>
where
    S: Service<RouteRequest, Response = HandlerResponse, Error = RouteError>,
{
    type Response = HandlerResponse;
    type Error = RouteError;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: RouteRequest) -> Self::Future {
        if req.ctx.role.is_none() {
            req.ctx.role = req.header(&self.config.role_header).and_then(first_entry);
        }
        if req.ctx.mode.is_none() {
            req.ctx.mode = req.header(&self.config.mode_header).and_then(first_entry);
        }
        self.inner.call(req)
    }
}
