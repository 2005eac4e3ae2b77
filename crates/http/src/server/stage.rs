//! Per-listener request stages.
//!
//! Stages run in registration order after the request head is decoded and
//! before routing. Each one may rewrite the head or answer the request
//! itself, in which case the handler is never invoked.

use std::fmt;

use http::Response;

use crate::protocol::{HttpEntity, RequestHeader};

#[derive(Debug)]
pub enum StageOutcome {
    Continue,
    Respond(Response<HttpEntity>),
}

pub trait Stage: Send + Sync + fmt::Debug {
    fn apply(&self, request: &mut RequestHeader) -> StageOutcome;
}

/// A [`Stage`] backed by a closure.
pub struct FnStage<F> {
    name: &'static str,
    f: F,
}

impl<F> fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(&mut RequestHeader) -> StageOutcome + Send + Sync,
{
    fn apply(&self, request: &mut RequestHeader) -> StageOutcome {
        (self.f)(request)
    }
}

pub fn stage_fn<F>(name: &'static str, f: F) -> FnStage<F>
where
    F: Fn(&mut RequestHeader) -> StageOutcome + Send + Sync,
{
    FnStage { name, f }
}
