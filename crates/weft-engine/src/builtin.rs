//! The two kinds every flowchart may carry: Start and Init.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;

use weft_core::error::Result;
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};

pub const START_KIND: &str = "StartNode";
pub const INIT_KIND: &str = "InitNode";

/// Entry anchor of the main loop. Passes the working result through.
#[derive(Debug, Default)]
pub struct StartKind;

impl NodeKind for StartKind {
    fn kind(&self) -> &'static str {
        START_KIND
    }

    fn run<'a>(
        &'a self,
        _ctx: NodeContext<'a>,
        state: &'a mut State,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(Some(state.result.clone())) })
    }
}

/// One-shot setup anchor. Yields empty output the first time it runs in
/// this process and the termination signal on every later run.
#[derive(Debug, Default)]
pub struct InitKind {
    has_run: AtomicBool,
}

impl InitKind {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeKind for InitKind {
    fn kind(&self) -> &'static str {
        INIT_KIND
    }

    fn run<'a>(
        &'a self,
        _ctx: NodeContext<'a>,
        _state: &'a mut State,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            if self.has_run.swap(true, Ordering::SeqCst) {
                Ok(None)
            } else {
                Ok(Some(String::new()))
            }
        })
    }

    fn spent(&self) -> bool {
        self.has_run.load(Ordering::SeqCst)
    }
}
