//! Shared tick-driven runner shape for the lifecycle (C8) and sync (C10)
//! reconcilers (§4.8, §4.10), grounded on the corpus's MAPE-K controller
//! state machine.

use async_trait::async_trait;

use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Stopped,
    Running,
}

/// `{Start, Stop, Name}` contract shared by every tick-driven reconciler.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn start(&self) -> CoreResult<()>;
    async fn stop(&self);
    fn name(&self) -> &str;
}
