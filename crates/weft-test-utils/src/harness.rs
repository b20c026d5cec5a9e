use weft_core::console::MemoryConsole;
use weft_core::error::Result;
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_core::types::StopHandle;

/// Run a kind body outside a flowchart, under `label`.
pub async fn run_kind(kind: &dyn NodeKind, label: &str, state: &mut State) -> Result<Option<String>> {
    let console = MemoryConsole::new();
    run_kind_with(kind, label, &console, state).await
}

/// Like `run_kind`, but the caller keeps the console to inspect.
pub async fn run_kind_with(
    kind: &dyn NodeKind,
    label: &str,
    console: &MemoryConsole,
    state: &mut State,
) -> Result<Option<String>> {
    let stop = StopHandle::new();
    stop.start();
    let ctx = NodeContext {
        label,
        console,
        stop: &stop,
    };
    kind.run(ctx, state).await
}
