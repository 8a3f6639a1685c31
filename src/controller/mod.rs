pub mod allocator;
pub mod control_loop;
pub mod dispatch;
pub mod estimator;
pub mod target;

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::analytics::RecentValues;
use crate::config::ControllerConfig;

pub use allocator::{AllocationError, AllocatorSettings, SetpointAllocator};
pub use control_loop::{ControlLoop, CycleOutcome, LoopMode, StatusSnapshot};
pub use target::{TargetCalculator, TargetDecision, TargetReason};

/// What the web API sees of the running controller.
#[derive(Clone)]
pub struct AppState {
    /// Snapshot published at the end of every cycle
    pub status: watch::Receiver<StatusSnapshot>,
    /// Configuration the loop picks up at the start of its next cycle
    pub desired_config: Arc<watch::Sender<ControllerConfig>>,
    pub recent: Arc<RecentValues>,
}

impl AppState {
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn desired_config(&self) -> ControllerConfig {
        self.desired_config.borrow().clone()
    }
}

pub fn spawn_controller_tasks(
    control_loop: ControlLoop,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = control_loop.run(cancel).await {
            warn!(error = %e, "controller loop stopped");
        }
    })
}
