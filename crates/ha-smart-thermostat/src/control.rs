//! Control cycle scheduling
//!
//! The thermostat never actuates devices itself. It queues cycle requests;
//! the [`ControlLoop`] drains them and hands an environment snapshot to the
//! [`HvacController`] the embedding application provides.

use crate::environment::{SharedEnvironment, ThermostatEnvironment};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

/// A request to run the control logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleRequest {
    /// Run even if the previous cycle was less than `min_cycle_duration` ago
    pub force: bool,
}

/// Queues control cycle requests; cheap to clone, never blocks
#[derive(Debug, Clone)]
pub struct ControlCycleHandle {
    tx: mpsc::UnboundedSender<CycleRequest>,
}

impl ControlCycleHandle {
    pub fn request(&self, force: bool) {
        if self.tx.send(CycleRequest { force }).is_err() {
            trace!(force, "Control loop is gone, dropping cycle request");
        }
    }
}

/// Create a request handle and the receiving end for a [`ControlLoop`]
pub fn control_channel() -> (ControlCycleHandle, mpsc::UnboundedReceiver<CycleRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlCycleHandle { tx }, rx)
}

/// Device actuation logic
#[async_trait]
pub trait HvacController: Send + Sync {
    /// Drive the devices towards the targets in `env`
    async fn control(&self, env: &ThermostatEnvironment, force: bool) -> anyhow::Result<()>;
}

pub struct ControlLoop {
    requests: mpsc::UnboundedReceiver<CycleRequest>,
    env: SharedEnvironment,
    controller: Arc<dyn HvacController>,
    min_cycle_duration: Duration,
    last_cycle: Option<Instant>,
}

impl ControlLoop {
    pub fn new(
        requests: mpsc::UnboundedReceiver<CycleRequest>,
        env: SharedEnvironment,
        controller: Arc<dyn HvacController>,
        min_cycle_duration: Duration,
    ) -> Self {
        Self {
            requests,
            env,
            controller,
            min_cycle_duration,
            last_cycle: None,
        }
    }

    /// Process requests until every [`ControlCycleHandle`] is dropped
    pub async fn run(mut self) {
        info!("Control loop started");

        while let Some(request) = self.requests.recv().await {
            let now = Instant::now();
            if !request.force {
                if let Some(last) = self.last_cycle {
                    if now.duration_since(last) < self.min_cycle_duration {
                        trace!("Skipping control cycle, previous one too recent");
                        continue;
                    }
                }
            }

            let snapshot = self
                .env
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            debug!(force = request.force, hvac_mode = %snapshot.hvac_mode, "Running control cycle");

            if let Err(e) = self.controller.control(&snapshot, request.force).await {
                error!(error = %e, "Control cycle failed");
            }
            self.last_cycle = Some(now);
        }

        info!("Control loop stopped");
    }
}
