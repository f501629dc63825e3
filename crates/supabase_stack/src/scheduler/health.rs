use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, warn};

use crate::applier::{ResourceApplier, ResourceHandle};
use crate::stack::{HealthCheck, ServiceName};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum HealthOutcome {
    Ready,
    TimedOut { last_condition: String },
    Cancelled,
}

/// Waits for applied services to report ready.
pub struct HealthGate<'a> {
    applier: &'a dyn ResourceApplier,
    cancel: watch::Receiver<bool>,
}

impl<'a> HealthGate<'a> {
    pub fn new(applier: &'a dyn ResourceApplier, cancel: watch::Receiver<bool>) -> Self {
        HealthGate { applier, cancel }
    }

    /// Poll `handle` every probe period until `success_threshold` consecutive
    /// ready observations, the budget runs out, or the deployment is cancelled.
    pub async fn await_ready(
        &self,
        service: ServiceName,
        handle: &ResourceHandle,
        probe: &HealthCheck,
        budget: Duration,
    ) -> HealthOutcome {
        let deadline = Instant::now() + budget;
        let needed = probe.success_threshold.max(1);
        let period = probe.period.max(Duration::from_millis(100));
        let mut cancel = self.cancel.clone();
        let mut consecutive = 0;
        let mut last_condition = "no status observed".to_string();

        loop {
            if *cancel.borrow() {
                return HealthOutcome::Cancelled;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.applier.status(handle)).await {
                Ok(Ok(conditions)) => {
                    last_condition = conditions.summary();
                    if conditions.ready {
                        consecutive += 1;
                        if consecutive >= needed {
                            debug!(%service, "Service is ready");
                            return HealthOutcome::Ready;
                        }
                    } else {
                        consecutive = 0;
                    }
                }
                Ok(Err(e)) => {
                    warn!(%service, error = %e, "Failed to read status");
                    last_condition = e.to_string();
                    consecutive = 0;
                }
                Err(_) => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return HealthOutcome::TimedOut { last_condition };
            }

            let wait = period.min(remaining);
            tokio::select! {
                _ = sleep(wait) => {}
                changed = cancel.changed() => {
                    // sender gone means nobody can cancel any more
                    if changed.is_err() {
                        sleep(wait).await;
                    }
                }
            }
        }
    }
}
