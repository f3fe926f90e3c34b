//! Fire-and-forget execution of hub mutations.
//!
//! Callers enqueue an [`ApiCall`] and move on. A single worker thread runs the
//! calls in order; each result becomes an [`ApiOutcome`] that is logged and
//! dropped. Nothing is retried and nothing in the cache is rolled back.

use crate::client::{ApiCall, GeniusClientError, HubApi};
use log::{info, warn};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

#[derive(Debug)]
pub struct ApiOutcome {
    pub call: ApiCall,
    pub result: Result<(), GeniusClientError>,
}

impl ApiOutcome {
    pub fn log(&self) {
        match &self.result {
            Ok(()) => info!("Hub accepted: {}", self.call),
            Err(e) => warn!("Hub call failed ({}): {}", self.call, e),
        }
    }
}

/// Sending half handed to the scheduler and the MQTT handler.
#[derive(Debug, Clone)]
pub struct ApiQueue(Sender<ApiCall>);

impl ApiQueue {
    pub fn new(sender: Sender<ApiCall>) -> Self {
        ApiQueue(sender)
    }

    /// Enqueue without waiting for the result.
    pub fn submit(&self, call: ApiCall) {
        info!("Sending api request to {}", call);
        if let Err(e) = self.0.send(call) {
            warn!("API worker is gone, dropping: {}", e.0);
        }
    }
}

pub fn execute<A: HubApi + ?Sized>(api: &A, call: ApiCall) -> ApiOutcome {
    let result = api.execute(&call);
    ApiOutcome { call, result }
}

fn run(api: Arc<dyn HubApi>, calls: Receiver<ApiCall>) {
    for call in calls {
        execute(api.as_ref(), call).log();
    }
    info!("API worker stopped");
}

pub fn spawn(api: Arc<dyn HubApi>) -> Result<(ApiQueue, JoinHandle<()>), String> {
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("api-worker".into())
        .spawn(move || run(api, rx))
        .map_err(|e| format!("spawning api worker failed: {}", e))?;
    Ok((ApiQueue::new(tx), handle))
}


#[cfg(test)]
mod tests {
    use super::testing::FakeHub;
    use super::*;
    use crate::models::genius::ZoneId;

    #[test]
    fn outcome_carries_the_failure() {
        let hub = FakeHub::new(Vec::new()).failing_for(&[ZoneId(3)]);
        let outcome = execute(&hub, ApiCall::SetSwitchState { zone_id: ZoneId(3), on: true });
        assert!(matches!(outcome.result, Err(GeniusClientError::Http { status: 503, .. })));
        let outcome = execute(&hub, ApiCall::SetSwitchState { zone_id: ZoneId(4), on: true });
        assert!(outcome.result.is_ok());
    }

    #[test]
    fn worker_runs_every_call_in_order_despite_failures() {
        let hub = Arc::new(FakeHub::new(Vec::new()).failing_for(&[ZoneId(1)]));
        let (queue, handle) = spawn(hub.clone()).expect("spawn worker");

        let calls = vec![
            ApiCall::SetZoneToOverride { zone_id: ZoneId(1), duration: Some(82_800) },
            ApiCall::SetZoneToOverride { zone_id: ZoneId(2), duration: Some(82_800) },
            ApiCall::SetZoneMode { zone_id: ZoneId(5), mode: 1 },
        ];
        for call in calls.clone() {
            queue.submit(call);
        }
        drop(queue);
        handle.join().expect("worker exits once the queue is dropped");

        assert_eq!(hub.executed(), calls);
    }
}
