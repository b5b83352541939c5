//! Best-effort notification fan-out.
//!
//! Sends are independent tasks joined before the handler reports
//! completion: unordered, individually timed out, and individually
//! error-isolated. A failed or timed-out send is logged and counted,
//! nothing more — ledger state has already committed by the time anything
//! here runs.

use futures::future::join_all;
use stampledger_core::{NotificationGateway, PushBatch};
use std::sync::Arc;
use std::time::Duration;

/// Dispatches a batch of messages concurrently, best-effort.
///
/// Messages with an empty target (no device token registered) are skipped
/// silently — absence of a push token never affects anything else.
pub async fn dispatch_all(
    gateway: &Arc<dyn NotificationGateway>,
    timeout: Duration,
    batch: PushBatch,
) {
    let sends = batch.into_iter().filter(|m| !m.to.is_empty()).map(|message| {
        let gateway = Arc::clone(gateway);
        async move {
            let title = message.title.clone();
            match tokio::time::timeout(timeout, gateway.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    metrics::counter!("notify.failed", "reason" => "gateway").increment(1);
                    tracing::warn!(error = %err, %title, "Push delivery failed, dropped");
                }
                Err(_) => {
                    metrics::counter!("notify.failed", "reason" => "timeout").increment(1);
                    tracing::warn!(%title, timeout_ms = timeout.as_millis(), "Push delivery timed out, dropped");
                }
            }
        }
    });

    join_all(sends).await;
}
