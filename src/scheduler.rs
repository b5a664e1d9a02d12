//! Периодическая рассылка подписчикам в фоне.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::context::AppContext;
use crate::subscription;

/// Первый цикл через `period` после старта, дальше каждые `period`.
/// Прерванный цикл не продолжается: следующий просто начнётся заново.
pub fn spawn_broadcast(ctx: Arc<AppContext>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Broadcast scheduled every {:?}", period);
        loop {
            ticker.tick().await;
            match subscription::notify_subscribers(&ctx).await {
                Ok(report) => info!(
                    "Scheduled broadcast: {} of {} subscribers notified",
                    report.notified, report.subscribers
                ),
                Err(e) => error!("Scheduled broadcast failed: {:#}", e),
            }
        }
    })
}
