use std::sync::Arc;
use std::time::Instant;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, info};

use crate::AppState;

/// Every five minutes, forget clients whose requests have all left the
/// rate-limit window so the map stays proportional to recent traffic.
pub async fn start_scheduler(state: Arc<AppState>) -> Result<JobScheduler, JobSchedulerError> {
    let sched = JobScheduler::new().await?;

    let state_clone = Arc::clone(&state);
    let prune_job = Job::new_async("0 */5 * * * *", move |_, _| {
        let state = state_clone.clone();
        Box::pin(async move {
            let removed = state.rate_limiter.prune(Instant::now());
            if removed > 0 {
                info!(
                    "Pruned {} idle rate-limit entries, {} still tracked",
                    removed,
                    state.rate_limiter.tracked_keys()
                );
            } else {
                debug!("Rate-limit prune found nothing to drop");
            }
        })
    })?;

    sched.add(prune_job).await?;
    sched.start().await?;
    Ok(sched)
}
