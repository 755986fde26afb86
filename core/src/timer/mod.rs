//! Timer Service: arms/cancels timers, firing into the owning
//! Stage's event loop rather than invoking user callbacks directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;

use crate::stage::envelope::{StageEnvelope, StagePoster};

pub struct TimerService {
    poster: Arc<dyn StagePoster>,
    handles: Arc<DashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl TimerService {
    pub fn new(poster: Arc<dyn StagePoster>) -> Self {
        Self {
            poster,
            handles: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fires unconditionally every `period` after `initial_delay`, until
    /// cancelled or the owning Stage is destroyed.
    pub fn add_repeat_timer(&self, stage_id: i64, initial_delay: Duration, period: Duration) -> u64 {
        let timer_id = self.alloc_id();
        let poster = self.poster.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                poster.post(stage_id, StageEnvelope::TimerFire { timer_id });
                tokio::time::sleep(period).await;
            }
        });
        self.handles.insert(timer_id, handle.abort_handle());
        timer_id
    }

    /// Fires exactly `count` times then cancels itself.
    pub fn add_count_timer(
        &self,
        stage_id: i64,
        initial_delay: Duration,
        period: Duration,
        count: u32,
    ) -> u64 {
        let timer_id = self.alloc_id();
        let poster = self.poster.clone();
        let handles = self.handles.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            for fired in 0..count {
                poster.post(stage_id, StageEnvelope::TimerFire { timer_id });
                if fired + 1 < count {
                    tokio::time::sleep(period).await;
                }
            }
            handles.remove(&timer_id);
        });
        self.handles.insert(timer_id, handle.abort_handle());
        timer_id
    }

    /// Idempotent: cancelling twice, or cancelling an already-expired count
    /// timer, is a no-op.
    pub fn cancel_timer(&self, timer_id: u64) {
        if let Some((_, handle)) = self.handles.remove(&timer_id) {
            handle.abort();
        }
    }

    pub fn has_timer(&self, timer_id: u64) -> bool {
        self.handles.contains_key(&timer_id)
    }

    /// Cancels every timer for a Stage being destroyed. The service does not
    /// index by `stage_id` (timers are rare and short-lived relative to a
    /// Stage's lifetime), so the caller supplies the ids it tracked itself.
    pub fn cancel_all(&self, timer_ids: &[u64]) {
        for id in timer_ids {
            self.cancel_timer(*id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingPoster {
        fires: Mutex<Vec<u64>>,
    }

    impl StagePoster for RecordingPoster {
        fn post(&self, _stage_id: i64, envelope: StageEnvelope) {
            if let StageEnvelope::TimerFire { timer_id } = envelope {
                self.fires.lock().unwrap().push(timer_id);
            }
        }

        fn register_timer_callback(
            &self,
            _stage_id: i64,
            _timer_id: u64,
            _callback: Box<dyn FnMut(&mut dyn crate::stage::actor::IStage) + Send>,
        ) {
        }
    }

    #[tokio::test(start_paused = true)]
    async fn count_timer_fires_exactly_n_times_then_self_cancels() {
        let poster = Arc::new(RecordingPoster { fires: Mutex::new(Vec::new()) });
        let service = TimerService::new(poster.clone());
        let id = service.add_count_timer(1, Duration::from_millis(0), Duration::from_millis(10), 3);

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        assert_eq!(poster.fires.lock().unwrap().len(), 3);
        assert!(!service.has_timer(id));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let poster = Arc::new(RecordingPoster { fires: Mutex::new(Vec::new()) });
        let service = TimerService::new(poster);
        let id = service.add_repeat_timer(1, Duration::from_secs(60), Duration::from_secs(60));
        service.cancel_timer(id);
        service.cancel_timer(id);
        assert!(!service.has_timer(id));
    }
}
