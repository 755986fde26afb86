//! Offload Service: `AsyncBlock` / `AsyncCompute` / `AsyncIO`.
//! Runs blocking or CPU-bound work off a Stage's loop and re-enters through
//! a post-back envelope so the result is only ever touched inside the
//! Stage's single-consumer turn.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::stage::actor::IStage;
use crate::stage::envelope::{StageEnvelope, StagePoster};

type PostCallback = Box<dyn FnOnce(Box<dyn Any + Send>, &mut dyn IStage) + Send>;

/// Node-wide: one Compute pool (CPU-bound, sized to core count) and one IO
/// pool (blocking I/O, bounded by a semaphore, default 100 concurrent).
pub struct OffloadService {
    poster: Arc<dyn StagePoster>,
    compute_pool: rayon::ThreadPool,
    io_permits: Arc<Semaphore>,
    post_callbacks: DashMap<u64, PostCallback>,
    next_token: AtomicU64,
}

impl OffloadService {
    pub fn new(poster: Arc<dyn StagePoster>, io_concurrency: usize) -> Self {
        let compute_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .thread_name(|i| format!("playhouse-compute-{i}"))
            .build()
            .expect("failed to build compute pool");

        Self {
            poster,
            compute_pool,
            io_permits: Arc::new(Semaphore::new(io_concurrency)),
            post_callbacks: DashMap::new(),
            next_token: AtomicU64::new(0),
        }
    }

    fn alloc_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn register_post<R, Post>(&self, token: u64, post: Post)
    where
        R: Send + 'static,
        Post: FnOnce(&mut dyn IStage, R) + Send + 'static,
    {
        self.post_callbacks.insert(
            token,
            Box::new(move |boxed: Box<dyn Any + Send>, stage: &mut dyn IStage| {
                let result = *boxed
                    .downcast::<R>()
                    .expect("offload post-back type mismatch: pre/post types differ");
                post(stage, result);
            }),
        );
    }

    /// CPU-bound work. `pre` must not touch Stage state; `post`, invoked
    /// inside the Stage's next turn, may.
    pub fn async_compute<R, Pre, Post>(self: &Arc<Self>, stage_id: i64, pre: Pre, post: Option<Post>)
    where
        R: Send + 'static,
        Pre: FnOnce() -> R + Send + 'static,
        Post: FnOnce(&mut dyn IStage, R) + Send + 'static,
    {
        let token = self.alloc_token();
        if let Some(post) = post {
            self.register_post::<R, _>(token, post);
        }
        let poster = self.poster.clone();
        self.compute_pool.spawn(move || {
            let result = pre();
            poster.post(
                stage_id,
                StageEnvelope::AsyncPostBack {
                    token,
                    result: Box::new(result),
                },
            );
        });
    }

    /// Blocking I/O. Bounded by the IO semaphore; a permit is held for the
    /// duration of `pre`.
    pub fn async_io<R, Pre, Post>(self: &Arc<Self>, stage_id: i64, pre: Pre, post: Option<Post>)
    where
        R: Send + 'static,
        Pre: FnOnce() -> R + Send + 'static,
        Post: FnOnce(&mut dyn IStage, R) + Send + 'static,
    {
        let token = self.alloc_token();
        if let Some(post) = post {
            self.register_post::<R, _>(token, post);
        }
        let poster = self.poster.clone();
        let permits = self.io_permits.clone();
        tokio::spawn(async move {
            let permit = permits.acquire_owned().await.expect("io semaphore closed");
            let result = tokio::task::spawn_blocking(pre)
                .await
                .expect("io offload task panicked");
            drop(permit);
            poster.post(
                stage_id,
                StageEnvelope::AsyncPostBack {
                    token,
                    result: Box::new(result),
                },
            );
        });
    }

    /// Invoked by the Stage's dispatch loop on `AsyncPostBack`.
    pub fn resolve(&self, token: u64, result: Box<dyn Any + Send>, stage: &mut dyn IStage) {
        match self.post_callbacks.remove(&token) {
            Some((_, cb)) => cb(result, stage),
            None => warn!(token, "async post-back with no registered callback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::actor::BoxFuture;
    use protocol::{ClientPacket, Payload};
    use std::sync::Mutex;

    struct RecordingPoster {
        posted: Mutex<Vec<(i64, u64)>>,
    }

    impl StagePoster for RecordingPoster {
        fn post(&self, stage_id: i64, envelope: StageEnvelope) {
            if let StageEnvelope::AsyncPostBack { token, .. } = envelope {
                self.posted.lock().unwrap().push((stage_id, token));
            }
        }

        fn register_timer_callback(&self, _stage_id: i64, _timer_id: u64, _callback: Box<dyn FnMut(&mut dyn IStage) + Send>) {}
    }

    struct NoopStage;

    impl IStage for NoopStage {
        fn on_create<'a>(&'a mut self, _payload: &'a Payload) -> BoxFuture<'a, (bool, Option<Payload>)> {
            Box::pin(async { (true, None) })
        }

        fn on_join_stage<'a>(
            &'a mut self,
            _actor: &'a mut dyn crate::stage::actor::IActor,
            _sender: &'a crate::senders::ActorSender,
        ) -> BoxFuture<'a, bool> {
            Box::pin(async { true })
        }

        fn on_dispatch_actor<'a>(
            &'a mut self,
            _actor: &'a mut dyn crate::stage::actor::IActor,
            _packet: &'a ClientPacket,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn compute_result_round_trips_through_post_back() {
        let poster = Arc::new(RecordingPoster { posted: Mutex::new(Vec::new()) });
        let service = Arc::new(OffloadService::new(poster.clone(), 4));

        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        service.async_compute(
            1,
            || 2 + 2,
            Some(move |_stage: &mut dyn IStage, v: i32| *seen2.lock().unwrap() = Some(v)),
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let posted = poster.posted.lock().unwrap().clone();
        assert_eq!(posted.len(), 1);
        let (stage_id, token) = posted[0];
        assert_eq!(stage_id, 1);

        let mut stage = NoopStage;
        service.resolve(token, Box::new(4i32), &mut stage);
        assert_eq!(*seen.lock().unwrap(), Some(4));
    }
}
