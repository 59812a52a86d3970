use crate::config::PolicyConfig;
use crate::domain::jobs::{Job, JobHandler, JobPayload, JobQueue, Schedule};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            max_attempts: config.job_max_attempts.max(1),
            base_backoff: Duration::seconds(config.job_backoff_base_secs.max(1)),
        }
    }

    /// Delay before retry number `attempt` (1-based): base doubled per prior
    /// attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2_i32.saturating_pow(attempt.saturating_sub(1).min(16))
    }
}

/// A job that exhausted its retries. Kept for operator inspection, never
/// silently dropped.
#[derive(Debug, Clone)]
pub struct DeadJob {
    pub job: Job,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

struct Scheduled {
    run_at: DateTime<Utc>,
    seq: u64,
    job: Job,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.run_at, self.seq).cmp(&(other.run_at, other.seq))
    }
}

struct RepeatEntry {
    interval: Duration,
    payload: JobPayload,
    next_run: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    due: BinaryHeap<Reverse<Scheduled>>,
    repeats: HashMap<String, RepeatEntry>,
    dead: Vec<DeadJob>,
    seq: u64,
}

impl QueueState {
    fn push(&mut self, job: Job) {
        self.seq += 1;
        self.due.push(Reverse(Scheduled {
            run_at: job.run_at,
            seq: self.seq,
            job,
        }));
    }
}

/// In-process delayed job queue with at-least-once delivery.
///
/// `tick` pops everything due, runs it through the handler, and re-schedules
/// failures with backoff until the attempt budget is spent; the worker loop
/// drives `tick` on a polling interval. Tests call `tick` directly with a
/// synthetic clock, which is why nothing here reads the wall clock itself.
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    policy: RetryPolicy,
}

impl InMemoryJobQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            policy,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers (or re-registers) a recurring job under a caller key.
    ///
    /// Process restarts re-register their recurring jobs; replacing any stale
    /// entry under the same key keeps the registry free of duplicates.
    pub fn register_repeating(
        &self,
        key: &str,
        interval: Duration,
        payload: JobPayload,
        first_run: DateTime<Utc>,
    ) {
        let mut state = self.lock();
        if state.repeats.remove(key).is_some() {
            debug!(key, "replacing stale repeating job registration");
        }
        state.repeats.insert(
            key.to_string(),
            RepeatEntry {
                interval,
                payload,
                next_run: first_run,
            },
        );
    }

    /// Runs every due job once. Returns the number of handler invocations.
    pub async fn tick(&self, now: DateTime<Utc>, handler: &dyn JobHandler) -> usize {
        let due = {
            let mut state = self.lock();

            // materialize due repeats first so they run in this tick
            let mut repeat_jobs = Vec::new();
            for entry in state.repeats.values_mut() {
                while entry.next_run <= now {
                    repeat_jobs.push(Job {
                        id: Uuid::new_v4(),
                        payload: entry.payload.clone(),
                        run_at: entry.next_run,
                        attempts: 0,
                    });
                    entry.next_run += entry.interval;
                }
            }
            for job in repeat_jobs {
                state.push(job);
            }

            let mut due = Vec::new();
            while matches!(state.due.peek(), Some(Reverse(head)) if head.run_at <= now) {
                if let Some(Reverse(scheduled)) = state.due.pop() {
                    due.push(scheduled.job);
                }
            }
            due
        };

        let mut processed = 0;
        for mut job in due {
            processed += 1;
            match handler.handle(&job).await {
                Ok(()) => {
                    debug!(job_id = %job.id, kind = job.payload.kind(), "job completed");
                }
                Err(err) => {
                    job.attempts += 1;
                    // deterministic rejections are dead-lettered immediately;
                    // only transient failures earn a retry
                    if !err.is_retryable() || job.attempts >= self.policy.max_attempts {
                        error!(
                            job_id = %job.id,
                            kind = job.payload.kind(),
                            attempts = job.attempts,
                            %err,
                            "job failed terminally, moving to dead letter"
                        );
                        self.lock().dead.push(DeadJob {
                            job,
                            error: err.to_string(),
                            failed_at: now,
                        });
                    } else {
                        let delay = self.policy.backoff(job.attempts);
                        warn!(
                            job_id = %job.id,
                            kind = job.payload.kind(),
                            attempt = job.attempts,
                            retry_in_secs = delay.num_seconds(),
                            %err,
                            "job failed, scheduling retry"
                        );
                        job.run_at = now + delay;
                        self.lock().push(job);
                    }
                }
            }
        }
        processed
    }

    /// Drives `tick` until the queue drains or `horizon` is reached, jumping
    /// the synthetic clock to each next due instant. Test/replay helper.
    pub async fn run_until(
        &self,
        mut now: DateTime<Utc>,
        horizon: DateTime<Utc>,
        handler: &dyn JobHandler,
    ) -> DateTime<Utc> {
        loop {
            self.tick(now, handler).await;
            let Some(next) = self.next_run_at() else {
                return now;
            };
            if next > horizon {
                return now;
            }
            now = next.max(now);
        }
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        let state = self.lock();
        let queued = state.due.peek().map(|Reverse(s)| s.run_at);
        let repeated = state.repeats.values().map(|r| r.next_run).min();
        match (queued, repeated) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.lock().due.len()
    }

    pub fn repeat_keys(&self) -> Vec<String> {
        self.lock().repeats.keys().cloned().collect()
    }

    pub fn dead_jobs(&self) -> Vec<DeadJob> {
        self.lock().dead.clone()
    }

    /// Long-running worker loop for the process lifetime: polls the wall
    /// clock and ticks. N of these may run against the same queue.
    pub async fn run_worker(&self, handler: &dyn JobHandler, poll: std::time::Duration) {
        loop {
            self.tick(Utc::now(), handler).await;
            tokio::time::sleep(poll).await;
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, payload: JobPayload, schedule: Schedule) -> Result<Uuid> {
        match schedule {
            Schedule::At(run_at) => {
                let job = Job {
                    id: Uuid::new_v4(),
                    payload,
                    run_at,
                    attempts: 0,
                };
                let id = job.id;
                self.lock().push(job);
                Ok(id)
            }
            Schedule::Every {
                key,
                interval,
                first_run,
            } => {
                self.register_repeating(&key, interval, payload, first_run);
                Ok(Uuid::new_v4())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, min, 0).unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::seconds(10),
        }
    }

    struct Counting {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn handle(&self, _job: &Job) -> Result<()> {
            let n = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if n < self.fail_first {
                Err(crate::error::CoreError::external("gateway down"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_job_not_delivered_before_due() {
        let queue = InMemoryJobQueue::new(policy());
        queue
            .enqueue(JobPayload::ExpirySweep, Schedule::At(at(10)))
            .await
            .unwrap();

        let handler = Counting {
            calls: AtomicU32::new(0),
            fail_first: 0,
        };
        assert_eq!(queue.tick(at(5), &handler).await, 0);
        assert_eq!(queue.tick(at(10), &handler).await, 1);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_then_success() {
        let queue = InMemoryJobQueue::new(policy());
        queue
            .enqueue(JobPayload::ExpirySweep, Schedule::At(at(0)))
            .await
            .unwrap();

        let handler = Counting {
            calls: AtomicU32::new(0),
            fail_first: 1,
        };
        queue.tick(at(0), &handler).await;
        // retry is parked 10s out, not immediately due
        assert_eq!(queue.tick(at(0), &handler).await, 0);
        assert_eq!(queue.tick(at(1), &handler).await, 1);
        assert_eq!(handler.calls.load(AtomicOrdering::SeqCst), 2);
        assert!(queue.dead_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_job_goes_dead_not_dropped() {
        let queue = InMemoryJobQueue::new(policy());
        queue
            .enqueue(JobPayload::ExpirySweep, Schedule::At(at(0)))
            .await
            .unwrap();

        let handler = Counting {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        };
        // generous clock jumps so every backoff elapses
        for min in [0, 1, 3, 10, 30] {
            queue.tick(at(min), &handler).await;
        }

        assert_eq!(handler.calls.load(AtomicOrdering::SeqCst), 3);
        let dead = queue.dead_jobs();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.attempts, 3);
        assert!(dead[0].error.contains("gateway down"));
    }

    #[tokio::test]
    async fn test_repeat_registration_dedup_by_key() {
        let queue = InMemoryJobQueue::new(policy());
        queue.register_repeating("sweep", Duration::minutes(5), JobPayload::ExpirySweep, at(5));
        // process restart registers again under the same key
        queue.register_repeating("sweep", Duration::minutes(5), JobPayload::ExpirySweep, at(5));
        assert_eq!(queue.repeat_keys().len(), 1);

        let handler = Counting {
            calls: AtomicU32::new(0),
            fail_first: 0,
        };
        queue.tick(at(5), &handler).await;
        // deduplicated: one delivery, not two
        assert_eq!(handler.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeat_fires_each_interval() {
        let queue = InMemoryJobQueue::new(policy());
        queue.register_repeating("sweep", Duration::minutes(5), JobPayload::ExpirySweep, at(0));

        let handler = Counting {
            calls: AtomicU32::new(0),
            fail_first: 0,
        };
        queue.tick(at(0), &handler).await;
        queue.tick(at(4), &handler).await;
        queue.tick(at(5), &handler).await;
        assert_eq!(handler.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_dead_letters_immediately() {
        let queue = InMemoryJobQueue::new(policy());
        queue
            .enqueue(JobPayload::ExpirySweep, Schedule::At(at(0)))
            .await
            .unwrap();

        struct AlwaysInvalid;
        #[async_trait]
        impl JobHandler for AlwaysInvalid {
            async fn handle(&self, _job: &Job) -> Result<()> {
                Err(crate::error::CoreError::validation("bad payload"))
            }
        }

        queue.tick(at(0), &AlwaysInvalid).await;
        let dead = queue.dead_jobs();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.attempts, 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::seconds(10));
        assert_eq!(p.backoff(2), Duration::seconds(20));
        assert_eq!(p.backoff(3), Duration::seconds(40));
    }
}
