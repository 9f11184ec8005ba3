//! Scheduler module: one recurring timer per active target.

mod cadence;

pub use cadence::*;

use crate::db::{DbError, PingRecord, Store};
use crate::probe::Prober;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Semaphore};

/// Probes of one target allowed in flight at the same time.
const MAX_OVERLAPPING_PROBES: usize = 3;

struct Timer {
    cadence: Cadence,
    stop_tx: broadcast::Sender<()>,
}

impl Timer {
    fn cancel(self) {
        let _ = self.stop_tx.send(());
    }
}

/// Owns the timer registry. All registry changes are serialized by one
/// lock; probes run outside it.
pub struct Scheduler {
    store: Arc<Store>,
    prober: Arc<dyn Prober>,
    timers: Mutex<HashMap<i64, Timer>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, prober: Arc<dyn Prober>) -> Self {
        Self {
            store,
            prober,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Replace any timer for `target_id` with one firing at the cadence
    /// derived from `interval_seconds`.
    pub async fn start_monitoring(&self, target_id: i64, interval_seconds: u32) {
        let mut timers = self.timers.lock().await;
        let cadence = Cadence::from_interval(interval_seconds);
        self.register(&mut timers, target_id, cadence);
        tracing::info!(
            "Started monitoring target {} (interval: {}s, {})",
            target_id,
            interval_seconds,
            cadence
        );
    }

    /// Cancel the timer for `target_id`, if any.
    pub async fn stop_monitoring(&self, target_id: i64) {
        let mut timers = self.timers.lock().await;
        if let Some(timer) = timers.remove(&target_id) {
            timer.cancel();
            tracing::info!("Stopped monitoring target {}", target_id);
        }
    }

    /// Reconcile the registry with the active targets in the store. Timers
    /// whose cadence is unchanged keep running; the rest are replaced,
    /// started or cancelled. Returns the number of active targets.
    pub async fn sync_all(&self) -> Result<usize, DbError> {
        let mut timers = self.timers.lock().await;
        let targets = self.store.get_active_targets()?;

        let desired: HashMap<i64, Cadence> = targets
            .iter()
            .map(|t| (t.id, Cadence::from_interval(t.interval_seconds)))
            .collect();

        let stale: Vec<i64> = timers
            .iter()
            .filter(|(id, timer)| desired.get(id) != Some(&timer.cadence))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(timer) = timers.remove(id) {
                timer.cancel();
            }
        }

        let mut started = 0;
        for (&id, &cadence) in &desired {
            if !timers.contains_key(&id) {
                self.register(&mut timers, id, cadence);
                started += 1;
            }
        }

        tracing::info!(
            "Synced {} active targets ({} started, {} cancelled or replaced)",
            desired.len(),
            started,
            stale.len()
        );
        Ok(desired.len())
    }

    /// Cancel every timer.
    pub async fn stop_all(&self) {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.cancel();
        }
        tracing::info!("Stopped all monitoring jobs ({})", count);
    }

    /// Number of registered timers.
    pub async fn active_timers(&self) -> usize {
        self.timers.lock().await.len()
    }

    #[cfg(test)]
    async fn cadence_of(&self, target_id: i64) -> Option<Cadence> {
        self.timers.lock().await.get(&target_id).map(|t| t.cadence)
    }

    fn register(&self, timers: &mut HashMap<i64, Timer>, target_id: i64, cadence: Cadence) {
        if let Some(old) = timers.remove(&target_id) {
            old.cancel();
        }

        let (stop_tx, stop_rx) = broadcast::channel(1);
        tokio::spawn(run_timer_loop(
            target_id,
            cadence,
            self.store.clone(),
            self.prober.clone(),
            stop_rx,
        ));
        timers.insert(target_id, Timer { cadence, stop_tx });
    }
}

/// Fire `probe_target` on every tick until cancelled. Each probe runs in its
/// own task so a slow target never delays its own schedule or anyone else's.
async fn run_timer_loop(
    target_id: i64,
    cadence: Cadence,
    store: Arc<Store>,
    prober: Arc<dyn Prober>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let first_tick = tokio::time::Instant::now() + cadence.delay_until_next_tick(Utc::now());
    let mut interval = tokio::time::interval_at(first_tick, cadence.period());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let in_flight = Arc::new(Semaphore::new(MAX_OVERLAPPING_PROBES));

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                let permit = match in_flight.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::warn!("Skipping probe for target {} due to overlap limit", target_id);
                        continue;
                    }
                };

                let store = store.clone();
                let prober = prober.clone();

                tokio::spawn(async move {
                    let _permit = permit; // Hold permit until done
                    probe_target(&store, prober.as_ref(), target_id).await;
                });
            }
        }
    }
}

/// Probe a target once and record the outcome. Returns the written record,
/// or `None` when the target was skipped or the write failed.
pub async fn probe_target(store: &Store, prober: &dyn Prober, target_id: i64) -> Option<PingRecord> {
    let target = match store.get_target(target_id) {
        Ok(t) if t.is_active => t,
        Ok(t) => {
            tracing::warn!("Target {} ({}) is inactive, skipping probe", target_id, t.title);
            return None;
        }
        Err(DbError::NotFound) => {
            tracing::warn!("Target {} not found, skipping probe", target_id);
            return None;
        }
        Err(e) => {
            tracing::error!("Failed to load target {}: {}", target_id, e);
            return None;
        }
    };

    let outcome = prober.probe(&target).await;
    let mut record = outcome.into_record(target.id, Utc::now());

    match &record.error_message {
        None => tracing::debug!("Probed {}: ok in {:.2}ms", target.title, record.latency_ms),
        Some(msg) => tracing::info!("Probed {}: failed in {:.2}ms: {}", target.title, record.latency_ms, msg),
    }

    match store.insert_ping(&record) {
        Ok(id) => {
            record.id = id;
            Some(record)
        }
        Err(e) => {
            tracing::error!("Failed to write ping for {}: {}", target.title, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MonitoredTarget;
    use crate::probe::PingOutcome;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    struct FakeProber {
        calls: AtomicUsize,
        success: bool,
    }

    impl FakeProber {
        fn new(success: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                success,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, _target: &MonitoredTarget) -> PingOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.success {
                PingOutcome {
                    success: true,
                    status_code: Some(200),
                    latency_ms: 1.0,
                    error_message: None,
                    players: None,
                }
            } else {
                PingOutcome::failed(1.0, "connection refused")
            }
        }
    }

    fn setup(prober: Arc<FakeProber>) -> (NamedTempFile, Arc<Store>, Scheduler) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let scheduler = Scheduler::new(store.clone(), prober);
        (tmp, store, scheduler)
    }

    fn add_target(store: &Store, interval_seconds: u32, is_active: bool) -> i64 {
        let mut target = MonitoredTarget {
            title: "svc".to_string(),
            address: "https://example.com".to_string(),
            interval_seconds,
            is_active,
            ..Default::default()
        };
        store.add_target(&mut target).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_leaves_one_timer() {
        let prober = FakeProber::new(true);
        let (_tmp, store, scheduler) = setup(prober.clone());
        let id = add_target(&store, 30, true);

        scheduler.start_monitoring(id, 30).await;
        scheduler.start_monitoring(id, 30).await;
        assert_eq!(scheduler.active_timers().await, 1);
        assert_eq!(scheduler.cadence_of(id).await, Some(Cadence::EverySeconds(30)));

        tokio::time::sleep(Duration::from_secs(95)).await;
        let calls = prober.calls();
        assert!((3..=4).contains(&calls), "expected a single timer, saw {} probes", calls);

        scheduler.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_changes_cadence() {
        let (_tmp, store, scheduler) = setup(FakeProber::new(true));
        let id = add_target(&store, 30, true);

        scheduler.start_monitoring(id, 30).await;
        scheduler.start_monitoring(id, 90).await;
        assert_eq!(scheduler.cadence_of(id).await, Some(Cadence::EveryMinutes(1)));
        assert_eq!(scheduler.active_timers().await, 1);
    }

    #[tokio::test]
    async fn test_stop_unknown_is_noop() {
        let (_tmp, _store, scheduler) = setup(FakeProber::new(true));
        scheduler.stop_monitoring(42).await;
        assert_eq!(scheduler.active_timers().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_probing() {
        let prober = FakeProber::new(true);
        let (_tmp, store, scheduler) = setup(prober.clone());
        let id = add_target(&store, 10, true);

        scheduler.start_monitoring(id, 10).await;
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(prober.calls() >= 1);

        scheduler.stop_monitoring(id).await;
        let after_stop = prober.calls();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(prober.calls(), after_stop);
        assert_eq!(scheduler.active_timers().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_write_pings() {
        let prober = FakeProber::new(false);
        let (_tmp, store, scheduler) = setup(prober.clone());
        let id = add_target(&store, 10, true);

        scheduler.start_monitoring(id, 10).await;
        tokio::time::sleep(Duration::from_secs(35)).await;
        scheduler.stop_all().await;

        let pings = store.get_pings_since(&[id], Utc::now() - ChronoDuration::hours(1)).unwrap();
        assert_eq!(pings.len(), prober.calls());
        assert!(!pings.is_empty());
        assert!(pings.iter().all(|p| !p.success && p.error_message.as_deref() == Some("connection refused")));
    }

    #[tokio::test]
    async fn test_probe_target_skips_missing_and_inactive() {
        let prober = FakeProber::new(true);
        let (_tmp, store, _scheduler) = setup(prober.clone());
        let inactive = add_target(&store, 60, false);

        assert!(probe_target(&store, prober.as_ref(), 999).await.is_none());
        assert!(probe_target(&store, prober.as_ref(), inactive).await.is_none());
        assert_eq!(prober.calls(), 0);

        let active = add_target(&store, 60, true);
        let record = probe_target(&store, prober.as_ref(), active).await.unwrap();
        assert!(record.id > 0);
        assert!(record.success);
        assert_eq!(record.status_code, Some(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_all_reconciles() {
        let (_tmp, store, scheduler) = setup(FakeProber::new(true));
        let a = add_target(&store, 30, true);
        let b = add_target(&store, 120, true);
        let c = add_target(&store, 30, false);

        scheduler.start_monitoring(999, 10).await;
        scheduler.start_monitoring(c, 30).await;

        assert_eq!(scheduler.sync_all().await.unwrap(), 2);
        assert_eq!(scheduler.active_timers().await, 2);
        assert_eq!(scheduler.cadence_of(a).await, Some(Cadence::EverySeconds(30)));
        assert_eq!(scheduler.cadence_of(b).await, Some(Cadence::EveryMinutes(2)));
        assert_eq!(scheduler.cadence_of(c).await, None);
        assert_eq!(scheduler.cadence_of(999).await, None);

        let mut edited = store.get_target(a).unwrap();
        edited.interval_seconds = 300;
        store.update_target(&edited).unwrap();

        scheduler.sync_all().await.unwrap();
        assert_eq!(scheduler.cadence_of(a).await, Some(Cadence::EveryMinutes(5)));
        assert_eq!(scheduler.active_timers().await, 2);

        scheduler.stop_all().await;
        assert_eq!(scheduler.active_timers().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_keeps_timer_ticking() {
        let prober = FakeProber::new(true);
        let (tmp, store, scheduler) = setup(prober.clone());
        let id = add_target(&store, 10, true);

        rusqlite::Connection::open(tmp.path())
            .unwrap()
            .execute_batch("DROP TABLE pings")
            .unwrap();

        scheduler.start_monitoring(id, 10).await;
        tokio::time::sleep(Duration::from_secs(25)).await;
        let early = prober.calls();
        assert!(early >= 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(prober.calls() >= early + 2, "timer stopped after write failures");
        assert_eq!(scheduler.active_timers().await, 1);

        scheduler.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registry_changes_settle_on_sync() {
        let (_tmp, store, scheduler) = setup(FakeProber::new(true));
        let scheduler = Arc::new(scheduler);
        let active: Vec<i64> = (0..5).map(|_| add_target(&store, 3600, true)).collect();
        let inactive: Vec<i64> = (0..3).map(|_| add_target(&store, 3600, false)).collect();
        let all: Vec<i64> = active.iter().chain(inactive.iter()).copied().collect();

        let mut handles = Vec::new();
        for i in 0..200 {
            let scheduler = scheduler.clone();
            let id = all[i % all.len()];
            handles.push(tokio::spawn(async move {
                match i % 3 {
                    0 => scheduler.start_monitoring(id, 3600).await,
                    1 => scheduler.stop_monitoring(id).await,
                    _ => {
                        scheduler.sync_all().await.unwrap();
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(scheduler.sync_all().await.unwrap(), active.len());
        assert_eq!(scheduler.active_timers().await, active.len());
        for id in &active {
            assert!(scheduler.cadence_of(*id).await.is_some());
        }
        for id in &inactive {
            assert_eq!(scheduler.cadence_of(*id).await, None);
        }

        scheduler.stop_all().await;
    }
}
