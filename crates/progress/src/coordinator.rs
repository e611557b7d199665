//! Single critical section for every reconciliation trigger.
//!
//! Triggers race from independent contexts (foreground refresh, background
//! wake-ups, anchored sample delivery).  The coordinator lets exactly one of
//! them run the `normalize → reconcile → level → persist` cycle and drops
//! the rest: each trigger only carries a snapshot of a durable external
//! counter, so the next trigger picks up whatever a dropped one would have.
//!
//! Sample batches carry the anchor they were fetched from.  The anchor they
//! advance to is committed in the same snapshot as the steps they credit, so
//! a batch is either credited and consumed together or not at all.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::day_boundary;
use crate::error::{StoreError, SyncError};
use crate::leveling;
use crate::reconciler;
use crate::schema::{DailyWatermark, LevelUpEvent, ProgressState, SampleAnchor};
use crate::store::{PersistenceStore, Snapshot};
use crate::view::ProgressView;

/// What woke the reconciliation up.  Only used for logging and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// App came to the foreground or the user asked for a refresh.
    Foreground,
    /// Background observer callback or periodic wake-up.
    Background,
    /// Incremental samples delivered from an anchored query.
    AnchoredSync,
}

impl TriggerKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::AnchoredSync => "anchored_sync",
        }
    }
}

/// One individually-timestamped step sample from an incremental query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSample {
    pub timestamp: DateTime<Utc>,
    pub count: i64,
}

/// Already-fetched input for a reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading {
    /// Today's cumulative counter.  Goes through the daily watermark.
    Cumulative(i64),
    /// A batch of new samples.  Their sum is credited as-is.
    Samples {
        /// Anchor the batch was fetched from.  Must match the committed one.
        since: Option<SampleAnchor>,
        samples: Vec<StepSample>,
        /// Anchor issued with the batch; `None` keeps the current one.
        next: Option<SampleAnchor>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// New steps were credited and persisted.  Level-ups in ascending order,
    /// possibly none.
    Applied(Vec<LevelUpEvent>),
    /// Nothing new to credit.
    NoChange,
    /// Another reconciliation held the lock, or a sample batch was fetched
    /// from an anchor that has since moved on; this trigger was dropped.
    Skipped,
}

/// The latest consistent state, as published after every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveState {
    pub progress: ProgressState,
    pub watermark: DailyWatermark,
    /// Where the next incremental fetch starts.
    pub anchor: Option<SampleAnchor>,
    /// `false` while the in-memory state is ahead of the store.
    pub persisted: bool,
}

/// Sum a sample batch into one delta.  Negative samples and overflow are
/// rejected rather than clamped.
pub fn reduce_samples(samples: &[StepSample]) -> Result<u64, SyncError> {
    samples.iter().try_fold(0u64, |total, sample| {
        let count = u64::try_from(sample.count).map_err(|_| SyncError::InvalidInput {
            what: "sample count",
            value: sample.count,
        })?;
        total.checked_add(count).ok_or(SyncError::InvalidInput {
            what: "sample overflowing batch total",
            value: sample.count,
        })
    })
}

enum Credit {
    Cumulative(i64),
    Samples {
        delta: u64,
        since: Option<SampleAnchor>,
        next: Option<SampleAnchor>,
    },
}

impl Credit {
    fn from_reading(reading: Reading) -> Result<Self, SyncError> {
        match reading {
            Reading::Cumulative(raw) if raw < 0 => Err(SyncError::InvalidInput {
                what: "cumulative step count",
                value: raw,
            }),
            Reading::Cumulative(raw) => Ok(Self::Cumulative(raw)),
            Reading::Samples {
                since,
                samples,
                next,
            } => Ok(Self::Samples {
                delta: reduce_samples(&samples)?,
                since,
                next,
            }),
        }
    }
}

struct EngineState {
    progress: ProgressState,
    watermark: DailyWatermark,
    anchor: Option<SampleAnchor>,
    /// Set when memory is ahead of the store; forces a write next cycle.
    dirty: bool,
}

impl EngineState {
    fn live(&self, persisted: bool) -> LiveState {
        LiveState {
            progress: self.progress,
            watermark: self.watermark,
            anchor: self.anchor.clone(),
            persisted,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.progress, self.watermark).with_anchor(self.anchor.clone())
    }
}

pub struct SyncCoordinator {
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<EngineState>,
    live: watch::Sender<LiveState>,
}

impl SyncCoordinator {
    /// Restore the saved state from `store`, or start at level 1 with an
    /// empty watermark for today on first run.
    ///
    /// A saved record that breaks the leveling invariants is repaired in
    /// memory and marked dirty, so the next cycle writes the repaired form.
    pub async fn load(
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let today = clock.today();
        let (mut progress, watermark, anchor, saved) = match store.load().await? {
            Some(snapshot) => (snapshot.progress, snapshot.watermark, snapshot.anchor, true),
            None => {
                info!(%today, "no saved progress; starting at level 1");
                (ProgressState::default(), DailyWatermark::starting(today), None, false)
            }
        };

        let mut dirty = false;
        if progress.repair() {
            warn!(level = progress.level, "saved level out of range; clamped");
            dirty = true;
        }
        let promoted = leveling::credit(&mut progress, 0);
        if !promoted.is_empty() {
            warn!(
                level = progress.level,
                steps = progress.steps,
                "saved steps exceeded the level threshold; promoted"
            );
            dirty = true;
        }

        let state = EngineState {
            progress,
            watermark,
            anchor,
            dirty,
        };
        let (tx, _) = watch::channel(state.live(saved && !dirty));
        Ok(Self {
            store,
            clock,
            state: Mutex::new(state),
            live: tx,
        })
    }

    /// Latest published state.  Never blocks on a running cycle.
    pub fn current(&self) -> LiveState {
        self.live.borrow().clone()
    }

    pub fn view(&self) -> ProgressView {
        ProgressView::from_state(&self.current().progress)
    }

    /// Receive every published state.
    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.live.subscribe()
    }

    /// Run one reconciliation cycle for an already-fetched reading.
    ///
    /// Returns [`SyncOutcome::Skipped`] immediately if another cycle holds the
    /// lock, or if a sample batch was fetched from a stale anchor.  Invalid
    /// input is rejected before the lock is taken.  On
    /// [`SyncError::PersistFailed`] the credit (and the anchor it consumed)
    /// stays in memory and the next cycle writes it again.
    pub async fn run_reconciliation(
        &self,
        trigger: TriggerKind,
        reading: Reading,
    ) -> Result<SyncOutcome, SyncError> {
        let credit = Credit::from_reading(reading)?;

        let Ok(mut guard) = self.state.try_lock() else {
            debug!(trigger = trigger.label(), "reconciliation in flight; trigger dropped");
            return Ok(SyncOutcome::Skipped);
        };
        let state = &mut *guard;

        if let Credit::Samples { since, .. } = &credit {
            if *since != state.anchor {
                debug!(
                    trigger = trigger.label(),
                    fetched_from = ?since,
                    current = ?state.anchor,
                    "sample batch fetched from a stale anchor; dropped"
                );
                return Ok(SyncOutcome::Skipped);
            }
        }

        let today = self.clock.today();
        let normalized = day_boundary::normalize(state.watermark, today);
        if normalized != state.watermark {
            info!(
                previous = %state.watermark.as_of_date,
                %today,
                absorbed = state.watermark.last_absorbed_count,
                "new day; watermark reset"
            );
            state.watermark = normalized;
            state.dirty = true;
        }

        let delta = match credit {
            Credit::Cumulative(raw) => reconciler::reconcile(&mut state.watermark, raw, today)?,
            Credit::Samples { delta, next, .. } => {
                if let Some(next) = next {
                    if state.anchor.as_ref() != Some(&next) {
                        state.anchor = Some(next);
                        state.dirty = true;
                    }
                }
                delta
            }
        };

        let events = if delta > 0 {
            state.dirty = true;
            leveling::credit(&mut state.progress, delta)
        } else {
            Vec::new()
        };

        if !state.dirty {
            debug!(trigger = trigger.label(), "no new steps");
            return Ok(SyncOutcome::NoChange);
        }

        let saved = self.store.save_atomic(&state.snapshot()).await;
        state.dirty = saved.is_err();
        self.live.send_replace(state.live(saved.is_ok()));

        if let Err(source) = saved {
            warn!(
                trigger = trigger.label(),
                error = %source,
                delta,
                level_ups = events.len(),
                "progress write failed; will retry on next trigger"
            );
            return Err(SyncError::PersistFailed { events, source });
        }

        if delta == 0 {
            debug!(trigger = trigger.label(), "pending progress written");
            return Ok(SyncOutcome::NoChange);
        }

        info!(
            trigger = trigger.label(),
            delta,
            level = state.progress.level,
            steps = state.progress.steps,
            absorbed = state.watermark.last_absorbed_count,
            level_ups = events.len(),
            "steps credited"
        );
        Ok(SyncOutcome::Applied(events))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio::sync::Notify;

    use super::*;
    use crate::clock::FixedClock;
    use crate::schema::MAX_LEVEL;
    use crate::store::MemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    async fn coordinator(store: Arc<dyn PersistenceStore>, clock: Arc<FixedClock>) -> SyncCoordinator {
        SyncCoordinator::load(store, clock).await.unwrap()
    }

    fn sample(count: i64) -> StepSample {
        StepSample {
            timestamp: Utc::now(),
            count,
        }
    }

    fn anchor(raw: &str) -> Option<SampleAnchor> {
        Some(SampleAnchor::new(raw))
    }

    fn batch(since: Option<&str>, counts: &[i64], next: Option<&str>) -> Reading {
        Reading::Samples {
            since: since.map(SampleAnchor::new),
            samples: counts.iter().copied().map(sample).collect(),
            next: next.map(SampleAnchor::new),
        }
    }

    /// Fails the next write when armed.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl PersistenceStore for FlakyStore {
        async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
            self.inner.load().await
        }

        async fn save_atomic(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.save_atomic(snapshot).await
        }
    }

    /// Parks inside `save_atomic` until released, holding the lock.
    #[derive(Default)]
    struct GateStore {
        inner: MemoryStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl PersistenceStore for GateStore {
        async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
            self.inner.load().await
        }

        async fn save_atomic(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.save_atomic(snapshot).await
        }
    }

    #[tokio::test]
    async fn first_run_starts_at_level_one() {
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(Arc::new(MemoryStore::default()), clock).await;
        let live = coord.current();
        assert_eq!(live.progress, ProgressState::default());
        assert_eq!(live.watermark, DailyWatermark::starting(day(3)));
        assert!(!live.persisted);
    }

    #[tokio::test]
    async fn identical_reads_apply_once() {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(store.clone(), clock).await;

        let first = coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(500))
            .await
            .unwrap();
        let second = coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(500))
            .await
            .unwrap();

        // 500 XP from level 1: 100 → L2, 150 → L3, 200 → L4, 50 left.
        assert_eq!(
            first,
            SyncOutcome::Applied(vec![
                LevelUpEvent { new_level: 2 },
                LevelUpEvent { new_level: 3 },
                LevelUpEvent { new_level: 4 },
            ])
        );
        assert_eq!(second, SyncOutcome::NoChange);

        let saved = store.peek().unwrap();
        assert_eq!(saved.progress, ProgressState { steps: 50, level: 4 });
        assert_eq!(saved.watermark.last_absorbed_count, 500);
    }

    #[tokio::test]
    async fn regressing_counter_never_subtracts() {
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(Arc::new(MemoryStore::default()), clock).await;
        for raw in [30, 20, 70] {
            coord
                .run_reconciliation(TriggerKind::Background, Reading::Cumulative(raw))
                .await
                .unwrap();
        }
        let live = coord.current();
        assert_eq!(live.progress.steps, 70);
        assert_eq!(live.watermark.last_absorbed_count, 70);
    }

    #[tokio::test]
    async fn day_rollover_credits_from_zero() {
        let store = Arc::new(MemoryStore::with_snapshot(Snapshot::new(
            ProgressState { steps: 10, level: 1 },
            DailyWatermark {
                last_absorbed_count: 800,
                as_of_date: day(2),
            },
        )));
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(store.clone(), clock).await;

        let outcome = coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(50))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Applied(vec![]));

        let saved = store.peek().unwrap();
        assert_eq!(saved.progress, ProgressState { steps: 60, level: 1 });
        assert_eq!(
            saved.watermark,
            DailyWatermark {
                last_absorbed_count: 50,
                as_of_date: day(3)
            }
        );
    }

    #[tokio::test]
    async fn rollover_without_steps_still_moves_watermark() {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(store.clone(), clock.clone()).await;
        coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(400))
            .await
            .unwrap();

        clock.advance_days(1);
        let outcome = coord
            .run_reconciliation(TriggerKind::Background, Reading::Cumulative(0))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::NoChange);
        assert_eq!(store.peek().unwrap().watermark, DailyWatermark::starting(day(4)));
    }

    #[tokio::test]
    async fn concurrent_trigger_is_skipped() {
        let store = Arc::new(GateStore::default());
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = Arc::new(coordinator(store.clone(), clock).await);

        let holder = {
            let coord = coord.clone();
            tokio::spawn(async move {
                coord
                    .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(120))
                    .await
            })
        };
        store.entered.notified().await;

        let contender = coord
            .run_reconciliation(TriggerKind::Background, Reading::Cumulative(999))
            .await
            .unwrap();
        assert_eq!(contender, SyncOutcome::Skipped);

        store.release.notify_one();
        let held = holder.await.unwrap().unwrap();
        assert_eq!(held, SyncOutcome::Applied(vec![LevelUpEvent { new_level: 2 }]));

        let saved = store.inner.peek().unwrap();
        assert_eq!(saved.progress, ProgressState { steps: 20, level: 2 });
        assert_eq!(saved.watermark.last_absorbed_count, 120);
    }

    #[tokio::test]
    async fn persist_failure_keeps_disk_and_converges() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(store.clone(), clock).await;

        coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(50))
            .await
            .unwrap();
        let before = store.inner.peek().unwrap();

        store.fail_next.store(true, Ordering::SeqCst);
        let err = coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(180))
            .await
            .unwrap_err();
        match err {
            SyncError::PersistFailed { events, .. } => {
                assert_eq!(events, vec![LevelUpEvent { new_level: 2 }]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.inner.peek().unwrap(), before, "disk must be untouched");
        assert!(!coord.current().persisted);
        assert_eq!(coord.current().progress, ProgressState { steps: 80, level: 2 });

        // Same counter again: nothing new, but the pending write lands.
        let outcome = coord
            .run_reconciliation(TriggerKind::Background, Reading::Cumulative(180))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::NoChange);
        let saved = store.inner.peek().unwrap();
        assert_eq!(saved.progress, ProgressState { steps: 80, level: 2 });
        assert_eq!(saved.watermark.last_absorbed_count, 180);
        assert!(coord.current().persisted);
    }

    #[tokio::test]
    async fn samples_bypass_watermark() {
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(Arc::new(MemoryStore::default()), clock).await;
        coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(40))
            .await
            .unwrap();

        let outcome = coord
            .run_reconciliation(TriggerKind::AnchoredSync, batch(None, &[30, 45], Some("s1")))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Applied(vec![LevelUpEvent { new_level: 2 }]));
        let live = coord.current();
        assert_eq!(live.progress, ProgressState { steps: 15, level: 2 });
        assert_eq!(live.watermark.last_absorbed_count, 40);
        assert_eq!(live.anchor, anchor("s1"));
    }

    #[tokio::test]
    async fn anchor_is_saved_with_the_credit() {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(store.clone(), clock).await;

        coord
            .run_reconciliation(TriggerKind::AnchoredSync, batch(None, &[20], Some("s1")))
            .await
            .unwrap();
        let saved = store.peek().unwrap();
        assert_eq!(saved.progress.steps, 20);
        assert_eq!(saved.anchor, anchor("s1"));

        // Reloading resumes from the committed cursor.
        let reloaded = coordinator(store, Arc::new(FixedClock::new(day(3)))).await;
        assert_eq!(reloaded.current().anchor, anchor("s1"));
    }

    #[tokio::test]
    async fn batch_from_stale_anchor_is_skipped() {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(store.clone(), clock).await;

        // Two fetches raced from the same cursor; only the first may count.
        coord
            .run_reconciliation(TriggerKind::AnchoredSync, batch(None, &[60], Some("s1")))
            .await
            .unwrap();
        let late = coord
            .run_reconciliation(TriggerKind::AnchoredSync, batch(None, &[60], Some("s1b")))
            .await
            .unwrap();
        assert_eq!(late, SyncOutcome::Skipped);

        let saved = store.peek().unwrap();
        assert_eq!(saved.progress.steps, 60);
        assert_eq!(saved.anchor, anchor("s1"));
    }

    #[tokio::test]
    async fn failed_write_still_consumes_the_batch() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(store.clone(), clock).await;

        store.fail_next.store(true, Ordering::SeqCst);
        let err = coord
            .run_reconciliation(TriggerKind::AnchoredSync, batch(None, &[60], Some("s1")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PersistFailed { .. }));
        assert!(store.inner.peek().is_none());

        let live = coord.current();
        assert_eq!(live.anchor, anchor("s1"));
        assert!(!live.persisted);

        // Re-delivering the same batch from the old cursor must not count twice.
        let again = coord
            .run_reconciliation(TriggerKind::AnchoredSync, batch(None, &[60], Some("s1")))
            .await
            .unwrap();
        assert_eq!(again, SyncOutcome::Skipped);

        // The next batch from the new cursor flushes both together.
        let next = coord
            .run_reconciliation(TriggerKind::AnchoredSync, batch(Some("s1"), &[], Some("s2")))
            .await
            .unwrap();
        assert_eq!(next, SyncOutcome::NoChange);
        let saved = store.inner.peek().unwrap();
        assert_eq!(saved.progress, ProgressState { steps: 60, level: 1 });
        assert_eq!(saved.anchor, anchor("s2"));
        assert!(coord.current().persisted);
    }

    #[tokio::test]
    async fn empty_sample_batch_is_no_change() {
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(Arc::new(MemoryStore::default()), clock).await;
        let outcome = coord
            .run_reconciliation(TriggerKind::AnchoredSync, batch(None, &[], None))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::NoChange);
    }

    #[tokio::test]
    async fn invalid_input_touches_nothing() {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(store.clone(), clock).await;

        let err = coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(-1))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput { value: -1, .. }));

        let err = coord
            .run_reconciliation(TriggerKind::AnchoredSync, batch(None, &[10, -3], Some("s1")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput { value: -3, .. }));

        assert!(store.peek().is_none());
        assert_eq!(coord.current().progress, ProgressState::default());
        assert_eq!(coord.current().anchor, None);
    }

    #[tokio::test]
    async fn subscribers_see_each_cycle() {
        let clock = Arc::new(FixedClock::new(day(3)));
        let coord = coordinator(Arc::new(MemoryStore::default()), clock).await;
        let mut rx = coord.subscribe();

        coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(100))
            .await
            .unwrap();
        assert!(rx.has_changed().unwrap());
        let live = rx.borrow_and_update().clone();
        assert_eq!(live.progress.level, 2);
        assert!(live.persisted);
        assert_eq!(coord.view().level_label(), "LEVEL 02");
    }

    #[tokio::test]
    async fn out_of_range_saved_level_is_repaired() {
        let store = Arc::new(MemoryStore::with_snapshot(Snapshot::new(
            ProgressState { steps: 5, level: 0 },
            DailyWatermark::starting(day(3)),
        )));
        let coord = coordinator(store.clone(), Arc::new(FixedClock::new(day(3)))).await;
        assert_eq!(coord.current().progress.level, 1);
        assert!(!coord.current().persisted);

        // The repair is written by the next cycle even without new steps.
        let outcome = coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(0))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::NoChange);
        assert_eq!(store.peek().unwrap().progress, ProgressState { steps: 5, level: 1 });
        assert!(coord.current().persisted);

        let maxed = Arc::new(MemoryStore::with_snapshot(Snapshot::new(
            ProgressState { steps: 5, level: 40 },
            DailyWatermark::starting(day(3)),
        )));
        let coord = coordinator(maxed, Arc::new(FixedClock::new(day(3)))).await;
        assert_eq!(coord.current().progress.level, MAX_LEVEL);
    }

    #[tokio::test]
    async fn saved_steps_over_threshold_are_promoted_on_load() {
        let store = Arc::new(MemoryStore::with_snapshot(Snapshot::new(
            ProgressState { steps: 260, level: 1 },
            DailyWatermark::starting(day(3)),
        )));
        let coord = coordinator(store.clone(), Arc::new(FixedClock::new(day(3)))).await;
        let live = coord.current();
        assert_eq!(live.progress, ProgressState { steps: 10, level: 3 });
        assert!(!live.persisted);

        coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(0))
            .await
            .unwrap();
        assert_eq!(store.peek().unwrap().progress, ProgressState { steps: 10, level: 3 });
    }

    #[tokio::test]
    async fn consistent_saved_state_is_not_rewritten() {
        let saved = Snapshot::new(
            ProgressState { steps: 99, level: 1 },
            DailyWatermark::starting(day(3)),
        );
        let store = Arc::new(MemoryStore::with_snapshot(saved.clone()));
        let coord = coordinator(store.clone(), Arc::new(FixedClock::new(day(3)))).await;
        assert!(coord.current().persisted);

        coord
            .run_reconciliation(TriggerKind::Foreground, Reading::Cumulative(0))
            .await
            .unwrap();
        assert_eq!(store.peek().unwrap(), saved);
    }

    #[test]
    fn reduce_samples_sums_batch() {
        assert_eq!(reduce_samples(&[]).unwrap(), 0);
        assert_eq!(reduce_samples(&[sample(3), sample(4)]).unwrap(), 7);
        let err = reduce_samples(&[sample(i64::MAX), sample(i64::MAX), sample(7)]).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidInput { what: "sample overflowing batch total", value: 7 }
        ));
    }
}
