//! Session timer engine.
//!
//! This module provides the core engine functionality:
//! - State transitions (Idle → Running → Idle)
//! - Remaining time recomputed from the session's start anchor
//! - A per-session ticker task with `tokio::time::interval`
//! - Autonomous expiry when the planned duration elapses
//! - State and tick notifications to subscribers

use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Duration, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::types::{
    EngineConfig, EngineEvent, EngineState, IdleStopPolicy, SessionStatus, StateChange,
    TickPayload, TransitionReason,
};

use super::clock::{remaining_sec, Clock, ClockAnchor, SystemClock};
use super::error::EngineError;
use super::subscribers::{SubscriberId, SubscriberRegistry, Subscription};

// ============================================================================
// TickOutcome
// ============================================================================

/// Result of processing one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session is still running
    Continue {
        /// Remaining seconds reported in the tick
        remaining_sec: u64,
    },
    /// The session reached zero and the engine went idle
    Expired,
    /// The tick belongs to a session that is no longer running
    Stale,
}

// ============================================================================
// Engine internals
// ============================================================================

#[derive(Debug)]
struct ActiveSession {
    id: Uuid,
    planned_duration_sec: u64,
    anchor: ClockAnchor,
    /// Largest elapsed time observed so far; remaining time never grows back
    max_elapsed_ms: u64,
    ticker: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn observe_remaining(&mut self, clock: &dyn Clock) -> u64 {
        let elapsed_ms = self.anchor.elapsed_ms(clock);
        self.max_elapsed_ms = self.max_elapsed_ms.max(elapsed_ms);
        remaining_sec(self.planned_duration_sec, self.max_elapsed_ms)
    }

    /// Time left until remaining reaches zero, as observed now.
    fn until_expiry(&mut self, clock: &dyn Clock) -> Duration {
        self.observe_remaining(clock);
        let planned_ms = self.planned_duration_sec.saturating_mul(1000);
        Duration::from_millis(planned_ms.saturating_sub(self.max_elapsed_ms))
    }

    fn snapshot(&mut self, clock: &dyn Clock) -> EngineState {
        EngineState {
            status: SessionStatus::Running,
            session_id: Some(self.id.to_string()),
            planned_duration_sec: self.planned_duration_sec,
            start_ts_ms: Some(self.anchor.start_ts_ms),
            remaining_sec: self.observe_remaining(clock),
        }
    }
}

#[derive(Debug)]
struct EngineInner {
    session: Option<ActiveSession>,
    subscribers: SubscriberRegistry,
    default_duration_sec: u64,
}

impl EngineInner {
    fn snapshot(&mut self, clock: &dyn Clock) -> EngineState {
        match self.session.as_mut() {
            Some(session) => session.snapshot(clock),
            None => self.idle_state(),
        }
    }

    fn idle_state(&self) -> EngineState {
        EngineState::idle(self.default_duration_sec)
    }

    /// Detaches the current session. With `abort`, its ticker is cancelled;
    /// otherwise the ticker is expected to exit on its own.
    fn take_session(&mut self, abort: bool) -> Option<ActiveSession> {
        let mut session = self.session.take()?;
        if let Some(handle) = session.ticker.take() {
            if abort {
                handle.abort();
            }
        }
        Some(session)
    }

    fn publish_state(&mut self, state: EngineState, reason: TransitionReason) {
        let delivered = self
            .subscribers
            .publish(&EngineEvent::SessionState(StateChange { state, reason }));
        tracing::debug!(reason = reason.as_str(), delivered, "状態変更を通知しました");
    }

    fn handle_tick(&mut self, session_id: Uuid, clock: &dyn Clock) -> TickOutcome {
        let Some(session) = self.session.as_mut().filter(|s| s.id == session_id) else {
            tracing::debug!(%session_id, "終了済みセッションのティックを無視しました");
            return TickOutcome::Stale;
        };

        let remaining = session.observe_remaining(clock);
        self.subscribers
            .publish(&EngineEvent::SessionTick(TickPayload {
                session_id: session_id.to_string(),
                remaining_sec: remaining,
            }));
        tracing::debug!(%session_id, remaining_sec = remaining, "tick");

        if remaining > 0 {
            return TickOutcome::Continue {
                remaining_sec: remaining,
            };
        }

        // The ticker calling us is the one being retired; it returns on Expired.
        self.take_session(false);
        let state = self.idle_state();
        self.publish_state(state, TransitionReason::Expired);
        tracing::info!(%session_id, "セッションが終了しました（時間切れ）");

        TickOutcome::Expired
    }

    /// Time until `session_id` expires, or `None` if it is no longer running.
    fn until_expiry(&mut self, session_id: Uuid, clock: &dyn Clock) -> Option<Duration> {
        self.session
            .as_mut()
            .filter(|s| s.id == session_id)
            .map(|session| session.until_expiry(clock))
    }
}

// ============================================================================
// SessionEngine
// ============================================================================

/// Engine owning the session lifecycle.
///
/// All commands, subscriber changes and ticks are serialized by one async
/// mutex. Notifications are sent while that mutex is held, which keeps them
/// in transition order for every subscriber.
#[derive(Debug)]
pub struct SessionEngine {
    inner: Arc<Mutex<EngineInner>>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl SessionEngine {
    /// Creates an idle engine using the system clock.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates an idle engine with a custom clock.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let inner = EngineInner {
            session: None,
            subscribers: SubscriberRegistry::new(),
            default_duration_sec: config.default_duration_sec,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the current state with remaining time recomputed now.
    pub async fn get_state(&self) -> EngineState {
        self.inner.lock().await.snapshot(self.clock.as_ref())
    }

    /// Starts a new session.
    ///
    /// `planned_duration_sec` falls back to the configured default when
    /// absent.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidDuration`] if the duration is not positive
    /// - [`EngineError::AlreadyRunning`] if a session is running
    pub async fn start(
        &self,
        planned_duration_sec: Option<i64>,
    ) -> Result<EngineState, EngineError> {
        let planned_duration_sec = match planned_duration_sec {
            None => self.config.default_duration_sec,
            Some(seconds) if seconds > 0 => seconds as u64,
            Some(seconds) => return Err(EngineError::InvalidDuration(seconds)),
        };

        let mut inner = self.inner.lock().await;
        if inner.session.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let id = Uuid::new_v4();
        let anchor = ClockAnchor::capture(self.clock.as_ref());
        let ticker = tokio::spawn(run_ticker(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.clock),
            id,
            self.tick_period(),
            Duration::from_secs(planned_duration_sec),
        ));

        inner.session = Some(ActiveSession {
            id,
            planned_duration_sec,
            anchor,
            max_elapsed_ms: 0,
            ticker: Some(ticker),
        });

        let state = inner.snapshot(self.clock.as_ref());
        inner.publish_state(state.clone(), TransitionReason::Started);
        tracing::info!(
            session_id = %id,
            planned_duration_sec,
            "セッションを開始しました"
        );

        Ok(state)
    }

    /// Stops the running session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotRunning`] if no session is running and the
    /// idle-stop policy is [`IdleStopPolicy::Reject`].
    pub async fn stop(&self) -> Result<EngineState, EngineError> {
        let mut inner = self.inner.lock().await;

        let Some(session) = inner.take_session(true) else {
            return match self.config.stop_when_idle {
                IdleStopPolicy::Reject => Err(EngineError::NotRunning),
                IdleStopPolicy::Ignore => Ok(inner.idle_state()),
            };
        };

        let state = inner.idle_state();
        inner.publish_state(state.clone(), TransitionReason::Stopped);
        tracing::info!(session_id = %session.id, "セッションを停止しました");

        Ok(state)
    }

    /// Processes one tick for `session_id`.
    ///
    /// The ticker task calls this once per period. Ticks for a session that
    /// is no longer running are ignored and leave the state untouched.
    pub async fn tick(&self, session_id: Uuid) -> TickOutcome {
        self.inner
            .lock()
            .await
            .handle_tick(session_id, self.clock.as_ref())
    }

    /// Registers a new subscriber.
    pub async fn subscribe(&self) -> Subscription {
        self.inner.lock().await.subscribers.add()
    }

    /// Registers a new subscriber and returns the state it starts from.
    ///
    /// Both happen under one lock, so every event the subscription receives
    /// is newer than the returned snapshot.
    pub async fn subscribe_with_state(&self) -> (Subscription, EngineState) {
        let mut inner = self.inner.lock().await;
        let subscription = inner.subscribers.add();
        let state = inner.snapshot(self.clock.as_ref());
        (subscription, state)
    }

    /// Removes a subscriber. Returns false if it was not registered.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.lock().await.subscribers.remove(id)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    /// Cancels any running ticker and closes every subscription.
    ///
    /// The running session, if any, is discarded without a notification.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.take_session(true) {
            tracing::info!(session_id = %session.id, "シャットダウンによりセッションを破棄しました");
        }
        inner.subscribers.clear();
    }

    fn tick_period(&self) -> Duration {
        // interval_at panics on a zero period
        Duration::from_millis(self.config.tick_interval_ms.max(1))
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        // A ticker holding the lock right now exits on its next upgrade.
        if let Ok(mut inner) = self.inner.try_lock() {
            inner.take_session(true);
        }
    }
}

// ============================================================================
// Ticker
// ============================================================================

async fn run_ticker(
    inner: Weak<Mutex<EngineInner>>,
    clock: Arc<dyn Clock>,
    session_id: Uuid,
    period: Duration,
    until_expiry: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut deadline = Instant::now() + until_expiry;

    loop {
        // Wake on the next tick or at expiry, whichever comes first.
        tokio::select! {
            _ = ticker.tick() => {}
            _ = sleep_until(deadline) => {}
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };

        let mut guard = inner.lock().await;
        let outcome = guard.handle_tick(session_id, clock.as_ref());
        if !matches!(outcome, TickOutcome::Continue { .. }) {
            return;
        }
        match guard.until_expiry(session_id, clock.as_ref()) {
            Some(left) => deadline = Instant::now() + left,
            None => return,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::clock::MockClock;

    const T0: i64 = 1_700_000_000_000;

    /// Config whose ticker never fires during a test.
    fn manual_config() -> EngineConfig {
        EngineConfig::default().with_tick_interval_ms(60_000)
    }

    fn create_engine() -> SessionEngine {
        SessionEngine::new(EngineConfig::default())
    }

    fn create_mock_engine() -> (SessionEngine, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(T0));
        let engine = SessionEngine::with_clock(manual_config(), clock.clone());
        (engine, clock)
    }

    fn session_uuid(state: &EngineState) -> Uuid {
        Uuid::parse_str(state.session_id.as_deref().unwrap()).unwrap()
    }

    fn drain(subscription: &mut Subscription) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(event) = subscription.try_recv() {
            events.push(event);
        }
        events
    }

    fn reason_of(event: &EngineEvent) -> Option<TransitionReason> {
        match event {
            EngineEvent::SessionState(change) => Some(change.reason),
            EngineEvent::SessionTick(_) => None,
        }
    }

    // ------------------------------------------------------------------------
    // Command Tests
    // ------------------------------------------------------------------------

    mod command_tests {
        use super::*;

        #[tokio::test]
        async fn test_new_engine_is_idle() {
            let engine = create_engine();
            let state = engine.get_state().await;

            assert_eq!(state.status, SessionStatus::Idle);
            assert!(state.session_id.is_none());
            assert!(state.start_ts_ms.is_none());
            assert_eq!(state.remaining_sec, 0);
            assert_eq!(state.planned_duration_sec, 2700);
        }

        #[tokio::test]
        async fn test_start_with_default_duration() {
            let engine = create_engine();

            let started = engine.start(None).await.unwrap();
            let state = engine.get_state().await;

            assert_eq!(started.status, SessionStatus::Running);
            assert_eq!(state.status, SessionStatus::Running);
            assert_eq!(state.planned_duration_sec, 2700);
            assert_eq!(state.remaining_sec, 2700);
            assert!(state.session_id.is_some());
            assert!(state.start_ts_ms.is_some());
            assert_eq!(state.session_id, started.session_id);
        }

        #[tokio::test]
        async fn test_start_with_explicit_duration() {
            let engine = create_engine();

            engine.start(Some(1800)).await.unwrap();
            let state = engine.get_state().await;

            assert_eq!(state.status, SessionStatus::Running);
            assert_eq!(state.planned_duration_sec, 1800);
            assert_eq!(state.remaining_sec, 1800);
        }

        #[tokio::test]
        async fn test_start_uses_configured_default() {
            let engine =
                SessionEngine::new(EngineConfig::default().with_default_duration_sec(600));

            let state = engine.start(None).await.unwrap();
            assert_eq!(state.planned_duration_sec, 600);
            assert_eq!(engine.get_state().await.remaining_sec, 600);
        }

        #[tokio::test]
        async fn test_start_records_wall_clock_start() {
            let (engine, _clock) = create_mock_engine();

            let state = engine.start(Some(60)).await.unwrap();
            assert_eq!(state.start_ts_ms, Some(T0));
        }

        #[tokio::test]
        async fn test_start_rejects_non_positive_duration() {
            let engine = create_engine();
            let mut sub = engine.subscribe().await;

            for invalid in [0, -1, i64::MIN] {
                let result = engine.start(Some(invalid)).await;
                assert_eq!(result, Err(EngineError::InvalidDuration(invalid)));
            }

            assert_eq!(engine.get_state().await.status, SessionStatus::Idle);
            assert!(drain(&mut sub).is_empty());
        }

        #[tokio::test]
        async fn test_start_twice_rejected_with_state_unchanged() {
            let engine = create_engine();
            let mut sub = engine.subscribe().await;

            let first = engine.start(Some(300)).await.unwrap();
            let _ = drain(&mut sub);

            assert_eq!(engine.start(None).await, Err(EngineError::AlreadyRunning));
            let between = engine.get_state().await;
            assert_eq!(engine.start(Some(10)).await, Err(EngineError::AlreadyRunning));
            let after = engine.get_state().await;

            assert_eq!(between.session_id, first.session_id);
            assert_eq!(after.session_id, first.session_id);
            assert_eq!(after.planned_duration_sec, 300);
            assert!(drain(&mut sub).is_empty());
        }

        #[tokio::test]
        async fn test_invalid_duration_checked_before_running_state() {
            let engine = create_engine();
            engine.start(None).await.unwrap();

            assert_eq!(
                engine.start(Some(0)).await,
                Err(EngineError::InvalidDuration(0))
            );
        }

        #[tokio::test]
        async fn test_stop_running_session() {
            let engine = create_engine();
            engine.start(None).await.unwrap();

            let state = engine.stop().await.unwrap();

            assert_eq!(state.status, SessionStatus::Idle);
            assert!(state.session_id.is_none());
            assert!(state.start_ts_ms.is_none());
            assert_eq!(state.remaining_sec, 0);
            assert_eq!(engine.get_state().await, state);
        }

        #[tokio::test]
        async fn test_stop_while_idle_rejected() {
            let engine = create_engine();
            let mut sub = engine.subscribe().await;

            assert_eq!(engine.stop().await, Err(EngineError::NotRunning));
            assert_eq!(engine.get_state().await.status, SessionStatus::Idle);
            assert!(drain(&mut sub).is_empty());
        }

        #[tokio::test]
        async fn test_stop_while_idle_ignored_by_policy() {
            let engine = SessionEngine::new(
                EngineConfig::default().with_stop_when_idle(IdleStopPolicy::Ignore),
            );
            let mut sub = engine.subscribe().await;

            let state = engine.stop().await.unwrap();

            assert_eq!(state.status, SessionStatus::Idle);
            assert!(drain(&mut sub).is_empty());
        }

        #[tokio::test]
        async fn test_restart_gets_new_session_id() {
            let engine = create_engine();

            let first = engine.start(None).await.unwrap();
            engine.stop().await.unwrap();
            let second = engine.start(None).await.unwrap();

            assert_ne!(first.session_id, second.session_id);
        }
    }

    // ------------------------------------------------------------------------
    // Remaining Time Tests
    // ------------------------------------------------------------------------

    mod remaining_time_tests {
        use super::*;

        #[tokio::test]
        async fn test_remaining_decreases_by_whole_seconds() {
            let (engine, clock) = create_mock_engine();
            engine.start(Some(100)).await.unwrap();

            clock.advance(Duration::from_millis(999));
            assert_eq!(engine.get_state().await.remaining_sec, 100);

            clock.advance(Duration::from_millis(1));
            assert_eq!(engine.get_state().await.remaining_sec, 99);

            // 3.5 s in total
            clock.advance(Duration::from_millis(2500));
            assert_eq!(engine.get_state().await.remaining_sec, 97);

            clock.advance(Duration::from_millis(500));
            assert_eq!(engine.get_state().await.remaining_sec, 96);
        }

        #[tokio::test]
        async fn test_suspension_is_counted() {
            let (engine, clock) = create_mock_engine();
            engine.start(Some(3600)).await.unwrap();

            clock.suspend(Duration::from_secs(1200));

            assert_eq!(engine.get_state().await.remaining_sec, 2400);
        }

        #[tokio::test]
        async fn test_backward_clock_step_never_increases_remaining() {
            let (engine, clock) = create_mock_engine();
            engine.start(Some(600)).await.unwrap();

            clock.set_wall_ms(T0 + 120_000);
            assert_eq!(engine.get_state().await.remaining_sec, 480);

            clock.set_wall_ms(T0 + 5_000);
            assert_eq!(engine.get_state().await.remaining_sec, 480);

            clock.advance(Duration::from_secs(10));
            assert_eq!(engine.get_state().await.remaining_sec, 480);
        }

        #[tokio::test]
        async fn test_remaining_saturates_at_zero_before_expiry_tick() {
            let (engine, clock) = create_mock_engine();
            engine.start(Some(5)).await.unwrap();

            clock.advance(Duration::from_secs(30));

            let state = engine.get_state().await;
            assert_eq!(state.status, SessionStatus::Running);
            assert_eq!(state.remaining_sec, 0);
        }
    }

    // ------------------------------------------------------------------------
    // Tick Tests
    // ------------------------------------------------------------------------

    mod tick_tests {
        use super::*;

        #[tokio::test]
        async fn test_tick_reports_remaining() {
            let (engine, clock) = create_mock_engine();
            let mut sub = engine.subscribe().await;
            let state = engine.start(Some(10)).await.unwrap();
            let id = session_uuid(&state);
            let _ = drain(&mut sub);

            clock.advance(Duration::from_secs(3));
            let outcome = engine.tick(id).await;

            assert_eq!(outcome, TickOutcome::Continue { remaining_sec: 7 });
            assert_eq!(
                drain(&mut sub),
                vec![EngineEvent::SessionTick(TickPayload {
                    session_id: id.to_string(),
                    remaining_sec: 7,
                })]
            );
        }

        #[tokio::test]
        async fn test_tick_at_zero_expires_session() {
            let (engine, clock) = create_mock_engine();
            let mut sub = engine.subscribe().await;
            let id = session_uuid(&engine.start(Some(2)).await.unwrap());
            let _ = drain(&mut sub);

            clock.advance(Duration::from_secs(2));
            assert_eq!(engine.tick(id).await, TickOutcome::Expired);

            let events = drain(&mut sub);
            assert_eq!(events.len(), 2);
            assert_eq!(
                events[0],
                EngineEvent::SessionTick(TickPayload {
                    session_id: id.to_string(),
                    remaining_sec: 0,
                })
            );
            match &events[1] {
                EngineEvent::SessionState(change) => {
                    assert_eq!(change.reason, TransitionReason::Expired);
                    assert_eq!(change.state.status, SessionStatus::Idle);
                    assert!(change.state.session_id.is_none());
                }
                other => panic!("Expected state event, got {:?}", other),
            }

            let state = engine.get_state().await;
            assert_eq!(state.status, SessionStatus::Idle);
            assert!(state.session_id.is_none());
        }

        #[tokio::test]
        async fn test_in_flight_tick_after_stop_is_stale() {
            let (engine, clock) = create_mock_engine();
            let mut sub = engine.subscribe().await;
            let id = session_uuid(&engine.start(Some(60)).await.unwrap());
            engine.stop().await.unwrap();
            let _ = drain(&mut sub);

            clock.advance(Duration::from_secs(60));
            assert_eq!(engine.tick(id).await, TickOutcome::Stale);

            assert_eq!(engine.get_state().await.status, SessionStatus::Idle);
            assert!(drain(&mut sub).is_empty());
        }

        #[tokio::test]
        async fn test_old_session_tick_does_not_touch_new_session() {
            let (engine, clock) = create_mock_engine();
            let old_id = session_uuid(&engine.start(Some(5)).await.unwrap());
            engine.stop().await.unwrap();
            let new_state = engine.start(Some(30)).await.unwrap();
            let mut sub = engine.subscribe().await;

            clock.advance(Duration::from_secs(10));
            assert_eq!(engine.tick(old_id).await, TickOutcome::Stale);

            let state = engine.get_state().await;
            assert_eq!(state.session_id, new_state.session_id);
            assert_eq!(state.remaining_sec, 20);
            assert!(drain(&mut sub).is_empty());
        }

        #[tokio::test]
        async fn test_tick_after_expiry_is_stale() {
            let (engine, clock) = create_mock_engine();
            let id = session_uuid(&engine.start(Some(1)).await.unwrap());

            clock.advance(Duration::from_secs(1));
            assert_eq!(engine.tick(id).await, TickOutcome::Expired);
            assert_eq!(engine.tick(id).await, TickOutcome::Stale);
        }
    }

    // ------------------------------------------------------------------------
    // Subscription Tests
    // ------------------------------------------------------------------------

    mod subscription_tests {
        use super::*;

        #[tokio::test]
        async fn test_start_and_stop_events_in_order() {
            let engine = create_engine();
            let mut sub = engine.subscribe().await;

            let started = engine.start(Some(120)).await.unwrap();
            engine.stop().await.unwrap();

            let events = drain(&mut sub);
            assert_eq!(events.len(), 2);
            match &events[0] {
                EngineEvent::SessionState(change) => {
                    assert_eq!(change.reason, TransitionReason::Started);
                    assert_eq!(change.state, started);
                }
                other => panic!("Expected state event, got {:?}", other),
            }
            assert_eq!(reason_of(&events[1]), Some(TransitionReason::Stopped));
        }

        #[tokio::test]
        async fn test_every_subscriber_sees_same_events() {
            let engine = create_engine();
            let mut a = engine.subscribe().await;
            let mut b = engine.subscribe().await;

            engine.start(None).await.unwrap();
            engine.stop().await.unwrap();

            assert_eq!(drain(&mut a), drain(&mut b));
            assert_eq!(engine.subscriber_count().await, 2);
        }

        #[tokio::test]
        async fn test_unsubscribed_observer_gets_nothing() {
            let engine = create_engine();
            let mut a = engine.subscribe().await;

            assert!(engine.unsubscribe(a.id()).await);
            engine.start(None).await.unwrap();

            assert!(drain(&mut a).is_empty());
            assert!(a.recv().await.is_none());
            assert!(!engine.unsubscribe(a.id()).await);
            assert_eq!(engine.subscriber_count().await, 0);
        }

        #[tokio::test]
        async fn test_subscribe_with_state_starts_from_snapshot() {
            let engine = create_engine();
            let started = engine.start(Some(120)).await.unwrap();

            let (mut sub, state) = engine.subscribe_with_state().await;

            assert_eq!(state.session_id, started.session_id);
            assert!(state.is_running());
            assert!(drain(&mut sub).is_empty());

            engine.stop().await.unwrap();
            let events = drain(&mut sub);
            assert_eq!(events.len(), 1);
            assert_eq!(reason_of(&events[0]), Some(TransitionReason::Stopped));
        }

        #[tokio::test]
        async fn test_shutdown_closes_subscriptions() {
            let engine = create_engine();
            let mut sub = engine.subscribe().await;
            engine.start(None).await.unwrap();

            engine.shutdown().await;

            assert_eq!(reason_of(&sub.recv().await.unwrap()), Some(TransitionReason::Started));
            assert!(sub.recv().await.is_none());
            assert_eq!(engine.get_state().await.status, SessionStatus::Idle);
        }
    }

    // ------------------------------------------------------------------------
    // Ticker Tests (paused tokio clock)
    // ------------------------------------------------------------------------

    mod ticker_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_ticker_counts_down_and_expires() {
            let engine = create_engine();
            let mut sub = engine.subscribe().await;
            let state = engine.start(Some(3)).await.unwrap();
            let id = state.session_id.clone().unwrap();

            tokio::time::sleep(Duration::from_millis(3500)).await;

            let events = drain(&mut sub);
            assert_eq!(reason_of(&events[0]), Some(TransitionReason::Started));

            let ticks: Vec<u64> = events
                .iter()
                .filter_map(|event| match event {
                    EngineEvent::SessionTick(tick) => {
                        assert_eq!(tick.session_id, id);
                        Some(tick.remaining_sec)
                    }
                    EngineEvent::SessionState(_) => None,
                })
                .collect();
            assert_eq!(ticks, vec![2, 1, 0]);

            let last = events.last().unwrap();
            assert_eq!(reason_of(last), Some(TransitionReason::Expired));

            let state = engine.get_state().await;
            assert_eq!(state.status, SessionStatus::Idle);
            assert!(state.session_id.is_none());
        }

        #[tokio::test(start_paused = true)]
        async fn test_one_second_session_expires_without_stop() {
            let engine = create_engine();
            engine.start(Some(1)).await.unwrap();

            tokio::time::sleep(Duration::from_millis(1500)).await;

            let state = engine.get_state().await;
            assert_eq!(state.status, SessionStatus::Idle);
            assert!(state.session_id.is_none());
        }

        #[tokio::test(start_paused = true)]
        async fn test_no_events_after_expiry() {
            let engine = create_engine();
            let mut sub = engine.subscribe().await;
            engine.start(Some(1)).await.unwrap();

            tokio::time::sleep(Duration::from_millis(1500)).await;
            let _ = drain(&mut sub);

            tokio::time::sleep(Duration::from_secs(5)).await;
            assert!(drain(&mut sub).is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_stop_cancels_ticker() {
            let engine = create_engine();
            let mut sub = engine.subscribe().await;
            engine.start(Some(60)).await.unwrap();

            tokio::time::sleep(Duration::from_millis(1500)).await;
            engine.stop().await.unwrap();
            let events = drain(&mut sub);
            assert_eq!(
                reason_of(events.last().unwrap()),
                Some(TransitionReason::Stopped)
            );

            tokio::time::sleep(Duration::from_secs(5)).await;
            assert!(drain(&mut sub).is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_get_state_tracks_elapsed_time() {
            let engine = create_engine();
            engine.start(Some(100)).await.unwrap();

            tokio::time::sleep(Duration::from_millis(2100)).await;
            let first = engine.get_state().await.remaining_sec;
            tokio::time::sleep(Duration::from_secs(3)).await;
            let second = engine.get_state().await.remaining_sec;

            assert_eq!(first, 98);
            assert_eq!(second, 95);
        }

        #[tokio::test(start_paused = true)]
        async fn test_custom_tick_interval() {
            let engine =
                SessionEngine::new(EngineConfig::default().with_tick_interval_ms(250));
            let mut sub = engine.subscribe().await;
            engine.start(Some(60)).await.unwrap();
            let _ = drain(&mut sub);

            tokio::time::sleep(Duration::from_millis(1100)).await;

            let ticks = drain(&mut sub)
                .into_iter()
                .filter(|event| matches!(event, EngineEvent::SessionTick(_)))
                .count();
            assert_eq!(ticks, 4);
        }

        #[tokio::test(start_paused = true)]
        async fn test_expiry_does_not_wait_for_coarse_tick() {
            let engine =
                SessionEngine::new(EngineConfig::default().with_tick_interval_ms(60_000));
            let mut sub = engine.subscribe().await;
            let state = engine.start(Some(1)).await.unwrap();
            let id = state.session_id.clone().unwrap();

            tokio::time::sleep(Duration::from_millis(1001)).await;

            let state = engine.get_state().await;
            assert_eq!(state.status, SessionStatus::Idle);

            let events = drain(&mut sub);
            assert_eq!(events.len(), 3);
            assert_eq!(reason_of(&events[0]), Some(TransitionReason::Started));
            assert_eq!(
                events[1],
                EngineEvent::SessionTick(TickPayload {
                    session_id: id,
                    remaining_sec: 0,
                })
            );
            assert_eq!(reason_of(&events[2]), Some(TransitionReason::Expired));
        }

        #[tokio::test(start_paused = true)]
        async fn test_expiry_between_coarse_ticks() {
            let engine =
                SessionEngine::new(EngineConfig::default().with_tick_interval_ms(60_000));
            let mut sub = engine.subscribe().await;
            engine.start(Some(90)).await.unwrap();

            tokio::time::sleep(Duration::from_secs(61)).await;
            assert_eq!(engine.get_state().await.remaining_sec, 29);

            tokio::time::sleep(Duration::from_secs(30)).await;
            assert_eq!(engine.get_state().await.status, SessionStatus::Idle);

            let ticks: Vec<u64> = drain(&mut sub)
                .iter()
                .filter_map(|event| match event {
                    EngineEvent::SessionTick(tick) => Some(tick.remaining_sec),
                    EngineEvent::SessionState(_) => None,
                })
                .collect();
            assert_eq!(ticks, vec![30, 0]);
        }
    }

    // ------------------------------------------------------------------------
    // Concurrency Tests
    // ------------------------------------------------------------------------

    mod concurrency_tests {
        use super::*;

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_starts_admit_exactly_one() {
            let engine = Arc::new(create_engine());
            let mut sub = engine.subscribe().await;

            let handles: Vec<_> = (0..64)
                .map(|_| {
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move { engine.start(Some(600)).await })
                })
                .collect();

            let mut started = Vec::new();
            let mut rejected = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(state) => started.push(state),
                    Err(EngineError::AlreadyRunning) => rejected += 1,
                    Err(other) => panic!("Unexpected error: {:?}", other),
                }
            }

            assert_eq!(started.len(), 1);
            assert_eq!(rejected, 63);
            assert_eq!(
                engine.get_state().await.session_id,
                started[0].session_id
            );

            let transitions: Vec<_> = drain(&mut sub).iter().filter_map(reason_of).collect();
            assert_eq!(transitions, vec![TransitionReason::Started]);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_interleaved_start_stop_keeps_transitions_alternating() {
            let engine = Arc::new(create_engine());
            let mut sub = engine.subscribe().await;

            let handles: Vec<_> = (0..64)
                .map(|i| {
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        if i % 2 == 0 {
                            engine.start(Some(600)).await.is_ok()
                        } else {
                            engine.stop().await.is_ok()
                        }
                    })
                })
                .collect();

            let mut accepted = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    accepted += 1;
                }
            }

            let transitions: Vec<_> = drain(&mut sub).iter().filter_map(reason_of).collect();
            assert_eq!(transitions.len(), accepted);
            for (i, reason) in transitions.iter().enumerate() {
                let expected = if i % 2 == 0 {
                    TransitionReason::Started
                } else {
                    TransitionReason::Stopped
                };
                assert_eq!(*reason, expected);
            }

            let running = transitions.len() % 2 == 1;
            assert_eq!(engine.get_state().await.is_running(), running);
        }
    }
}
