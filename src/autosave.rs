//! Debounced autosave
//!
//! [`AutoSaveScheduler`] turns edit notifications into persist calls. Each
//! [`mark_dirty`](AutoSaveScheduler::mark_dirty) restarts a debounce timer;
//! when it expires the session is flushed through the
//! [`PersistenceCoordinator`]. A periodic fallback timer flushes a dirty
//! session in case a debounce was lost. At most one autosave runs at a time;
//! a flush requested meanwhile is queued and replayed once the running one
//! finishes.

use crate::error::{Result, SessyncError};
use crate::naming::derive_conversation_name;
use crate::persistence::{PersistRequest, PersistenceCoordinator};
use crate::session::SessionHandle;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Quiet period after the last edit before saving
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1800);

/// Period of the fallback flush
pub const DEFAULT_FALLBACK_INTERVAL: Duration = Duration::from_secs(60);

type SaveOutcome = std::result::Result<(), Arc<anyhow::Error>>;
type SaveFlight = Shared<BoxFuture<'static, SaveOutcome>>;

/// Timing and policy of the scheduler
#[derive(Debug, Clone)]
pub struct AutoSaveOptions {
    pub debounce: Duration,
    pub fallback_interval: Duration,
    /// Whether the owning assistant saves automatically
    pub auto_save_enabled: bool,
}

impl Default for AutoSaveOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            fallback_interval: DEFAULT_FALLBACK_INTERVAL,
            auto_save_enabled: true,
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    debounce_timer: Option<JoinHandle<()>>,
    fallback_timer: Option<JoinHandle<()>>,
    in_flight: Option<SaveFlight>,
    queued: bool,
}

struct SchedulerInner {
    coordinator: PersistenceCoordinator,
    options: AutoSaveOptions,
    state: Mutex<SchedulerState>,
}

enum FlushStep {
    Wait(SaveFlight),
    Run(SaveFlight),
    Skip,
}

/// Debounce and fallback timers around one coordinator
#[derive(Clone)]
pub struct AutoSaveScheduler {
    inner: Arc<SchedulerInner>,
}

impl AutoSaveScheduler {
    /// Create a scheduler; no timer runs until the first edit
    pub fn new(coordinator: PersistenceCoordinator, options: AutoSaveOptions) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                coordinator,
                options,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Coordinator the scheduler writes through
    pub fn coordinator(&self) -> &PersistenceCoordinator {
        &self.inner.coordinator
    }

    /// Record an edit and schedule a save
    ///
    /// Ignored until the session is initialized. The first user message of a
    /// session that has neither an id nor a name is saved right away.
    pub fn mark_dirty(&self) {
        let session = self.inner.session();
        if !session.is_initialized() {
            return;
        }
        session.set_dirty(true);

        let first_save = session.conversation_id().is_empty()
            && session.conversation_name().trim().is_empty()
            && session.has_user_message();
        if first_save {
            tracing::debug!("First user message, saving immediately");
            self.schedule_auto_save(true, true);
        } else {
            self.schedule_auto_save(false, false);
        }
    }

    /// Cancel the pending debounce and either flush now or re-arm it
    pub fn schedule_auto_save(&self, immediate: bool, force: bool) {
        let mut state = self.inner.lock_state();
        if let Some(timer) = state.debounce_timer.take() {
            timer.abort();
        }

        let weak = Arc::downgrade(&self.inner);
        if immediate {
            drop(state);
            tokio::spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.flush_in_background(force).await;
                }
            });
        } else {
            let delay = self.inner.options.debounce;
            state.debounce_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    inner.flush_in_background(false).await;
                }
            }));
        }
    }

    /// Save now if forced or dirty
    ///
    /// A flush requested while another one runs is queued; a forced one also
    /// waits for the running save and flushes again if still dirty.
    ///
    /// # Errors
    ///
    /// Returns the error of the save this call ran or waited on.
    pub async fn flush_auto_save(&self, force: bool) -> Result<()> {
        self.inner.flush(force).await
    }

    /// Start the periodic fallback flush, replacing a running one
    pub fn start_fallback(&self) {
        let period = self.inner.options.fallback_interval;
        let weak = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.session().is_dirty() {
                    tracing::debug!("Fallback autosave");
                    inner.flush_in_background(false).await;
                }
            }
        });

        if let Some(previous) = self.inner.lock_state().fallback_timer.replace(timer) {
            previous.abort();
        }
    }

    /// Cancel both timers without flushing
    pub fn stop_auto_save(&self) {
        let mut state = self.inner.lock_state();
        for timer in [state.debounce_timer.take(), state.fallback_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
    }

    /// Whether a save is running
    pub fn is_in_flight(&self) -> bool {
        self.inner.lock_state().in_flight.is_some()
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|p| p.into_inner());
        for timer in [state.debounce_timer.take(), state.fallback_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session(&self) -> &SessionHandle {
        self.coordinator.session()
    }

    fn should_save(&self, force: bool) -> bool {
        let session = self.session();
        if !force && (session.is_loading() || !session.is_dirty()) {
            return false;
        }

        let has_id = !session.conversation_id().is_empty();
        let has_name = !session.conversation_name().trim().is_empty();
        let has_user_message = session.has_user_message();
        if !has_name && !has_user_message {
            tracing::debug!("Nothing to save yet");
            return false;
        }
        if !self.options.auto_save_enabled {
            let first_creation = !has_id && !has_name && has_user_message;
            if !has_id && !first_creation {
                tracing::debug!("Autosave disabled for {}", session.assistant_code());
                return false;
            }
        }
        true
    }

    async fn flush_in_background(self: Arc<Self>, force: bool) {
        if let Err(e) = self.flush(force).await {
            tracing::error!("Autosave failed: {:#}", e);
        }
    }

    fn flush(self: &Arc<Self>, force: bool) -> BoxFuture<'static, Result<()>> {
        let inner = Arc::clone(self);
        async move {
            let step = {
                let mut state = inner.lock_state();
                match state.in_flight.clone() {
                    Some(current) => {
                        state.queued = true;
                        FlushStep::Wait(current)
                    }
                    None if inner.should_save(force) => {
                        let flight = inner.start_save();
                        state.in_flight = Some(flight.clone());
                        FlushStep::Run(flight)
                    }
                    None => FlushStep::Skip,
                }
            };

            match step {
                FlushStep::Skip => Ok(()),
                FlushStep::Run(flight) => flight.await.map_err(shared_error),
                FlushStep::Wait(current) => {
                    if !force {
                        tracing::debug!("Autosave in flight, flush queued");
                        return Ok(());
                    }
                    let outcome = current.await;
                    if inner.session().is_dirty() {
                        inner.flush(true).await
                    } else {
                        outcome.map_err(shared_error)
                    }
                }
            }
        }
        .boxed()
    }

    fn start_save(self: &Arc<Self>) -> SaveFlight {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = inner.save_once().await.map_err(Arc::new);

            let drain = {
                let mut state = inner.lock_state();
                state.in_flight = None;
                std::mem::take(&mut state.queued)
            };
            if drain && inner.session().is_dirty() {
                tracing::debug!("Replaying queued autosave");
                let weak: Weak<SchedulerInner> = Arc::downgrade(&inner);
                tokio::spawn(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.flush_in_background(false).await;
                    }
                });
            }
            outcome
        });

        async move {
            task.await
                .unwrap_or_else(|join_error| Err(Arc::new(anyhow::Error::new(join_error))))
        }
        .boxed()
        .shared()
    }

    async fn save_once(&self) -> Result<()> {
        let session = self.session();
        let mut request = PersistRequest::new();

        if session.conversation_name().trim().is_empty() {
            if let Some(first) = session.first_user_message() {
                let name = derive_conversation_name(
                    &first,
                    &session.assistant_code(),
                    &chrono::Local::now(),
                );
                tracing::debug!("Derived conversation name {}", name);
                session.set_conversation_name(name.as_str());
                request = request.with_conversation_name(name);
            }
        }

        let outcome = self.coordinator.persist(request).await?;
        if outcome.skipped {
            tracing::debug!("Autosave skipped, nothing changed");
        }
        Ok(())
    }
}

fn shared_error(e: Arc<anyhow::Error>) -> anyhow::Error {
    SessyncError::from_shared(&e).into()
}
