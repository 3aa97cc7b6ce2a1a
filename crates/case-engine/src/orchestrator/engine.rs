//! Engine assembly and background task lifecycle

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::agent::{AgentSessionManager, InactivitySweeper, SweepReport};
use crate::cases::CaseManager;
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, MatchingMode, TelephonyProvider};
use crate::context::EngineContext;
use crate::database::SqliteStore;
use crate::error::{CaseEngineError, Result};
use crate::events::{Broadcaster, ChannelBroadcaster, EventBus, EventDispatcher};
use crate::locks::LockRegistry;
use crate::queue::{CaseQueueManager, CaseScheduleManager, DueCasesReport};
use crate::routing::{CaseAssignmentMatcher, MatchingPassRunner, MatchingReport};
use crate::store::{MemoryStore, Store};
use crate::telephony::{
    TelephonyCommandDispatcher, TelephonyCommandService, TelephonySessionRecorder, TracingCommandDispatcher,
};
use crate::types::CaseId;

use super::listeners::{AgentConnectListener, CaseLifecycleListener, MatchingTrigger};

/// The assembled case engine
///
/// Owns every manager plus the background tasks started by
/// [`ServiceCenterEngine::start`]: the domain event pump, the matching pass
/// runner (background mode only) and the two periodic sweeps.
pub struct ServiceCenterEngine {
    config: EngineConfig,
    ctx: EngineContext,
    cases: Arc<CaseManager>,
    sessions: Arc<AgentSessionManager>,
    queue: Arc<CaseQueueManager>,
    schedule: Arc<CaseScheduleManager>,
    matcher: Arc<CaseAssignmentMatcher>,
    runner: Option<Arc<MatchingPassRunner>>,
    sweeper: Arc<InactivitySweeper>,
    telephony: Arc<TelephonyCommandService>,
    recorder: Arc<TelephonySessionRecorder>,
    shutdown: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl ServiceCenterEngine {
    pub fn builder() -> ServiceCenterEngineBuilder {
        ServiceCenterEngineBuilder::new()
    }

    /// Start background processing
    ///
    /// Open cases left unqueued by an earlier run are requeued first.
    pub async fn start(&mut self) -> Result<()> {
        if self.shutdown.is_some() {
            warn!("⚠️ Service center engine already started");
            return Ok(());
        }

        info!("🚀 Starting service center engine (matching mode: {:?})", self.config.matching.mode);

        let requeued = self.queue.requeue_orphaned_cases().await?;
        if !requeued.is_empty() {
            info!("📋 Requeued {} orphaned case(s)", requeued.len());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.handles.push(self.ctx.events.dispatcher().spawn_pump(shutdown_rx.clone()));

        if let Some(runner) = &self.runner {
            self.handles.push(runner.spawn(shutdown_rx.clone()));
        }

        if let Some(period) = self.config.inactivity_sweep_interval() {
            let sweeper = Arc::clone(&self.sweeper);
            self.handles.push(spawn_periodic(
                "Inactivity sweep",
                period,
                shutdown_rx.clone(),
                move || {
                    let sweeper = Arc::clone(&sweeper);
                    async move {
                        if let Err(e) = sweeper.logout_inactive_sessions().await {
                            error!("❌ Inactivity sweep failed: {}", e);
                        }
                    }
                },
            ));
        }

        if let Some(period) = self.config.due_case_sweep_interval() {
            let schedule = Arc::clone(&self.schedule);
            self.handles.push(spawn_periodic(
                "Due case sweep",
                period,
                shutdown_rx.clone(),
                move || {
                    let schedule = Arc::clone(&schedule);
                    async move {
                        if let Err(e) = schedule.queue_due_cases().await {
                            error!("❌ Due case sweep failed: {}", e);
                        }
                    }
                },
            ));
        }

        self.shutdown = Some(shutdown_tx);
        info!("✅ Service center engine started ({} background task(s))", self.handles.len());
        Ok(())
    }

    /// Stop background processing and wait for the tasks to finish
    pub async fn stop(&mut self) -> Result<()> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };

        info!("🛑 Stopping service center engine...");
        let _ = shutdown.send(true);

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("⚠️ Background task ended abnormally: {}", e);
            }
        }

        let delivered = self.ctx.events.dispatcher().dispatch_pending().await;
        if delivered > 0 {
            debug!("Delivered {} pending domain event(s) during shutdown", delivered);
        }

        info!("✅ Service center engine stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Run one matching pass now
    pub async fn process_case_queue(&self) -> Result<MatchingReport> {
        self.matcher.assign_cases_to_agents().await
    }

    pub async fn logout_inactive_sessions(&self) -> Result<SweepReport> {
        self.sweeper.logout_inactive_sessions().await
    }

    pub async fn queue_due_cases(&self) -> Result<DueCasesReport> {
        self.schedule.queue_due_cases().await
    }

    pub async fn requeue_orphaned_cases(&self) -> Result<Vec<CaseId>> {
        self.queue.requeue_orphaned_cases().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn cases(&self) -> &Arc<CaseManager> {
        &self.cases
    }

    pub fn sessions(&self) -> &Arc<AgentSessionManager> {
        &self.sessions
    }

    pub fn queue(&self) -> &Arc<CaseQueueManager> {
        &self.queue
    }

    pub fn schedule(&self) -> &Arc<CaseScheduleManager> {
        &self.schedule
    }

    pub fn matcher(&self) -> &Arc<CaseAssignmentMatcher> {
        &self.matcher
    }

    pub fn telephony(&self) -> &Arc<TelephonyCommandService> {
        &self.telephony
    }

    pub fn recorder(&self) -> &Arc<TelephonySessionRecorder> {
        &self.recorder
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        self.ctx.events.dispatcher()
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!("⏰ {} running every {:?}", name, period);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => tick().await,
            }
        }
        info!("🛑 {} stopped", name);
    })
}

/// Builder for [`ServiceCenterEngine`]
///
/// Without an explicit store the engine opens the SQLite database named in
/// the configuration.
pub struct ServiceCenterEngineBuilder {
    config: Option<EngineConfig>,
    store: Option<Arc<dyn Store>>,
    clock: Option<Arc<dyn Clock>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    command_dispatcher: Option<Arc<dyn TelephonyCommandDispatcher>>,
}

impl ServiceCenterEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            clock: None,
            broadcaster: None,
            command_dispatcher: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Keep all state in process memory
    pub fn with_in_memory_store(mut self) -> Self {
        self.store = Some(Arc::new(MemoryStore::new()));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_command_dispatcher(mut self, dispatcher: Arc<dyn TelephonyCommandDispatcher>) -> Self {
        self.command_dispatcher = Some(dispatcher);
        self
    }

    pub async fn build(self) -> Result<ServiceCenterEngine> {
        let config = self.config.unwrap_or_default();
        config.validate().map_err(CaseEngineError::configuration)?;

        let store: Arc<dyn Store> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::connect(&config.database).await?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let broadcaster = self
            .broadcaster
            .unwrap_or_else(|| Arc::new(ChannelBroadcaster::default()));
        let command_dispatcher = self.command_dispatcher.unwrap_or_else(|| match config.telephony.provider {
            TelephonyProvider::Tracing => Arc::new(TracingCommandDispatcher),
        });

        let dispatcher = Arc::new(EventDispatcher::new());
        let ctx = EngineContext::new(
            store,
            LockRegistry::new(),
            EventBus::new(Arc::clone(&dispatcher), broadcaster),
            clock,
        );

        let cases = Arc::new(CaseManager::new(ctx.clone()));
        let sessions = Arc::new(AgentSessionManager::new(ctx.clone()));
        let queue = Arc::new(CaseQueueManager::new(ctx.clone()));
        let schedule = Arc::new(CaseScheduleManager::new(ctx.clone()));
        let matcher = Arc::new(CaseAssignmentMatcher::new(
            ctx.clone(),
            Arc::clone(&queue),
            Arc::clone(&sessions),
        ));
        let telephony = Arc::new(TelephonyCommandService::new(ctx.clone(), command_dispatcher));
        let recorder = Arc::new(TelephonySessionRecorder::new(ctx.clone(), Arc::clone(&sessions)));
        let sweeper = Arc::new(InactivitySweeper::new(
            Arc::clone(&sessions),
            Arc::clone(&ctx.clock),
            config.session_lifetime(),
        ));

        let (trigger, runner) = match config.matching.mode {
            MatchingMode::Inline => (MatchingTrigger::Inline(Arc::clone(&matcher)), None),
            MatchingMode::Background => {
                let runner = Arc::new(MatchingPassRunner::new(Arc::clone(&matcher), config.matching_debounce()));
                (MatchingTrigger::Background(Arc::clone(&runner)), Some(runner))
            }
        };

        // Lifecycle first so a created case is queued before matching runs
        dispatcher.register(Arc::new(CaseLifecycleListener::new(ctx.clone(), Arc::clone(&queue))));
        dispatcher.register(Arc::new(trigger));
        dispatcher.register(Arc::new(AgentConnectListener::new(ctx.clone(), Arc::clone(&telephony))));

        info!(
            "✅ Service center engine assembled with {} domain event listener(s)",
            dispatcher.listener_count()
        );

        Ok(ServiceCenterEngine {
            config,
            ctx,
            cases,
            sessions,
            queue,
            schedule,
            matcher,
            runner,
            sweeper,
            telephony,
            recorder,
            shutdown: None,
            handles: Vec::new(),
        })
    }
}

impl Default for ServiceCenterEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Case, CaseType, NewCase};

    #[tokio::test]
    async fn test_start_and_stop_with_background_matching() {
        let mut config = EngineConfig::default();
        config.matching.mode = MatchingMode::Background;
        config.matching.debounce_ms = 0;

        let mut engine = ServiceCenterEngine::builder()
            .with_config(config)
            .with_in_memory_store()
            .build()
            .await
            .unwrap();

        assert_eq!(engine.dispatcher().listener_count(), 3);
        engine.start().await.unwrap();
        assert!(engine.is_running());

        engine.stop().await.unwrap();
        assert!(!engine.is_running());
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_requeues_orphaned_cases() {
        let store = Arc::new(MemoryStore::new());
        let case = Case::new(NewCase::electronic(CaseType::Callback, "support"), chrono::Utc::now());
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_case(&case).await.unwrap();
            tx.commit().await.unwrap();
        }

        let mut engine = ServiceCenterEngine::builder()
            .with_store(store)
            .build()
            .await
            .unwrap();
        assert!(!engine.queue().is_queued(case.id).await.unwrap());

        engine.start().await.unwrap();
        assert!(engine.queue().is_queued(case.id).await.unwrap());
        engine.stop().await.unwrap();
    }
}
