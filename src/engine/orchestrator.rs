// src/engine/orchestrator.rs

//! Async shell around the session registry.
//!
//! `Orchestrator` is the boundary API: every operation a front end can
//! perform goes through it. State lives in [`Shared`]:
//! - one `std::sync::Mutex<SessionStore>` guarding the registry. It is never
//!   held across an `.await`, and events are published while it is held so a
//!   session's events reach subscribers in the order they were applied;
//! - the static command registry, event bus, rate limiter and settings.
//!
//! Process work (spawning, stream reading, stopping) is delegated to
//! [`crate::exec`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, OrchestratorSettings};
use crate::engine::readiness::ReadinessReport;
use crate::engine::report::{RegistryExport, SessionStats};
use crate::errors::{OrchestratorError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::exec::{cancel, supervisor};
use crate::ratelimit::RateLimiter;
use crate::registry::{CategoryInfo, CommandRegistry};
use crate::session::{gc, ConcurrencyGovernor, LogLine, SessionId, SessionSnapshot, SessionStore};
use crate::types::{KillOutcome, KillReason, ListFilter, LogStream};

/// State shared between the orchestrator and its background tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    store: Mutex<SessionStore>,
    registry: CommandRegistry,
    bus: EventBus,
    limiter: RateLimiter,
    settings: OrchestratorSettings,
    service_root: PathBuf,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    /// Run `f` with exclusive access to the registry and the event bus.
    ///
    /// A poisoned lock means a registry invariant was violated while it was
    /// held; nothing sensible can continue after that.
    pub(crate) fn with_store<R>(&self, f: impl FnOnce(&mut SessionStore, &EventBus) -> R) -> R {
        let mut store = match self.store.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("session registry poisoned by an earlier invariant violation"),
        };
        f(&mut store, &self.bus)
    }

    pub(crate) fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub(crate) fn service_root(&self) -> &Path {
        &self.service_root
    }
}

/// Handle to a running orchestrator. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Build an orchestrator from validated configuration.
    ///
    /// Commands run with `service_root` as their working directory. No
    /// background task is started until [`spawn_collector`](Self::spawn_collector).
    pub fn new(config: &ConfigFile, service_root: impl Into<PathBuf>) -> Self {
        let settings = config.orchestrator.clone();
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            store: Mutex::new(
                SessionStore::new(ConcurrencyGovernor::new(settings.max_sessions))
                    .with_log_limit(settings.max_log_bytes),
            ),
            registry: CommandRegistry::from_config(config),
            bus: EventBus::new(settings.event_capacity),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            service_root: service_root.into(),
            settings,
            shutdown,
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.shared.settings
    }

    /// Create a session for the `index`-th command of `category` and start
    /// its process.
    ///
    /// Returns the id as soon as the session is registered. A process that
    /// fails to spawn still yields an id; the session is then already
    /// `Failed` with the reason in its error log.
    pub fn start_execution(&self, category: &str, index: usize) -> Result<SessionId> {
        let (id, descriptor) = self.shared.with_store(|store, bus| {
            let (id, descriptor) =
                store.create(&self.shared.registry, category, index, Utc::now())?;
            bus.publish(SessionEvent::SessionCreated {
                session_id: id,
                category: descriptor.category.clone(),
                command: descriptor.command.clone(),
            });
            Ok::<_, OrchestratorError>((id, descriptor.clone()))
        })?;

        info!(session_id = %id, category, index, cmd = %descriptor.command, "session started");
        supervisor::launch(&self.shared, id, &descriptor);
        Ok(id)
    }

    /// Start command `index` of every category, in category order.
    ///
    /// Each start is independent; capacity or range errors are reported
    /// per category and do not stop the others.
    pub fn start_all(&self, index: usize) -> Vec<(String, Result<SessionId>)> {
        self.shared
            .registry
            .category_names()
            .map(|name| (name.to_string(), self.start_execution(name, index)))
            .collect()
    }

    pub fn get_status(&self, id: SessionId) -> Result<SessionSnapshot> {
        self.shared.with_store(|store, _| store.get(id, Utc::now()))
    }

    /// Rate-limited session listing for external callers identified by
    /// `caller`.
    pub fn list_sessions(&self, caller: &str, filter: ListFilter) -> Result<Vec<SessionSnapshot>> {
        self.shared.limiter.acquire(caller)?;
        Ok(self.sessions(filter))
    }

    /// Unthrottled listing for in-process use.
    pub fn sessions(&self, filter: ListFilter) -> Vec<SessionSnapshot> {
        self.shared.with_store(|store, _| store.list(filter, Utc::now()))
    }

    pub fn get_logs(&self, id: SessionId, stream: LogStream) -> Result<Vec<LogLine>> {
        self.shared.with_store(|store, _| store.logs(id, stream))
    }

    /// Kill one session. Idempotent: killing a finished session reports its
    /// final status and changes nothing.
    pub fn kill_session(&self, id: SessionId) -> Result<KillOutcome> {
        cancel::cancel_session(&self.shared, id, KillReason::Manual, cancel::MANUAL_KILL_MESSAGE)
    }

    /// Kill every running session. Returns how many this call killed.
    pub fn kill_all_running(&self) -> usize {
        let running = self.shared.with_store(|store, _| store.running_ids());

        running
            .into_iter()
            .filter(|id| matches!(self.kill_session(*id), Ok(KillOutcome::Killed)))
            .count()
    }

    pub fn list_categories(&self) -> Vec<CategoryInfo> {
        self.shared.registry.list_categories().values().cloned().collect()
    }

    /// Whether each configured command's program can be found, searching
    /// this process's `PATH`.
    pub fn readiness(&self) -> ReadinessReport {
        let path = std::env::var_os("PATH");
        let report =
            ReadinessReport::check(&self.shared.registry, &self.shared.service_root, path.as_deref());
        debug!(
            ready = report.summary.ready,
            missing = report.summary.missing,
            "readiness checked"
        );
        report
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats::from_snapshots(&self.sessions(ListFilter::All))
    }

    /// Pretty-printed JSON of every session with its logs.
    pub fn export_json(&self) -> Result<String> {
        let export = self
            .shared
            .with_store(|store, _| RegistryExport::capture(store, Utc::now()));
        Ok(serde_json::to_string_pretty(&export)?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.bus.subscribe()
    }

    /// One retention sweep. Returns the number of sessions removed.
    pub fn collect_garbage(&self) -> usize {
        sweep(&self.shared)
    }

    /// Start the periodic retention sweep. It stops on
    /// [`shutdown`](Self::shutdown) or when the last orchestrator handle is
    /// dropped.
    pub fn spawn_collector(&self) -> JoinHandle<()> {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        gc::spawn_collector(
            self.shared.settings.gc_interval,
            self.shared.shutdown.subscribe(),
            move || weak.upgrade().map(|shared| sweep(&shared)),
        )
    }

    /// Stop background work and kill everything still running. Returns the
    /// number of sessions killed.
    pub fn shutdown(&self) -> usize {
        self.shared.shutdown.send_replace(true);
        let killed = self.kill_all_running();
        if killed > 0 {
            warn!(killed, "killed running sessions on shutdown");
        } else {
            info!("orchestrator shut down");
        }
        killed
    }
}

#[cfg(test)]
impl Orchestrator {
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

fn sweep(shared: &Shared) -> usize {
    let retention = shared.settings.retention;
    let removed = shared.with_store(|store, _| store.sweep(Utc::now(), retention));
    let dropped_callers = shared.limiter.cleanup();

    debug!(removed = removed.len(), dropped_callers, "retention sweep finished");
    removed.len()
}
