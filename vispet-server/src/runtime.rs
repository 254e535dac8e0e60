//! Assembly of every companion service from one config.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use vispet_core::clock::Clock;
use vispet_core::config::VisPetConfig;
use vispet_core::descriptor::{self, EffectRegistry};
use vispet_core::error::Result;
use vispet_core::ownership::OwnershipIndex;
use vispet_core::persistence::{InventoryStore, TrialStore};
use vispet_core::toggle::ToggleDetector;
use vispet_core::trial::TrialTimers;
use vispet_core::types::WorldId;

use crate::commands::CommandHandler;
use crate::coordinator::LifecycleCoordinator;
use crate::hooks::ConnectionHooks;
use crate::host::{EntityStore, Notifier};
use crate::systems::{CompanionSystems, TickReport};
use crate::trial::{spawn_trial_ticker, TrialTimerService};
use crate::world::{WorldRegistry, WorldThread};

/// Every companion service, wired together.
#[derive(Debug, Clone)]
pub struct VisPetRuntime {
    config: Arc<VisPetConfig>,
    coordinator: LifecycleCoordinator,
    trial: Arc<TrialTimerService>,
    systems: CompanionSystems,
    hooks: ConnectionHooks,
    commands: CommandHandler,
}

impl VisPetRuntime {
    /// Open the stores and build the services.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or a data directory cannot
    /// be created.
    pub fn new(
        config: VisPetConfig,
        clock: Arc<dyn Clock>,
        effects: Arc<dyn EffectRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;
        let inventories = InventoryStore::open(&config.persistence.inventory_dir)?;
        let trial_store = TrialStore::open(&config.persistence.trial_dir, Arc::clone(&clock))?;
        let timers = Arc::new(TrialTimers::new(trial_store, clock, config.trial.duration_ms));

        let resolved = descriptor::warm_up(&*effects);
        info!(resolved, total = descriptor::all().len(), "Companion effects resolved");

        let coordinator = LifecycleCoordinator::new(
            config.lifecycle.clone(),
            &config.trial,
            Arc::new(OwnershipIndex::new()),
            WorldRegistry::new(),
            inventories,
            timers,
            effects,
            notifier,
        );
        let detector = Arc::new(ToggleDetector::new());
        let trial = Arc::new(TrialTimerService::new(coordinator.clone(), config.trial.clone()));
        let systems = CompanionSystems::new(coordinator.clone(), Arc::clone(&detector));
        let hooks = ConnectionHooks::new(coordinator.clone(), Arc::clone(&trial), detector);
        let commands = CommandHandler::new(coordinator.clone(), Arc::clone(&trial));

        info!(enabled = config.general.enabled, "Companion runtime ready");
        Ok(Self {
            config: Arc::new(config),
            coordinator,
            trial,
            systems,
            hooks,
            commands,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &VisPetConfig {
        &self.config
    }

    /// The spawn/despawn protocol.
    #[must_use]
    pub fn coordinator(&self) -> &LifecycleCoordinator {
        &self.coordinator
    }

    /// The trial service.
    #[must_use]
    pub fn trial(&self) -> &Arc<TrialTimerService> {
        &self.trial
    }

    /// Per-tick systems.
    #[must_use]
    pub fn systems(&self) -> &CompanionSystems {
        &self.systems
    }

    /// Connection hooks.
    #[must_use]
    pub fn hooks(&self) -> &ConnectionHooks {
        &self.hooks
    }

    /// Command handler.
    #[must_use]
    pub fn commands(&self) -> &CommandHandler {
        &self.commands
    }

    /// Register a world and hand back the queue its driver must run.
    pub fn open_world(&self, id: WorldId) -> WorldThread {
        self.coordinator.worlds().open(id)
    }

    /// Unregister a world.
    pub fn close_world(&self, id: &WorldId) -> bool {
        self.coordinator.worlds().close(id)
    }

    /// One world tick: detection and reconciliation, then the world's
    /// queue. A disabled runtime only drains the queue.
    pub fn tick_world(&self, store: &mut dyn EntityStore, thread: &mut WorldThread) -> TickReport {
        let report = if self.config.general.enabled {
            self.systems.tick_world(store)
        } else {
            TickReport::default()
        };
        thread.run_pending(store);
        report
    }

    /// Start the periodic trial expiry check on the current tokio runtime.
    #[must_use]
    pub fn spawn_trial_ticker(&self) -> JoinHandle<()> {
        spawn_trial_ticker(
            Arc::clone(&self.trial),
            Duration::from_millis(self.config.trial.tick_interval_ms),
        )
    }
}
