pub mod leaderboard;
pub mod presence;
pub mod scoring;
pub mod session;
pub mod state_machine;
pub mod transitions;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig, dao::session_store::SessionStore, error::ServiceError,
    services::gate::IdentityVerifier,
};

use self::presence::Membership;

pub type SharedState = Arc<AppState>;

/// Central application state: storage handle, per-session locks, broadcast groups.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    degraded: watch::Sender<bool>,
    session_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    membership: Membership,
    config: Arc<AppConfig>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, verifier: Arc<dyn IdentityVerifier>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            degraded: degraded_tx,
            session_locks: DashMap::new(),
            membership: Membership::new(),
            config: Arc::new(config),
            verifier,
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] when none is installed or it is unhealthy.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        if self.is_degraded().await {
            return Err(ServiceError::Degraded);
        }
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn set_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Take the lock serialising every state change of one session.
    ///
    /// The registry entry is dropped again once no task holds or waits for it.
    pub async fn lock_session(self: &Arc<Self>, session_id: Uuid) -> SessionGuard {
        let lock = self
            .session_locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        SessionGuard {
            state: Arc::clone(self),
            session_id,
            _guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_session_locks(&self) -> usize {
        self.session_locks.len()
    }

    /// Broadcast groups keyed by session.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Verifier used by the connection gate.
    pub fn verifier(&self) -> &dyn IdentityVerifier {
        self.verifier.as_ref()
    }
}

/// Exclusive access to one session, released on drop.
pub struct SessionGuard {
    state: SharedState,
    session_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Two owners left (the registry and this guard) means nobody is waiting.
        // The shard lock held by `remove_if` keeps new waiters out of the check.
        self.state
            .session_locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 2);
    }
}
