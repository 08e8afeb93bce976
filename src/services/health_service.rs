use tracing::warn;

use crate::{
    dto::health::HealthResponse,
    state::{SharedState, transitions::with_persistence_timeout},
};

/// Report `ok` or `degraded`, probing the session store when one is installed.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.session_store().await {
        Some(store) => {
            let probe = with_persistence_timeout(state, "health_check", store.health_check());
            if let Err(err) = probe.await {
                warn!(error = %err, "session store health check failed");
            }
        }
        None => warn!("session store unavailable (degraded mode)"),
    }

    if state.is_degraded().await {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::session_store::MemorySessionStore, dto::health::HealthStatus,
        services::gate::JwtVerifier, state::AppState,
    };

    #[tokio::test]
    async fn status_follows_the_installed_store() {
        let state = AppState::new(AppConfig::default(), Arc::new(JwtVerifier::new("secret")));
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);

        state
            .set_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        assert_eq!(health_status(&state).await.status, HealthStatus::Ok);

        state.clear_session_store().await;
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);
    }
}
