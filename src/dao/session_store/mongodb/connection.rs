use std::time::Duration;

use mongodb::{Client, Database, bson::doc};
use tokio::time::sleep;
use tracing::debug;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

/// Pings allowed before a fresh client is given up on, and the delays between them.
#[derive(Clone, Copy, Debug)]
pub(super) struct PingBackoff {
    attempts: u32,
    first_delay: Duration,
    max_delay: Duration,
}

impl Default for PingBackoff {
    fn default() -> Self {
        Self {
            attempts: 10,
            first_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl PingBackoff {
    /// Delay after the `failed`-th unanswered ping (1-based), doubling up to the cap.
    fn delay_after(&self, failed: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed.saturating_sub(1));
        self.first_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Open a client for `config` and return once the session database answers a ping.
pub(super) async fn establish_connection(
    config: &MongoConfig,
    backoff: PingBackoff,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut failed = 0;
    while let Err(source) = database.run_command(doc! { "ping": 1 }).await {
        failed += 1;
        if failed >= backoff.attempts {
            return Err(MongoDaoError::InitialPing {
                attempts: failed,
                source,
            });
        }
        let delay = backoff.delay_after(failed);
        debug!(
            database = %config.database_name,
            attempt = failed,
            retry_in_ms = delay.as_millis() as u64,
            "session database not reachable yet"
        );
        sleep(delay).await;
    }

    Ok((client, database))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_the_cap() {
        let backoff = PingBackoff::default();
        let delays: Vec<_> = (1..=7).map(|failed| backoff.delay_after(failed)).collect();
        assert_eq!(
            delays,
            [250, 500, 1_000, 2_000, 4_000, 5_000, 5_000].map(Duration::from_millis)
        );
        assert_eq!(backoff.delay_after(u32::MAX), Duration::from_secs(5));
    }
}
