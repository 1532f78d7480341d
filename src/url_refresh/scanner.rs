use crate::artifact_store::{Artifact, ArtifactSession, StoreError};
use crate::clock::Clock;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, warn};

/// Selects the artifacts whose URL expires within the lookahead horizon.
pub struct ExpiryScanner {
    clock: Arc<dyn Clock>,
    lookahead: Duration,
}

impl ExpiryScanner {
    pub fn new(clock: Arc<dyn Clock>, lookahead: Duration) -> Self {
        Self { clock, lookahead }
    }

    pub fn lookahead(&self) -> Duration {
        self.lookahead
    }

    /// Every artifact with `url_expires_at < now + lookahead` and a non-blank
    /// storage path. Read-only.
    pub async fn find_expiring(
        &self,
        session: &dyn ArtifactSession,
    ) -> Result<Vec<Artifact>, StoreError> {
        let cutoff = self.clock.now() + self.lookahead;
        let found = session.find_expiring(cutoff).await?;
        let total = found.len();

        let expiring: Vec<Artifact> = found
            .into_iter()
            .filter(|artifact| artifact.expires_before(cutoff))
            .collect();
        if expiring.len() != total {
            warn!(
                "Store returned {} artifacts outside the expiry window ending {}",
                total - expiring.len(),
                cutoff
            );
        }
        debug!(
            "Found {} artifacts expiring before {}",
            expiring.len(),
            cutoff
        );
        Ok(expiring)
    }
}
