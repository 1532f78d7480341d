//! The signed-URL refresh core.
//!
//! [`ExpiryScanner`] finds artifacts whose URL expires within the lookahead
//! horizon, [`UrlRefresher`] mints a replacement for one artifact, and
//! [`RefreshCoordinator`] drives a whole batch, containing failures at the
//! artifact level and reporting a [`RunSummary`].

mod coordinator;
mod refresher;
mod scanner;
mod summary;

pub use coordinator::{RefreshCoordinator, RunLimits};
pub use refresher::{RefreshFailed, RefreshedUrl, UrlRefresher};
pub use scanner::ExpiryScanner;
pub use summary::{ArtifactFailure, FailureReason, RunSummary};

use crate::artifact_store::{ArtifactFamily, StoreError};

/// Run-level failures. Per-artifact failures are reported in [`RunSummary`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("a refresh run for {0} is already in progress")]
    AlreadyRunning(ArtifactFamily),

    #[error("scan aborted: {0}")]
    StoreUnavailable(StoreError),
}
