//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{now, ScriptedSigner, TestArtifactDb};
//!
//! #[tokio::test]
//! async fn test_refresh() {
//!     let db = TestArtifactDb::create();
//!     let signer = ScriptedSigner::new();
//!     let coordinator = db.coordinator(ArtifactFamily::Chunks, signer.clone());
//! }
//! ```

mod constants;
mod fixtures;
mod signer;
mod storage_server;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::TestArtifactDb;
#[allow(unused_imports)]
pub use signer::ScriptedSigner;
#[allow(unused_imports)]
pub use storage_server::MockStorageApi;
