//! A complete context wired to scripted remotes.

use crate::fixtures::{MATCHING_KEY, SDK_KEY};
use crate::remote::RemoteFakes;
use crate::streaming::FakeStreamingClient;
use flagsync_engine::{
    FlagsContext, FlagsContextBuilder, InstanceRegistry, StreamingParts, SyncConfig,
};
use std::sync::Arc;

/// Configuration used by the harness: fixed polling periods and no
/// readiness timeout.
pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_randomized_polling(false)
        .with_ready_timeout(None)
}

/// A [`FlagsContext`] plus handles on everything it talks to.
///
/// Must be created inside a tokio runtime.
pub struct TestHarness {
    /// The context under test.
    pub context: FlagsContext,
    /// Scripted remotes.
    pub remote: RemoteFakes,
    /// Fake streaming transport. Unused by polling harnesses.
    pub client: Arc<FakeStreamingClient>,
    /// Registry the context is registered in.
    pub registry: Arc<InstanceRegistry>,
}

impl TestHarness {
    /// A context that only polls.
    pub fn polling() -> Self {
        Self::build(test_config().with_streaming(false), false, |builder| builder)
    }

    /// A context that streams through [`FakeStreamingClient`].
    pub fn streaming() -> Self {
        Self::build(test_config().with_streaming(true), true, |builder| builder)
    }

    /// A context built from `config`, with `customize` applied to the
    /// builder before `build`.
    ///
    /// # Panics
    ///
    /// Panics if the context cannot be built.
    pub fn build<F>(config: SyncConfig, streaming: bool, customize: F) -> Self
    where
        F: FnOnce(FlagsContextBuilder) -> FlagsContextBuilder,
    {
        let remote = RemoteFakes::new();
        let client = Arc::new(FakeStreamingClient::new());
        let registry = Arc::new(InstanceRegistry::new());
        let parts = streaming.then(|| StreamingParts {
            authenticator: remote.auth.clone(),
            client: client.clone(),
        });
        let builder = FlagsContext::builder(SDK_KEY, MATCHING_KEY, remote.collaborators(parts))
            .with_config(config)
            .with_registry(Arc::clone(&registry));
        let context = customize(builder).build().expect("Failed to build context");
        Self {
            context,
            remote,
            client,
            registry,
        }
    }
}
