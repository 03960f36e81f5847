//! Subscriber setup for applications and tests that do not install their own.
//!
//! The library itself only emits `tracing` events; nothing is printed unless a subscriber is installed.

#[cfg(feature = "tracing")]
use crate::error::CacheError;
#[cfg(feature = "tracing")]
use crate::error::Result;

/// Install a `fmt` subscriber filtered by `RUST_LOG`. Fails if a global subscriber is already set.
#[cfg(feature = "tracing")]
pub fn init_tracing() -> Result<()> {
    use tracing::info;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::from_default_env();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|err| CacheError::Build(format!("tracing subscriber: {err}")))?;

    info!("Tracing initialized");

    Ok(())
}
