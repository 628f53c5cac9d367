//! Idle watchdog loop.
//!
//! Drives [`Engine::tick`] on a fixed interval. The loop itself holds no
//! session state; all per-user actions are injected through the engine's
//! task queue so they can never race a concurrently arriving message.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::Engine;

/// Spawn the watchdog loop using the engine's configured tick interval.
///
/// The loop runs until the returned handle is aborted or the runtime shuts
/// down.
pub fn spawn(engine: Engine) -> JoinHandle<()> {
    let interval = engine.config().tick_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; skip it so
        // a freshly started engine does not scan before anyone connects.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            engine.tick();
        }
    })
}
