//! Where a tree runs its fetches.
//!
//! Fetches are spawned rather than driven by the caller, so a fetch started
//! for an expand still lands after the caller stopped waiting for it.
//! Anything implementing [`LocalSpawn`] works; `futures::executor::LocalPool`
//! spawners do too.

use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};

/// Spawns onto the tokio `LocalRuntime` or `LocalSet` the tree is used from.
///
/// Spawning outside of either panics, as `tokio::task::spawn_local` does.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLocalSpawner;

impl LocalSpawn for TokioLocalSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        tokio::task::spawn_local(future);
        Ok(())
    }
}
