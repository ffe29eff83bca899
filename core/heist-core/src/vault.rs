//! Background thread that refills target vaults on a fixed tick.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::catalog::TargetCatalog;
use crate::config::VaultSettings;
use crate::lock;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *lock(&self.stopped) = true;
        self.wake.notify_all();
    }

    /// Sleeps for `timeout` or until stopped. Returns true when stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let stopped = lock(&self.stopped);
        let (stopped, _) = self
            .wake
            .wait_timeout_while(stopped, timeout, |flag| !*flag)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped
    }
}

/// Handle to the running recovery loop. Dropping it stops the loop.
pub struct VaultRecovery {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl VaultRecovery {
    pub fn spawn(catalog: Arc<TargetCatalog>, settings: VaultSettings) -> io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let tick = settings.tick();
        let factor = settings.recovery_factor;

        let handle = thread::Builder::new()
            .name("vault-recovery".to_string())
            .spawn(move || loop {
                if thread_signal.wait(tick) {
                    tracing::debug!("Vault recovery loop stopped");
                    break;
                }
                let changed = catalog.recover_all(factor);
                if changed > 0 {
                    tracing::debug!(changed, "Vault recovery tick");
                }
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Signals the loop and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Vault recovery thread panicked");
            }
        }
    }
}

impl Drop for VaultRecovery {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::target::Target;
    use std::time::Instant;

    #[test]
    fn loop_recovers_and_stops_promptly() {
        let catalog = Arc::new(TargetCatalog::new(Arc::new(MemoryStore::new())));
        catalog
            .upsert(Target {
                community_id: "guild-1".to_string(),
                target_id: "bank".to_string(),
                crew_size: 3,
                success: 0.5,
                vault: 1_000,
                vault_max: 2_000,
            })
            .unwrap();

        let settings = VaultSettings {
            tick_secs: 1,
            recovery_factor: 1.5,
            floor_percent: 4,
        };
        let recovery = VaultRecovery::spawn(Arc::clone(&catalog), settings).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while catalog.get("guild-1", "bank").unwrap().vault == 1_000 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(catalog.get("guild-1", "bank").unwrap().vault > 1_000);

        let started = Instant::now();
        recovery.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
