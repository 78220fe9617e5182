use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Per-host minimum-gap gate. Every outbound request waits on the gate of its
/// host, so requests to one host are spaced by at least `delay` while
/// different hosts proceed independently.
#[derive(Debug)]
pub struct HostLimiter {
    delay: Duration,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<Instant>>>>>,
}

impl HostLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request to `host` is allowed, then claim the slot.
    pub async fn acquire(&self, host: &str) {
        let gate = self.gate(host);
        let mut last = gate.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.delay;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn gate(&self, host: &str) -> Arc<tokio::sync::Mutex<Option<Instant>>> {
        let key = host.trim_start_matches("www.").to_ascii_lowercase();
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(gates.entry(key).or_default())
    }
}
