//! Per-request-kind timeouts with success/failure tallies.

use crate::error::{LspError, LspResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Kind of a blocking request, each with its own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    CodeAction,
    CodeLens,
    Completion,
    Definition,
    #[serde(rename = "documentHighlight")]
    DocHighlight,
    ExecuteCommand,
    Formatting,
    Hover,
    Init,
    PrepareRename,
    References,
    #[serde(rename = "signatureHelp")]
    Signature,
    Shutdown,
    Symbols,
    WillSave,
}

impl RequestKind {
    pub const ALL: [RequestKind; 15] = [
        RequestKind::CodeAction,
        RequestKind::CodeLens,
        RequestKind::Completion,
        RequestKind::Definition,
        RequestKind::DocHighlight,
        RequestKind::ExecuteCommand,
        RequestKind::Formatting,
        RequestKind::Hover,
        RequestKind::Init,
        RequestKind::PrepareRename,
        RequestKind::References,
        RequestKind::Signature,
        RequestKind::Shutdown,
        RequestKind::Symbols,
        RequestKind::WillSave,
    ];

    /// Default timeout in milliseconds.
    pub fn default_millis(self) -> u64 {
        match self {
            RequestKind::Completion | RequestKind::DocHighlight | RequestKind::Signature => 1000,
            RequestKind::Init => 10_000,
            RequestKind::Shutdown => 5000,
            _ => 2000,
        }
    }
}

/// Running tally of outcomes for one request kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub successes: u64,
    pub failures: u64,
}

/// Process-wide timeout table.
#[derive(Debug)]
pub struct TimeoutRegistry {
    durations: Mutex<HashMap<RequestKind, Duration>>,
    tallies: Mutex<HashMap<RequestKind, Tally>>,
}

impl Default for TimeoutRegistry {
    fn default() -> Self {
        let durations = RequestKind::ALL
            .iter()
            .map(|k| (*k, Duration::from_millis(k.default_millis())))
            .collect();
        Self {
            durations: Mutex::new(durations),
            tallies: Mutex::new(HashMap::new()),
        }
    }
}

impl TimeoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the given overrides (milliseconds) applied on top of the defaults.
    pub fn with_overrides(overrides: &HashMap<RequestKind, u64>) -> Self {
        let registry = Self::default();
        registry.apply(overrides);
        registry
    }

    /// Apply overrides in milliseconds.
    pub fn apply(&self, overrides: &HashMap<RequestKind, u64>) {
        let mut durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        for (kind, millis) in overrides {
            durations.insert(*kind, Duration::from_millis(*millis));
        }
    }

    pub fn set(&self, kind: RequestKind, duration: Duration) {
        self.durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, duration);
    }

    pub fn get(&self, kind: RequestKind) -> Duration {
        self.durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
            .unwrap_or_else(|| Duration::from_millis(kind.default_millis()))
    }

    pub fn tally(&self, kind: RequestKind) -> Tally {
        self.tallies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    fn record(&self, kind: RequestKind, success: bool) {
        let mut tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
        let tally = tallies.entry(kind).or_default();
        if success {
            tally.successes += 1;
        } else {
            tally.failures += 1;
        }
    }

    /// Await `fut` for at most the kind's duration, recording the outcome.
    pub async fn limit<T, F>(&self, kind: RequestKind, fut: F) -> LspResult<T>
    where
        F: Future<Output = T>,
    {
        let duration = self.get(kind);
        match tokio::time::timeout(duration, fut).await {
            Ok(value) => {
                self.record(kind, true);
                Ok(value)
            }
            Err(_) => {
                self.record(kind, false);
                warn!(kind = ?kind, timeout_ms = duration.as_millis() as u64, "Request timed out");
                Err(LspError::Timeout)
            }
        }
    }

    /// Like [`limit`](Self::limit), but a timeout yields `None`.
    pub async fn run<T, F>(&self, kind: RequestKind, fut: F) -> Option<T>
    where
        F: Future<Output = Option<T>>,
    {
        self.limit(kind, fut).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registry = TimeoutRegistry::new();
        assert_eq!(registry.get(RequestKind::Init), Duration::from_secs(10));
        assert_eq!(registry.get(RequestKind::Shutdown), Duration::from_secs(5));
        assert_eq!(registry.get(RequestKind::Completion), Duration::from_millis(1000));
        assert_eq!(registry.get(RequestKind::Hover), Duration::from_millis(2000));
    }

    #[test]
    fn test_overrides_from_json() {
        let overrides: HashMap<RequestKind, u64> =
            serde_json::from_str(r#"{"hover": 50, "documentHighlight": 7, "signatureHelp": 9}"#)
                .unwrap();
        let registry = TimeoutRegistry::with_overrides(&overrides);
        assert_eq!(registry.get(RequestKind::Hover), Duration::from_millis(50));
        assert_eq!(registry.get(RequestKind::DocHighlight), Duration::from_millis(7));
        assert_eq!(registry.get(RequestKind::Signature), Duration::from_millis(9));
        assert_eq!(registry.get(RequestKind::Init), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_records_tallies() {
        let registry = TimeoutRegistry::new();

        let value = registry.run(RequestKind::Hover, async { Some(1) }).await;
        assert_eq!(value, Some(1));

        let value: Option<i32> = registry
            .run(RequestKind::Hover, async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Some(2)
            })
            .await;
        assert_eq!(value, None);

        assert_eq!(
            registry.tally(RequestKind::Hover),
            Tally {
                successes: 1,
                failures: 1
            }
        );
        assert_eq!(registry.tally(RequestKind::Completion), Tally::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_reports_timeout() {
        let registry = TimeoutRegistry::new();
        registry.set(RequestKind::Init, Duration::from_millis(5));
        let result = registry
            .limit(RequestKind::Init, tokio::time::sleep(Duration::from_secs(1)))
            .await;
        assert!(matches!(result, Err(LspError::Timeout)));
    }
}
