//! Bounded, paced detail fetching.

use async_trait::async_trait;
use rand::Rng;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{Candidate, Detail, Item};
use crate::snapshot;

#[derive(Debug, Error)]
pub enum FetchError {
    /// One request failed; the batch carries on.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// Credentials were rejected; nothing else in this run can succeed.
    #[error("session rejected: {0}")]
    Session(String),
}

impl FetchError {
    pub fn is_session(&self) -> bool {
        matches!(self, FetchError::Session(_))
    }
}

/// Raw detail as returned by a source, before the snapshot hits disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedDetail {
    pub body_text: String,
    /// JPEG bytes of the rendered item, when the source captures one.
    pub snapshot: Option<Vec<u8>>,
}

#[async_trait]
pub trait DetailFetcher: Send + Sync {
    async fn fetch_detail(&self, candidate: &Candidate) -> Result<FetchedDetail, FetchError>;
}

/// Uniform random delay between successive detail requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

/// Fetch detail for at most `max_items` candidates, in order.
///
/// Candidates past the cap are left alone; they stay unknown and come back
/// next run. A transient failure yields an item with empty body and no
/// snapshot. A session failure aborts the whole batch.
pub async fn fetch_details(
    fetcher: &dyn DetailFetcher,
    candidates: Vec<Candidate>,
    max_items: usize,
    pacing: &Pacing,
    snapshot_dir: &Path,
) -> Result<Vec<Item>, FetchError> {
    let total = candidates.len();
    if total > max_items {
        info!(
            total,
            max_items,
            deferred = total - max_items,
            "detail cap reached; deferring the rest to the next run"
        );
    }

    let mut items = Vec::with_capacity(total.min(max_items));
    for (idx, candidate) in candidates.into_iter().take(max_items).enumerate() {
        if idx > 0 {
            let wait = pacing.sample();
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        let fetched = match fetcher.fetch_detail(&candidate).await {
            Ok(fetched) => fetched,
            Err(err @ FetchError::Session(_)) => {
                warn!(identity = %candidate.identity, %err, "session rejected; aborting batch");
                return Err(err);
            }
            Err(err) => {
                warn!(identity = %candidate.identity, %err, "detail fetch failed; keeping identity only");
                items.push(Item::without_detail(candidate));
                continue;
            }
        };

        let snapshot_path = match fetched.snapshot {
            Some(bytes) => {
                match snapshot::store_snapshot(snapshot_dir, &candidate.identity, &bytes).await {
                    Ok(p) => Some(p.to_string_lossy().into_owned()),
                    Err(err) => {
                        warn!(identity = %candidate.identity, ?err, "snapshot write failed; keeping identity only");
                        items.push(Item::without_detail(candidate));
                        continue;
                    }
                }
            }
            None => None,
        };

        info!(
            identity = %candidate.identity,
            chars = fetched.body_text.chars().count(),
            snapshot = snapshot_path.is_some(),
            "detail fetched"
        );
        items.push(Item::with_detail(
            candidate,
            Detail {
                body_text: fetched.body_text,
                snapshot_path,
            },
        ));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct ScriptedFetcher {
        calls: Arc<Mutex<Vec<String>>>,
        failures: HashMap<String, fn(String) -> FetchError>,
        with_snapshot: bool,
    }

    #[async_trait]
    impl DetailFetcher for ScriptedFetcher {
        async fn fetch_detail(&self, c: &Candidate) -> Result<FetchedDetail, FetchError> {
            self.calls.lock().unwrap().push(c.identity.clone());
            if let Some(make) = self.failures.get(&c.identity) {
                return Err(make(format!("boom {}", c.identity)));
            }
            Ok(FetchedDetail {
                body_text: format!("text {}", c.identity),
                snapshot: self.with_snapshot.then(|| b"\xff\xd8".to_vec()),
            })
        }
    }

    fn cands(ids: &[&str]) -> Vec<Candidate> {
        ids.iter()
            .map(|id| Candidate::new(*id, "someone", format!("https://x.com/someone/status/{id}")))
            .collect()
    }

    #[tokio::test]
    async fn middle_failure_does_not_stop_the_batch() {
        let td = tempfile::tempdir().unwrap();
        let mut fetcher = ScriptedFetcher {
            with_snapshot: true,
            ..Default::default()
        };
        fetcher
            .failures
            .insert("3".into(), FetchError::Transient as fn(String) -> FetchError);

        let items = fetch_details(
            &fetcher,
            cands(&["1", "2", "3", "4", "5"]),
            10,
            &Pacing::none(),
            td.path(),
        )
        .await
        .unwrap();

        assert_eq!(fetcher.calls.lock().unwrap().len(), 5);
        assert_eq!(items.len(), 5);
        assert_eq!(items[2].identity, "3");
        assert!(items[2].body_text.is_empty());
        assert!(items[2].snapshot_path.is_none());
        assert_eq!(items[3].body_text, "text 4");
        assert!(td.path().join("5.jpg").exists());
        assert!(!td.path().join("3.jpg").exists());
    }

    #[tokio::test]
    async fn cap_limits_requests() {
        let td = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::default();
        let items = fetch_details(&fetcher, cands(&["X", "Y", "Z"]), 1, &Pacing::none(), td.path())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].identity, "X");
        assert_eq!(*fetcher.calls.lock().unwrap(), vec!["X".to_string()]);
    }

    #[tokio::test]
    async fn session_failure_aborts() {
        let td = tempfile::tempdir().unwrap();
        let mut fetcher = ScriptedFetcher::default();
        fetcher
            .failures
            .insert("2".into(), FetchError::Session as fn(String) -> FetchError);
        let err = fetch_details(&fetcher, cands(&["1", "2", "3"]), 10, &Pacing::none(), td.path())
            .await
            .unwrap_err();
        assert!(err.is_session());
        assert_eq!(fetcher.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_only_between_requests() {
        let td = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::default();
        let pacing = Pacing::new(Duration::from_millis(500), Duration::from_millis(500));

        let start = tokio::time::Instant::now();
        fetch_details(&fetcher, cands(&["a", "b", "c"]), 10, &pacing, td.path())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1000));

        let start = tokio::time::Instant::now();
        fetch_details(&fetcher, cands(&["d"]), 10, &pacing, td.path())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn pacing_samples_within_bounds() {
        let p = Pacing::new(Duration::from_millis(40), Duration::from_millis(10));
        for _ in 0..50 {
            let d = p.sample();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(40));
        }
    }
}
