use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{LogEntry, Run, RunFilter, RunSummary, Store, StoreError};

#[derive(Default)]
struct Inner {
  /// run_id -> (insertion number, snapshot without log)
  runs: HashMap<String, (u64, Run)>,
  logs: HashMap<String, BTreeMap<u64, LogEntry>>,
  inserted: u64,
}

/// In-process store. Used by default and in tests.
#[derive(Default)]
pub struct MemoryStore {
  inner: RwLock<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
    let mut snapshot = run.clone();
    snapshot.log.clear();

    let mut inner = self.inner.write().await;
    let order = match inner.runs.get(&run.run_id) {
      Some((order, _)) => *order,
      None => {
        inner.inserted += 1;
        inner.inserted
      }
    };
    inner.runs.insert(run.run_id.clone(), (order, snapshot));
    Ok(())
  }

  async fn load_run(&self, run_id: &str) -> Result<Run, StoreError> {
    let inner = self.inner.read().await;
    let (_, snapshot) = inner
      .runs
      .get(run_id)
      .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;

    let mut run = snapshot.clone();
    run.log = inner
      .logs
      .get(run_id)
      .map(|entries| entries.values().cloned().collect())
      .unwrap_or_default();
    Ok(run)
  }

  async fn append_log(&self, run_id: &str, entry: &LogEntry) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    inner
      .logs
      .entry(run_id.to_string())
      .or_default()
      .entry(entry.seq)
      .or_insert_with(|| entry.clone());
    Ok(())
  }

  async fn list_runs(
    &self,
    workflow_id: &str,
    filter: &RunFilter,
  ) -> Result<Vec<RunSummary>, StoreError> {
    let inner = self.inner.read().await;
    let mut runs: Vec<(u64, RunSummary)> = inner
      .runs
      .values()
      .filter(|(_, run)| run.workflow_id == workflow_id)
      .map(|(order, run)| (*order, run.summary()))
      .filter(|(_, summary)| filter.matches(summary))
      .collect();

    runs.sort_by(|(a_order, a), (b_order, b)| {
      b.created_at
        .cmp(&a.created_at)
        .then_with(|| b_order.cmp(a_order))
    });

    let limit = filter.limit.unwrap_or(usize::MAX);
    Ok(runs.into_iter().take(limit).map(|(_, s)| s).collect())
  }
}
