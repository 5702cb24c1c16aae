//! Scroll cursors
//!
//! [`ScrollCursor::open`] counts the matching rows and opens a forward-only
//! cursor inside one store session. The resulting [`ReadResult`] pulls rows
//! lazily and releases its session exactly once: on exhaustion, on a fetch
//! error, on [`ReadResult::close`], or by dropping the session when the
//! result is abandoned.

use std::collections::VecDeque;

use tracing::{debug, warn};

use featureserver_common::error::Result;

use crate::projector::{FeatureRecord, Projection, RawRow};
use crate::query::ExecutablePlan;
use crate::store::{FeatureStore, StoreSession};

pub struct ScrollCursor;

impl ScrollCursor {
    pub async fn open(
        store: &dyn FeatureStore,
        plan: ExecutablePlan,
        fetch_size: usize,
    ) -> Result<ReadResult> {
        let mut session = store.begin().await?;

        let total_count = match session.count(&plan).await {
            Ok(total) => total,
            Err(e) => {
                release_after_error(session, &plan.table.name).await;
                return Err(e);
            }
        };
        if let Err(e) = session.scroll(&plan, fetch_size).await {
            release_after_error(session, &plan.table.name).await;
            return Err(e);
        }

        debug!(
            "Opened cursor on {} ({} matching rows)",
            plan.table.name, total_count
        );
        Ok(ReadResult {
            table: plan.table.name.clone(),
            total_count,
            projection: plan.projection,
            session: Some(session),
            buffer: VecDeque::new(),
        })
    }
}

async fn release_after_error(session: Box<dyn StoreSession>, table: &str) {
    if let Err(e) = session.release().await {
        warn!("Failed to release session on {}: {}", table, e);
    }
}

/// Matching-row count plus a single-pass, lazily fetched row sequence
pub struct ReadResult {
    table: String,
    total_count: u64,
    projection: Projection,
    session: Option<Box<dyn StoreSession>>,
    buffer: VecDeque<RawRow>,
}

impl ReadResult {
    /// Rows matching the filter, ignoring pagination
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Whether the session is still held
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub async fn next_row(&mut self) -> Result<Option<RawRow>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            let Some(session) = self.session.as_mut() else {
                return Ok(None);
            };
            match session.fetch().await {
                Ok(batch) if batch.is_empty() => {
                    self.close().await?;
                    return Ok(None);
                }
                Ok(batch) => self.buffer.extend(batch),
                Err(e) => {
                    if let Some(session) = self.session.take() {
                        release_after_error(session, &self.table).await;
                    }
                    return Err(e);
                }
            }
        }
    }

    pub async fn next_feature(&mut self) -> Result<Option<FeatureRecord>> {
        Ok(self
            .next_row()
            .await?
            .map(|row| self.projection.project(row)))
    }

    /// Release the session. Later calls are no-ops.
    pub async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        match self.session.take() {
            Some(session) => {
                debug!("Closing cursor on {}", self.table);
                session.release().await
            }
            None => Ok(()),
        }
    }
}

impl Drop for ReadResult {
    fn drop(&mut self) {
        if self.session.is_some() {
            debug!("Cursor on {} abandoned, dropping its session", self.table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Page, QueryBuilder, QuerySpec};
    use crate::store::InMemoryStore;
    use featureserver_common::error::Error;
    use featureserver_common::types::{PropertyType, TableDescriptor, Value};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Stage {
        Count,
        Scroll,
        Fetch,
    }

    #[derive(Default)]
    struct Counters {
        released: AtomicUsize,
        dropped: AtomicUsize,
    }

    struct CountingStore {
        fail_at: Option<Stage>,
        counters: Arc<Counters>,
    }

    impl CountingStore {
        fn new(fail_at: Option<Stage>) -> Self {
            Self {
                fail_at,
                counters: Arc::new(Counters::default()),
            }
        }

        fn released(&self) -> usize {
            self.counters.released.load(Ordering::SeqCst)
        }

        fn dropped(&self) -> usize {
            self.counters.dropped.load(Ordering::SeqCst)
        }
    }

    struct CountingSession {
        fail_at: Option<Stage>,
        counters: Arc<Counters>,
        remaining: Vec<RawRow>,
    }

    impl CountingSession {
        fn check(&self, stage: Stage) -> Result<()> {
            if self.fail_at == Some(stage) {
                return Err(Error::DatabaseError(format!("{stage:?} failed")));
            }
            Ok(())
        }
    }

    impl Drop for CountingSession {
        fn drop(&mut self) {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl FeatureStore for CountingStore {
        async fn table_names(&self) -> Result<Vec<String>> {
            Ok(vec!["t".to_string()])
        }

        async fn describe(&self, _names: &[String]) -> Result<Vec<TableDescriptor>> {
            Ok(vec![table()])
        }

        async fn begin(&self) -> Result<Box<dyn StoreSession>> {
            Ok(Box::new(CountingSession {
                fail_at: self.fail_at,
                counters: self.counters.clone(),
                remaining: (1..=5_i64)
                    .map(|i| RawRow::new(i, None, vec![Value::Int(i * 10)]))
                    .collect(),
            }))
        }
    }

    #[async_trait::async_trait]
    impl StoreSession for CountingSession {
        async fn count(&mut self, _plan: &ExecutablePlan) -> Result<u64> {
            self.check(Stage::Count)?;
            Ok(self.remaining.len() as u64)
        }

        async fn scroll(&mut self, _plan: &ExecutablePlan, _fetch_size: usize) -> Result<()> {
            self.check(Stage::Scroll)
        }

        async fn fetch(&mut self) -> Result<Vec<RawRow>> {
            if self.remaining.len() < 5 {
                self.check(Stage::Fetch)?;
            }
            let take = self.remaining.len().min(2);
            Ok(self.remaining.drain(..take).collect())
        }

        async fn distinct(&mut self, _table: &TableDescriptor, _property: &str) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn release(self: Box<Self>) -> Result<()> {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn table() -> TableDescriptor {
        TableDescriptor::new("t")
            .with_id("id", PropertyType::Long)
            .with_property("v", PropertyType::Long)
    }

    fn plan(spec: &QuerySpec) -> ExecutablePlan {
        QueryBuilder::default().build(&Arc::new(table()), spec).unwrap()
    }

    async fn drain(result: &mut ReadResult) -> Vec<Value> {
        let mut ids = Vec::new();
        while let Some(row) = result.next_row().await.unwrap() {
            ids.push(row.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_exhaustion_releases_once() {
        let store = CountingStore::new(None);
        let mut result = ScrollCursor::open(&store, plan(&QuerySpec::default()), 2)
            .await
            .unwrap();
        assert_eq!(result.total_count(), 5);
        assert_eq!(drain(&mut result).await.len(), 5);
        assert!(!result.is_open());
        assert_eq!(result.next_row().await.unwrap(), None);
        result.close().await.unwrap();
        drop(result);
        assert_eq!(store.released(), 1);
        assert_eq!(store.dropped(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = CountingStore::new(None);
        let mut result = ScrollCursor::open(&store, plan(&QuerySpec::default()), 2)
            .await
            .unwrap();
        assert!(result.next_row().await.unwrap().is_some());
        result.close().await.unwrap();
        result.close().await.unwrap();
        assert_eq!(result.next_row().await.unwrap(), None);
        assert_eq!(store.released(), 1);
    }

    #[tokio::test]
    async fn test_open_errors_release_session() {
        for stage in [Stage::Count, Stage::Scroll] {
            let store = CountingStore::new(Some(stage));
            let err = ScrollCursor::open(&store, plan(&QuerySpec::default()), 2)
                .await
                .err()
                .unwrap();
            assert!(matches!(err, Error::DatabaseError(_)));
            assert_eq!(store.released(), 1, "{stage:?}");
            assert_eq!(store.dropped(), 1, "{stage:?}");
        }
    }

    #[tokio::test]
    async fn test_fetch_error_releases_and_ends() {
        let store = CountingStore::new(Some(Stage::Fetch));
        let mut result = ScrollCursor::open(&store, plan(&QuerySpec::default()), 2)
            .await
            .unwrap();
        assert!(result.next_row().await.unwrap().is_some());
        assert!(result.next_row().await.unwrap().is_some());
        assert!(result.next_row().await.is_err());
        assert!(!result.is_open());
        assert_eq!(result.next_row().await.unwrap(), None);
        assert_eq!(store.released(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_result_drops_session() {
        let store = CountingStore::new(None);
        let mut result = ScrollCursor::open(&store, plan(&QuerySpec::default()), 2)
            .await
            .unwrap();
        assert!(result.next_row().await.unwrap().is_some());
        drop(result);
        assert_eq!(store.released(), 0);
        assert_eq!(store.dropped(), 1);
    }

    #[tokio::test]
    async fn test_pagination_window_example() {
        let rows = (1..=10)
            .map(|i: i64| RawRow::new(i, None, vec![Value::Int(i)]))
            .collect();
        let store = InMemoryStore::new().with_table(table(), rows);
        let spec = QuerySpec {
            start: Some(2),
            limit: Some(3),
            ..Default::default()
        };
        let mut result = ScrollCursor::open(&store, plan(&spec), 2).await.unwrap();
        assert_eq!(result.total_count(), 10);
        assert_eq!(
            drain(&mut result).await,
            vec![Value::Int(3), Value::Int(4), Value::Int(5)]
        );
        assert_eq!(store.open_sessions(), 0);
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #[test]
        fn prop_total_count_ignores_page(
            values in proptest::collection::vec(proptest::option::of(-50i64..50), 0..40),
            threshold in proptest::option::of(-60i64..60),
            start in 0u64..50,
            limit in proptest::option::of(1u64..50),
        ) {
            let rows = values
                .iter()
                .zip(1_i64..)
                .map(|(v, id)| RawRow::new(id, None, vec![v.map_or(Value::Null, Value::Int)]))
                .collect();
            let store = InMemoryStore::new().with_table(table(), rows);
            let spec = QuerySpec {
                predicate: threshold.map(|t| format!("v > {t}")),
                start: Some(start),
                limit,
                sort_columns: vec!["v".to_string()],
                ..Default::default()
            };

            let mut matching: Vec<(Option<i64>, i64)> = values
                .iter()
                .zip(1_i64..)
                .filter(|(v, _)| match threshold {
                    None => true,
                    Some(t) => matches!(**v, Some(v) if v > t),
                })
                .map(|(v, id)| (*v, id))
                .collect();
            matching.sort_by_key(|(v, id)| (v.is_none(), *v, *id));

            let (total, ids) = block_on(async {
                let mut result = ScrollCursor::open(&store, plan(&spec), 4).await.unwrap();
                let total = result.total_count();
                (total, drain(&mut result).await)
            });
            prop_assert_eq!(total, u64::try_from(matching.len()).unwrap());

            let window = Page { start, limit }.window(matching.len());
            let expected: Vec<Value> = matching[window]
                .iter()
                .map(|(_, id)| Value::Int(*id))
                .collect();
            prop_assert_eq!(ids, expected);
            prop_assert_eq!(store.open_sessions(), 0);
        }
    }

    #[tokio::test]
    async fn test_next_feature_projects() {
        let store = CountingStore::new(None);
        let spec = QuerySpec {
            visible_columns: Some(vec!["v".to_string()]),
            ..Default::default()
        };
        let mut result = ScrollCursor::open(&store, plan(&spec), 2).await.unwrap();
        let feature = result.next_feature().await.unwrap().unwrap();
        assert_eq!(feature.id, Some(Value::Int(1)));
        assert_eq!(feature.get("v"), Some(&Value::Int(10)));
        result.close().await.unwrap();
    }
}
