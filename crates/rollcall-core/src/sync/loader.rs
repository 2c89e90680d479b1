//! Partition fetchers.
//!
//! Fetches every partition of a snapshot concurrently, normalizes the
//! response envelopes and decodes records. Only the member partition is
//! critical; every other partition degrades to an empty default.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregate::aggregate_snapshot;
use crate::api::{envelope, ApiError, RemoteDataService};
use crate::cache::Credential;
use crate::error::SyncError;
use crate::models::snapshot::into_record;
use crate::models::{Partition, Record, Snapshot};

enum PartitionError {
    Api(ApiError),
    Cancelled,
}

impl From<ApiError> for PartitionError {
    fn from(e: ApiError) -> Self {
        PartitionError::Api(e)
    }
}

/// Loads full snapshots from a `RemoteDataService`.
#[derive(Clone)]
pub struct SnapshotLoader {
    service: Arc<dyn RemoteDataService>,
    page_limit: u32,
    max_pages: u32,
}

impl SnapshotLoader {
    pub fn new(service: Arc<dyn RemoteDataService>, page_limit: u32, max_pages: u32) -> Self {
        Self {
            service,
            page_limit: page_limit.max(1),
            max_pages: max_pages.max(1),
        }
    }

    /// Fetch, normalize and aggregate every partition.
    pub async fn load(
        &self,
        scope: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Snapshot, SyncError> {
        debug!(scope, "Fetching all partitions");

        let (members, groups, attendance_today, attendance_weekly, deliveries, calendar_events, menu) = tokio::join!(
            self.fetch_list(Partition::Members, scope, credential, cancel),
            self.fetch_list(Partition::Groups, scope, credential, cancel),
            self.fetch_list(Partition::AttendanceToday, scope, credential, cancel),
            self.fetch_list(Partition::AttendanceWeekly, scope, credential, cancel),
            self.fetch_list(Partition::Deliveries, scope, credential, cancel),
            self.fetch_list(Partition::CalendarEvents, scope, credential, cancel),
            self.fetch_object(Partition::MenuOfDay, scope, credential, cancel),
        );

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let members = decode_typed(Partition::Members, settle(Partition::Members, members)?);

        let mut snapshot = Snapshot {
            members,
            groups: decode_typed(Partition::Groups, settle(Partition::Groups, groups)?),
            attendance_today: decode_records(settle(Partition::AttendanceToday, attendance_today)?),
            attendance_weekly: decode_records(settle(Partition::AttendanceWeekly, attendance_weekly)?),
            deliveries: decode_records(settle(Partition::Deliveries, deliveries)?),
            calendar_events: decode_records(settle(Partition::CalendarEvents, calendar_events)?),
            menu_of_day: settle(Partition::MenuOfDay, menu)?,
        };

        aggregate_snapshot(&mut snapshot);

        info!(
            scope,
            members = snapshot.members.len(),
            groups = snapshot.groups.len(),
            "Snapshot fetched"
        );
        Ok(snapshot)
    }

    async fn fetch_page(
        &self,
        partition: Partition,
        scope: &str,
        credential: &Credential,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Value, PartitionError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(PartitionError::Cancelled),
            result = self.service.fetch_page(partition, scope, credential, page, self.page_limit) => {
                result.map_err(PartitionError::from)
            }
        }
    }

    /// Fetch pages until a short page or the page cap.
    async fn fetch_list(
        &self,
        partition: Partition,
        scope: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, PartitionError> {
        let mut all = Vec::new();
        for page in 1..=self.max_pages {
            let body = self.fetch_page(partition, scope, credential, page, cancel).await?;
            let records = envelope::records(body)?;
            let count = records.len();
            all.extend(records);
            if count < self.page_limit as usize {
                return Ok(all);
            }
        }
        debug!(%partition, pages = self.max_pages, "Page cap reached");
        Ok(all)
    }

    async fn fetch_object(
        &self,
        partition: Partition,
        scope: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Option<Record>, PartitionError> {
        let body = self.fetch_page(partition, scope, credential, 1, cancel).await?;
        Ok(envelope::object(body)?)
    }
}

/// A failed primary partition aborts the load; any other falls back to its empty default.
fn settle<T: Default>(partition: Partition, result: Result<T, PartitionError>) -> Result<T, SyncError> {
    match result {
        Ok(value) => Ok(value),
        Err(PartitionError::Cancelled) => Err(SyncError::Cancelled),
        Err(PartitionError::Api(e)) if partition.is_primary() => {
            warn!(%partition, error = %e, "Primary partition fetch failed");
            Err(SyncError::primary(partition, e))
        }
        Err(PartitionError::Api(e)) => {
            warn!(%partition, error = %e, "Partition fetch failed, using empty default");
            Ok(T::default())
        }
    }
}

/// Decode records into a typed model, skipping ones that do not fit.
fn decode_typed<T: DeserializeOwned>(partition: Partition, values: Vec<Value>) -> Vec<T> {
    let total = values.len();
    let decoded: Vec<T> = values
        .into_iter()
        .filter_map(|v| match serde_json::from_value(v) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!(%partition, error = %e, "Skipping undecodable record");
                None
            }
        })
        .collect();
    if decoded.len() < total {
        warn!(%partition, skipped = total - decoded.len(), "Some records could not be decoded");
    }
    decoded
}

fn decode_records(values: Vec<Value>) -> Vec<Record> {
    values.into_iter().filter_map(into_record).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory `RemoteDataService` shared by the engine tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::sync::Semaphore;

    use crate::api::{ApiError, RemoteDataService};
    use crate::cache::Credential;
    use crate::models::Partition;

    #[derive(Default)]
    pub struct FakeService {
        responses: Mutex<HashMap<Partition, Value>>,
        failing: Mutex<Vec<Partition>>,
        calls: Mutex<HashMap<Partition, usize>>,
        pages: Mutex<Vec<(Partition, u32)>>,
        /// Member fetches complete only once a permit is available.
        gate: Mutex<Option<Arc<Semaphore>>>,
        pub member_calls: AtomicUsize,
    }

    impl FakeService {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Typical school: one class, three students, server count that
        /// aggregation cannot reproduce for a class without members.
        pub fn with_school() -> Arc<Self> {
            let service = Self::new();
            service.respond(
                Partition::Members,
                json!({"data": [
                    {"id": 1, "classId": "G1", "gender": "M"},
                    {"id": 2, "classId": "G1", "gender": "F", "allergies": ["egg"]},
                    {"id": 3, "classId": "G1", "gender": "M"}
                ]}),
            );
            service.respond(
                Partition::Groups,
                json!({"data": {"data": [
                    {"id": "G1", "name": "1A"},
                    {"id": "G2", "name": "1B", "totalStudents": 27}
                ]}}),
            );
            service.respond(Partition::MenuOfDay, json!({"data": {"main": "soto"}}));
            service
        }

        pub fn respond(&self, partition: Partition, value: Value) {
            self.responses.lock().insert(partition, value);
        }

        pub fn fail(&self, partition: Partition) {
            self.failing.lock().push(partition);
        }

        pub fn recover(&self, partition: Partition) {
            self.failing.lock().retain(|p| *p != partition);
        }

        pub fn calls(&self, partition: Partition) -> usize {
            self.calls.lock().get(&partition).copied().unwrap_or(0)
        }

        pub fn pages(&self) -> Vec<(Partition, u32)> {
            self.pages.lock().clone()
        }

        /// Hold member fetches until `release` is called.
        pub fn hold(&self) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            *self.gate.lock() = Some(Arc::clone(&gate));
            gate
        }

        pub fn release(&self) {
            if let Some(gate) = self.gate.lock().take() {
                gate.add_permits(Semaphore::MAX_PERMITS / 2);
            }
        }
    }

    #[async_trait]
    impl RemoteDataService for FakeService {
        async fn fetch_page(
            &self,
            partition: Partition,
            _scope: &str,
            _credential: &Credential,
            page: u32,
            _limit: u32,
        ) -> Result<Value, ApiError> {
            *self.calls.lock().entry(partition).or_insert(0) += 1;
            self.pages.lock().push((partition, page));

            if partition == Partition::Members {
                self.member_calls.fetch_add(1, Ordering::SeqCst);
                let gate = self.gate.lock().clone();
                if let Some(gate) = gate {
                    let _permit = gate.acquire().await;
                }
            }

            if self.failing.lock().contains(&partition) {
                return Err(ApiError::ServerError {
                    status: 503,
                    body: format!("{} unavailable", partition),
                });
            }
            if page > 1 {
                return Ok(json!([]));
            }
            Ok(self
                .responses
                .lock()
                .get(&partition)
                .cloned()
                .unwrap_or(Value::Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeService;
    use super::*;
    use serde_json::json;

    fn loader(service: Arc<FakeService>) -> SnapshotLoader {
        SnapshotLoader::new(service, 100, 5)
    }

    fn cred() -> Credential {
        Credential::new("token-123456")
    }

    #[tokio::test]
    async fn test_load_normalizes_and_aggregates() {
        let service = FakeService::with_school();
        let snapshot = loader(service)
            .load("school-1", &cred(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.members.len(), 3);
        let g1 = snapshot.group("G1").unwrap();
        assert_eq!(g1.total_members, Some(3));
        assert_eq!(g1.male, Some(2));
        assert_eq!(g1.allergy_count, Some(1));
        assert_eq!(snapshot.group("G2").unwrap().total_members, Some(27));
        assert_eq!(
            snapshot.menu_of_day.as_ref().and_then(|m| m.get("main")),
            Some(&json!("soto"))
        );
        assert!(snapshot.deliveries.is_empty());
    }

    #[tokio::test]
    async fn test_non_critical_failure_degrades_to_empty() {
        let service = FakeService::with_school();
        service.fail(Partition::Groups);
        service.fail(Partition::MenuOfDay);

        let snapshot = loader(service)
            .load("school-1", &cred(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.members.len(), 3);
        assert!(snapshot.groups.is_empty());
        assert!(snapshot.menu_of_day.is_none());
    }

    #[tokio::test]
    async fn test_member_failure_is_fatal() {
        let service = FakeService::with_school();
        service.fail(Partition::Members);

        let err = loader(service)
            .load("school-1", &cred(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::PrimaryPartition {
                partition: Partition::Members,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_full_pages_fetch_next_page() {
        let service = FakeService::new();
        service.respond(
            Partition::Deliveries,
            json!([{"id": 1}, {"id": 2}]),
        );
        let loader = SnapshotLoader::new(service.clone(), 2, 5);

        let snapshot = loader
            .load("school-1", &cred(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.deliveries.len(), 2);
        let delivery_pages: Vec<u32> = service
            .pages()
            .into_iter()
            .filter(|(p, _)| *p == Partition::Deliveries)
            .map(|(_, page)| page)
            .collect();
        assert_eq!(delivery_pages, vec![1, 2]);
        assert_eq!(service.calls(Partition::MenuOfDay), 1);
    }

    #[tokio::test]
    async fn test_undecodable_members_are_skipped() {
        let service = FakeService::new();
        service.respond(
            Partition::Members,
            json!([{"id": 1, "classId": "G1"}, {"id": 2, "allergies": 5}, "garbage"]),
        );

        let snapshot = loader(service)
            .load("school-1", &cred(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.members.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_load_returns_cancelled() {
        let service = FakeService::with_school();
        let _gate = service.hold();
        let cancel = CancellationToken::new();
        let loader = loader(service);

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { loader.load("school-1", &cred(), &cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
