//! Asynchronous report workflow
//!
//! Some marketplaces export large datasets as server-side report jobs:
//! submit a job, poll its status, download the file once it is ready. The
//! [`ReportDriver`] runs that state machine on top of a marketplace-specific
//! [`ReportApi`]:
//!
//! ```text
//! Submitted -> Pending -> ... -> Ready -> (download, consumed)
//!                           \-> Failed
//!                           \-> TimedOut
//! ```
//!
//! Rate-limit and transient errors while polling are not failures; the
//! driver waits one interval and polls again until the timeout.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ReportSettings;
use crate::domain::{MarketplaceId, Query, StoreCredential};
use crate::providers::normalizer::{lookup, PayloadFormat, RawPayload};
use crate::providers::traits::{MarketplaceError, MarketplaceResult};

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Submitted,
    Pending,
    Ready,
    Failed,
    TimedOut,
}

impl ReportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Ready | ReportStatus::Failed | ReportStatus::TimedOut)
    }
}

/// Status spellings, compared case-insensitively.
///
/// Anything not listed as ready or failed counts as pending.
#[derive(Debug, Clone, Copy)]
pub struct StatusVocabulary {
    pub ready: &'static [&'static str],
    pub failed: &'static [&'static str],
}

impl StatusVocabulary {
    pub const STANDARD: StatusVocabulary = StatusVocabulary {
        ready: &["done", "ready", "success", "successful", "completed", "complete", "finished"],
        failed: &["failed", "error", "fail", "canceled", "cancelled", "purged", "rejected"],
    };

    pub fn classify(&self, raw: &str) -> ReportStatus {
        let raw = raw.trim();
        if self.ready.iter().any(|s| s.eq_ignore_ascii_case(raw)) {
            ReportStatus::Ready
        } else if self.failed.iter().any(|s| s.eq_ignore_ascii_case(raw)) {
            ReportStatus::Failed
        } else {
            ReportStatus::Pending
        }
    }
}

// ============================================================================
// Profile
// ============================================================================

/// Where a report result can be fetched from
#[derive(Debug, Clone)]
pub enum ResultHandle {
    /// Direct file URL
    Url(String),
    /// Download endpoint keyed by the job id
    JobId(String),
    /// Result already embedded in the status response
    Inline(RawPayload),
}

/// Response layout of one marketplace's report API
#[derive(Debug, Clone, Copy)]
pub struct ReportProfile {
    /// Paths to the job id in the submit response
    pub job_id: &'static [&'static str],
    /// Paths to the status string in the poll response
    pub status: &'static [&'static str],
    /// Paths to the file URL in the poll response
    pub file: &'static [&'static str],
    /// Paths to an inline result array in the poll response
    pub inline: &'static [&'static str],
    pub format: PayloadFormat,
    pub vocabulary: StatusVocabulary,
}

fn first_text(payload: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|path| match lookup(payload, path)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

impl ReportProfile {
    /// Job id from a submit response
    pub fn job_id(&self, payload: &Value) -> MarketplaceResult<String> {
        first_text(payload, self.job_id).ok_or_else(|| {
            MarketplaceError::SubmissionError(format!(
                "no job id at {:?} in {}",
                self.job_id,
                crate::providers::traits::fragment(&payload.to_string())
            ))
        })
    }

    /// Status and (when present) result handle from a poll response
    pub fn poll_outcome(&self, job_id: &str, payload: &Value) -> MarketplaceResult<(ReportStatus, String, ResultHandle)> {
        let raw_status = first_text(payload, self.status).ok_or_else(|| {
            MarketplaceError::parse(format!("no report status at {:?}", self.status), &payload.to_string())
        })?;
        let status = self.vocabulary.classify(&raw_status);

        let handle = if let Some(url) = first_text(payload, self.file) {
            ResultHandle::Url(url)
        } else if let Some(inline) = self.inline.iter().find_map(|p| lookup(payload, p).filter(|v| v.is_array())) {
            ResultHandle::Inline(RawPayload::json(inline.to_string()))
        } else {
            ResultHandle::JobId(job_id.to_string())
        };

        Ok((status, raw_status, handle))
    }
}

// ============================================================================
// Marketplace side
// ============================================================================

/// Marketplace-specific report calls
#[async_trait]
pub trait ReportApi: Send + Sync {
    fn marketplace(&self) -> MarketplaceId;

    fn profile(&self) -> &ReportProfile;

    /// Create the job, returning the raw response
    async fn submit(&self, store: &StoreCredential, query: &Query) -> MarketplaceResult<Value>;

    /// Fetch the job status, returning the raw response
    async fn poll(&self, store: &StoreCredential, job_id: &str) -> MarketplaceResult<Value>;

    /// Fetch the result file
    async fn download(&self, store: &StoreCredential, handle: &ResultHandle) -> MarketplaceResult<Bytes>;
}

// ============================================================================
// Jobs
// ============================================================================

/// A submitted report job, owned by the call that created it
#[derive(Debug)]
pub struct ReportJob {
    pub local_id: Uuid,
    pub marketplace: MarketplaceId,
    pub store_id: String,
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    status: ReportStatus,
}

impl ReportJob {
    pub fn status(&self) -> ReportStatus {
        self.status
    }
}

/// A job that reached `Ready`; downloading consumes it
#[derive(Debug)]
pub struct ReadyReport {
    pub job: ReportJob,
    pub handle: ResultHandle,
}

// ============================================================================
// Driver
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ReportDriver {
    poll_interval: Duration,
    timeout: Duration,
}

impl ReportDriver {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        ReportDriver { poll_interval, timeout }
    }

    pub fn from_settings(settings: &ReportSettings) -> Self {
        Self::new(settings.poll_interval(), settings.timeout())
    }

    /// Create a report job.
    ///
    /// A rejected request or a response without a job id is a
    /// [`MarketplaceError::SubmissionError`].
    pub async fn submit(
        &self,
        api: &dyn ReportApi,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<ReportJob> {
        let response = api.submit(store, query).await.map_err(|e| match e {
            MarketplaceError::ClientError { status, body } => {
                MarketplaceError::SubmissionError(format!("{} - {}", status, body))
            }
            other => other,
        })?;
        let job_id = api.profile().job_id(&response)?;

        info!(
            marketplace = %api.marketplace(),
            store = %store.store_id,
            job_id = %job_id,
            "Report job submitted"
        );

        Ok(ReportJob {
            local_id: Uuid::new_v4(),
            marketplace: api.marketplace(),
            store_id: store.store_id.clone(),
            job_id,
            created_at: Utc::now(),
            status: ReportStatus::Submitted,
        })
    }

    /// Poll until the job is ready, failed, or the timeout elapses
    pub async fn await_ready(
        &self,
        api: &dyn ReportApi,
        store: &StoreCredential,
        mut job: ReportJob,
    ) -> MarketplaceResult<ReadyReport> {
        let started = tokio::time::Instant::now();

        match tokio::time::timeout(self.timeout, self.poll_until_terminal(api, store, &mut job)).await {
            Ok(Ok(handle)) => Ok(ReadyReport { job, handle }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                job.status = ReportStatus::TimedOut;
                warn!(
                    marketplace = %job.marketplace,
                    store = %job.store_id,
                    job_id = %job.job_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Report job timed out"
                );
                Err(MarketplaceError::TimedOut {
                    operation: format!("report {}", job.job_id),
                    elapsed: started.elapsed(),
                })
            }
        }
    }

    async fn poll_until_terminal(
        &self,
        api: &dyn ReportApi,
        store: &StoreCredential,
        job: &mut ReportJob,
    ) -> MarketplaceResult<ResultHandle> {
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            match api.poll(store, &job.job_id).await {
                Ok(response) => {
                    let (status, raw_status, handle) = api.profile().poll_outcome(&job.job_id, &response)?;
                    job.status = status;
                    debug!(job_id = %job.job_id, poll = polls, status = %raw_status, "Report status");

                    match status {
                        ReportStatus::Ready => {
                            info!(job_id = %job.job_id, polls, "Report ready");
                            return Ok(handle);
                        }
                        ReportStatus::Failed => {
                            return Err(MarketplaceError::ReportFailed {
                                job_id: job.job_id.clone(),
                                status: raw_status,
                            });
                        }
                        _ => job.status = ReportStatus::Pending,
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(job_id = %job.job_id, poll = polls, error = %e, "Report poll failed, will poll again");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Fetch the payload of a ready report
    pub async fn download(
        &self,
        api: &dyn ReportApi,
        store: &StoreCredential,
        ready: ReadyReport,
    ) -> MarketplaceResult<RawPayload> {
        let format = api.profile().format;

        match ready.handle {
            ResultHandle::Inline(payload) => Ok(payload),
            handle => {
                debug!(job_id = %ready.job.job_id, "Downloading report");
                let body = api.download(store, &handle).await?;
                Ok(RawPayload { format, body })
            }
        }
    }

    /// Submit, wait and download in one call
    pub async fn run(
        &self,
        api: &dyn ReportApi,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<RawPayload> {
        let job = self.submit(api, store, query).await?;
        let ready = self.await_ready(api, store, job).await?;
        self.download(api, store, ready).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::normalizer::{normalize_stock_payload, Alias, StockSchema, UNMAPPED};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    const PROFILE: ReportProfile = ReportProfile {
        job_id: &["data.taskId", "result.code", "result.reportId"],
        status: &["data.status", "result.status"],
        file: &["result.file"],
        inline: &[],
        format: PayloadFormat::Csv,
        vocabulary: StatusVocabulary::STANDARD,
    };

    /// Report API replaying scripted responses
    struct ScriptedReports {
        submit: MarketplaceResult<Value>,
        polls: Mutex<VecDeque<MarketplaceResult<Value>>>,
        poll_times: Mutex<Vec<tokio::time::Instant>>,
        file: Bytes,
        downloads: Mutex<Vec<String>>,
    }

    impl ScriptedReports {
        fn new(submit: MarketplaceResult<Value>, polls: Vec<MarketplaceResult<Value>>) -> Self {
            ScriptedReports {
                submit,
                polls: Mutex::new(polls.into()),
                poll_times: Mutex::new(Vec::new()),
                file: Bytes::from_static(b"sku;qty\nA;1\nB;2\nC;3\n"),
                downloads: Mutex::new(Vec::new()),
            }
        }

        fn status(status: &str) -> MarketplaceResult<Value> {
            Ok(json!({ "data": { "status": status } }))
        }
    }

    #[async_trait]
    impl ReportApi for ScriptedReports {
        fn marketplace(&self) -> MarketplaceId {
            MarketplaceId::Wildberries
        }

        fn profile(&self) -> &ReportProfile {
            &PROFILE
        }

        async fn submit(&self, _store: &StoreCredential, _query: &Query) -> MarketplaceResult<Value> {
            self.submit.clone()
        }

        async fn poll(&self, _store: &StoreCredential, _job_id: &str) -> MarketplaceResult<Value> {
            self.poll_times.lock().push(tokio::time::Instant::now());
            let mut polls = self.polls.lock();
            if polls.len() > 1 {
                polls.pop_front().unwrap()
            } else {
                polls.front().cloned().unwrap()
            }
        }

        async fn download(&self, _store: &StoreCredential, handle: &ResultHandle) -> MarketplaceResult<Bytes> {
            self.downloads.lock().push(format!("{:?}", handle));
            Ok(self.file.clone())
        }
    }

    fn store() -> StoreCredential {
        StoreCredential::new("main", MarketplaceId::Wildberries, "token")
    }

    fn driver(interval_secs: u64, timeout_secs: u64) -> ReportDriver {
        ReportDriver::new(Duration::from_secs(interval_secs), Duration::from_secs(timeout_secs))
    }

    const CSV_SCHEMA: StockSchema = StockSchema {
        rows: &[""],
        explode: &[],
        sku: &[Alias::Path("sku")],
        item_id: UNMAPPED,
        barcode: UNMAPPED,
        warehouse_id: UNMAPPED,
        warehouse_name: UNMAPPED,
        quantity: &[Alias::Path("qty")],
        reserved: UNMAPPED,
        in_way_to_client: UNMAPPED,
        in_way_from_client: UNMAPPED,
        price: UNMAPPED,
        discount: UNMAPPED,
        category: UNMAPPED,
        brand: UNMAPPED,
        size: UNMAPPED,
        last_change: UNMAPPED,
    };

    #[tokio::test(start_paused = true)]
    async fn test_pending_pending_ready_yields_three_records() {
        let api = ScriptedReports::new(
            Ok(json!({ "data": { "taskId": "T1" } })),
            vec![
                ScriptedReports::status("pending"),
                ScriptedReports::status("processing"),
                ScriptedReports::status("done"),
            ],
        );
        let driver = driver(2, 60);

        let job = driver.submit(&api, &store(), &Query::all()).await.unwrap();
        assert_eq!(job.job_id, "T1");
        assert_eq!(job.status(), ReportStatus::Submitted);

        let ready = driver.await_ready(&api, &store(), job).await.unwrap();
        assert_eq!(ready.job.status(), ReportStatus::Ready);
        let payload = driver.download(&api, &store(), ready).await.unwrap();

        let records =
            normalize_stock_payload(&CSV_SCHEMA, MarketplaceId::Wildberries, "main", &payload).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].quantity, Some(3));
        assert_eq!(api.poll_times.lock().len(), 3);
        assert_eq!(*api.downloads.lock(), vec!["JobId(\"T1\")".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out_after_three_polls() {
        let api = ScriptedReports::new(
            Ok(json!({ "data": { "taskId": "T1" } })),
            vec![ScriptedReports::status("pending")],
        );

        let err = driver(2, 5).run(&api, &store(), &Query::all()).await.unwrap_err();

        match err {
            MarketplaceError::TimedOut { operation, elapsed } => {
                assert_eq!(operation, "report T1");
                assert!(elapsed >= Duration::from_secs(5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(api.poll_times.lock().len(), 3);
        assert!(api.downloads.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_poll_is_not_a_failure() {
        let api = ScriptedReports::new(
            Ok(json!({ "data": { "taskId": "T1" } })),
            vec![
                Err(MarketplaceError::RateLimited { attempts: 6, body: "too many requests".into() }),
                Err(MarketplaceError::RateLimited { attempts: 6, body: "too many requests".into() }),
                ScriptedReports::status("SUCCESS"),
            ],
        );

        driver(1, 30).run(&api, &store(), &Query::all()).await.unwrap();

        let polls = api.poll_times.lock();
        assert_eq!(polls.len(), 3);
        assert!(polls[1] - polls[0] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_is_terminal() {
        let api = ScriptedReports::new(
            Ok(json!({ "data": { "taskId": "T9" } })),
            vec![ScriptedReports::status("pending"), ScriptedReports::status("Canceled")],
        );

        let err = driver(1, 30).run(&api, &store(), &Query::all()).await.unwrap_err();
        assert!(matches!(
            err,
            MarketplaceError::ReportFailed { ref job_id, ref status } if job_id == "T9" && status == "Canceled"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_job_id_is_submission_error() {
        let api = ScriptedReports::new(Ok(json!({ "data": {} })), vec![ScriptedReports::status("done")]);

        let err = driver(1, 30).submit(&api, &store(), &Query::all()).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::SubmissionError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_parameters_are_submission_error() {
        let api = ScriptedReports::new(
            Err(MarketplaceError::ClientError { status: 400, body: "bad dateFrom".into() }),
            vec![ScriptedReports::status("done")],
        );

        let err = driver(1, 30).submit(&api, &store(), &Query::all()).await.unwrap_err();
        match err {
            MarketplaceError::SubmissionError(message) => assert!(message.contains("bad dateFrom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_file_url_becomes_handle() {
        let payload = json!({ "result": { "status": "success", "file": "https://cdn.example/r.csv" } });
        let (status, raw, handle) = PROFILE.poll_outcome("T1", &payload).unwrap();

        assert_eq!(status, ReportStatus::Ready);
        assert_eq!(raw, "success");
        assert!(matches!(handle, ResultHandle::Url(ref url) if url == "https://cdn.example/r.csv"));
    }

    #[test]
    fn test_vocabulary() {
        let vocabulary = StatusVocabulary::STANDARD;
        for ready in ["done", "READY", "Success", "completed", "finished"] {
            assert_eq!(vocabulary.classify(ready), ReportStatus::Ready);
        }
        for failed in ["failed", "ERROR", "cancelled", "purged"] {
            assert_eq!(vocabulary.classify(failed), ReportStatus::Failed);
        }
        assert_eq!(vocabulary.classify("new"), ReportStatus::Pending);
        assert_eq!(vocabulary.classify("PROCESSING"), ReportStatus::Pending);
        assert!(ReportStatus::TimedOut.is_terminal());
    }
}
