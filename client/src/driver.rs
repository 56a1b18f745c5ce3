//! Client upload driver.
//!
//! Drives one multipart session through `Starting → Uploading → Completing
//! → Done`, or through `Aborting → Aborted` on cancellation or failure.
//! Parts go out strictly in order: part `n + 1` is read and sent only once
//! part `n` has its ETag.

use shared::{CompleteUploadResponse, CompletedPart};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::api::UploadApi;
use crate::error::{ApiError, DriverError};
use crate::source::{ChunkPlan, UploadSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Starting,
    Uploading,
    Completing,
    Done,
    Aborting,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub state: UploadState,
    pub completed_parts: u32,
    pub total_parts: u32,
}

impl Progress {
    fn idle(total_parts: u32) -> Self {
        Progress {
            state: UploadState::Idle,
            completed_parts: 0,
            total_parts,
        }
    }

    /// Stays below 100 until the object has been assembled.
    pub fn percent(&self) -> u8 {
        if self.state == UploadState::Done {
            return 100;
        }
        if self.total_parts == 0 {
            return 0;
        }
        let pct = self.completed_parts as u64 * 100 / self.total_parts as u64;
        pct.min(99) as u8
    }
}

/// Cooperative cancellation shared between a session and whoever may
/// cancel it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        CancelToken { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// At most `shared::MAX_PART_SIZE`.
    pub chunk_size: usize,
    /// Smallest chunk allowed when a file spans several parts.
    pub min_chunk_size: usize,
    /// Attempts per part. 1 fails fast; 2 retries once before aborting.
    pub part_attempts: u32,
    /// Delay before the first retry of a part; doubles per attempt.
    pub retry_backoff: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            chunk_size: shared::DEFAULT_CHUNK_SIZE,
            min_chunk_size: shared::MIN_PART_SIZE,
            part_attempts: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Holds the single active-upload slot until dropped.
#[derive(Debug)]
struct ActiveGuard(Arc<AtomicBool>);

impl ActiveGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ActiveGuard(flag.clone()))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Hands out upload sessions, at most one at a time.
pub struct Uploader<A> {
    api: Arc<A>,
    config: DriverConfig,
    active: Arc<AtomicBool>,
}

impl<A: UploadApi> Uploader<A> {
    pub fn new(api: A, config: DriverConfig) -> Self {
        Uploader {
            api: Arc::new(api),
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claims the upload slot for `source`. Fails while another session
    /// is outstanding, for empty sources and for chunk sizes the server or
    /// the backend would refuse.
    pub fn begin(&self, source: UploadSource) -> Result<UploadSession<A>, DriverError> {
        let guard = ActiveGuard::acquire(&self.active).ok_or(DriverError::UploadAlreadyInProgress)?;
        if source.is_empty() {
            return Err(DriverError::InvalidInput(format!(
                "{} is empty",
                source.filename()
            )));
        }
        if self.config.chunk_size == 0 || self.config.chunk_size > shared::MAX_PART_SIZE {
            return Err(DriverError::InvalidInput(format!(
                "chunk size must be between 1 and {} bytes",
                shared::MAX_PART_SIZE
            )));
        }

        let plan = ChunkPlan::new(source.len(), self.config.chunk_size);
        if plan.part_count() > 1 && self.config.chunk_size < self.config.min_chunk_size {
            return Err(DriverError::InvalidInput(format!(
                "chunk size {} is below the {} byte minimum for multi-part uploads",
                self.config.chunk_size, self.config.min_chunk_size
            )));
        }
        let (progress, _) = watch::channel(Progress::idle(plan.part_count()));
        Ok(UploadSession {
            api: self.api.clone(),
            config: self.config.clone(),
            plan,
            source,
            cancel: CancelToken::new(),
            progress,
            _guard: guard,
        })
    }
}

/// One multipart upload. Consumed by [`UploadSession::run`]; the upload
/// slot is released when the session ends or is dropped.
pub struct UploadSession<A> {
    api: Arc<A>,
    config: DriverConfig,
    plan: ChunkPlan,
    source: UploadSource,
    cancel: CancelToken,
    progress: watch::Sender<Progress>,
    _guard: ActiveGuard,
}

impl<A: UploadApi> UploadSession<A> {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn total_parts(&self) -> u32 {
        self.plan.part_count()
    }

    fn publish(&self, state: UploadState, completed_parts: u32) {
        self.progress.send_replace(Progress {
            state,
            completed_parts,
            total_parts: self.plan.part_count(),
        });
    }

    pub async fn run(self) -> Result<CompleteUploadResponse, DriverError> {
        self.publish(UploadState::Starting, 0);
        if self.cancel.is_cancelled() {
            // No upload id yet, so there is nothing to abort remotely.
            self.publish(UploadState::Aborted, 0);
            return Err(DriverError::Aborted { reason: "cancelled".to_string() });
        }

        // Not raced against cancellation: once the server has opened the
        // upload, only its id lets us abort it.
        let started = match self
            .api
            .start(self.source.filename(), self.source.content_type())
            .await
        {
            Ok(started) => started,
            Err(e) => {
                self.publish(UploadState::Aborted, 0);
                return Err(e.into());
            }
        };
        let (key, upload_id) = (started.key, started.upload_id);
        if self.cancel.is_cancelled() {
            return Err(self.abort(&key, &upload_id, "cancelled".to_string()).await);
        }
        log::info!(
            "Uploading {} as {} in {} parts",
            self.source.filename(),
            key,
            self.plan.part_count()
        );

        self.publish(UploadState::Uploading, 0);
        let mut parts = Vec::with_capacity(self.plan.part_count() as usize);
        for part_number in 1..=self.plan.part_count() {
            if self.cancel.is_cancelled() {
                return Err(self.abort(&key, &upload_id, "cancelled".to_string()).await);
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                r = self.send_part(&key, &upload_id, part_number) => Some(r),
            };
            match result {
                None => return Err(self.abort(&key, &upload_id, "cancelled".to_string()).await),
                Some(Err(e)) => {
                    let reason = format!("part {} failed: {}", part_number, e);
                    return Err(self.abort(&key, &upload_id, reason).await);
                }
                Some(Ok(e_tag)) => {
                    parts.push(CompletedPart { e_tag, part_number });
                    self.publish(UploadState::Uploading, part_number);
                }
            }
        }

        self.publish(UploadState::Completing, self.plan.part_count());
        let completed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            r = self.api.complete(&key, &upload_id, parts) => Some(r),
        };
        match completed {
            None => Err(self.abort(&key, &upload_id, "cancelled".to_string()).await),
            Some(Err(e)) => {
                let reason = format!("complete failed: {}", e);
                Err(self.abort(&key, &upload_id, reason).await)
            }
            Some(Ok(response)) => {
                self.publish(UploadState::Done, self.plan.part_count());
                log::info!("Upload of {} completed", response.key);
                Ok(response)
            }
        }
    }

    /// Reads and sends one part, retrying transient failures within the
    /// configured attempt budget.
    async fn send_part(&self, key: &str, upload_id: &str, part_number: u32) -> Result<String, ApiError> {
        let (offset, len) = self.plan.range(part_number);
        let data = self.source.read_chunk(offset, len).await?;

        let attempts = self.config.part_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .api
                .upload_part(key, upload_id, part_number, data.clone())
                .await
            {
                Ok(e_tag) => return Ok(e_tag),
                Err(e) if attempt < attempts && e.is_transient() => {
                    let delay = self.config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    log::warn!(
                        "Part {} attempt {}/{} failed: {}. Retrying in {:?}",
                        part_number,
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort remote cleanup; the local session ends `Aborted` with
    /// progress reset regardless of the outcome.
    async fn abort(&self, key: &str, upload_id: &str, reason: String) -> DriverError {
        self.publish(UploadState::Aborting, 0);
        match self.api.abort(key, upload_id).await {
            Ok(()) => log::warn!("Aborted upload {} ({})", key, reason),
            Err(e) => log::warn!("Failed to abort upload {}: {}", key, e),
        }
        self.publish(UploadState::Aborted, 0);
        DriverError::Aborted { reason }
    }
}
