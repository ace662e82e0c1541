//! The upload scheduler: bounded concurrency, retry, reconciliation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chunkferry_protocol::{ChunkHeader, ChunkResponse, ErrorReason};

use crate::SenderError;
use crate::chunker::{UploadJob, plan_jobs, read_job_bytes};
use crate::config::SenderConfig;
use crate::transport::{ChunkRequest, ChunkTransport, TransportError};

/// Terminal state of one upload. Exactly one outcome is produced per
/// [`Uploader::run`] call.
#[derive(Debug)]
pub enum UploadOutcome {
    /// Every piece was acknowledged and the receiver assembled the file.
    Completed { response: ChunkResponse },
    /// The upload cannot finish.
    Failed { reason: UploadFailure },
    /// Cancelled through the uploader's [`CancellationToken`].
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadFailure {
    /// The receiver rejected the transfer outright.
    Rejected(ErrorReason),
    /// One or more pieces exhausted their retries.
    Incomplete,
}

/// Drives one file upload to completion.
pub struct Uploader {
    config: SenderConfig,
    cancel: CancellationToken,
    upload_id: String,
}

impl Uploader {
    pub fn new(config: SenderConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            upload_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// The opaque identifier every chunk of this upload carries.
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Token that aborts the upload when cancelled. Pieces already held by
    /// the receiver stay there until they expire.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads the file at `path` through `transport`.
    ///
    /// Keeps at most `num_parallel` chunks in flight. Each chunk retries up
    /// to `max_retries` times on transport failure; after every partial
    /// acknowledgement the locally-acknowledged set is reconciled against
    /// the receiver's `storedPieces` list, and pieces the receiver no longer
    /// holds are re-queued with a fresh retry budget.
    pub async fn run(
        &self,
        path: &Path,
        transport: Arc<dyn ChunkTransport>,
    ) -> Result<UploadOutcome, SenderError> {
        let file_size = tokio::fs::metadata(path).await?.len();
        let jobs = plan_jobs(file_size, self.config.chunk_size);
        let total = jobs.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        info!(
            upload_id = %self.upload_id,
            file = %file_name,
            size = file_size,
            parts = total,
            "upload started"
        );

        let mut pending: VecDeque<(UploadJob, u32)> =
            jobs.into_iter().map(|job| (job, 0)).collect();
        let mut inflight: JoinSet<(UploadJob, u32, Result<ChunkResponse, TransportError>)> =
            JoinSet::new();
        let mut acked: HashMap<u32, UploadJob> = HashMap::new();
        let mut last_response: Option<ChunkResponse> = None;
        let mut succeeded = false;
        let mut dispatched: u64 = 0;
        let mut flake_debt = 0.0_f64;

        loop {
            while inflight.len() < self.config.num_parallel {
                let Some((job, attempt)) = pending.pop_front() else {
                    break;
                };
                dispatched += 1;
                let induced = self.induced_failure(dispatched, &mut flake_debt);
                self.dispatch(&mut inflight, path, &file_name, job, attempt, induced, &transport);
            }

            if inflight.is_empty() {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    inflight.shutdown().await;
                    info!(upload_id = %self.upload_id, "upload cancelled");
                    return Ok(UploadOutcome::Cancelled);
                }
                Some(joined) = inflight.join_next() => {
                    let (job, attempt, result) = match joined {
                        Ok(v) => v,
                        Err(e) => {
                            error!(upload_id = %self.upload_id, error = %e, "chunk task failed to join");
                            continue;
                        }
                    };
                    match result {
                        Ok(response) => match response {
                            ChunkResponse::Complete { .. } => {
                                acked.insert(job.part_num, job);
                                succeeded = true;
                                last_response = Some(response);
                                self.report_progress(acked.len(), total);
                            }
                            ChunkResponse::Partial { stored_pieces } => {
                                acked.insert(job.part_num, job);
                                let stored: HashSet<u32> = stored_pieces.iter().copied().collect();
                                let lost: Vec<UploadJob> = acked
                                    .values()
                                    .filter(|j| !stored.contains(&j.part_num))
                                    .copied()
                                    .collect();
                                for lost_job in lost {
                                    warn!(
                                        upload_id = %self.upload_id,
                                        part_num = lost_job.part_num,
                                        "acknowledged piece missing on receiver, re-queueing"
                                    );
                                    acked.remove(&lost_job.part_num);
                                    pending.push_back((lost_job, 0));
                                }
                                last_response = Some(ChunkResponse::Partial { stored_pieces });
                                self.report_progress(acked.len(), total);
                            }
                            ChunkResponse::Error { reason } => {
                                if reason == ErrorReason::SizeExceeded {
                                    inflight.shutdown().await;
                                    warn!(upload_id = %self.upload_id, %reason, "upload rejected");
                                    return Ok(UploadOutcome::Failed {
                                        reason: UploadFailure::Rejected(reason),
                                    });
                                }
                                self.retry_or_abandon(
                                    &mut pending,
                                    job,
                                    attempt,
                                    &TransportError(reason.to_string()),
                                );
                            }
                        },
                        Err(e) => self.retry_or_abandon(&mut pending, job, attempt, &e),
                    }
                }
            }
        }

        match last_response {
            Some(response) if succeeded => {
                info!(upload_id = %self.upload_id, "upload complete");
                Ok(UploadOutcome::Completed { response })
            }
            _ => {
                warn!(upload_id = %self.upload_id, "upload incomplete after drain");
                Ok(UploadOutcome::Failed {
                    reason: UploadFailure::Incomplete,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        inflight: &mut JoinSet<(UploadJob, u32, Result<ChunkResponse, TransportError>)>,
        path: &Path,
        file_name: &str,
        job: UploadJob,
        attempt: u32,
        induced: bool,
        transport: &Arc<dyn ChunkTransport>,
    ) {
        let header = ChunkHeader {
            file_name: file_name.to_string(),
            num_parts: job.num_parts,
            part_num: job.part_num,
            upload_id: self.upload_id.clone(),
        };
        let url = self.config.url.clone();
        let extra = self.config.extra_headers.clone();
        let path = path.to_path_buf();
        let transport = Arc::clone(transport);

        inflight.spawn(async move {
            if induced {
                return (job, attempt, Err(TransportError("induced sender failure".into())));
            }
            let result = async {
                let body = read_job_bytes(&path, &job)
                    .await
                    .map_err(|e| TransportError(e.to_string()))?;
                let mut headers = header.to_wire();
                headers.extend(extra);
                transport.send_chunk(ChunkRequest { url, headers, body }).await
            }
            .await;
            (job, attempt, result)
        });
    }

    fn retry_or_abandon(
        &self,
        pending: &mut VecDeque<(UploadJob, u32)>,
        job: UploadJob,
        attempt: u32,
        error: &TransportError,
    ) {
        if attempt < self.config.max_retries {
            debug!(
                upload_id = %self.upload_id,
                part_num = job.part_num,
                attempt,
                error = %error,
                "chunk failed, retrying"
            );
            pending.push_back((job, attempt + 1));
        } else {
            warn!(
                upload_id = %self.upload_id,
                part_num = job.part_num,
                error = %error,
                "chunk abandoned after retries"
            );
        }
    }

    fn induced_failure(&self, dispatched: u64, flake_debt: &mut f64) -> bool {
        if let Some(n) = self.config.fail_after {
            if dispatched > n {
                return true;
            }
        }
        if self.config.flakiness > 0.0 {
            *flake_debt += self.config.flakiness;
            if *flake_debt >= 1.0 {
                *flake_debt -= 1.0;
                return true;
            }
        }
        false
    }

    fn report_progress(&self, acked: usize, total: usize) {
        let fraction = if total == 0 {
            1.0
        } else {
            acked as f64 / total as f64
        };
        (self.config.progress)(fraction);
    }
}
