//! Drives one multipart upload from the client side.
//!
//! The pool is single-task: each in-flight part is a stream of [`PartEvent`]s
//! merged into one `SelectAll`, and an explicit counter keeps at most
//! `concurrency` of them open. Every terminal event frees a slot and the next
//! queued part is launched straight away.

use crate::{
    client::{
        api::UploadApi,
        part_table::PartTable,
        source::ByteSource,
        transport::{PartEvent, PartTransport},
    },
    config::DEFAULT_CONCURRENCY,
    errors::{UploadError, UploadResult},
    models::upload::{
        CompleteUploadRequest, CompleteUploadResponse, CompletedPart, CreateUploadRequest,
        CreateUploadResponse, PartStatus, PartUploadState, UploadSession,
    },
};
use futures::{
    StreamExt, future,
    stream::{self, BoxStream, SelectAll},
};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Creating,
    Uploading,
    Completing,
    Done,
    Error,
}

/// One part changed; `overall` is the byte-weighted fraction of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub part: PartUploadState,
    pub overall: f64,
}

/// Outcome of one pass of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub done: Vec<u32>,
    pub failed: Vec<u32>,
    /// Never launched, because the upload was cancelled.
    pub pending: Vec<u32>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty()
    }

    fn from_table(table: &PartTable) -> Self {
        Self {
            done: table.with_status(PartStatus::Done),
            failed: table.with_status(PartStatus::Error),
            pending: table.with_status(PartStatus::Pending),
        }
    }
}

pub struct UploadCoordinator<T> {
    transport: T,
    concurrency: usize,
    phase: UploadPhase,
    table: Option<PartTable>,
    cancel: CancellationToken,
    observers: Vec<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl<T: PartTransport> UploadCoordinator<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            concurrency: DEFAULT_CONCURRENCY,
            phase: UploadPhase::Idle,
            table: None,
            cancel: CancellationToken::new(),
            observers: Vec::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Use a token owned by the caller, e.g. one tied to a signal handler.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Receive every part state change from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ProgressUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    /// Handle for cancelling from another task while an upload runs.
    ///
    /// Cancellation is permanent for this coordinator: queued parts are never
    /// launched, in-flight parts finish on their own.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    pub fn parts(&self) -> &[PartUploadState] {
        self.table.as_ref().map(PartTable::states).unwrap_or_default()
    }

    pub fn overall_progress(&self) -> f64 {
        self.table.as_ref().map_or(0.0, PartTable::overall_progress)
    }

    /// Upload every part of a fresh session.
    pub async fn upload<S: ByteSource>(
        &mut self,
        session: &UploadSession,
        source: &S,
    ) -> UploadResult<UploadReport> {
        let size = source.size();
        if !session.fits(size) {
            return Err(UploadError::Precondition(format!(
                "session {} does not describe a {size} byte source",
                session.upload_id
            )));
        }
        self.table = Some(PartTable::new(session, size));
        info!(
            upload_id = %session.upload_id,
            parts = session.total_parts,
            concurrency = self.concurrency,
            "uploading parts"
        );
        self.run_pool(session, source).await
    }

    /// Re-queue parts in `error` (or never launched) and upload them again.
    /// Parts already `done` keep their ETags and are not re-sent.
    pub async fn retry_failed<S: ByteSource>(
        &mut self,
        session: &UploadSession,
        source: &S,
    ) -> UploadResult<UploadReport> {
        match &self.table {
            Some(table) if table.upload_id() == session.upload_id => {}
            _ => {
                return Err(UploadError::Precondition(format!(
                    "no upload in progress for session {}",
                    session.upload_id
                )));
            }
        }
        if !session.fits(source.size()) {
            return Err(UploadError::Precondition(format!(
                "session {} does not describe a {} byte source",
                session.upload_id,
                source.size()
            )));
        }
        info!(upload_id = %session.upload_id, "retrying failed parts");
        self.run_pool(session, source).await
    }

    /// Manifest entries, refused unless every part is `done`.
    pub fn completed_parts(&self) -> UploadResult<Vec<CompletedPart>> {
        match &self.table {
            Some(table) => table.completed_parts(),
            None => Err(UploadError::Precondition("nothing has been uploaded".into())),
        }
    }

    /// Commit the session through the vault API.
    ///
    /// Incomplete uploads are rejected locally and leave the phase untouched.
    pub async fn complete<A: UploadApi>(
        &mut self,
        api: &A,
        media_id: Uuid,
        session: &UploadSession,
        size_bytes: u64,
    ) -> UploadResult<CompleteUploadResponse> {
        let parts = self.completed_parts()?;
        self.phase = UploadPhase::Completing;

        let request = CompleteUploadRequest {
            media_id,
            upload_id: session.upload_id.clone(),
            object_key: session.object_key.clone(),
            size_bytes,
            parts,
        };
        match api.complete_upload(&request).await {
            Ok(response) => {
                self.phase = UploadPhase::Done;
                info!(%media_id, "upload complete");
                Ok(response)
            }
            Err(err) => {
                self.phase = UploadPhase::Error;
                Err(err)
            }
        }
    }

    /// Create a session, upload it with up to `retry_rounds` explicit retries,
    /// then complete it.
    pub async fn run<A: UploadApi, S: ByteSource>(
        &mut self,
        api: &A,
        request: &CreateUploadRequest,
        source: &S,
        retry_rounds: u32,
    ) -> UploadResult<CreateUploadResponse> {
        self.phase = UploadPhase::Creating;
        let created = match api.create_session(request).await {
            Ok(created) => created,
            Err(err) => {
                self.phase = UploadPhase::Error;
                return Err(err);
            }
        };
        let session = &created.session;

        let mut report = match self.upload(session, source).await {
            Ok(report) => report,
            Err(err) => {
                self.phase = UploadPhase::Error;
                return Err(err);
            }
        };
        let mut round = 0;
        while !report.failed.is_empty() && round < retry_rounds && !self.cancel.is_cancelled() {
            round += 1;
            warn!(round, failed = ?report.failed, "retrying failed parts");
            report = self.retry_failed(session, source).await?;
        }

        if !report.is_complete() {
            self.phase = UploadPhase::Error;
            return Err(self.incomplete_error(&report));
        }

        self.complete(api, created.media_id, session, source.size())
            .await?;
        Ok(created)
    }

    async fn run_pool<S: ByteSource>(
        &mut self,
        session: &UploadSession,
        source: &S,
    ) -> UploadResult<UploadReport> {
        let Some(table) = self.table.as_mut() else {
            return Err(UploadError::Precondition("nothing to upload".into()));
        };
        self.phase = UploadPhase::Uploading;

        let queue = table.retry_queue();
        drive(
            &self.transport,
            source,
            session,
            table,
            queue,
            self.concurrency,
            &self.cancel,
            &mut self.observers,
        )
        .await;

        let report = UploadReport::from_table(table);
        if !report.failed.is_empty() {
            self.phase = UploadPhase::Error;
        }
        Ok(report)
    }

    fn incomplete_error(&self, report: &UploadReport) -> UploadError {
        if let Some(&part_number) = report.failed.first() {
            let reason = self
                .table
                .as_ref()
                .and_then(|t| t.get(part_number))
                .and_then(|s| s.error.clone())
                .unwrap_or_else(|| "unknown failure".into());
            UploadError::PartTransport {
                part_number,
                reason,
            }
        } else {
            UploadError::Precondition(format!(
                "upload cancelled with {} parts never sent",
                report.pending.len()
            ))
        }
    }
}

type TaggedStream<'a> = BoxStream<'a, (u32, PartEvent)>;

#[allow(clippy::too_many_arguments)]
async fn drive<T: PartTransport, S: ByteSource>(
    transport: &T,
    source: &S,
    session: &UploadSession,
    table: &mut PartTable,
    mut queue: VecDeque<u32>,
    concurrency: usize,
    cancel: &CancellationToken,
    observers: &mut Vec<mpsc::UnboundedSender<ProgressUpdate>>,
) {
    let size = source.size();
    let mut streams: SelectAll<TaggedStream<'_>> = SelectAll::new();
    let mut in_flight = 0usize;

    loop {
        while in_flight < concurrency && !cancel.is_cancelled() {
            let Some(part_number) = queue.pop_front() else {
                break;
            };
            let Some(state) = table.begin(part_number).cloned() else {
                continue;
            };
            notify(observers, state, table.overall_progress());

            let stream = match session.parts.iter().find(|p| p.part_number == part_number) {
                Some(plan) => {
                    let range = session.part_range(part_number, size);
                    debug!(part_number, start = range.0, end = range.1, "launching part");
                    part_stream(transport, source, plan.url.clone(), part_number, range)
                }
                None => failed_stream(part_number, "session has no URL for this part".into()),
            };
            streams.push(stream);
            in_flight += 1;
        }

        if in_flight == 0 {
            break;
        }
        let Some((part_number, event)) = streams.next().await else {
            break;
        };

        let terminal = event.is_terminal();
        if let Some(state) = table.apply(part_number, &event).cloned() {
            match state.status {
                PartStatus::Done => debug!(part_number, "part done"),
                PartStatus::Error => {
                    warn!(part_number, error = ?state.error, "part failed")
                }
                _ => {}
            }
            notify(observers, state, table.overall_progress());
        }
        if terminal {
            in_flight -= 1;
        }
    }

    if cancel.is_cancelled() && !queue.is_empty() {
        info!(unsent = queue.len(), "upload cancelled");
    }
}

/// Read the part's bytes, PUT them, and end after the first terminal event.
///
/// A transport that closes without a terminal event yields a failure, so
/// every launched part frees its slot exactly once.
fn part_stream<'a, T: PartTransport, S: ByteSource>(
    transport: &'a T,
    source: &'a S,
    url: String,
    part_number: u32,
    (start, end): (u64, u64),
) -> TaggedStream<'a> {
    stream::once(async move { source.read_range(start, end).await })
        .flat_map(move |read| match read {
            Ok(body) => transport.put_part(&url, body),
            Err(err) => stream::once(future::ready(PartEvent::Failed {
                reason: format!("reading bytes {start}..{end}: {err}"),
            }))
            .boxed(),
        })
        .chain(stream::once(future::ready(PartEvent::Failed {
            reason: "transport closed without a result".into(),
        })))
        .scan(false, |finished, event| {
            if *finished {
                return future::ready(None);
            }
            *finished = event.is_terminal();
            future::ready(Some(event))
        })
        .map(move |event| (part_number, event))
        .boxed()
}

fn failed_stream<'a>(part_number: u32, reason: String) -> TaggedStream<'a> {
    stream::once(future::ready((part_number, PartEvent::Failed { reason }))).boxed()
}

fn notify(
    observers: &mut Vec<mpsc::UnboundedSender<ProgressUpdate>>,
    part: PartUploadState,
    overall: f64,
) {
    let update = ProgressUpdate { part, overall };
    observers.retain(|tx| tx.send(update.clone()).is_ok());
}
