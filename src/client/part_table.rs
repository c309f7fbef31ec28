//! Per-part upload state owned by the coordinator.

use crate::{
    client::transport::PartEvent,
    errors::{UploadError, UploadResult},
    models::upload::{CompletedPart, PartStatus, PartUploadState, UploadSession},
};
use std::collections::VecDeque;

/// Status, progress and ETag of every part in one session.
///
/// All mutation goes through [`PartTable::begin`] and [`PartTable::apply`].
#[derive(Debug, Clone)]
pub struct PartTable {
    upload_id: String,
    states: Vec<PartUploadState>,
    sizes: Vec<u64>,
    total_bytes: u64,
}

impl PartTable {
    pub fn new(session: &UploadSession, file_size: u64) -> Self {
        let states = (1..=session.total_parts)
            .map(PartUploadState::pending)
            .collect();
        let sizes = (1..=session.total_parts)
            .map(|n| {
                let (start, end) = session.part_range(n, file_size);
                end - start
            })
            .collect();
        Self {
            upload_id: session.upload_id.clone(),
            states,
            sizes,
            total_bytes: file_size,
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn states(&self) -> &[PartUploadState] {
        &self.states
    }

    pub fn get(&self, part_number: u32) -> Option<&PartUploadState> {
        self.index(part_number).map(|i| &self.states[i])
    }

    /// Mark a part as in flight. Its progress restarts from zero.
    pub fn begin(&mut self, part_number: u32) -> Option<&PartUploadState> {
        let i = self.index(part_number)?;
        let state = &mut self.states[i];
        if state.status == PartStatus::Done || state.status == PartStatus::Uploading {
            return None;
        }
        state.status = PartStatus::Uploading;
        state.progress = 0.0;
        state.etag = None;
        state.error = None;
        Some(&self.states[i])
    }

    /// Apply one transport event to an in-flight part.
    ///
    /// Events for parts that are not uploading are ignored and return `None`.
    /// Progress never moves backwards within one attempt.
    pub fn apply(&mut self, part_number: u32, event: &PartEvent) -> Option<&PartUploadState> {
        let i = self.index(part_number)?;
        let state = &mut self.states[i];
        if state.status != PartStatus::Uploading {
            return None;
        }

        match event {
            PartEvent::Progress { sent, total } => {
                let fraction = if *total == 0 {
                    1.0
                } else {
                    (*sent as f64 / *total as f64).clamp(0.0, 1.0)
                };
                state.progress = state.progress.max(fraction);
            }
            PartEvent::Finished { etag } => {
                match etag.as_deref().map(strip_quotes).filter(|e| !e.is_empty()) {
                    Some(etag) => {
                        state.status = PartStatus::Done;
                        state.progress = 1.0;
                        state.etag = Some(etag.to_string());
                    }
                    None => {
                        state.status = PartStatus::Error;
                        state.error = Some("upload succeeded without an ETag".into());
                    }
                }
            }
            PartEvent::Failed { reason } => {
                state.status = PartStatus::Error;
                state.error = Some(reason.clone());
            }
        }
        Some(&self.states[i])
    }

    /// Byte-weighted fraction of the file sent, `0.0..=1.0`.
    pub fn overall_progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let sent: f64 = self
            .states
            .iter()
            .zip(&self.sizes)
            .map(|(state, size)| *size as f64 * state.progress)
            .sum();
        (sent / self.total_bytes as f64).min(1.0)
    }

    /// Parts that still need an upload attempt, in part order.
    pub fn retry_queue(&self) -> VecDeque<u32> {
        self.states
            .iter()
            .filter(|s| matches!(s.status, PartStatus::Error | PartStatus::Pending))
            .map(|s| s.part_number)
            .collect()
    }

    pub fn with_status(&self, status: PartStatus) -> Vec<u32> {
        self.states
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.part_number)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.states
            .iter()
            .all(|s| s.status == PartStatus::Done && s.etag.is_some())
    }

    /// Completion manifest entries, ascending, once every part is done.
    pub fn completed_parts(&self) -> UploadResult<Vec<CompletedPart>> {
        let mut parts = Vec::with_capacity(self.states.len());
        for state in &self.states {
            match (&state.status, &state.etag) {
                (PartStatus::Done, Some(etag)) if !etag.is_empty() => parts.push(CompletedPart {
                    part_number: state.part_number,
                    etag: etag.clone(),
                }),
                _ => {
                    return Err(UploadError::Precondition(format!(
                        "part {} is {:?}, every part must be done before completion",
                        state.part_number, state.status
                    )));
                }
            }
        }
        if parts.is_empty() {
            return Err(UploadError::Precondition("session has no parts".into()));
        }
        Ok(parts)
    }

    fn index(&self, part_number: u32) -> Option<usize> {
        let i = (part_number as usize).checked_sub(1)?;
        (i < self.states.len()).then_some(i)
    }
}

fn strip_quotes(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}
