//! Import session: the state machine that takes a set of files from upload
//! to a committed batch.
//!
//! The session is driven by explicit commands (`add_file`,
//! `begin_validation`, `apply`, `set_mapping`, `submit`, `remove_file`,
//! `clear`). Each command appends to an event log, and callers observe state
//! through immutable [`SessionSnapshot`]s.
//!
//! Reading and parsing files happens outside the session: `begin_validation`
//! hands out [`ReadTicket`]s, [`load_file`] turns a ticket into a
//! [`FileLoaded`] (concurrently with other tickets), and `apply` folds the
//! result back in by file id. Results for files that were removed, or for a
//! session that was cleared in the meantime, are dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{FileFailure, PennywiseError, Result};
use crate::importer::{parse_file, FileMetadata, ImportFormat, ParsedFile};
use crate::mapping::{self, IdentityMapping, MappingTarget};
use crate::models::{CanonicalTransaction, GroupId, Member, TransactionDraft, UserId};
use crate::normalizer::SkippedRow;
use crate::submit::{BatchRequest, BatchSubmitter};
use crate::validator::ValidationVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FileId(u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportState {
    Idle,
    FilesSelected,
    Validating,
    ReadyToMap,
    ReadyToImport,
    Submitting,
    Completed,
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::FilesSelected => "files selected",
            Self::Validating => "validating",
            Self::ReadyToMap => "ready to map",
            Self::ReadyToImport => "ready to import",
            Self::Submitting => "submitting",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Validating,
    Ready,
    MappingRequired,
    Submitting,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Per-file outcome of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileImportResult {
    pub file_id: FileId,
    pub file_name: String,
    pub success: bool,
    pub imported_count: usize,
    pub errors: Vec<String>,
    pub skipped_rows: Vec<usize>,
}

/// Aggregate over every file attempted in one `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionResult {
    pub total_imported: usize,
    pub total_files: usize,
    pub errors: Vec<String>,
    /// True when anything at all was imported, even if other files failed.
    pub success: bool,
    pub files: Vec<FileImportResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawFile {
    pub id: FileId,
    pub name: String,
    #[serde(skip)]
    source: FileSource,
    pub status: FileStatus,
    pub error: Option<String>,
    pub format: Option<ImportFormat>,
    pub verdict: Option<ValidationVerdict>,
    pub metadata: Option<FileMetadata>,
    #[serde(skip)]
    drafts: Vec<TransactionDraft>,
    pub draft_count: usize,
    pub skipped: Vec<SkippedRow>,
    pub result: Option<FileImportResult>,
}

impl RawFile {
    /// The file never got past reading or header validation.
    fn blocked(&self) -> bool {
        self.verdict.as_ref().map_or(true, |v| !v.success)
    }

    fn identities(&self) -> BTreeSet<String> {
        mapping::collect_identities(&self.drafts)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    FileAdded { file: FileId, name: String },
    #[cfg_attr(not(test), allow(dead_code))]
    FileRemoved { file: FileId },
    ValidationStarted { file: FileId },
    FileValidated { file: FileId, drafts: usize, skipped: usize },
    FileFailed { file: FileId, error: String },
    IdentitiesDiscovered { file: FileId, added: usize },
    MappingSet { identity: String, target: MappingTarget },
    StateChanged { from: ImportState, to: ImportState },
    FileSubmitted { file: FileId, imported: usize },
    SessionCleared { previous: SessionId },
    StaleResultDropped { session: SessionId, file: FileId },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session: SessionId,
    pub group_id: GroupId,
    pub state: ImportState,
    pub files: Vec<RawFile>,
    pub identities: Vec<String>,
    pub mapping: IdentityMapping,
    pub unmapped: Vec<String>,
    pub mapping_complete: bool,
    pub last_result: Option<SessionResult>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Permission to read one file on behalf of one session.
#[derive(Debug)]
pub struct ReadTicket {
    pub session: SessionId,
    pub file: FileId,
    source: FileSource,
    format: Option<ImportFormat>,
    cancel: watch::Receiver<bool>,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Parsed(ParsedFile),
    Failed(FileFailure),
    Cancelled,
}

#[derive(Debug)]
pub struct FileLoaded {
    pub session: SessionId,
    pub file: FileId,
    pub outcome: LoadOutcome,
}

async fn read_source(source: FileSource) -> std::io::Result<Vec<u8>> {
    match source {
        FileSource::Path(path) => tokio::fs::read(path).await,
        FileSource::Bytes(bytes) => Ok(bytes),
    }
}

/// Read and parse one file. Resolves early with `Cancelled` if the session
/// that issued the ticket is cleared while the read is in flight.
pub async fn load_file(ticket: ReadTicket) -> FileLoaded {
    let ReadTicket {
        session,
        file,
        source,
        format,
        mut cancel,
    } = ticket;

    let outcome = if *cancel.borrow() {
        LoadOutcome::Cancelled
    } else {
        tokio::select! {
            biased;
            _ = cancel.changed() => LoadOutcome::Cancelled,
            read = read_source(source) => match read {
                Ok(bytes) => match parse_file(&bytes, format) {
                    Ok(parsed) => LoadOutcome::Parsed(parsed),
                    Err(failure) => LoadOutcome::Failed(failure),
                },
                Err(e) => LoadOutcome::Failed(FileFailure::Unreadable(e.to_string())),
            },
        }
    };
    FileLoaded {
        session,
        file,
        outcome,
    }
}

/// Load every ticket concurrently. Results arrive in completion order;
/// `apply` keys on file id, so callers never rely on ticket order.
pub async fn load_all(tickets: Vec<ReadTicket>) -> Vec<FileLoaded> {
    tickets
        .into_iter()
        .map(load_file)
        .collect::<FuturesUnordered<_>>()
        .collect()
        .await
}

// ---------------------------------------------------------------------------
// ImportSession
// ---------------------------------------------------------------------------

pub struct ImportSession {
    id: SessionId,
    group_id: GroupId,
    format: Option<ImportFormat>,
    allow_ignored: bool,
    members: Vec<Member>,
    files: Vec<RawFile>,
    mapping: IdentityMapping,
    state: ImportState,
    submitted: bool,
    last_result: Option<SessionResult>,
    events: Vec<SessionEvent>,
    next_file: u64,
    cancel: watch::Sender<bool>,
}

impl ImportSession {
    pub fn new(group_id: GroupId, members: Vec<Member>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id: SessionId(1),
            group_id,
            format: None,
            allow_ignored: false,
            members,
            files: Vec::new(),
            mapping: IdentityMapping::new(),
            state: ImportState::Idle,
            submitted: false,
            last_result: None,
            events: Vec::new(),
            next_file: 1,
            cancel,
        }
    }

    /// Force every file through one format instead of detecting per file.
    pub fn with_format(mut self, format: Option<ImportFormat>) -> Self {
        self.format = format;
        self
    }

    /// Treat an explicit `ignore` as a confirmed choice: rows for that payer
    /// are left out of the batch instead of blocking the import.
    pub fn allow_ignored(mut self, allow: bool) -> Self {
        self.allow_ignored = allow;
        self
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    #[cfg(test)]
    fn file(&self, id: FileId) -> Option<&RawFile> {
        self.files.iter().find(|f| f.id == id)
    }

    /// Distinct payer identities across every loaded file.
    pub fn identities(&self) -> BTreeSet<String> {
        mapping::collect_identities(self.files.iter().flat_map(|f| f.drafts.iter()))
    }

    pub fn unmapped(&self) -> Vec<String> {
        mapping::unmapped(&self.identities(), &self.mapping, self.allow_ignored)
    }

    pub fn is_complete(&self) -> bool {
        let identities = self.identities();
        if self.allow_ignored {
            mapping::unmapped(&identities, &self.mapping, true).is_empty()
        } else {
            mapping::is_complete(&identities, &self.mapping)
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let identities = self.identities();
        let unmapped = mapping::unmapped(&identities, &self.mapping, self.allow_ignored);
        SessionSnapshot {
            session: self.id,
            group_id: self.group_id,
            state: self.state,
            files: self.files.clone(),
            identities: identities.into_iter().collect(),
            mapping_complete: unmapped.is_empty(),
            unmapped,
            mapping: self.mapping.clone(),
            last_result: self.last_result.clone(),
        }
    }

    // -- commands -----------------------------------------------------------

    pub fn add_file(&mut self, name: impl Into<String>, source: FileSource) -> FileId {
        let id = FileId(self.next_file);
        self.next_file += 1;
        let name = name.into();
        debug!(file = %id, %name, "file added");
        self.events.push(SessionEvent::FileAdded {
            file: id,
            name: name.clone(),
        });
        self.files.push(RawFile {
            id,
            name,
            source,
            status: FileStatus::Pending,
            error: None,
            format: None,
            verdict: None,
            metadata: None,
            drafts: Vec::new(),
            draft_count: 0,
            skipped: Vec::new(),
            result: None,
        });
        self.submitted = false;
        self.refresh_state();
        id
    }

    /// Mark every pending file as validating and hand out one read ticket
    /// per file.
    pub fn begin_validation(&mut self) -> Vec<ReadTicket> {
        let mut tickets = Vec::new();
        for file in self.files.iter_mut().filter(|f| f.status == FileStatus::Pending) {
            file.status = FileStatus::Validating;
            self.events.push(SessionEvent::ValidationStarted { file: file.id });
            tickets.push(ReadTicket {
                session: self.id,
                file: file.id,
                source: file.source.clone(),
                format: self.format,
                cancel: self.cancel.subscribe(),
            });
        }
        self.refresh_state();
        tickets
    }

    /// Fold a finished load into the session. Returns false when the result
    /// was stale and dropped.
    pub fn apply(&mut self, loaded: FileLoaded) -> bool {
        let FileLoaded {
            session,
            file: file_id,
            outcome,
        } = loaded;

        let idx = self
            .files
            .iter()
            .position(|f| f.id == file_id && f.status == FileStatus::Validating);
        let (idx, loaded) = match (session == self.id, idx, outcome) {
            (true, Some(idx), LoadOutcome::Parsed(parsed)) => (idx, Ok(parsed)),
            (true, Some(idx), LoadOutcome::Failed(failure)) => (idx, Err(failure)),
            _ => {
                warn!(file = %file_id, "dropping stale load result");
                self.events.push(SessionEvent::StaleResultDropped {
                    session,
                    file: file_id,
                });
                return false;
            }
        };

        match loaded {
            Ok(parsed) => self.apply_parsed(idx, parsed),
            Err(failure) => self.fail_file(idx, failure.to_string()),
        }
        self.refresh_state();
        true
    }

    fn apply_parsed(&mut self, idx: usize, parsed: ParsedFile) {
        let ParsedFile {
            format,
            verdict,
            metadata,
            drafts,
            skipped,
        } = parsed;

        let file = &mut self.files[idx];
        file.format = Some(format);
        file.metadata = Some(metadata);
        file.draft_count = drafts.len();
        file.drafts = drafts;
        file.skipped = skipped;
        let blocked = (!verdict.success).then(|| verdict.message());
        file.verdict = Some(verdict);

        if let Some(message) = blocked {
            self.fail_file(idx, message);
            return;
        }

        let file = &mut self.files[idx];
        file.status = FileStatus::Ready;
        let id = file.id;
        info!(
            file = %id,
            format = format.key(),
            drafts = file.draft_count,
            skipped = file.skipped.len(),
            "file validated"
        );
        self.events.push(SessionEvent::FileValidated {
            file: id,
            drafts: file.draft_count,
            skipped: file.skipped.len(),
        });

        let identities = file.identities();
        let added = self.mapping.merge_suggestions(&identities, &self.members);
        if added > 0 {
            self.events.push(SessionEvent::IdentitiesDiscovered { file: id, added });
        }
    }

    fn fail_file(&mut self, idx: usize, error: String) {
        let file = &mut self.files[idx];
        warn!(file = %file.id, name = %file.name, %error, "file failed");
        file.status = FileStatus::Failed;
        file.error = Some(error.clone());
        self.events.push(SessionEvent::FileFailed { file: file.id, error });
    }

    /// Unused by the CLI, which never drops a file once added.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn remove_file(&mut self, id: FileId) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.id != id);
        if self.files.len() == before {
            return false;
        }
        self.events.push(SessionEvent::FileRemoved { file: id });
        self.submitted = false;
        self.refresh_state();
        true
    }

    pub fn set_mapping(&mut self, identity: impl Into<String>, target: MappingTarget) {
        let identity = identity.into();
        debug!(%identity, %target, "mapping set");
        self.mapping.set(identity.clone(), target);
        self.events.push(SessionEvent::MappingSet { identity, target });
        self.refresh_state();
    }

    /// Drop every file, the mapping and any result, and cancel reads still
    /// in flight. Results that arrive later are discarded by `apply`.
    pub fn clear(&mut self) {
        let _ = self.cancel.send(true);
        let (cancel, _) = watch::channel(false);
        self.cancel = cancel;

        let previous = self.id;
        self.id = SessionId(previous.0 + 1);
        self.files.clear();
        self.mapping = IdentityMapping::new();
        self.last_result = None;
        self.submitted = false;
        info!(session = previous.0, "import session cleared");
        self.events.push(SessionEvent::SessionCleared { previous });
        self.refresh_state();
    }

    /// Submit every file that is not already completed, one after another
    /// in insertion order. A failing file never stops the files after it.
    pub async fn submit(&mut self, submitter: &dyn BatchSubmitter) -> Result<SessionResult> {
        match self.state {
            ImportState::ReadyToImport | ImportState::Completed => {}
            ImportState::Idle => return Err(PennywiseError::NothingToImport),
            ImportState::ReadyToMap => {
                return Err(PennywiseError::MappingIncomplete {
                    unmapped: self.unmapped(),
                })
            }
            other => return Err(PennywiseError::NotReady(other)),
        }
        // The state already implies this; checked again because nothing may
        // reach the submitter with an unresolved payer.
        let unmapped = self.unmapped();
        if !unmapped.is_empty() {
            return Err(PennywiseError::MappingIncomplete { unmapped });
        }
        if self.files.iter().all(|f| f.status == FileStatus::Completed) {
            return Err(PennywiseError::NothingToImport);
        }

        self.transition(ImportState::Submitting);
        let resolved = self.mapping.resolved_users();
        let mut results = Vec::new();

        for idx in 0..self.files.len() {
            if self.files[idx].status == FileStatus::Completed {
                continue;
            }
            let result = if self.files[idx].blocked() {
                let file = &self.files[idx];
                file_failure(file, file.error.clone().unwrap_or_default())
            } else {
                self.submit_file(idx, submitter, &resolved).await
            };
            self.files[idx].result = Some(result.clone());
            results.push(result);
        }

        let total_imported = results.iter().map(|r| r.imported_count).sum();
        let errors = results
            .iter()
            .filter(|r| !r.success)
            .flat_map(|r| r.errors.iter().map(move |e| format!("{}: {e}", r.file_name)))
            .collect();
        let result = SessionResult {
            total_imported,
            total_files: results.len(),
            errors,
            success: total_imported > 0,
            files: results,
        };
        info!(
            total_imported,
            total_files = result.total_files,
            success = result.success,
            "import finished"
        );

        self.last_result = Some(result.clone());
        self.submitted = true;
        self.refresh_state();
        Ok(result)
    }

    async fn submit_file(
        &mut self,
        idx: usize,
        submitter: &dyn BatchSubmitter,
        resolved: &BTreeMap<String, UserId>,
    ) -> FileImportResult {
        let transactions: Vec<CanonicalTransaction> = self.files[idx]
            .drafts
            .iter()
            .filter_map(|draft| match &draft.payer {
                None => Some(CanonicalTransaction::from_draft(draft, self.group_id, None)),
                Some(payer) => match self.mapping.get(payer) {
                    Some(MappingTarget::User(user)) => {
                        Some(CanonicalTransaction::from_draft(draft, self.group_id, Some(user)))
                    }
                    // Deliberately excluded by the caller; not a skipped row.
                    Some(MappingTarget::Ignore) | None => None,
                },
            })
            .collect();

        if transactions.is_empty() {
            let message = FileFailure::NoValidTransactions.to_string();
            self.fail_file(idx, message.clone());
            return file_failure(&self.files[idx], message);
        }

        let file = &mut self.files[idx];
        file.status = FileStatus::Submitting;
        file.error = None;
        let request = BatchRequest {
            group_id: self.group_id,
            source_name: file.name.clone(),
            source_checksum: file.metadata.as_ref().map(|m| m.checksum.clone()),
            identity_map: resolved.clone(),
            transactions,
        };
        let file_id = file.id;
        debug!(file = %file_id, rows = request.transactions.len(), "submitting batch");

        match submitter.submit_batch(request).await {
            Ok(receipt) => {
                let file = &mut self.files[idx];
                file.status = FileStatus::Completed;
                info!(file = %file_id, imported = receipt.imported_count, "file imported");
                self.events.push(SessionEvent::FileSubmitted {
                    file: file_id,
                    imported: receipt.imported_count,
                });
                let file = &self.files[idx];
                FileImportResult {
                    file_id,
                    file_name: file.name.clone(),
                    success: true,
                    imported_count: receipt.imported_count,
                    errors: Vec::new(),
                    skipped_rows: file.skipped.iter().map(|s| s.line).collect(),
                }
            }
            Err(e) => {
                let message = FileFailure::Submission(e.to_string()).to_string();
                self.fail_file(idx, message.clone());
                file_failure(&self.files[idx], message)
            }
        }
    }

    // -- state --------------------------------------------------------------

    fn derive_state(&self) -> ImportState {
        if self.files.is_empty() {
            ImportState::Idle
        } else if self.files.iter().any(|f| f.status == FileStatus::Pending) {
            ImportState::FilesSelected
        } else if self.files.iter().any(|f| f.status == FileStatus::Validating) {
            ImportState::Validating
        } else if self.submitted {
            ImportState::Completed
        } else if !self.is_complete() {
            ImportState::ReadyToMap
        } else {
            ImportState::ReadyToImport
        }
    }

    /// Recompute the session state and the per-file mapping status. Called
    /// after every command, so adding or removing a file while waiting on
    /// the mapping re-evaluates which payers are required.
    fn refresh_state(&mut self) {
        for idx in 0..self.files.len() {
            let status = self.files[idx].status;
            if matches!(status, FileStatus::Ready | FileStatus::MappingRequired) {
                let ids = self.files[idx].identities();
                let blocked = !mapping::unmapped(&ids, &self.mapping, self.allow_ignored).is_empty();
                self.files[idx].status = if blocked {
                    FileStatus::MappingRequired
                } else {
                    FileStatus::Ready
                };
            }
        }
        let next = self.derive_state();
        self.transition(next);
    }

    fn transition(&mut self, to: ImportState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        info!(%from, %to, "import state changed");
        self.events.push(SessionEvent::StateChanged { from, to });
        self.state = to;
    }
}

fn file_failure(file: &RawFile, message: String) -> FileImportResult {
    FileImportResult {
        file_id: file.id,
        file_name: file.name.clone(),
        success: false,
        imported_count: 0,
        errors: vec![message],
        skipped_rows: file.skipped.iter().map(|s| s.line).collect(),
    }
}
