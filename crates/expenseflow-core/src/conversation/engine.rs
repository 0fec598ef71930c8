//! Conversation engine: drives receipt classification for each chat user
//!
//! Every inbound message is handled to completion while holding that user's
//! session guard, and produces the replies to send back, in order. The
//! transport layer only delivers messages and sends replies.

use tracing::{debug, error, info, warn};

use crate::ai::Extractor;
use crate::dedup::DuplicateDetector;
use crate::gateway::PersistenceGateway;
use crate::models::{
    CandidateExpense, Classification, ClassificationAttributes, MainCategory, StoredRecord,
    UserId,
};

use super::intent::{parse_answer, parse_command, Answer, Command};
use super::messages;
use super::session::{Session, SessionStore, Stage};

/// A file received from the chat user
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    /// Original or generated file name; used for MIME detection
    pub file_name: String,
    /// Where the transport stored the file, kept on the record
    pub file_path: Option<String>,
}

/// One inbound chat message
#[derive(Debug, Clone)]
pub enum Inbound {
    Text(String),
    Upload(Upload),
}

/// Result of finalizing the head item
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    Saved(i64),
    Duplicate(Option<StoredRecord>),
    Failed(String),
}

/// Multi-turn receipt classification state machine
pub struct ConversationEngine {
    extractor: Extractor,
    gateway: PersistenceGateway,
    sessions: SessionStore,
}

impl ConversationEngine {
    pub fn new(extractor: Extractor, gateway: PersistenceGateway, sessions: SessionStore) -> Self {
        Self {
            extractor,
            gateway,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    /// Handle one inbound message and return the replies to send
    pub async fn handle(&self, user_id: UserId, inbound: Inbound) -> Vec<String> {
        match inbound {
            Inbound::Upload(upload) => self.handle_upload(user_id, upload).await,
            Inbound::Text(text) => match parse_command(&text) {
                Some(command) => self.handle_command(user_id, command).await,
                None => self.handle_text(user_id, &text).await,
            },
        }
    }

    /// Slash commands
    pub async fn handle_command(&self, user_id: UserId, command: Command) -> Vec<String> {
        match command {
            Command::Start | Command::Help => vec![messages::WELCOME.to_string()],
            Command::Status => vec![messages::status(self.sessions.pending_count(user_id).await)],
            Command::Cancel => {
                let discarded = {
                    let mut slot = self.sessions.lock(user_id).await;
                    slot.take().map_or(0, |session| session.len())
                };
                self.sessions.release(user_id).await;

                if discarded == 0 {
                    vec![messages::NOTHING_TO_CANCEL.to_string()]
                } else {
                    info!(user_id, discarded, "Session cancelled");
                    vec![messages::cancelled(discarded)]
                }
            }
            Command::Unknown(name) => vec![messages::unknown_command(&name)],
        }
    }

    /// A receipt photo or document
    ///
    /// Extraction runs under the user's guard, so receipts sent in a burst
    /// are queued in the order they arrived.
    pub async fn handle_upload(&self, user_id: UserId, upload: Upload) -> Vec<String> {
        let mut slot = self.sessions.lock(user_id).await;

        let candidate = match self
            .extractor
            .extract_document(upload.bytes, &upload.file_name)
            .await
        {
            Ok(mut candidate) => {
                candidate.passthrough.file_path = upload.file_path;
                candidate
            }
            Err(e) => {
                warn!(user_id, file = %upload.file_name, kind = e.kind.as_str(), "Receipt extraction failed");
                let replies = vec![messages::extraction_failed(&e)];
                let empty = slot.is_none();
                drop(slot);
                if empty {
                    self.sessions.release(user_id).await;
                }
                return replies;
            }
        };

        info!(
            user_id,
            merchant = %candidate.merchant,
            amount = candidate.amount,
            "Receipt extracted"
        );

        if slot.is_none() {
            let session = Session::new(candidate);
            let reply = present_head(&session);
            *slot = Some(session);
            return reply.into_iter().collect();
        }

        match slot.as_mut() {
            Some(session) => {
                let queue_len = session.enqueue(candidate.clone());
                debug!(user_id, queue_len, "Receipt queued behind current item");
                vec![messages::queued(&candidate, queue_len)]
            }
            None => Vec::new(),
        }
    }

    /// A plain text answer for the current stage
    pub async fn handle_text(&self, user_id: UserId, text: &str) -> Vec<String> {
        let mut slot = self.sessions.lock(user_id).await;

        if slot.is_none() {
            drop(slot);
            self.sessions.release(user_id).await;
            return vec![messages::NO_PENDING.to_string()];
        }
        let Some(session) = slot.as_mut() else {
            return Vec::new();
        };

        let stage = session.stage.clone();
        let answer = parse_answer(&stage, text);
        debug!(user_id, stage = stage.name(), ?answer, "Classification answer");

        let mut replies = Vec::new();
        match (stage, answer) {
            (Stage::AwaitingCategory, Answer::Category(MainCategory::Personal)) => {
                session.stage = Stage::AwaitingNotes(Classification::Personal);
                replies.push(format!("👤 Personal expense.\n{}", messages::NOTES_PROMPT));
            }
            (Stage::AwaitingCategory, Answer::Category(MainCategory::Business)) => {
                session.stage = Stage::AwaitingReimbursement;
                replies.push(messages::REIMBURSEMENT_PROMPT.to_string());
            }
            (Stage::AwaitingReimbursement, Answer::Reimbursable(true)) => {
                session.stage = Stage::AwaitingProject;
                replies.push(messages::PROJECT_PROMPT.to_string());
            }
            (Stage::AwaitingReimbursement, Answer::Reimbursable(false)) => {
                session.stage = Stage::AwaitingNotes(Classification::company_paid());
                replies.push(messages::NOTES_PROMPT.to_string());
            }
            (Stage::AwaitingProject, Answer::Project(project)) => {
                session.stage = Stage::AwaitingNotes(Classification::reimbursable(project));
                replies.push(messages::NOTES_PROMPT.to_string());
            }
            (Stage::AwaitingNotes(classification), Answer::Notes(notes)) => {
                let attrs = ClassificationAttributes {
                    classification,
                    notes,
                };
                replies.extend(self.finalize(user_id, session, attrs));
                if session.is_empty() {
                    *slot = None;
                    replies.push(messages::COMPLETE.to_string());
                }
            }
            (stage, _) => {
                let base = match stage {
                    Stage::AwaitingCategory => messages::CATEGORY_PROMPT,
                    Stage::AwaitingReimbursement => messages::REIMBURSEMENT_PROMPT,
                    Stage::AwaitingProject => messages::PROJECT_PROMPT,
                    Stage::AwaitingNotes(_) => messages::NOTES_PROMPT,
                };
                replies.push(messages::reprompt(base));
            }
        }

        let drained = slot.is_none();
        drop(slot);
        if drained {
            self.sessions.release(user_id).await;
        }
        replies
    }

    /// Resolve the head item: save it or report it as a duplicate, then
    /// advance to the next queued receipt
    ///
    /// Always pops the head, so each queued item is finalized at most once.
    fn finalize(
        &self,
        user_id: UserId,
        session: &mut Session,
        attrs: ClassificationAttributes,
    ) -> Vec<String> {
        let Some(candidate) = session.pop_head() else {
            return Vec::new();
        };

        let outcome = self.save_or_skip(user_id, &candidate, &attrs);
        let mut replies = vec![match &outcome {
            FinalizeOutcome::Saved(_) => messages::saved(
                &candidate,
                &attrs.classification,
                attrs.notes.as_deref(),
            ),
            FinalizeOutcome::Duplicate(existing) => {
                messages::duplicate(&candidate, existing.as_ref())
            }
            FinalizeOutcome::Failed(_) => messages::save_failed(&candidate),
        }];

        replies.extend(present_head(session));
        replies
    }

    fn save_or_skip(
        &self,
        user_id: UserId,
        candidate: &CandidateExpense,
        attrs: &ClassificationAttributes,
    ) -> FinalizeOutcome {
        let check = DuplicateDetector::new(self.gateway.db()).check(
            &candidate.merchant,
            candidate.amount,
            candidate.date,
            user_id,
        );

        if check.is_duplicate {
            info!(
                user_id,
                merchant = %candidate.merchant,
                existing_id = ?check.existing.as_ref().map(|r| r.id),
                "Duplicate receipt skipped"
            );
            return FinalizeOutcome::Duplicate(check.existing);
        }

        match self
            .gateway
            .save_classified(candidate.clone(), attrs, user_id)
        {
            Ok(id) => {
                info!(
                    user_id,
                    id,
                    merchant = %candidate.merchant,
                    category = %attrs.classification.main_category(),
                    "Receipt saved"
                );
                FinalizeOutcome::Saved(id)
            }
            Err(e) => {
                error!(user_id, merchant = %candidate.merchant, error = %e, "Failed to save receipt");
                FinalizeOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Presentation of the current head item, if any
fn present_head(session: &Session) -> Option<String> {
    session
        .head()
        .map(|head| messages::present(head, session.len()))
}
