//! Wizard session state and the manager that orchestrates it.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DatabaseError, Error, WizardError};
use crate::store::DraftStore;

use super::autosave::AutosaveScheduler;
use super::steps::{self, DraftPayload, FieldErrors, StepFields, StepId};

/// Persisted wizard state for one invitation token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardSession {
    pub invitation_token: String,
    /// Current position, always within `[0, StepId::COUNT)`.
    pub step_index: usize,
    /// Incremented by exactly 1 on every persisted write.
    pub revision: u64,
    pub draft: DraftPayload,
    /// Steps that have passed validation at least once.
    pub completed_steps: BTreeSet<StepId>,
}

impl WizardSession {
    pub fn new(token: &str) -> Self {
        Self {
            invitation_token: token.to_string(),
            step_index: 0,
            revision: 0,
            draft: DraftPayload::default(),
            completed_steps: BTreeSet::new(),
        }
    }
}

/// Orchestrates step sequencing, validation, and draft persistence for one
/// wizard session.
///
/// All mutation flows through here: field edits are validated for immediate
/// feedback and scheduled for debounced persistence; step transitions
/// re-validate authoritatively and flush pending writes first.
pub struct WizardSessionManager {
    store: Arc<dyn DraftStore>,
    session: WizardSession,
    scheduler: AutosaveScheduler,
}

impl WizardSessionManager {
    /// Open the wizard for a token: resume the persisted session if one
    /// exists, otherwise start fresh at step 0. A fresh session is not
    /// persisted until its first write.
    pub async fn open(
        store: Arc<dyn DraftStore>,
        token: &str,
        autosave_delay: Duration,
    ) -> Result<Self, DatabaseError> {
        let session = match store.get(token).await? {
            Some(session) => {
                debug!(token, step_index = session.step_index, "Resuming wizard session");
                session
            }
            None => WizardSession::new(token),
        };
        Ok(Self {
            store,
            session,
            scheduler: AutosaveScheduler::new(autosave_delay),
        })
    }

    pub fn session(&self) -> &WizardSession {
        &self.session
    }

    /// The step the user is currently on.
    pub fn current_step(&self) -> StepId {
        StepId::from_index(self.session.step_index).unwrap_or(StepId::PersonalInfo)
    }

    /// Validation errors for a step against the accumulated draft.
    pub fn step_errors(&self, step: StepId) -> FieldErrors {
        steps::validate(step, &self.session.draft)
    }

    /// Record a field update: merge locally, schedule a debounced write, and
    /// return feedback-validation errors for the touched step.
    pub async fn update_fields(
        &mut self,
        fields: StepFields,
        now: DateTime<Utc>,
    ) -> Result<FieldErrors, DatabaseError> {
        let step = fields.step_id();
        self.session.draft.merge(fields.clone());
        if let Some(displaced) = self.scheduler.schedule(fields, now) {
            // A different step's write lost its slot; persist it right away.
            self.persist_fields(displaced).await?;
        }
        Ok(self.step_errors(step))
    }

    /// Persist the pending debounced write if it has come due.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<(), DatabaseError> {
        if let Some(write) = self.scheduler.take_due(now) {
            self.persist_fields(write).await?;
        }
        Ok(())
    }

    /// Persist any pending write immediately, bypassing the debounce delay.
    pub async fn flush(&mut self) -> Result<(), DatabaseError> {
        if let Some(write) = self.scheduler.flush() {
            self.persist_fields(write).await?;
        }
        Ok(())
    }

    /// Whether the current step's draft passes validation.
    pub fn can_advance(&self) -> bool {
        self.step_errors(self.current_step()).is_empty()
    }

    /// Mark the current step complete and move forward.
    ///
    /// Re-validates authoritatively and flushes the pending write first;
    /// fails without moving if the step is invalid.
    pub async fn advance(&mut self) -> Result<(), Error> {
        let step = self.current_step();
        let errors = self.step_errors(step);
        if !errors.is_empty() {
            return Err(WizardError::ValidationFailed { step, errors }.into());
        }
        self.flush().await?;
        self.session.completed_steps.insert(step);
        if self.session.step_index + 1 < StepId::COUNT {
            self.session.step_index += 1;
        }
        self.persist_position().await?;
        debug!(step = %step, next = self.session.step_index, "Wizard step advanced");
        Ok(())
    }

    /// Move one step back. Never gated on validation, never below step 0.
    pub async fn retreat(&mut self) -> Result<(), DatabaseError> {
        if self.session.step_index == 0 {
            return Ok(());
        }
        self.session.step_index -= 1;
        self.persist_position().await
    }

    /// Jump to an arbitrary step, allowed only when every step strictly
    /// before the target has been completed.
    pub async fn jump_to(&mut self, target_index: usize) -> Result<(), Error> {
        let Some(target) = StepId::from_index(target_index) else {
            return Err(WizardError::StepOutOfRange {
                index: target_index,
            }
            .into());
        };
        for step in &StepId::ALL[..target_index] {
            if !self.session.completed_steps.contains(step) {
                return Err(WizardError::JumpBlocked {
                    target,
                    missing: *step,
                }
                .into());
            }
        }
        self.session.step_index = target_index;
        self.persist_position().await?;
        Ok(())
    }

    /// Whether every required step has been completed.
    pub fn can_submit(&self) -> bool {
        StepId::ALL
            .iter()
            .filter(|s| s.is_required())
            .all(|s| self.session.completed_steps.contains(s))
    }

    /// Hard cancel: destroy the persisted draft and reset in-memory state.
    /// Discards any pending auto-save.
    pub async fn cancel(&mut self) -> Result<(), DatabaseError> {
        self.scheduler.flush();
        let token = self.session.invitation_token.clone();
        self.store.clear(&token).await?;
        self.session = WizardSession::new(&token);
        Ok(())
    }

    /// Persist a field write, absorbing a single stale-revision race.
    ///
    /// On `StaleRevision` (another tab wrote first) the latest session is
    /// reloaded, our update re-merged on top, and the write retried once with
    /// the current revision.
    async fn persist_fields(&mut self, fields: StepFields) -> Result<(), DatabaseError> {
        let token = self.session.invitation_token.clone();
        match self
            .store
            .set_fields(&token, fields.clone(), self.session.revision)
            .await
        {
            Ok(revision) => {
                self.session.revision = revision;
                Ok(())
            }
            Err(DatabaseError::StaleRevision { current, .. }) => {
                debug!(token, current, "Draft write was stale, reloading and retrying");
                self.adopt_latest().await?;
                self.session.draft.merge(fields.clone());
                let revision = self.store.set_fields(&token, fields, self.session.revision).await?;
                self.session.revision = revision;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the step position, with the same single stale-revision retry.
    async fn persist_position(&mut self) -> Result<(), DatabaseError> {
        let token = self.session.invitation_token.clone();
        let step_index = self.session.step_index;
        let completed = self.session.completed_steps.clone();
        match self
            .store
            .set_position(&token, step_index, &completed, self.session.revision)
            .await
        {
            Ok(revision) => {
                self.session.revision = revision;
                Ok(())
            }
            Err(DatabaseError::StaleRevision { current, .. }) => {
                debug!(token, current, "Position write was stale, reloading and retrying");
                self.adopt_latest().await?;
                self.session.step_index = step_index;
                let completed: BTreeSet<StepId> = self
                    .session
                    .completed_steps
                    .union(&completed)
                    .copied()
                    .collect();
                self.session.completed_steps = completed.clone();
                let revision = self
                    .store
                    .set_position(&token, step_index, &completed, self.session.revision)
                    .await?;
                self.session.revision = revision;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Replace local draft state with the latest persisted session, keeping
    /// the current step position.
    async fn adopt_latest(&mut self) -> Result<(), DatabaseError> {
        if let Some(latest) = self.store.get(&self.session.invitation_token).await? {
            self.session.revision = latest.revision;
            self.session.draft = latest.draft;
            self.session.completed_steps = self
                .session
                .completed_steps
                .union(&latest.completed_steps)
                .copied()
                .collect();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::wizard::steps::{AvailabilityDraft, PersonalInfoDraft, QualificationsDraft};

    const TOKEN: &str = "abcdefghijklmnopqrstuvwxyz012345";

    async fn manager(store: &Arc<LibSqlBackend>) -> WizardSessionManager {
        let store: Arc<dyn DraftStore> = Arc::clone(store) as Arc<dyn DraftStore>;
        WizardSessionManager::open(store, TOKEN, Duration::seconds(1))
            .await
            .unwrap()
    }

    fn personal(name: &str) -> StepFields {
        StepFields::PersonalInfo(PersonalInfoDraft {
            display_name: Some(name.into()),
            ..Default::default()
        })
    }

    fn qualifications() -> StepFields {
        StepFields::Qualifications(QualificationsDraft {
            subjects: Some(vec!["maths".into()]),
            years_experience: Some(5),
            bio: None,
        })
    }

    fn availability() -> StepFields {
        StepFields::Availability(AvailabilityDraft {
            days: Some(vec!["monday".into(), "wednesday".into()]),
            start_hour: Some(9),
            end_hour: Some(17),
        })
    }

    async fn complete_first_two_steps(mgr: &mut WizardSessionManager, now: DateTime<Utc>) {
        mgr.update_fields(personal("Ada"), now).await.unwrap();
        mgr.advance().await.unwrap();
        mgr.update_fields(qualifications(), now).await.unwrap();
        mgr.advance().await.unwrap();
    }

    #[tokio::test]
    async fn fresh_session_starts_at_step_zero() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mgr = manager(&store).await;
        assert_eq!(mgr.current_step(), StepId::PersonalInfo);
        assert_eq!(mgr.session().revision, 0);
        assert!(!mgr.can_submit());
    }

    #[tokio::test]
    async fn advance_requires_valid_step() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut mgr = manager(&store).await;
        assert!(!mgr.can_advance());
        let err = mgr.advance().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Wizard(WizardError::ValidationFailed {
                step: StepId::PersonalInfo,
                ..
            })
        ));
        // Nothing moved, nothing marked complete.
        assert_eq!(mgr.session().step_index, 0);
        assert!(mgr.session().completed_steps.is_empty());
    }

    #[tokio::test]
    async fn advance_marks_complete_and_persists() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut mgr = manager(&store).await;
        let now = Utc::now();

        let errors = mgr.update_fields(personal("Ada"), now).await.unwrap();
        assert!(errors.is_empty());
        assert!(mgr.can_advance());
        mgr.advance().await.unwrap();

        assert_eq!(mgr.current_step(), StepId::Qualifications);
        assert!(mgr.session().completed_steps.contains(&StepId::PersonalInfo));

        // The flush-then-position sequence persisted both writes.
        let persisted = store.get(TOKEN).await.unwrap().unwrap();
        assert_eq!(persisted.step_index, 1);
        assert_eq!(persisted.revision, 2);
        assert_eq!(
            persisted.draft.personal_info.unwrap().display_name.as_deref(),
            Some("Ada")
        );
    }

    #[tokio::test]
    async fn retreat_never_goes_below_zero() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut mgr = manager(&store).await;
        mgr.retreat().await.unwrap();
        assert_eq!(mgr.session().step_index, 0);

        let now = Utc::now();
        mgr.update_fields(personal("Ada"), now).await.unwrap();
        mgr.advance().await.unwrap();
        mgr.retreat().await.unwrap();
        assert_eq!(mgr.session().step_index, 0);
    }

    #[tokio::test]
    async fn jump_cannot_skip_incomplete_steps() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut mgr = manager(&store).await;
        let now = Utc::now();

        mgr.update_fields(personal("Ada"), now).await.unwrap();
        mgr.advance().await.unwrap();

        // Qualifications is not complete, so step 2 is out of reach.
        let err = mgr.jump_to(2).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Wizard(WizardError::JumpBlocked {
                target: StepId::Availability,
                missing: StepId::Qualifications,
            })
        ));

        // Moving back to a completed step is always fine.
        mgr.jump_to(0).await.unwrap();
        assert_eq!(mgr.current_step(), StepId::PersonalInfo);

        let err = mgr.jump_to(StepId::COUNT).await.unwrap_err();
        assert!(matches!(err, Error::Wizard(WizardError::StepOutOfRange { .. })));
    }

    #[tokio::test]
    async fn can_submit_ignores_the_optional_step() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut mgr = manager(&store).await;
        let now = Utc::now();

        complete_first_two_steps(&mut mgr, now).await;
        // Availability never touched: still submittable.
        assert!(mgr.can_submit());

        mgr.update_fields(availability(), now).await.unwrap();
        mgr.advance().await.unwrap();
        assert!(mgr.can_submit());
    }

    #[tokio::test]
    async fn resume_lands_on_the_persisted_step_with_data_intact() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let now = Utc::now();
        {
            let mut mgr = manager(&store).await;
            mgr.update_fields(personal("Ada"), now).await.unwrap();
            mgr.advance().await.unwrap();
            // Simulated crash: manager dropped, store survives.
        }

        let mgr = manager(&store).await;
        assert_eq!(mgr.current_step(), StepId::Qualifications);
        assert_eq!(
            mgr.session()
                .draft
                .personal_info
                .as_ref()
                .unwrap()
                .display_name
                .as_deref(),
            Some("Ada")
        );
        assert!(mgr.session().completed_steps.contains(&StepId::PersonalInfo));
    }

    #[tokio::test]
    async fn debounced_write_persists_on_tick_not_before() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut mgr = manager(&store).await;
        let t0 = Utc::now();

        mgr.update_fields(personal("Ada"), t0).await.unwrap();
        mgr.tick(t0).await.unwrap();
        assert!(store.get(TOKEN).await.unwrap().is_none());

        mgr.tick(t0 + Duration::seconds(1)).await.unwrap();
        let persisted = store.get(TOKEN).await.unwrap().unwrap();
        assert_eq!(persisted.revision, 1);
        assert_eq!(
            persisted.draft.personal_info.unwrap().display_name.as_deref(),
            Some("Ada")
        );
    }

    #[tokio::test]
    async fn stale_revision_write_is_reloaded_and_retried() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut mgr = manager(&store).await;
        let now = Utc::now();

        mgr.update_fields(personal("Ada"), now).await.unwrap();
        mgr.flush().await.unwrap();

        // A second tab writes behind our back, bumping the revision.
        let other: Arc<dyn DraftStore> = Arc::clone(&store) as Arc<dyn DraftStore>;
        other.set_fields(TOKEN, qualifications(), 1).await.unwrap();

        // Our next write carries revision 1, gets rejected, reloads, retries.
        mgr.update_fields(personal("Ada Lovelace"), now).await.unwrap();
        mgr.flush().await.unwrap();

        let persisted = store.get(TOKEN).await.unwrap().unwrap();
        assert_eq!(persisted.revision, 3);
        assert_eq!(
            persisted
                .draft
                .personal_info
                .as_ref()
                .unwrap()
                .display_name
                .as_deref(),
            Some("Ada Lovelace")
        );
        // The other tab's step data survived the retry.
        assert_eq!(
            persisted.draft.qualifications.as_ref().unwrap().years_experience,
            Some(5)
        );
    }

    #[tokio::test]
    async fn cancel_clears_the_store_and_resets() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut mgr = manager(&store).await;
        let now = Utc::now();

        complete_first_two_steps(&mut mgr, now).await;
        assert!(store.get(TOKEN).await.unwrap().is_some());

        mgr.cancel().await.unwrap();
        assert!(store.get(TOKEN).await.unwrap().is_none());
        assert_eq!(mgr.session().step_index, 0);
        assert!(mgr.session().draft.is_empty());
    }
}
