use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};

use crate::errors::{AppError, AppResult};
use crate::models::{
    ClassificationOutcome, FailedUpload, ManualAssignment, Phase, PipelineProgress, UploadItem,
    UploadedAsset,
};
use crate::security::InputValidator;
use crate::session::{resolve_user, SessionProvider};

use super::api_client::WardrobeApi;
use super::progress_tracker::{EventKind, PipelineEvent, PipelineSnapshot, ProgressTracker};
use super::state::{next, PipelineState, Step};

/// How a run (or a manual submission) ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Complete { added: usize },
    ManualRequired { rejected: Vec<String> },
}

/// Stage A result: what uploaded and what did not, both in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadBatch {
    pub uploaded: Vec<UploadedAsset>,
    pub failed: Vec<FailedUpload>,
}

impl UploadBatch {
    pub fn record_success(&mut self, index: usize, url: String) {
        self.uploaded.push(UploadedAsset { index, url });
    }

    pub fn record_failure(&mut self, index: usize, item: &UploadItem, error: &AppError) {
        self.failed.push(FailedUpload {
            index,
            name: item.name.clone(),
            error: error.to_string(),
        });
    }

    pub fn attempted(&self) -> usize {
        self.uploaded.len() + self.failed.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.uploaded.iter().map(|a| a.url.clone()).collect()
    }
}

struct RunContext {
    generation: u64,
    run_id: Option<String>,
    state: PipelineState,
    user_id: Option<String>,
    failed_uploads: Vec<FailedUpload>,
    error: Option<String>,
    manual_in_flight: bool,
}

impl RunContext {
    fn idle(generation: u64) -> Self {
        Self {
            generation,
            run_id: None,
            state: PipelineState::Idle,
            user_id: None,
            failed_uploads: Vec::new(),
            error: None,
            manual_in_flight: false,
        }
    }

    fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            run_id: self.run_id.clone(),
            progress: self.state.progress(),
            pending_manual: self.state.pending_manual().map(|urls| urls.to_vec()),
            failed_uploads: self.failed_uploads.clone(),
            error: self.error.clone(),
            updated_at: chrono::Utc::now(),
        }
    }
}

/// Drives a batch of images through upload, automatic classification and,
/// when the service rejects some of them, manual classification.
///
/// The pipeline does not stop a second `run` from starting while one is in
/// flight; callers are expected to prevent that. Starting a new run or calling
/// `reset` makes any older run ignore the results it is still waiting on.
pub struct UploadPipeline {
    api: Arc<dyn WardrobeApi>,
    session: Arc<dyn SessionProvider>,
    tracker: ProgressTracker,
    context: Mutex<RunContext>,
}

impl UploadPipeline {
    pub fn new(
        api: Arc<dyn WardrobeApi>,
        session: Arc<dyn SessionProvider>,
        event_buffer: usize,
    ) -> Self {
        Self {
            api,
            session,
            tracker: ProgressTracker::new(event_buffer),
            context: Mutex::new(RunContext::idle(0)),
        }
    }

    pub fn progress(&self) -> PipelineProgress {
        self.lock().state.progress()
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state.clone()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.tracker.snapshot()
    }

    pub fn pending_manual(&self) -> Option<Vec<String>> {
        self.lock().state.pending_manual().map(|urls| urls.to_vec())
    }

    pub fn failed_uploads(&self) -> Vec<FailedUpload> {
        self.lock().failed_uploads.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.tracker.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tracker.events()
    }

    /// Upload and classify a batch of at most ten images.
    ///
    /// Returns `ManualRequired` when the service rejected some images; the run
    /// then waits for `submit_manual_assignments`.
    pub async fn run(&self, images: Vec<UploadItem>) -> AppResult<RunOutcome> {
        InputValidator::validate_batch_size(images.len())?;
        let user_id = resolve_user(self.session.as_ref())?;

        let generation = self.start_run(images.len(), &user_id);

        let batch = self.upload_all(generation, &images).await?;

        let state = self.apply(generation, Step::UploadsFinished)?;
        if let PipelineState::Failed { .. } = state {
            let error = AppError::AllUploadsFailed {
                attempted: batch.attempted(),
            };
            self.finish_failed(generation, &error);
            return Err(error);
        }

        if !batch.failed.is_empty() {
            log::warn!(
                "{} of {} uploads failed, continuing with the rest",
                batch.failed.len(),
                batch.attempted()
            );
        }

        self.classify(generation, &user_id, batch.urls()).await
    }

    /// Resume a paused run with a category for every rejected URL.
    pub async fn submit_manual_assignments(
        &self,
        assignments: Vec<ManualAssignment>,
    ) -> AppResult<RunOutcome> {
        let (generation, user_id) = {
            let mut context = self.lock();
            let rejected = context
                .state
                .pending_manual()
                .ok_or_else(|| AppError::input("no manual classification pending"))?;

            if context.manual_in_flight {
                return Err(AppError::input("manual classification already submitted"));
            }

            validate_coverage(rejected, &assignments)?;

            let user_id = context
                .user_id
                .clone()
                .ok_or_else(|| AppError::auth("no user recorded for this run"))?;
            context.manual_in_flight = true;
            (context.generation, user_id)
        };

        log::info!("Submitting {} manual assignment(s)", assignments.len());

        let result = self.api.classify_manual(&user_id, &assignments).await;

        match result {
            Ok(()) => {
                let state = self.apply(generation, Step::ManualAccepted)?;
                Ok(self.finish_complete(generation, &state))
            }
            Err(e) => {
                let error = match e {
                    AppError::ManualClassification { .. } => e,
                    other => AppError::manual_classification(other.to_string()),
                };
                self.ensure_current(generation)?;
                self.fail(generation, &error);
                Err(error)
            }
        }
    }

    /// Drop the current run and return to the pre-run baseline.
    ///
    /// Requests already in flight are not cancelled; their results are ignored.
    pub fn reset(&self) {
        let was_baseline = {
            let mut context = self.lock();
            let was_baseline = context.run_id.is_none()
                && context.state == PipelineState::Idle
                && context.failed_uploads.is_empty()
                && context.error.is_none();

            let generation = context.generation + 1;
            let state = next(&context.state, &Step::Reset).unwrap_or(PipelineState::Idle);
            *context = RunContext {
                state,
                ..RunContext::idle(generation)
            };
            if !was_baseline {
                self.tracker.publish(context.snapshot());
            }
            was_baseline
        };

        if !was_baseline {
            log::info!("Upload pipeline reset");
            self.tracker.emit(None, EventKind::Reset);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunContext> {
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_run(&self, total: usize, user_id: &str) -> u64 {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut context = self.lock();

        let generation = context.generation + 1;
        *context = RunContext::idle(generation);
        context.run_id = Some(run_id.clone());
        context.user_id = Some(user_id.to_string());
        if let Some(state) = next(&context.state, &Step::Start { total }) {
            context.state = state;
        }
        self.tracker.publish(context.snapshot());
        drop(context);

        log::info!("Starting upload run {} with {} image(s)", run_id, total);
        self.tracker
            .emit(Some(&run_id), EventKind::RunStarted { total });
        generation
    }

    async fn upload_all(&self, generation: u64, images: &[UploadItem]) -> AppResult<UploadBatch> {
        let mut batch = UploadBatch::default();

        for (index, item) in images.iter().enumerate() {
            self.ensure_current(generation)?;

            let result = match InputValidator::validate_mime_type(&item.mime_type) {
                Ok(()) => self.api.upload_asset(item).await,
                Err(e) => {
                    log::warn!("Skipping {}: {}", item.name, e);
                    Err(e)
                }
            };

            self.ensure_current(generation)?;

            match result {
                Ok(url) => {
                    log::info!("Uploaded {} ({}/{})", item.name, index + 1, images.len());
                    batch.record_success(index, url.clone());
                    self.apply(
                        generation,
                        Step::ItemAttempted {
                            index,
                            succeeded: true,
                        },
                    )?;
                    self.emit(generation, EventKind::ItemUploaded { index, url });
                }
                Err(e) => {
                    log::warn!("Failed to upload {}: {}", item.name, e);
                    batch.record_failure(index, item, &e);
                    self.record_upload_failure(generation, index, item, &e)?;
                    self.emit(
                        generation,
                        EventKind::ItemFailed {
                            index,
                            name: item.name.clone(),
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        Ok(batch)
    }

    async fn classify(
        &self,
        generation: u64,
        user_id: &str,
        urls: Vec<String>,
    ) -> AppResult<RunOutcome> {
        self.ensure_current(generation)?;
        self.emit(
            generation,
            EventKind::PhaseChanged {
                phase: Phase::Analyzing,
            },
        );
        log::info!("Submitting {} asset(s) for classification", urls.len());

        let result = self
            .api
            .classify_auto(user_id, &urls)
            .await
            .and_then(|outcome| check_rejected_subset(outcome.normalized(), &urls));

        self.ensure_current(generation)?;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = match e {
                    AppError::Classification { .. } => e,
                    other => AppError::classification(other.to_string()),
                };
                self.fail(generation, &error);
                return Err(error);
            }
        };

        let state = self.apply(generation, Step::Classified(outcome))?;
        match state {
            PipelineState::PendingManual { rejected, .. } => {
                log::info!("{} item(s) need manual classification", rejected.len());
                self.emit(
                    generation,
                    EventKind::ManualRequired {
                        urls: rejected.clone(),
                    },
                );
                Ok(RunOutcome::ManualRequired { rejected })
            }
            other => Ok(self.finish_complete(generation, &other)),
        }
    }

    fn ensure_current(&self, generation: u64) -> AppResult<()> {
        let context = self.lock();
        if context.generation == generation {
            Ok(())
        } else {
            log::info!("Ignoring result for an abandoned upload run");
            Err(AppError::run_abandoned(
                context.run_id.as_deref().unwrap_or("unknown"),
            ))
        }
    }

    /// Apply a step to the run identified by `generation` and publish the result.
    fn apply(&self, generation: u64, step: Step) -> AppResult<PipelineState> {
        let mut context = self.lock();
        if context.generation != generation {
            return Err(AppError::run_abandoned(
                context.run_id.as_deref().unwrap_or("unknown"),
            ));
        }

        match next(&context.state, &step) {
            Some(state) => {
                context.state = state.clone();
                if step == Step::ManualAccepted {
                    context.manual_in_flight = false;
                }
                self.tracker.publish(context.snapshot());
                Ok(state)
            }
            None => {
                log::error!("Step {:?} is not valid in state {:?}", step, context.state);
                Err(AppError::invalid_transition(
                    &format!("{:?}", step),
                    &format!("{:?}", context.state),
                ))
            }
        }
    }

    fn record_upload_failure(
        &self,
        generation: u64,
        index: usize,
        item: &UploadItem,
        error: &AppError,
    ) -> AppResult<()> {
        {
            let mut context = self.lock();
            if context.generation == generation {
                context.failed_uploads.push(FailedUpload {
                    index,
                    name: item.name.clone(),
                    error: error.to_string(),
                });
            }
        }
        self.apply(
            generation,
            Step::ItemAttempted {
                index,
                succeeded: false,
            },
        )?;
        Ok(())
    }

    fn fail(&self, generation: u64, error: &AppError) {
        {
            let mut context = self.lock();
            if context.generation != generation {
                return;
            }
            context.manual_in_flight = false;
        }

        let message = error.to_string();
        if self.apply(generation, Step::Fail { message }).is_ok() {
            self.finish_failed(generation, error);
        }
    }

    fn finish_failed(&self, generation: u64, error: &AppError) {
        let run_id = {
            let mut context = self.lock();
            if context.generation != generation {
                return;
            }
            context.error = Some(error.to_string());
            self.tracker.publish(context.snapshot());
            context.run_id.clone()
        };

        log::error!("Upload run failed: {}", error);
        self.tracker.emit(
            run_id.as_deref(),
            EventKind::Failed {
                message: error.to_string(),
            },
        );
    }

    fn finish_complete(&self, generation: u64, state: &PipelineState) -> RunOutcome {
        let added = match state {
            PipelineState::Complete { added } => *added,
            _ => 0,
        };

        log::info!("Upload run complete: {} item(s) added", added);
        self.emit(generation, EventKind::Completed { added });
        RunOutcome::Complete { added }
    }

    /// Emit an event for the run identified by `generation`; abandoned runs stay silent.
    fn emit(&self, generation: u64, kind: EventKind) {
        let run_id = {
            let context = self.lock();
            if context.generation != generation {
                return;
            }
            context.run_id.clone()
        };
        self.tracker.emit(run_id.as_deref(), kind);
    }
}

/// Rejected URLs must come from the submitted set.
fn check_rejected_subset(
    outcome: ClassificationOutcome,
    submitted: &[String],
) -> AppResult<ClassificationOutcome> {
    if let ClassificationOutcome::Rejected { urls } = &outcome {
        let known: HashSet<&str> = submitted.iter().map(String::as_str).collect();
        if let Some(unknown) = urls.iter().find(|u| !known.contains(u.as_str())) {
            return Err(AppError::classification(format!(
                "service rejected a URL that was never submitted: {}",
                unknown
            )));
        }
    }
    Ok(outcome)
}

/// Manual assignments must name every rejected URL exactly once, and nothing else.
fn validate_coverage(rejected: &[String], assignments: &[ManualAssignment]) -> AppResult<()> {
    let expected: HashSet<&str> = rejected.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for assignment in assignments {
        let url = assignment.url.as_str();
        if !expected.contains(url) {
            return Err(AppError::input(&format!("{} was not rejected by the classifier", url)));
        }
        if !seen.insert(url) {
            return Err(AppError::input(&format!("{} was assigned more than once", url)));
        }
        InputValidator::validate_category(&assignment.category)
            .map_err(|e| AppError::input(&format!("{}: {}", url, e)))?;
    }

    let missing = expected.len() - seen.len();
    if missing > 0 {
        return Err(AppError::input(&format!(
            "{} rejected item(s) still need a category",
            missing
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticSession;
    use async_trait::async_trait;

    struct OfflineApi;

    #[async_trait]
    impl WardrobeApi for OfflineApi {
        async fn upload_asset(&self, _item: &UploadItem) -> AppResult<String> {
            Err(AppError::upload_failed("offline"))
        }

        async fn classify_auto(
            &self,
            _user_id: &str,
            _urls: &[String],
        ) -> AppResult<ClassificationOutcome> {
            Err(AppError::classification("offline"))
        }

        async fn classify_manual(
            &self,
            _user_id: &str,
            _assignments: &[ManualAssignment],
        ) -> AppResult<()> {
            Err(AppError::manual_classification("offline"))
        }
    }

    fn offline_pipeline() -> UploadPipeline {
        UploadPipeline::new(
            Arc::new(OfflineApi),
            Arc::new(StaticSession::signed_in("user-1")),
            8,
        )
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_step_invalid_for_state_is_not_reported_as_abandoned() {
        let pipeline = offline_pipeline();

        match pipeline.apply(0, Step::ManualAccepted) {
            Err(AppError::InvalidTransition { step, state }) => {
                assert_eq!(step, "ManualAccepted");
                assert_eq!(state, "Idle");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(pipeline.snapshot().is_baseline());
    }

    #[test]
    fn test_step_for_superseded_generation_is_abandoned() {
        let pipeline = offline_pipeline();
        pipeline.reset();

        assert!(matches!(
            pipeline.apply(0, Step::Start { total: 1 }),
            Err(AppError::RunAbandoned { .. })
        ));
    }

    #[test]
    fn test_upload_batch_accumulates_in_order() {
        let mut batch = UploadBatch::default();
        let item = UploadItem::new("/tmp/b.png", "image/png", "b.png");

        batch.record_success(0, "urlA".to_string());
        batch.record_failure(1, &item, &AppError::upload_failed("timeout"));
        batch.record_success(2, "urlC".to_string());

        assert_eq!(batch.attempted(), 3);
        assert_eq!(batch.urls(), urls(&["urlA", "urlC"]));
        assert_eq!(batch.failed[0].index, 1);
        assert_eq!(batch.failed[0].name, "b.png");
    }

    #[test]
    fn test_rejected_urls_must_be_submitted() {
        let submitted = urls(&["urlA", "urlB"]);
        let ok = ClassificationOutcome::Rejected {
            urls: urls(&["urlB"]),
        };
        assert!(check_rejected_subset(ok, &submitted).is_ok());

        let bad = ClassificationOutcome::Rejected {
            urls: urls(&["urlZ"]),
        };
        assert!(matches!(
            check_rejected_subset(bad, &submitted),
            Err(AppError::Classification { .. })
        ));
    }

    #[test]
    fn test_coverage_exact_set() {
        let rejected = urls(&["urlB", "urlC"]);
        let full = vec![
            ManualAssignment::new("urlC", "shoes"),
            ManualAssignment::new("urlB", "tops"),
        ];
        assert!(validate_coverage(&rejected, &full).is_ok());
    }

    #[test]
    fn test_coverage_rejects_partial_extra_and_duplicate() {
        let rejected = urls(&["urlB", "urlC"]);

        let partial = vec![ManualAssignment::new("urlB", "tops")];
        assert!(matches!(
            validate_coverage(&rejected, &partial),
            Err(AppError::Input { .. })
        ));

        let extra = vec![
            ManualAssignment::new("urlB", "tops"),
            ManualAssignment::new("urlC", "tops"),
            ManualAssignment::new("urlA", "tops"),
        ];
        assert!(validate_coverage(&rejected, &extra).is_err());

        let duplicate = vec![
            ManualAssignment::new("urlB", "tops"),
            ManualAssignment::new("urlB", "bottoms"),
        ];
        assert!(validate_coverage(&rejected, &duplicate).is_err());

        let bad_category = vec![
            ManualAssignment::new("urlB", ""),
            ManualAssignment::new("urlC", "tops"),
        ];
        assert!(validate_coverage(&rejected, &bad_category).is_err());
    }
}
