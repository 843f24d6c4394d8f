use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::imagegen::GenerationBackend;
use crate::studio::error::{StudioError, MIN_TRAINING_VARIATIONS};
use crate::studio::gallery::Gallery;
use crate::studio::poller::{PollPhase, TrainingObserver, TrainingPoller};
use crate::studio::prompt::{build_prompt, named_prompt, variation_prompt, VARIATION_MODIFIERS};
use crate::studio::repository::StudioRepository;
use crate::studio::types::{Character, CharacterDesign, ConceptSet, JobStatus, TrainingJob};
use crate::studio::StudioSettings;

/// Hero concept plus at most nine variations.
pub const TRAINING_SET_LIMIT: usize = 10;

const PROGRESS_TRAINING_STARTED: u8 = 5;
const PROGRESS_IMAGES_COLLECTED: u8 = 30;
const PROGRESS_SUBMITTED: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Design,
    Selection,
    Training,
    Complete,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Design => "design",
            Stage::Selection => "selection",
            Stage::Training => "training",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type CompleteHook = Box<dyn Fn(&Character) + Send + Sync>;
type FailedHook = Box<dyn Fn(&str) + Send + Sync>;

/// Observers for the end of a training attempt.
#[derive(Default)]
pub struct WorkflowHooks {
    on_complete: Vec<CompleteHook>,
    on_failed: Vec<FailedHook>,
}

impl WorkflowHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Character) + Send + Sync + 'static,
    {
        self.on_complete.push(Box::new(hook));
        self
    }

    pub fn on_failed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_failed.push(Box::new(hook));
        self
    }

    fn complete(&self, character: &Character) {
        for hook in &self.on_complete {
            hook(character);
        }
    }

    fn failed(&self, reason: &str) {
        for hook in &self.on_failed {
            hook(reason);
        }
    }
}

/// The part of the session the poller writes to.
#[derive(Debug)]
struct SessionShared {
    stage: Stage,
    progress: u8,
    created: Option<Character>,
    failure: Option<StudioError>,
}

impl SessionShared {
    /// Returns to design with `failure` recorded; yields the user-facing text.
    fn fail(&mut self, failure: StudioError) -> String {
        let message = failure.user_message();
        self.stage = Stage::Design;
        self.progress = 0;
        self.failure = Some(failure);
        message
    }
}

/// One character-creation attempt for one user.
pub struct CharacterWorkflow<B, R> {
    owner_id: i64,
    backend: Arc<B>,
    gallery: Gallery<R>,
    settings: StudioSettings,
    hooks: Arc<WorkflowHooks>,
    design: CharacterDesign,
    concepts: ConceptSet,
    selected: Option<String>,
    job: Option<TrainingJob>,
    shared: Arc<Mutex<SessionShared>>,
    poller: Option<TrainingPoller>,
}

impl<B, R> CharacterWorkflow<B, R>
where
    B: GenerationBackend,
    R: StudioRepository,
{
    pub fn new(
        owner_id: i64,
        backend: Arc<B>,
        gallery: Gallery<R>,
        settings: StudioSettings,
    ) -> Self {
        CharacterWorkflow {
            owner_id,
            backend,
            gallery,
            settings,
            hooks: Arc::new(WorkflowHooks::default()),
            design: CharacterDesign::default(),
            concepts: Vec::new(),
            selected: None,
            job: None,
            shared: Arc::new(Mutex::new(SessionShared {
                stage: Stage::Design,
                progress: 0,
                created: None,
                failure: None,
            })),
            poller: None,
        }
    }

    pub fn with_hooks(mut self, hooks: WorkflowHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn stage(&self) -> Stage {
        self.shared.lock().stage
    }

    /// Overall progress of the attempt. While the job is running this is the
    /// poller's estimate, not a figure reported by the backend.
    pub fn progress(&self) -> u8 {
        self.shared.lock().progress
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared
            .lock()
            .failure
            .as_ref()
            .map(StudioError::user_message)
    }

    /// The error behind `last_error`, e.g. `TrainingFailed` for a job the
    /// backend rejected.
    pub fn last_failure(&self) -> Option<StudioError> {
        self.shared.lock().failure.clone()
    }

    pub fn created_character(&self) -> Option<Character> {
        self.shared.lock().created.clone()
    }

    pub fn design(&self) -> &CharacterDesign {
        &self.design
    }

    pub fn concepts(&self) -> &[String] {
        &self.concepts
    }

    pub fn selected_concept(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn job(&self) -> Option<&TrainingJob> {
        self.job.as_ref()
    }

    pub fn poll_phase(&self) -> PollPhase {
        self.poller
            .as_ref()
            .map(TrainingPoller::phase)
            .unwrap_or(PollPhase::Idle)
    }

    fn require_stage(&self, allowed: &[Stage], expected: &'static str) -> Result<(), StudioError> {
        let actual = self.stage();
        if allowed.contains(&actual) {
            Ok(())
        } else {
            Err(StudioError::InvalidStage { expected, actual })
        }
    }

    async fn stop_poller(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.cancel().await;
        }
    }

    /// Begins a fresh attempt, abandoning whatever the session was doing.
    pub async fn start_design(&mut self, initial: Option<CharacterDesign>) {
        self.stop_poller().await;
        self.design = initial.unwrap_or_default();
        self.concepts.clear();
        self.selected = None;
        self.job = None;
        let mut shared = self.shared.lock();
        shared.stage = Stage::Design;
        shared.progress = 0;
        shared.created = None;
        shared.failure = None;
    }

    pub fn update_design(&mut self, design: CharacterDesign) -> Result<(), StudioError> {
        self.require_stage(&[Stage::Design, Stage::Selection], "design or selection")?;
        self.design = design;
        Ok(())
    }

    /// Generates a new concept set for `design`. On success the previous set
    /// and selection are discarded and the session moves to selection; on
    /// failure nothing but the stored design changes.
    pub async fn generate_concepts(
        &mut self,
        design: CharacterDesign,
    ) -> Result<&[String], StudioError> {
        self.require_stage(&[Stage::Design, Stage::Selection], "design or selection")?;
        self.design = design;

        let prompt = build_prompt(&self.design);
        let request = self
            .settings
            .generation_request(prompt, self.settings.concept_samples);
        info!(
            "Generating {} concepts for owner {}",
            request.samples, self.owner_id
        );

        let result = match self.backend.generate(&request).await {
            Ok(urls) if urls.is_empty() => Err(StudioError::Generation(
                "No images were generated. Please try again.".to_string(),
            )),
            other => other,
        };

        match result {
            Ok(mut urls) => {
                urls.truncate(request.samples as usize);
                self.concepts = urls;
                self.selected = None;
                let mut shared = self.shared.lock();
                shared.stage = Stage::Selection;
                shared.failure = None;
                drop(shared);
                Ok(&self.concepts)
            }
            Err(err) => {
                warn!("Concept generation failed for owner {}: {}", self.owner_id, err);
                self.shared.lock().failure = Some(err.clone());
                Err(err)
            }
        }
    }

    pub async fn regenerate_concepts(&mut self) -> Result<&[String], StudioError> {
        let design = self.design.clone();
        self.generate_concepts(design).await
    }

    /// Picks one concept; a later pick replaces the earlier one.
    pub fn select_concept(&mut self, url: &str) -> Result<(), StudioError> {
        self.require_stage(&[Stage::Selection], "selection")?;
        if !self.concepts.iter().any(|concept| concept == url) {
            return Err(StudioError::UnknownConcept(url.to_string()));
        }
        self.selected = Some(url.to_string());
        Ok(())
    }

    /// Builds the training set, submits the job and starts polling. Returns
    /// the backend job id; completion is reported through the hooks.
    pub async fn start_training(&mut self, name: &str) -> Result<String, StudioError> {
        self.require_stage(&[Stage::Selection], "selection")?;
        let Some(concept) = self.selected.clone() else {
            return Err(StudioError::NoConceptSelected);
        };
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(StudioError::NameRequired);
        }

        {
            let mut shared = self.shared.lock();
            shared.stage = Stage::Training;
            shared.progress = PROGRESS_TRAINING_STARTED;
            shared.failure = None;
        }

        match self.enter_training(&name, &concept).await {
            Ok(job_id) => Ok(job_id),
            Err(err) => {
                error!("Character training for {} could not start: {}", name, err);
                let message = self.shared.lock().fail(err.clone());
                self.hooks.failed(&message);
                Err(err)
            }
        }
    }

    async fn enter_training(&mut self, name: &str, concept: &str) -> Result<String, StudioError> {
        let base_prompt = named_prompt(name, &self.design);
        let images = self.collect_training_images(concept, &base_prompt).await?;
        self.shared.lock().progress = PROGRESS_IMAGES_COLLECTED;

        let request = self.settings.training_request(name, None, images.clone());
        let job_id = self.backend.submit_training(&request).await?;
        info!(
            "Submitted training job {} for {} with {} images",
            job_id,
            name,
            images.len()
        );

        let job = TrainingJob {
            id: job_id.clone(),
            owner_id: self.owner_id,
            character_id: None,
            name: name.to_string(),
            description: build_prompt(&self.design),
            source_images: images,
            status: JobStatus::Submitted,
            progress: PROGRESS_SUBMITTED,
            result_model_id: None,
            created_at: Utc::now(),
        };
        self.gallery.begin_training(&job).await?;
        self.shared.lock().progress = PROGRESS_SUBMITTED;

        self.stop_poller().await;
        let observer = Arc::new(SessionObserver {
            shared: Arc::clone(&self.shared),
            hooks: Arc::clone(&self.hooks),
            gallery: self.gallery.clone(),
            job: job.clone(),
        });
        self.poller = Some(TrainingPoller::start(
            Arc::clone(&self.backend),
            observer,
            job_id.clone(),
            self.settings.workflow_poller(),
            PROGRESS_SUBMITTED,
        ));
        self.job = Some(job);
        Ok(job_id)
    }

    /// Generates variations one at a time, in catalog order, until the set is
    /// full or the catalog runs out. Failed variations are skipped.
    async fn collect_training_images(
        &self,
        concept: &str,
        base_prompt: &str,
    ) -> Result<Vec<String>, StudioError> {
        let mut images = vec![concept.to_string()];
        let mut generated = 0usize;

        for modifier in VARIATION_MODIFIERS {
            if images.len() >= TRAINING_SET_LIMIT {
                break;
            }
            let request = self
                .settings
                .generation_request(variation_prompt(base_prompt, modifier), 1);
            match self.backend.generate(&request).await {
                Ok(urls) => {
                    for url in urls {
                        if images.len() >= TRAINING_SET_LIMIT {
                            break;
                        }
                        images.push(url);
                        generated += 1;
                    }
                }
                Err(err) => {
                    warn!("Training variation '{}' failed: {}", modifier, err);
                }
            }
        }

        if generated < MIN_TRAINING_VARIATIONS {
            return Err(StudioError::InsufficientTrainingImages {
                collected: generated,
                required: MIN_TRAINING_VARIATIONS,
            });
        }
        Ok(images)
    }

    /// Resolves once the current job finishes or polling is cancelled.
    pub async fn wait_for_training(&mut self) {
        if let Some(poller) = self.poller.as_mut() {
            poller.wait().await;
        }
    }

    /// Leaves the complete stage and hands the new character to the caller.
    pub fn acknowledge_complete(&mut self) -> Option<Character> {
        let mut shared = self.shared.lock();
        if shared.stage != Stage::Complete {
            return None;
        }
        let created = shared.created.take();
        shared.stage = Stage::Design;
        shared.progress = 0;
        drop(shared);

        self.concepts.clear();
        self.selected = None;
        self.job = None;
        self.poller = None;
        created
    }

    /// Stops local polling. The remote job is left running.
    pub async fn cancel(&mut self) {
        self.stop_poller().await;
        let mut shared = self.shared.lock();
        if shared.stage == Stage::Training {
            shared.stage = Stage::Design;
            shared.progress = 0;
        }
    }
}

struct SessionObserver<R> {
    shared: Arc<Mutex<SessionShared>>,
    hooks: Arc<WorkflowHooks>,
    gallery: Gallery<R>,
    job: TrainingJob,
}

impl<R: StudioRepository> TrainingObserver for SessionObserver<R> {
    async fn on_progress(&self, job_id: &str, phase: PollPhase, progress: u8) {
        {
            let mut shared = self.shared.lock();
            shared.progress = shared.progress.max(progress);
        }
        let status = match phase {
            PollPhase::Running => JobStatus::Running,
            _ => JobStatus::Submitted,
        };
        if let Err(err) = self.gallery.record_progress(job_id, status, progress).await {
            warn!("Failed to record progress for job {}: {}", job_id, err);
        }
    }

    async fn on_succeeded(&self, job_id: &str, model_id: &str) {
        match self.gallery.complete_training(&self.job, model_id).await {
            Ok(character) => {
                {
                    let mut shared = self.shared.lock();
                    shared.stage = Stage::Complete;
                    shared.progress = 100;
                    shared.created = Some(character.clone());
                }
                info!(
                    "Character \"{}\" has been successfully created (job {})",
                    character.name, job_id
                );
                self.hooks.complete(&character);
            }
            Err(err) => {
                error!(
                    "Training job {} succeeded but the character could not be saved: {}",
                    job_id, err
                );
                let message = self.shared.lock().fail(err);
                self.hooks.failed(&message);
            }
        }
    }

    async fn on_failed(&self, job_id: &str, reason: Option<&str>, progress: u8) {
        if let Err(err) = self.gallery.fail_training(&self.job, progress).await {
            warn!("Failed to record failure of job {}: {}", job_id, err);
        }
        let failure = StudioError::TrainingFailed(reason.map(str::to_string));
        let message = self.shared.lock().fail(failure);
        self.hooks.failed(&message);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::imagegen::{RemoteJobState, TrainingStatusReport};
    use crate::studio::repository::MemoryRepository;
    use crate::studio::testing::{failed, running, succeeded, FakeBackend};
    use crate::studio::types::{CharacterStyle, TrainingStatus};

    struct Harness {
        backend: Arc<FakeBackend>,
        gallery: Gallery<MemoryRepository>,
        completed: Arc<Mutex<Vec<Character>>>,
        failures: Arc<Mutex<Vec<String>>>,
        workflow: CharacterWorkflow<FakeBackend, MemoryRepository>,
    }

    fn harness() -> Harness {
        let backend = Arc::new(FakeBackend::new());
        let gallery = Gallery::new(Arc::new(MemoryRepository::new()));
        let completed = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let hooks = {
            let completed = Arc::clone(&completed);
            let failures = Arc::clone(&failures);
            WorkflowHooks::new()
                .on_complete(move |character: &Character| completed.lock().push(character.clone()))
                .on_failed(move |reason: &str| failures.lock().push(reason.to_string()))
        };
        let workflow = CharacterWorkflow::new(
            7,
            Arc::clone(&backend),
            gallery.clone(),
            StudioSettings::default(),
        )
        .with_hooks(hooks);
        Harness {
            backend,
            gallery,
            completed,
            failures,
            workflow,
        }
    }

    fn concept_urls() -> Vec<String> {
        (0..4)
            .map(|index| format!("https://cdn.example/concept-{index}.png"))
            .collect()
    }

    fn anime_design() -> CharacterDesign {
        CharacterDesign {
            style: CharacterStyle::Anime,
            custom_prompt: "neon hair".to_string(),
            ..CharacterDesign::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn aiko_is_trained_and_added_to_the_gallery() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.backend.echo_generate();
        h.backend.script_status([Ok(running()), Ok(running()), Ok(succeeded("lora-123"))]);
        h.backend.set_status_fallback(succeeded("lora-123"));

        h.workflow.start_design(None).await;
        let concepts = h.workflow.generate_concepts(anime_design()).await.unwrap().to_vec();
        assert_eq!(concepts.len(), 4);
        assert_eq!(h.workflow.stage(), Stage::Selection);

        h.workflow.select_concept(&concepts[2]).unwrap();
        let job_id = h.workflow.start_training("Aiko").await.unwrap();
        assert_eq!(h.workflow.stage(), Stage::Training);
        assert_eq!(h.workflow.progress(), PROGRESS_SUBMITTED);

        h.workflow.wait_for_training().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.workflow.stage(), Stage::Complete);
        assert_eq!(h.workflow.progress(), 100);
        let characters = h.gallery.list(7).await.unwrap();
        assert_eq!(characters.len(), 1);
        let aiko = &characters[0];
        assert_eq!(aiko.name, "Aiko");
        assert_eq!(aiko.training_status, TrainingStatus::Complete);
        assert_eq!(aiko.model_id.as_deref(), Some("lora-123"));
        assert_eq!(aiko.preview_image, concepts[2]);
        assert_eq!(h.completed.lock().len(), 1);
        assert!(h.failures.lock().is_empty());

        let submitted = h.backend.submit_requests();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].instance_prompt, "Aiko");
        assert_eq!(submitted[0].images.len(), TRAINING_SET_LIMIT);
        assert_eq!(submitted[0].images[0], concepts[2]);

        let stored = h
            .gallery
            .repository()
            .get_training_job(&job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.result_model_id.as_deref(), Some("lora-123"));
    }

    #[tokio::test]
    async fn concept_and_variation_requests_use_expected_parameters() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.backend.echo_generate();
        h.backend.set_status_fallback(running());

        let concepts = h.workflow.generate_concepts(anime_design()).await.unwrap().to_vec();
        h.workflow.select_concept(&concepts[0]).unwrap();
        h.workflow.start_training("Aiko").await.unwrap();
        h.workflow.cancel().await;

        let requests = h.backend.generate_requests();
        assert_eq!(requests.len(), 1 + VARIATION_MODIFIERS.len());
        let concept_request = &requests[0];
        assert_eq!((concept_request.width, concept_request.height), (512, 768));
        assert_eq!(concept_request.samples, 4);
        assert!(concept_request.prompt.starts_with("high quality anime illustration"));
        assert!(concept_request.prompt.ends_with("neon hair"));
        for (request, modifier) in requests[1..].iter().zip(VARIATION_MODIFIERS) {
            assert_eq!(request.samples, 1);
            assert!(request.prompt.starts_with("Aiko, "));
            assert!(request.prompt.contains(modifier));
            assert!(request.prompt.ends_with("same person, consistent features"));
        }
    }

    #[tokio::test]
    async fn empty_concept_output_stays_in_design() {
        let mut h = harness();
        h.backend.script_generate([Ok(Vec::new())]);

        let err = h.workflow.generate_concepts(anime_design()).await.unwrap_err();
        assert!(matches!(err, StudioError::Generation(_)));
        assert_eq!(h.workflow.stage(), Stage::Design);
        assert!(h.workflow.concepts().is_empty());
        assert!(h.workflow.last_error().is_some());
    }

    #[tokio::test]
    async fn failed_regeneration_keeps_the_previous_concepts() {
        let mut h = harness();
        h.backend.script_generate([
            Ok(concept_urls()),
            Err(StudioError::Generation("quota exceeded".to_string())),
        ]);

        h.workflow.generate_concepts(anime_design()).await.unwrap();
        h.workflow.select_concept("https://cdn.example/concept-1.png").unwrap();
        let err = h.workflow.regenerate_concepts().await.unwrap_err();

        assert_eq!(err.user_message(), "quota exceeded");
        assert_eq!(h.workflow.concepts(), concept_urls().as_slice());
        assert_eq!(
            h.workflow.selected_concept(),
            Some("https://cdn.example/concept-1.png")
        );
    }

    #[tokio::test]
    async fn regeneration_replaces_concepts_and_clears_selection() {
        let mut h = harness();
        h.backend.script_generate([
            Ok(concept_urls()),
            Ok(vec!["https://cdn.example/fresh.png".to_string()]),
        ]);

        h.workflow.generate_concepts(anime_design()).await.unwrap();
        h.workflow.select_concept("https://cdn.example/concept-0.png").unwrap();
        h.workflow.regenerate_concepts().await.unwrap();

        assert_eq!(h.workflow.concepts(), ["https://cdn.example/fresh.png".to_string()]);
        assert_eq!(h.workflow.selected_concept(), None);
        assert_eq!(h.workflow.stage(), Stage::Selection);
    }

    #[tokio::test]
    async fn selection_replaces_and_rejects_unknown_urls() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.workflow.generate_concepts(anime_design()).await.unwrap();

        h.workflow.select_concept("https://cdn.example/concept-0.png").unwrap();
        h.workflow.select_concept("https://cdn.example/concept-3.png").unwrap();
        assert_eq!(
            h.workflow.selected_concept(),
            Some("https://cdn.example/concept-3.png")
        );

        let err = h
            .workflow
            .select_concept("https://elsewhere.example/x.png")
            .unwrap_err();
        assert!(matches!(err, StudioError::UnknownConcept(_)));
    }

    #[tokio::test]
    async fn training_without_selection_or_name_is_rejected() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.workflow.generate_concepts(anime_design()).await.unwrap();

        let err = h.workflow.start_training("Aiko").await.unwrap_err();
        assert!(matches!(err, StudioError::NoConceptSelected));
        assert_eq!(h.workflow.stage(), Stage::Selection);

        h.workflow.select_concept("https://cdn.example/concept-0.png").unwrap();
        let err = h.workflow.start_training("  ").await.unwrap_err();
        assert!(matches!(err, StudioError::NameRequired));
        assert_eq!(h.workflow.stage(), Stage::Selection);
        assert_eq!(h.backend.generate_requests().len(), 1);
    }

    #[tokio::test]
    async fn too_few_variations_return_to_design_without_submitting() {
        let mut h = harness();
        h.backend.script_generate([
            Ok(concept_urls()),
            Ok(vec!["https://cdn.example/v1.png".to_string()]),
            Ok(vec!["https://cdn.example/v2.png".to_string()]),
        ]);

        h.workflow.generate_concepts(anime_design()).await.unwrap();
        h.workflow.select_concept("https://cdn.example/concept-2.png").unwrap();
        let err = h.workflow.start_training("Aiko").await.unwrap_err();

        assert!(matches!(
            err,
            StudioError::InsufficientTrainingImages {
                collected: 2,
                required: 3
            }
        ));
        assert_eq!(h.workflow.stage(), Stage::Design);
        assert!(h.backend.submit_requests().is_empty());
        assert_eq!(h.failures.lock().len(), 1);
        assert_eq!(h.workflow.poll_phase(), PollPhase::Idle);
    }

    #[tokio::test]
    async fn rejected_submission_returns_to_design() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.backend.echo_generate();
        h.backend.script_submit([Err(StudioError::TrainingSubmission(
            "insufficient credits".to_string(),
        ))]);

        h.workflow.generate_concepts(anime_design()).await.unwrap();
        h.workflow.select_concept("https://cdn.example/concept-0.png").unwrap();
        let err = h.workflow.start_training("Aiko").await.unwrap_err();

        assert!(matches!(err, StudioError::TrainingSubmission(_)));
        assert_eq!(h.workflow.stage(), Stage::Design);
        assert_eq!(h.failures.lock().as_slice(), ["insufficient credits".to_string()]);
        assert_eq!(h.workflow.poll_phase(), PollPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_is_surfaced_and_gallery_unchanged() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.backend.echo_generate();
        h.backend.script_status([Ok(running()), Ok(failed("bad images"))]);
        h.backend.set_status_fallback(running());

        h.workflow.generate_concepts(anime_design()).await.unwrap();
        h.workflow.select_concept("https://cdn.example/concept-0.png").unwrap();
        h.workflow.start_training("Aiko").await.unwrap();
        h.workflow.wait_for_training().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.workflow.stage(), Stage::Design);
        assert_eq!(h.workflow.last_error().as_deref(), Some("bad images"));
        assert!(matches!(
            h.workflow.last_failure(),
            Some(StudioError::TrainingFailed(Some(ref reason))) if reason == "bad images"
        ));
        assert_eq!(h.failures.lock().as_slice(), ["bad images".to_string()]);
        assert_eq!(h.backend.status_calls(), 2);
        assert!(h.gallery.list(7).await.unwrap().is_empty());
        assert_eq!(h.workflow.poll_phase(), PollPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_remote_failure_uses_the_default_message() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.backend.echo_generate();
        h.backend.set_status_fallback(TrainingStatusReport {
            state: RemoteJobState::Failed,
            model_id: None,
            message: None,
        });

        h.workflow.generate_concepts(anime_design()).await.unwrap();
        h.workflow.select_concept("https://cdn.example/concept-0.png").unwrap();
        h.workflow.start_training("Aiko").await.unwrap();
        h.workflow.wait_for_training().await;

        assert!(matches!(
            h.workflow.last_failure(),
            Some(StudioError::TrainingFailed(None))
        ));
        let expected = StudioError::TrainingFailed(None).user_message();
        assert_eq!(h.workflow.last_error(), Some(expected.clone()));
        assert_eq!(h.failures.lock().as_slice(), [expected]);
    }

    #[tokio::test]
    async fn design_edits_are_limited_to_design_and_selection() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.backend.echo_generate();
        h.backend.set_status_fallback(running());

        h.workflow.update_design(anime_design()).unwrap();
        assert_eq!(h.workflow.design(), &anime_design());
        h.workflow.regenerate_concepts().await.unwrap();
        assert!(h.backend.generate_requests()[0].prompt.ends_with("neon hair"));

        let edited = CharacterDesign {
            custom_prompt: "silver hair".to_string(),
            ..anime_design()
        };
        h.workflow.update_design(edited.clone()).unwrap();
        assert_eq!(h.workflow.stage(), Stage::Selection);
        assert_eq!(h.workflow.concepts(), concept_urls().as_slice());

        h.workflow.select_concept("https://cdn.example/concept-1.png").unwrap();
        assert!(h.workflow.job().is_none());
        let job_id = h.workflow.start_training("Aiko").await.unwrap();
        let job = h.workflow.job().unwrap();
        assert_eq!(job.id, job_id);
        assert_eq!(job.source_images[0], "https://cdn.example/concept-1.png");
        assert!(job.description.ends_with("silver hair"));

        let err = h
            .workflow
            .update_design(CharacterDesign::default())
            .unwrap_err();
        assert!(matches!(
            err,
            StudioError::InvalidStage {
                actual: Stage::Training,
                ..
            }
        ));
        assert_eq!(h.workflow.design(), &edited);
        h.workflow.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_stops_polling_and_hooks() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.backend.echo_generate();
        h.backend.script_status([Ok(running()), Ok(running())]);
        h.backend.set_status_fallback(succeeded("lora-late"));

        h.workflow.generate_concepts(anime_design()).await.unwrap();
        h.workflow.select_concept("https://cdn.example/concept-0.png").unwrap();
        h.workflow.start_training("Aiko").await.unwrap();
        tokio::time::sleep(Duration::from_millis(11_000)).await;
        assert_eq!(h.workflow.progress(), PROGRESS_SUBMITTED + 2);

        h.workflow.cancel().await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(h.workflow.stage(), Stage::Design);
        assert_eq!(h.backend.status_calls(), 2);
        assert!(h.completed.lock().is_empty());
        assert!(h.gallery.list(7).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledging_completion_resets_the_session() {
        let mut h = harness();
        h.backend.script_generate([Ok(concept_urls())]);
        h.backend.echo_generate();
        h.backend.set_status_fallback(succeeded("lora-9"));

        assert!(h.workflow.acknowledge_complete().is_none());
        h.workflow.generate_concepts(anime_design()).await.unwrap();
        h.workflow.select_concept("https://cdn.example/concept-0.png").unwrap();
        h.workflow.start_training("Aiko").await.unwrap();
        h.workflow.wait_for_training().await;

        let character = h.workflow.acknowledge_complete().unwrap();
        assert_eq!(character.model_id.as_deref(), Some("lora-9"));
        assert_eq!(h.workflow.stage(), Stage::Design);
        assert_eq!(h.workflow.progress(), 0);
        assert!(h.workflow.concepts().is_empty());
        assert!(h.workflow.selected_concept().is_none());
        assert!(h.workflow.created_character().is_none());
    }

    #[tokio::test]
    async fn operations_out_of_stage_are_rejected() {
        let mut h = harness();
        let err = h.workflow.select_concept("https://cdn.example/a.png").unwrap_err();
        assert!(matches!(
            err,
            StudioError::InvalidStage {
                actual: Stage::Design,
                ..
            }
        ));
        let err = h.workflow.start_training("Aiko").await.unwrap_err();
        assert!(matches!(err, StudioError::InvalidStage { .. }));
    }
}
