use anyhow::{anyhow, Result};
use tracing::{error, info, warn};

use crate::cli::{AdoptArgs, CreateArgs, TrainArgs};
use crate::imagegen::RemoteJobState;
use crate::state::AppState;
use crate::studio::lora::{
    check_training_status, resume_pending_jobs, start_lora_training, LoraTrainingRequest,
};
use crate::studio::repository::StudioRepository;
use crate::studio::types::{Character, JobStatus};
use crate::studio::workflow::{CharacterWorkflow, Stage, WorkflowHooks};
use crate::utils::timing::{complete_command_timer, start_command_timer};

pub fn format_character(character: &Character) -> String {
    let mut line = format!(
        "#{} {} [{}] {}",
        character.id, character.name, character.training_status, character.preview_image
    );
    if let Some(model_id) = character.model_id.as_deref() {
        line.push_str(&format!(" model={model_id}"));
    }
    line
}

/// Resolves to `true` when the user pressed Ctrl-C before `work` finished.
async fn interrupted<F: std::future::Future<Output = ()>>(work: F) -> bool {
    tokio::select! {
        _ = work => false,
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!("Failed to listen for Ctrl-C: {err}");
            }
            true
        }
    }
}

pub async fn create_handler<R: StudioRepository>(state: &AppState<R>, args: CreateArgs) -> Result<()> {
    let mut timer = start_command_timer("create", Some(state.owner_id), Some(args.name.clone()));
    let backend = state.backend()?;

    let hooks = WorkflowHooks::new()
        .on_complete(|character: &Character| {
            println!("Character \"{}\" has been successfully created.", character.name);
        })
        .on_failed(|reason: &str| {
            eprintln!("Training failed: {reason}");
        });
    let mut workflow = CharacterWorkflow::new(
        state.owner_id,
        backend,
        state.gallery.clone(),
        state.settings.clone(),
    )
    .with_hooks(hooks);
    workflow.start_design(Some(args.design.clone())).await;

    println!("Generating concepts...");
    let concepts = match workflow.generate_concepts(args.design).await {
        Ok(concepts) => concepts.to_vec(),
        Err(err) => {
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
            return Err(anyhow!(err.user_message()));
        }
    };
    for (index, url) in concepts.iter().enumerate() {
        println!("  {}. {}", index + 1, url);
    }
    if args.concepts_only {
        complete_command_timer(&mut timer, "success", Some("concepts_only".to_string()));
        return Ok(());
    }

    let Some(concept) = concepts.get(args.pick - 1) else {
        complete_command_timer(&mut timer, "error", Some("pick_out_of_range".to_string()));
        return Err(anyhow!(
            "Only {} concepts were generated; cannot pick #{}",
            concepts.len(),
            args.pick
        ));
    };
    workflow.select_concept(concept)?;

    println!("Generating training images for {}...", args.name);
    let job_id = match workflow.start_training(&args.name).await {
        Ok(job_id) => job_id,
        Err(err) => {
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
            return Err(anyhow!(err.user_message()));
        }
    };
    println!("Training job {job_id} submitted. Waiting for it to finish (Ctrl-C stops waiting)...");

    if interrupted(workflow.wait_for_training()).await {
        workflow.cancel().await;
        println!("Stopped polling job {job_id}. Run `resume` to pick it up again.");
        complete_command_timer(&mut timer, "cancelled", Some(job_id));
        return Ok(());
    }

    match workflow.stage() {
        Stage::Complete => {
            if let Some(character) = workflow.acknowledge_complete() {
                println!("{}", format_character(&character));
            }
            complete_command_timer(&mut timer, "success", Some(job_id));
            Ok(())
        }
        stage => {
            let reason = workflow
                .last_error()
                .unwrap_or_else(|| format!("training ended in the {stage} stage"));
            complete_command_timer(&mut timer, "error", Some(reason.clone()));
            Err(anyhow!(reason))
        }
    }
}

pub async fn train_handler<R: StudioRepository>(state: &AppState<R>, args: TrainArgs) -> Result<()> {
    let mut timer = start_command_timer("train", Some(state.owner_id), Some(args.name.clone()));
    let backend = state.backend()?;

    let request = LoraTrainingRequest {
        owner_id: state.owner_id,
        name: args.name,
        description: args.description,
        images: args.images,
        base_model: args.base_model,
        character_id: args.character_id,
    };
    let mut training =
        match start_lora_training(backend, &state.gallery, &state.settings, request).await {
            Ok(training) => training,
            Err(err) => {
                complete_command_timer(&mut timer, "error", Some(err.to_string()));
                return Err(anyhow!(err.user_message()));
            }
        };
    let job_id = training.job.id.clone();
    println!("Training job {job_id} submitted. Waiting for it to finish (Ctrl-C stops waiting)...");

    if interrupted(training.poller.wait()).await {
        training.poller.cancel().await;
        println!("Stopped polling job {job_id}. Run `resume` to pick it up again.");
        complete_command_timer(&mut timer, "cancelled", Some(job_id));
        return Ok(());
    }

    let stored = state.gallery.repository().get_training_job(&job_id).await?;
    match stored.map(|job| (job.status, job.result_model_id)) {
        Some((JobStatus::Succeeded, model_id)) => {
            println!(
                "LoRA model trained successfully: {}",
                model_id.unwrap_or_default()
            );
            complete_command_timer(&mut timer, "success", Some(job_id));
            Ok(())
        }
        other => {
            let status = other
                .map(|(status, _)| status.as_str())
                .unwrap_or("unknown");
            complete_command_timer(&mut timer, "error", Some(format!("job {job_id} {status}")));
            Err(anyhow!("Training job {job_id} ended as {status}"))
        }
    }
}

pub async fn adopt_handler<R: StudioRepository>(state: &AppState<R>, args: AdoptArgs) -> Result<()> {
    let mut timer = start_command_timer("adopt", Some(state.owner_id), Some(args.image.clone()));
    match state
        .gallery
        .adopt_image(state.owner_id, &args.name, &args.description, &args.image)
        .await
    {
        Ok(character) => {
            println!("Image saved as character: {}", format_character(&character));
            complete_command_timer(&mut timer, "success", None);
            Ok(())
        }
        Err(err) => {
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
            Err(anyhow!(err.user_message()))
        }
    }
}

pub async fn gallery_handler<R: StudioRepository>(
    state: &AppState<R>,
    character_id: Option<i64>,
) -> Result<()> {
    let mut timer = start_command_timer(
        "gallery",
        Some(state.owner_id),
        character_id.map(|id| id.to_string()),
    );
    if let Some(id) = character_id {
        let found = match state.gallery.get(id).await {
            Ok(found) => found,
            Err(err) => {
                complete_command_timer(&mut timer, "error", Some(err.to_string()));
                return Err(anyhow!(err.user_message()));
            }
        };
        return match found {
            Some(character) if character.owner_id == state.owner_id => {
                println!("{}", format_character(&character));
                if !character.description.is_empty() {
                    println!("  {}", character.description);
                }
                complete_command_timer(&mut timer, "success", None);
                Ok(())
            }
            _ => {
                complete_command_timer(&mut timer, "error", Some("not_found".to_string()));
                Err(anyhow!("Character {id} not found"))
            }
        };
    }

    let characters = match state.gallery.list(state.owner_id).await {
        Ok(characters) => characters,
        Err(err) => {
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
            return Err(anyhow!(err.user_message()));
        }
    };
    if characters.is_empty() {
        println!("No characters yet.");
    }
    for character in &characters {
        println!("{}", format_character(character));
    }
    complete_command_timer(
        &mut timer,
        "success",
        Some(format!("characters={}", characters.len())),
    );
    Ok(())
}

pub async fn status_handler<R: StudioRepository>(state: &AppState<R>, job_id: &str) -> Result<()> {
    let mut timer = start_command_timer("status", Some(state.owner_id), Some(job_id.to_string()));
    let backend = match state.backend() {
        Ok(backend) => backend,
        Err(err) => {
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
            return Err(err);
        }
    };
    let report = match check_training_status(backend.as_ref(), job_id).await {
        Ok(report) => report,
        Err(err) => {
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
            return Err(anyhow!(err.user_message()));
        }
    };

    let state_label = match &report.state {
        RemoteJobState::Running => "running".to_string(),
        RemoteJobState::Succeeded => "succeeded".to_string(),
        RemoteJobState::Failed => "failed".to_string(),
        RemoteJobState::Other(other) => other.clone(),
    };
    println!("Job {}: {}", job_id.trim(), state_label);
    if let Some(model_id) = report.model_id.as_deref() {
        println!("  model: {model_id}");
    }
    if let Some(message) = report.message.as_deref() {
        println!("  message: {message}");
    }
    complete_command_timer(&mut timer, "success", Some(state_label));
    Ok(())
}

pub async fn resume_handler<R: StudioRepository>(state: &AppState<R>) -> Result<()> {
    let mut timer = start_command_timer("resume", Some(state.owner_id), None);
    let backend = state.backend()?;
    let mut resumed = resume_pending_jobs(backend, &state.gallery, &state.settings).await?;
    if resumed.is_empty() {
        println!("No pending training jobs.");
        complete_command_timer(&mut timer, "success", Some("nothing_pending".to_string()));
        return Ok(());
    }
    for training in &resumed {
        println!(
            "Resumed job {} ({}) at {}%",
            training.poller.job_id(),
            training.job.name,
            training.job.progress
        );
    }

    let wait_all = async {
        for training in resumed.iter_mut() {
            training.poller.wait().await;
        }
    };
    if interrupted(wait_all).await {
        for training in resumed.iter_mut() {
            training.poller.cancel().await;
        }
        println!("Stopped polling.");
        complete_command_timer(&mut timer, "cancelled", None);
        return Ok(());
    }

    let mut failures = 0usize;
    for training in &resumed {
        match state.gallery.repository().get_training_job(&training.job.id).await {
            Ok(Some(job)) => {
                println!("Job {}: {}", job.id, job.status.as_str());
                if job.status != JobStatus::Succeeded {
                    failures += 1;
                }
            }
            Ok(None) => {
                failures += 1;
                warn!("Job {} disappeared from the job log", training.job.id);
            }
            Err(err) => {
                failures += 1;
                error!("Failed to read job {}: {}", training.job.id, err);
            }
        }
    }
    info!(
        "Resume finished: {} jobs, {} not successful",
        resumed.len(),
        failures
    );
    complete_command_timer(
        &mut timer,
        if failures == 0 { "success" } else { "error" },
        Some(format!("jobs={} failures={}", resumed.len(), failures)),
    );
    Ok(())
}
