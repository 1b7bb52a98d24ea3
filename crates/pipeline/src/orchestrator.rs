//! Pipeline orchestrator.
//!
//! Drives one task through its canonical stage order: idempotent skip of
//! already-completed stages (crash resume), one TaskStage row per attempt,
//! per-stage deadlines and transient-error retries with backoff, bounded
//! progress mapped onto the status bands, and cancellation checks at every
//! stage and retry boundary.

use std::path::PathBuf;

use serde::Deserialize;
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::progress::ProgressEvent;
use es_domain::service::{AsrVariant, ServiceType};
use es_domain::summary::SummaryType;
use es_domain::task::{SourceType, StageType, Task};
use es_domain::usage::UsageRecord;
use es_providers::breaker::record_outcome;
use es_providers::selector::SelectionRequest;
use es_providers::traits::AsrRequest;
use es_store::{quota, stages, summaries, tasks, transcripts};

use crate::cancel::CancelToken;
use crate::stages::{download, resolve, transcode, upload};
use crate::summarize::SummaryGenerator;
use crate::PipelineContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parameters of an enqueued visualization job.
#[derive(Debug, Clone, Deserialize)]
pub struct VisualizeParams {
    pub visual_type: SummaryType,
    #[serde(default)]
    pub content_style: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub generate_image: bool,
    #[serde(default = "default_image_format")]
    pub image_format: String,
}

fn default_image_format() -> String {
    "png".into()
}

/// In-memory artifacts carried between stages of one run. Everything here
/// is recomputable on crash-resume; durable state lives in the database
/// and object storage.
#[derive(Default)]
struct StageState {
    resolved_url: Option<String>,
    duration_seconds: Option<f64>,
}

pub struct Orchestrator {
    ctx: PipelineContext,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            http: reqwest::Client::new(),
        }
    }

    fn scratch_dir(&self, task_id: Uuid) -> PathBuf {
        PathBuf::from(&self.ctx.config.pipeline.tmp_dir).join(task_id.to_string())
    }

    fn source_path(&self, task_id: Uuid) -> PathBuf {
        self.scratch_dir(task_id).join("source.media")
    }

    fn canonical_path(&self, task_id: Uuid) -> PathBuf {
        self.scratch_dir(task_id).join("canonical.wav")
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Entry points
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run the audio pipeline for a task to a terminal state.
    pub async fn run_pipeline(&self, task_id: Uuid) -> Result<()> {
        let mut task = match tasks::get_task(&self.ctx.pool, task_id).await? {
            Some(task) => task,
            None => {
                tracing::warn!(task_id = %task_id, "queued task no longer exists");
                return Ok(());
            }
        };
        if task.status.is_terminal() || task.deleted_at.is_some() {
            return Ok(());
        }

        let token = self.ctx.cancels.register(task_id);
        let result = self.drive(&mut task, &token).await;
        self.ctx.cancels.remove(task_id);

        match result {
            Ok(()) => {
                tasks::mark_completed(&self.ctx.pool, task_id).await?;
                self.ctx.progress.publish(ProgressEvent::completed(task_id));
                tracing::info!(task_id = %task_id, "pipeline completed");
                Ok(())
            }
            Err(e) => {
                let message = match &e {
                    Error::Cancelled => "cancelled".to_string(),
                    other => other.to_string(),
                };
                tasks::mark_failed(&self.ctx.pool, task_id, &message).await?;
                let progress = tasks::get_task(&self.ctx.pool, task_id)
                    .await?
                    .map_or(0, |t| t.progress);
                self.ctx
                    .progress
                    .publish(ProgressEvent::error(task_id, progress, message));
                tracing::warn!(task_id = %task_id, error = %e, "pipeline failed");
                Ok(())
            }
        }
    }

    /// Run an enqueued visualization as its own single-stage pipeline.
    /// Never touches the parent task's status or progress.
    pub async fn run_visualization(&self, task_id: Uuid, params: VisualizeParams) -> Result<()> {
        let task = tasks::get_task(&self.ctx.pool, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

        let token = self.ctx.cancels.register(task_id);
        let generator = SummaryGenerator::new(self.ctx.clone());

        let mut last_err: Option<Error> = None;
        for attempt in 0..self.ctx.retry.max_attempts() {
            if token.is_cancelled() {
                last_err = Some(Error::Cancelled);
                break;
            }
            let record = stages::start_stage(&self.ctx.pool, task_id, StageType::Visualize).await?;
            let outcome = tokio::time::timeout(
                StageType::Visualize.deadline(),
                generator.generate_visual(
                    &task,
                    params.visual_type,
                    params.content_style.as_deref(),
                    params.provider.as_deref(),
                    params.model_id.as_deref(),
                    params.generate_image,
                    &params.image_format,
                    record.attempt_id,
                ),
            )
            .await
            .unwrap_or_else(|_| Err(Error::Timeout("visualization deadline exceeded".into())));

            match outcome {
                Ok(()) => {
                    stages::complete_stage(&self.ctx.pool, record.id).await?;
                    self.ctx.cancels.remove(task_id);
                    return Ok(());
                }
                Err(e) => {
                    stages::fail_stage(&self.ctx.pool, record.id, &e.to_string()).await?;
                    if e.is_transient() && attempt + 1 < self.ctx.retry.max_attempts() {
                        tokio::time::sleep(self.ctx.retry.jittered_delay(attempt)).await;
                        last_err = Some(e);
                        continue;
                    }
                    last_err = Some(e);
                    break;
                }
            }
        }

        self.ctx.cancels.remove(task_id);
        Err(last_err.unwrap_or_else(|| Error::Other("visualization did not run".into())))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Stage loop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn drive(&self, task: &mut Task, token: &CancelToken) -> Result<()> {
        let mut state = StageState {
            duration_seconds: task.duration_seconds,
            ..Default::default()
        };

        for &stage in StageType::canonical_order(task.source_type) {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if self.stage_satisfied(stage, task, &state).await? {
                tracing::debug!(task_id = %task.id, stage = %stage, "stage already complete, skipping");
                continue;
            }

            self.run_stage(stage, task, &mut state, token).await?;

            let status = stage.task_status();
            let progress = status.progress_at(band_fraction(stage, task.source_type));
            tasks::update_status_progress(&self.ctx.pool, task.id, status, progress).await?;
            task.status = status;
            task.progress = task.progress.max(progress);
            self.ctx
                .progress
                .publish(ProgressEvent::progress(task.id, status, stage, progress));
        }

        // Scratch files are only needed for resume of an unfinished run.
        let _ = tokio::fs::remove_dir_all(self.scratch_dir(task.id)).await;
        Ok(())
    }

    /// One stage with its retry budget. Every attempt gets a fresh
    /// TaskStage row (the previous one is archived) and its own deadline.
    async fn run_stage(
        &self,
        stage: StageType,
        task: &mut Task,
        state: &mut StageState,
        token: &CancelToken,
    ) -> Result<()> {
        let max_attempts = self.ctx.retry.max_attempts();
        let mut last_err: Option<Error> = None;

        for attempt in 0..max_attempts {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let record = stages::start_stage(&self.ctx.pool, task.id, stage).await?;
            let status = stage.task_status();
            let entry_progress = status.progress_band().0.max(task.progress);
            tasks::update_status_progress(&self.ctx.pool, task.id, status, entry_progress).await?;
            self.ctx.progress.publish(ProgressEvent::progress(
                task.id,
                status,
                stage,
                entry_progress,
            ));

            let outcome = tokio::time::timeout(
                stage.deadline(),
                self.execute(stage, task, state, record.attempt_id, attempt, token),
            )
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout(format!("{stage} exceeded its deadline")))
            });

            match outcome {
                Ok(()) => {
                    stages::complete_stage(&self.ctx.pool, record.id).await?;
                    return Ok(());
                }
                Err(e) => {
                    stages::fail_stage(&self.ctx.pool, record.id, &e.to_string()).await?;
                    if e.is_transient() && attempt + 1 < max_attempts {
                        let delay = self.ctx.retry.jittered_delay(attempt);
                        tracing::warn!(
                            task_id = %task.id,
                            stage = %stage,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "stage failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Other(format!("{stage} retry budget exhausted"))))
    }

    /// Completed-and-active short circuit, with artifact checks so a crash
    /// that lost scratch files re-runs the producing stage.
    async fn stage_satisfied(
        &self,
        stage: StageType,
        task: &Task,
        state: &StageState,
    ) -> Result<bool> {
        let record = stages::active_stage(&self.ctx.pool, task.id, stage).await?;
        let completed = record
            .is_some_and(|r| r.status == es_domain::task::StageStatus::Completed);
        if !completed {
            return Ok(false);
        }

        let ok = match stage {
            StageType::Resolve => {
                state.resolved_url.is_some() || self.source_path(task.id).exists()
            }
            StageType::Download => self.source_path(task.id).exists(),
            StageType::Transcode => self.canonical_path(task.id).exists(),
            StageType::UploadStorage => task.file_key.is_some(),
            StageType::Transcribe => {
                let (_, count) = transcripts::list_segments(&self.ctx.pool, task.id, 1, 1).await?;
                count > 0
            }
            StageType::Summarize => {
                !summaries::active_summaries(&self.ctx.pool, task.id).await?.is_empty()
            }
            StageType::Visualize => true,
        };
        Ok(ok)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Stage actions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn execute(
        &self,
        stage: StageType,
        task: &mut Task,
        state: &mut StageState,
        attempt_id: Uuid,
        attempt: u32,
        token: &CancelToken,
    ) -> Result<()> {
        match stage {
            StageType::Resolve => {
                let url = task
                    .source_url
                    .as_deref()
                    .ok_or_else(|| Error::InvalidParam("url task has no source_url".into()))?;
                state.resolved_url = Some(resolve::resolve(&self.http, url).await?);
                Ok(())
            }
            StageType::Download => self.do_download(task, state, token).await,
            StageType::Transcode => self.do_transcode(task, state).await,
            StageType::UploadStorage => self.do_upload(task).await,
            StageType::Transcribe => self.do_transcribe(task, state, attempt_id, attempt).await,
            StageType::Summarize => {
                SummaryGenerator::new(self.ctx.clone())
                    .generate_all(task, attempt_id)
                    .await
            }
            StageType::Visualize => {
                Err(Error::Other("visualize runs through run_visualization".into()))
            }
        }
    }

    async fn do_download(
        &self,
        task: &Task,
        state: &mut StageState,
        token: &CancelToken,
    ) -> Result<()> {
        let dest = self.source_path(task.id);
        let limit_bytes = self.ctx.config.pipeline.download_limit_mb * 1024 * 1024;

        match task.source_type {
            SourceType::Url => {
                let url = state
                    .resolved_url
                    .clone()
                    .or_else(|| task.source_url.clone())
                    .ok_or_else(|| Error::InvalidParam("nothing to download".into()))?;
                download::download(&self.http, &url, &dest, limit_bytes, token).await?;
            }
            SourceType::Upload => {
                // Pull the user's uploaded object down to scratch.
                let key = task
                    .file_key
                    .as_deref()
                    .ok_or_else(|| Error::InvalidParam("upload task has no file_key".into()))?;
                let selection = self.select_storage(task).await?;
                let store = selection
                    .client
                    .as_storage()
                    .ok_or_else(|| Error::Other("selector returned a non-storage client".into()))?;
                let result = store.get_object(key).await;
                record_outcome(
                    &self.ctx.breakers,
                    &self.ctx.health,
                    ServiceType::Storage,
                    &selection.provider,
                    result.as_ref().map_or_else(|e| !e.is_vendor_failure(), |_| true),
                );
                let bytes = result?;
                if bytes.len() as u64 > limit_bytes {
                    return Err(Error::InvalidParam(format!(
                        "uploaded object exceeds the {limit_bytes}-byte limit"
                    )));
                }
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&dest, bytes).await?;
            }
        }
        Ok(())
    }

    async fn do_transcode(&self, task: &mut Task, state: &mut StageState) -> Result<()> {
        let source = self.source_path(task.id);
        let canonical = self.canonical_path(task.id);
        let cfg = &self.ctx.config.pipeline;

        transcode::transcode(&cfg.ffmpeg_bin, &source, &canonical, cfg.sample_rate).await?;

        if let Some(duration) = transcode::probe_duration(&cfg.ffmpeg_bin, &canonical).await? {
            state.duration_seconds = Some(duration);
            tasks::set_duration(&self.ctx.pool, task.id, duration).await?;
            task.duration_seconds = Some(duration);
        }
        Ok(())
    }

    async fn do_upload(&self, task: &mut Task) -> Result<()> {
        let canonical = self.canonical_path(task.id);
        let selection = self.select_storage(task).await?;
        let store = selection
            .client
            .as_storage()
            .ok_or_else(|| Error::Other("selector returned a non-storage client".into()))?;

        let result = upload::upload_canonical(store, &canonical, "audio/wav").await;
        record_outcome(
            &self.ctx.breakers,
            &self.ctx.health,
            ServiceType::Storage,
            &selection.provider,
            result.as_ref().map_or_else(|e| !e.is_vendor_failure(), |_| true),
        );
        let (key, hash, _uploaded) = result?;

        tasks::set_file_key(&self.ctx.pool, task.id, &key, &hash).await?;
        task.file_key = Some(key);
        task.content_hash = Some(hash);
        Ok(())
    }

    async fn do_transcribe(
        &self,
        task: &mut Task,
        state: &mut StageState,
        attempt_id: Uuid,
        attempt: u32,
    ) -> Result<()> {
        let duration_hint = state.duration_seconds.or(task.duration_seconds);

        // Each attempt re-runs selection, so a provider that went
        // unhealthy mid-retry loses the next attempt.
        let selection = self
            .ctx
            .selector
            .select(
                ServiceType::Asr,
                &SelectionRequest {
                    owner: task.user_id.clone(),
                    preferred_provider: task.options.asr_provider.clone(),
                    model_id: None,
                    strategy: None,
                    variant: task.options.asr_variant,
                    duration_hint,
                    token_hint: None,
                },
            )
            .await?;
        let asr = selection
            .client
            .as_asr()
            .ok_or_else(|| Error::Other("selector returned a non-ASR client".into()))?;
        let variant = selection.variant.unwrap_or(AsrVariant::File);

        let result = asr
            .transcribe(AsrRequest {
                audio_path: self.canonical_path(task.id),
                language: task.options.language.clone(),
                diarization: task.options.enable_speaker_diarization,
                variant,
            })
            .await;

        record_outcome(
            &self.ctx.breakers,
            &self.ctx.health,
            ServiceType::Asr,
            &selection.provider,
            result.as_ref().map_or_else(|e| !e.is_vendor_failure(), |_| true),
        );
        let resp = result?;

        transcripts::replace_segments(&self.ctx.pool, task.id, &resp.segments).await?;
        if resp.duration_seconds > 0.0 {
            tasks::set_duration(&self.ctx.pool, task.id, resp.duration_seconds).await?;
            task.duration_seconds = Some(resp.duration_seconds);
        }

        // Charge the quota lane for what was actually consumed, and record
        // the call's cost. Both are idempotent over this attempt.
        let consumed = resp.duration_seconds.ceil() as i64;
        quota::commit(
            &self.ctx.pool,
            &task.user_id,
            &selection.provider,
            variant.as_str(),
            consumed,
            task.id,
            attempt_id,
        )
        .await?;

        let cost_per_minute = self
            .ctx
            .registry
            .get(ServiceType::Asr, &selection.provider)
            .map_or(0.0, |r| r.metadata.cost_per_unit);
        self.ctx
            .cost
            .record(UsageRecord {
                request_id: attempt_id,
                attempt,
                service_type: ServiceType::Asr,
                provider: selection.provider.clone(),
                model: None,
                user_id: Some(task.user_id.clone()),
                task_id: Some(task.id),
                cost_usd: cost_per_minute * resp.duration_seconds / 60.0,
                input_tokens: None,
                output_tokens: None,
                duration_seconds: Some(resp.duration_seconds),
                recorded_at: chrono::Utc::now(),
            })
            .await;

        tracing::info!(
            task_id = %task.id,
            provider = %selection.provider,
            variant = %variant,
            duration_seconds = resp.duration_seconds,
            segments = resp.segments.len(),
            "transcription complete"
        );
        Ok(())
    }

    async fn select_storage(
        &self,
        task: &Task,
    ) -> Result<es_providers::selector::Selection> {
        self.ctx
            .selector
            .select(
                ServiceType::Storage,
                &SelectionRequest {
                    owner: task.user_id.clone(),
                    ..Default::default()
                },
            )
            .await
    }
}

/// How far through its band a stage's completion puts the task. The
/// extracting band is shared by up to four stages, split evenly; the other
/// bands are owned by a single stage.
fn band_fraction(stage: StageType, source: SourceType) -> f32 {
    let extracting: &[StageType] = match source {
        SourceType::Url => &[
            StageType::Resolve,
            StageType::Download,
            StageType::Transcode,
            StageType::UploadStorage,
        ],
        SourceType::Upload => &[
            StageType::Download,
            StageType::Transcode,
            StageType::UploadStorage,
        ],
    };
    match extracting.iter().position(|&s| s == stage) {
        Some(idx) => (idx + 1) as f32 / extracting.len() as f32,
        None => 1.0,
    }
}
