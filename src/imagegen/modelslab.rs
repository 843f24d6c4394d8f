use anyhow::{anyhow, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::imagegen::{
    GenerationBackend, GenerationRequest, RemoteJobState, TrainingRequest, TrainingStatusReport,
};
use crate::studio::error::StudioError;
use crate::studio::types::ConceptSet;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_backend_timing;

const PROVIDER: &str = "modelslab";

#[derive(Debug, Serialize)]
struct Text2ImgBody<'a> {
    key: &'a str,
    model_id: &'a str,
    prompt: &'a str,
    negative_prompt: &'a str,
    width: String,
    height: String,
    samples: String,
    num_inference_steps: String,
    guidance_scale: f32,
    enhance_prompt: &'static str,
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct FineTuneBody<'a> {
    key: &'a str,
    instance_prompt: &'a str,
    class_prompt: &'a str,
    base_model_type: &'a str,
    images: &'a [String],
    training_type: &'a str,
    max_train_steps: String,
    lora_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct Text2ImgResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Option<Vec<String>>,
    #[serde(default)]
    message: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FineTuneResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FineTuneStatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    model_id: Option<String>,
    #[serde(default)]
    message: Option<Value>,
}

fn value_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

/// Pulls the backend's `message` out of an error body; falls back to a
/// truncated copy of the raw body.
fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value_text(value.get("message"))
            .or_else(|| value_text(value.pointer("/error/message")))
            .or_else(|| value_text(value.get("messege")));
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn is_success(status: Option<&str>) -> bool {
    status
        .map(|value| value.trim().eq_ignore_ascii_case("success"))
        .unwrap_or(false)
}

fn interpret_generation(
    http_status: StatusCode,
    body: &str,
    requested_samples: u32,
) -> Result<ConceptSet, StudioError> {
    if !http_status.is_success() {
        let (message, summary) = summarize_error_body(body);
        debug!("text2img failed with status {}: {}", http_status, summary);
        return Err(StudioError::Generation(
            message.unwrap_or_else(|| "Failed to generate image".to_string()),
        ));
    }

    let payload: Text2ImgResponse = serde_json::from_str(body)
        .map_err(|err| StudioError::Generation(format!("Invalid ModelsLab response: {err}")))?;

    if !is_success(payload.status.as_deref()) {
        let status = payload.status.as_deref().unwrap_or("missing");
        return Err(StudioError::Generation(
            value_text(payload.message.as_ref())
                .unwrap_or_else(|| format!("Error generating image (status: {status})")),
        ));
    }

    let mut output = payload
        .output
        .unwrap_or_default()
        .into_iter()
        .filter(|url| !url.trim().is_empty())
        .collect::<Vec<_>>();
    let limit = requested_samples.max(1) as usize;
    if output.len() > limit {
        warn!(
            "ModelsLab returned {} images for {} requested samples; dropping the extras",
            output.len(),
            limit
        );
        output.truncate(limit);
    }
    Ok(output)
}

fn interpret_submission(http_status: StatusCode, body: &str) -> Result<String, StudioError> {
    if !http_status.is_success() {
        let (message, summary) = summarize_error_body(body);
        debug!("lora finetune failed with status {}: {}", http_status, summary);
        return Err(StudioError::TrainingSubmission(
            message.unwrap_or_else(|| "Failed to start fine-tuning".to_string()),
        ));
    }

    let payload: FineTuneResponse = serde_json::from_str(body).map_err(|err| {
        StudioError::TrainingSubmission(format!("Invalid ModelsLab response: {err}"))
    })?;

    let id = value_text(payload.id.as_ref());
    match id {
        Some(id) if is_success(payload.status.as_deref()) => Ok(id),
        _ => Err(StudioError::TrainingSubmission(
            value_text(payload.message.as_ref())
                .unwrap_or_else(|| "Failed to start character training".to_string()),
        )),
    }
}

fn interpret_status(http_status: StatusCode, body: &str) -> Result<TrainingStatusReport, StudioError> {
    if !http_status.is_success() {
        let (message, summary) = summarize_error_body(body);
        return Err(StudioError::StatusCheck(message.unwrap_or(format!(
            "status request failed with {http_status}: {summary}"
        ))));
    }

    let payload: FineTuneStatusResponse = serde_json::from_str(body)
        .map_err(|err| StudioError::StatusCheck(format!("Invalid ModelsLab response: {err}")))?;

    if payload
        .status
        .as_deref()
        .map(|value| value.eq_ignore_ascii_case("error"))
        .unwrap_or(false)
    {
        return Err(StudioError::StatusCheck(
            value_text(payload.message.as_ref())
                .unwrap_or_else(|| "Error checking fine-tune status".to_string()),
        ));
    }

    let state = payload
        .state
        .as_deref()
        .map(RemoteJobState::parse)
        .unwrap_or_else(|| RemoteJobState::Other("unknown".to_string()));
    let model_id = payload
        .model_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    Ok(TrainingStatusReport {
        state,
        model_id,
        message: value_text(payload.message.as_ref()),
    })
}

#[derive(Debug, Clone)]
pub struct ModelsLabClient {
    http: &'static Client,
    api_key: String,
    base_url: Url,
}

impl ModelsLabClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(anyhow!("MODELSLAB_API_KEY is not configured."));
        }
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .map_err(|err| anyhow!("Invalid MODELSLAB_BASE_URL '{base_url}': {err}"))?;
        Ok(ModelsLabClient {
            http: get_http_client(),
            api_key: api_key.to_string(),
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }

    fn status_endpoint(&self, job_id: &str) -> Result<Url, url::ParseError> {
        let mut url = self.endpoint("lora/fine_tune_status")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .push(job_id);
        Ok(url)
    }

    fn redact(&self, text: &str) -> String {
        text.replace(&self.api_key, "[redacted]")
    }

    async fn post_json<B: Serialize>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<(StatusCode, String), reqwest::Error> {
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

impl GenerationBackend for ModelsLabClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<ConceptSet, StudioError> {
        let url = self
            .endpoint("images/text2img")
            .map_err(|err| StudioError::Generation(err.to_string()))?;
        let body = Text2ImgBody {
            key: &self.api_key,
            model_id: &request.model_id,
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            width: request.width.to_string(),
            height: request.height.to_string(),
            samples: request.samples.to_string(),
            num_inference_steps: request.num_inference_steps.to_string(),
            guidance_scale: request.guidance_scale,
            enhance_prompt: if request.enhance_prompt { "yes" } else { "no" },
            seed: request.seed,
        };
        let metadata = json!({
            "samples": request.samples,
            "width": request.width,
            "height": request.height,
        });

        log_backend_timing(PROVIDER, &request.model_id, "text2img", Some(metadata), || async {
            let (status, text) = self.post_json(url, &body).await.map_err(|err| {
                StudioError::Generation(format!(
                    "ModelsLab request failed: {}",
                    self.redact(&err.to_string())
                ))
            })?;
            interpret_generation(status, &text, request.samples)
        })
        .await
    }

    async fn submit_training(&self, request: &TrainingRequest) -> Result<String, StudioError> {
        let url = self
            .endpoint("lora/finetune")
            .map_err(|err| StudioError::TrainingSubmission(err.to_string()))?;
        let body = FineTuneBody {
            key: &self.api_key,
            instance_prompt: &request.instance_prompt,
            class_prompt: &request.class_prompt,
            base_model_type: &request.base_model_type,
            images: &request.images,
            training_type: &request.training_type,
            max_train_steps: request.max_train_steps.to_string(),
            lora_type: &request.lora_type,
        };
        let metadata = json!({ "images": request.images.len() });

        log_backend_timing(
            PROVIDER,
            &request.base_model_type,
            "lora_finetune",
            Some(metadata),
            || async {
                let (status, text) = self.post_json(url, &body).await.map_err(|err| {
                    StudioError::TrainingSubmission(format!(
                        "ModelsLab request failed: {}",
                        self.redact(&err.to_string())
                    ))
                })?;
                interpret_submission(status, &text)
            },
        )
        .await
    }

    async fn training_status(&self, job_id: &str) -> Result<TrainingStatusReport, StudioError> {
        let url = self
            .status_endpoint(job_id)
            .map_err(|err| StudioError::StatusCheck(err.to_string()))?;
        let body = json!({ "key": self.api_key });

        log_backend_timing(PROVIDER, job_id, "lora_status", None, || async {
            let (status, text) = self.post_json(url, &body).await.map_err(|err| {
                StudioError::StatusCheck(self.redact(&err.to_string()))
            })?;
            interpret_status(status, &text)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_drops_urls_beyond_requested_samples() {
        let body = r#"{"status":"success","output":["a","b","c","d","e"]}"#;
        let urls = interpret_generation(StatusCode::OK, body, 4).unwrap();
        assert_eq!(urls, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn generation_with_empty_output_is_not_an_error_here() {
        let body = r#"{"status":"success","output":[]}"#;
        let urls = interpret_generation(StatusCode::OK, body, 4).unwrap();
        assert!(urls.is_empty());
    }

    #[test]
    fn generation_error_status_carries_backend_message() {
        let body = r#"{"status":"error","message":"Invalid API key"}"#;
        let err = interpret_generation(StatusCode::OK, body, 1).unwrap_err();
        assert!(matches!(err, StudioError::Generation(ref msg) if msg == "Invalid API key"));
    }

    #[test]
    fn generation_http_failure_without_message_is_generic() {
        let err = interpret_generation(StatusCode::BAD_GATEWAY, "<html>oops</html>", 1).unwrap_err();
        assert!(matches!(err, StudioError::Generation(ref msg) if msg == "Failed to generate image"));
    }

    #[test]
    fn processing_status_counts_as_generation_failure() {
        let body = r#"{"status":"processing","output":[]}"#;
        let err = interpret_generation(StatusCode::OK, body, 1).unwrap_err();
        assert!(err.to_string().contains("processing"));
    }

    #[test]
    fn submission_accepts_numeric_ids() {
        let body = r#"{"status":"success","id":9912,"message":"queued"}"#;
        assert_eq!(interpret_submission(StatusCode::OK, body).unwrap(), "9912");
    }

    #[test]
    fn submission_without_success_surfaces_reason() {
        let body = r#"{"status":"failed","message":"images unreachable"}"#;
        let err = interpret_submission(StatusCode::OK, body).unwrap_err();
        assert_eq!(err.user_message(), "images unreachable");
    }

    #[test]
    fn status_report_parses_terminal_success() {
        let body = r#"{"status":"success","state":"succeeded","model_id":"lora-123"}"#;
        let report = interpret_status(StatusCode::OK, body).unwrap();
        assert_eq!(report.state, RemoteJobState::Succeeded);
        assert_eq!(report.model_id.as_deref(), Some("lora-123"));
    }

    #[test]
    fn status_report_keeps_unknown_states() {
        let body = r#"{"status":"success","state":"queued"}"#;
        let report = interpret_status(StatusCode::OK, body).unwrap();
        assert_eq!(report.state, RemoteJobState::Other("queued".to_string()));
    }

    #[test]
    fn status_error_is_a_check_failure() {
        let body = r#"{"status":"error","message":"rate limited"}"#;
        let err = interpret_status(StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, StudioError::StatusCheck(ref msg) if msg == "rate limited"));
    }

    #[test]
    fn status_endpoint_escapes_job_ids() {
        let client = ModelsLabClient::new("secret", "https://modelslab.com/api/v6").unwrap();
        let url = client.status_endpoint("job 42").unwrap();
        assert_eq!(
            url.as_str(),
            "https://modelslab.com/api/v6/lora/fine_tune_status/job%2042"
        );
        assert_eq!(
            client.endpoint("images/text2img").unwrap().as_str(),
            "https://modelslab.com/api/v6/images/text2img"
        );
    }

    #[test]
    fn client_requires_an_api_key() {
        assert!(ModelsLabClient::new("  ", "https://modelslab.com/api/v6").is_err());
    }
}
