//! ComfyUI generation client
//!
//! Each job gets its own websocket, opened *before* the prompt is queued so no
//! progress event can be missed. The socket is parked until `await_result`
//! picks it up, and dropped by `abandon` when nobody is going to wait.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{Artifact, GenerationClient, GenerationOutcome, JobId, JobParameters};
use shared::logging::excerpt;
use shared::{component_debug, component_warn, Component};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct QueuedPrompt {
    prompt_id: String,
}

#[derive(Debug, Deserialize)]
struct BackendEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageRef {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default = "default_folder")]
    folder: String,
}

fn default_folder() -> String {
    "output".to_string()
}

/// How the event stream ended for one job
enum JobEvents {
    Finished(Vec<ImageRef>),
    Failed(String),
}

/// Generation client speaking the ComfyUI HTTP + websocket protocol
pub struct ComfyClient {
    http: reqwest::Client,
    base_url: Url,
    ws_url: Url,
    workflow: Value,
    prompt_node: String,
    job_timeout: Option<Duration>,
    pending: Mutex<HashMap<String, WsStream>>,
}

impl ComfyClient {
    /// Build a client around a workflow graph in ComfyUI API format
    pub fn new(
        base_url: &str,
        workflow: Value,
        prompt_node: impl Into<String>,
        job_timeout: Option<Duration>,
    ) -> OrchestratorResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| OrchestratorError::config(format!("invalid generation endpoint '{base_url}': {e}")))?;
        let ws_url = websocket_url(&base_url)?;
        let prompt_node = prompt_node.into();

        let has_prompt_input = workflow
            .get(&prompt_node)
            .and_then(|node| node.get("inputs"))
            .and_then(|inputs| inputs.get("text"))
            .is_some();
        if !has_prompt_input {
            return Err(OrchestratorError::config(format!(
                "workflow node '{prompt_node}' has no inputs.text to receive the prompt"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| OrchestratorError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            ws_url,
            workflow,
            prompt_node,
            job_timeout,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Load the workflow template from a JSON file
    pub fn from_file(
        base_url: &str,
        workflow_path: &Path,
        prompt_node: impl Into<String>,
        job_timeout: Option<Duration>,
    ) -> OrchestratorResult<Self> {
        let content = std::fs::read_to_string(workflow_path).map_err(|e| OrchestratorError::FileSystemError {
            operation: "read workflow".to_string(),
            path: workflow_path.display().to_string(),
            message: e.to_string(),
        })?;
        let workflow: Value = serde_json::from_str(&content)?;
        Self::new(base_url, workflow, prompt_node, job_timeout)
    }

    /// Override the event-stream endpoint
    pub fn with_ws_url(mut self, ws_url: &str) -> OrchestratorResult<Self> {
        self.ws_url = Url::parse(ws_url)
            .map_err(|e| OrchestratorError::config(format!("invalid websocket endpoint '{ws_url}': {e}")))?;
        Ok(self)
    }

    /// Check that every override names an existing workflow node
    pub fn check_parameters(&self, parameters: &JobParameters) -> OrchestratorResult<()> {
        self.build_graph("", parameters).map(|_| ())
    }

    /// Number of jobs whose event stream is still parked
    pub async fn open_streams(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn build_graph(&self, prompt: &str, parameters: &JobParameters) -> OrchestratorResult<Value> {
        let mut graph = self.workflow.clone();
        set_input(&mut graph, &self.prompt_node, "text", Value::String(prompt.to_string()))?;

        for (key, raw) in parameters {
            let (node, input) = key
                .split_once('.')
                .ok_or_else(|| OrchestratorError::config(format!("parameter key must look like node.input, got '{key}'")))?;
            set_input(&mut graph, node, input, typed_value(raw))?;
        }
        Ok(graph)
    }

    fn endpoint(&self, path: &str) -> OrchestratorResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| OrchestratorError::config(format!("invalid endpoint path '{path}': {e}")))
    }

    async fn watch(stream: &mut WsStream, job_id: &JobId) -> OrchestratorResult<JobEvents> {
        let mut images = Vec::new();

        while let Some(message) = stream.next().await {
            let message = message.map_err(|e| OrchestratorError::generation(format!("event stream error: {e}")))?;
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                // Binary frames are live previews
                _ => continue,
            };
            let Ok(event) = serde_json::from_str::<BackendEvent>(&text) else {
                continue;
            };

            let for_other_job = event
                .data
                .get("prompt_id")
                .and_then(Value::as_str)
                .is_some_and(|id| id != job_id.as_str());
            if for_other_job {
                continue;
            }

            match event.kind.as_str() {
                "executed" => {
                    if let Some(list) = event.data.pointer("/output/images") {
                        let found: Vec<ImageRef> = serde_json::from_value(list.clone()).unwrap_or_default();
                        images.extend(found);
                    }
                }
                "execution_success" | "execution_complete" => return Ok(JobEvents::Finished(images)),
                "executing" if event.data.get("node").is_some_and(Value::is_null) => {
                    return Ok(JobEvents::Finished(images));
                }
                "execution_error" => {
                    let reason = event
                        .data
                        .get("exception_message")
                        .and_then(Value::as_str)
                        .unwrap_or("backend reported an execution error");
                    return Ok(JobEvents::Failed(reason.trim().to_string()));
                }
                "execution_interrupted" => return Ok(JobEvents::Failed("job interrupted on the backend".to_string())),
                _ => {}
            }
        }

        Ok(JobEvents::Failed("event stream closed before the job finished".to_string()))
    }

    async fn fetch_image(&self, image: &ImageRef) -> OrchestratorResult<Vec<u8>> {
        let response = self
            .http
            .get(self.endpoint("view")?)
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.folder.as_str()),
            ])
            .send()
            .await
            .map_err(|e| OrchestratorError::generation(format!("image fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::generation(format!(
                "image fetch for {} returned {}",
                image.filename,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| OrchestratorError::generation(format!("image download interrupted: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl GenerationClient for ComfyClient {
    async fn submit(&self, prompt: &str, parameters: &JobParameters) -> OrchestratorResult<JobId> {
        let graph = self.build_graph(prompt, parameters)?;
        let client_id = Uuid::new_v4().to_string();

        let mut ws_url = self.ws_url.clone();
        ws_url.query_pairs_mut().append_pair("clientId", &client_id);
        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| OrchestratorError::generation(format!("event stream connect to {ws_url} failed: {e}")))?;

        let response = self
            .http
            .post(self.endpoint("prompt")?)
            .json(&json!({ "prompt": graph, "client_id": client_id }))
            .send()
            .await
            .map_err(|e| OrchestratorError::generation(format!("prompt submission failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::generation(format!(
                "prompt rejected ({status}): {}",
                excerpt(&body, 200)
            )));
        }

        let queued: QueuedPrompt = response
            .json()
            .await
            .map_err(|e| OrchestratorError::generation(format!("unexpected prompt response: {e}")))?;

        component_debug!(Component::Generator, "📤 Queued prompt {} (client {})", queued.prompt_id, client_id);
        self.pending.lock().await.insert(queued.prompt_id.clone(), stream);
        Ok(JobId(queued.prompt_id))
    }

    async fn await_result(&self, job_id: &JobId) -> OrchestratorResult<GenerationOutcome> {
        let mut stream = self
            .pending
            .lock()
            .await
            .remove(job_id.as_str())
            .ok_or_else(|| OrchestratorError::generation(format!("no open event stream for job {job_id}")))?;

        let events = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, Self::watch(&mut stream, job_id)).await {
                Ok(events) => events,
                Err(_) => Ok(JobEvents::Failed(format!("timed out after {}s", limit.as_secs()))),
            },
            None => Self::watch(&mut stream, job_id).await,
        };
        let _ = stream.close(None).await;

        let images = match events? {
            JobEvents::Finished(images) => images,
            JobEvents::Failed(reason) => return Ok(GenerationOutcome::Failure { reason }),
        };

        let Some(image) = images.first() else {
            return Ok(GenerationOutcome::Failure {
                reason: "job finished without producing an image".to_string(),
            });
        };

        let bytes = self.fetch_image(image).await?;
        component_debug!(Component::Generator, "📥 Fetched {} ({} bytes)", image.filename, bytes.len());
        Ok(GenerationOutcome::Success(Artifact {
            bytes,
            file_name: image.filename.clone(),
        }))
    }

    async fn abandon(&self, job_id: &JobId) {
        if let Some(mut stream) = self.pending.lock().await.remove(job_id.as_str()) {
            let _ = stream.close(None).await;
            component_warn!(Component::Generator, "🚫 Abandoned job {}", job_id);
        }
    }
}

fn websocket_url(base_url: &Url) -> OrchestratorResult<Url> {
    let mut ws_url = base_url
        .join("ws")
        .map_err(|e| OrchestratorError::config(format!("cannot derive websocket endpoint: {e}")))?;
    let scheme = if base_url.scheme() == "https" { "wss" } else { "ws" };
    ws_url
        .set_scheme(scheme)
        .map_err(|_| OrchestratorError::config(format!("cannot derive websocket endpoint from {base_url}")))?;
    Ok(ws_url)
}

fn set_input(graph: &mut Value, node: &str, input: &str, value: Value) -> OrchestratorResult<()> {
    let inputs = graph
        .get_mut(node)
        .and_then(|n| n.get_mut("inputs"))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| OrchestratorError::config(format!("workflow has no node '{node}' with inputs")))?;
    inputs.insert(input.to_string(), value);
    Ok(())
}

/// Numbers and booleans go into the graph typed; everything else stays a string
fn typed_value(raw: &str) -> Value {
    if let Ok(integer) = raw.parse::<i64>() {
        return json!(integer);
    }
    if let Ok(float) = raw.parse::<f64>() {
        if float.is_finite() {
            return json!(float);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
