//! MCP (Model Context Protocol) server over stdio.
//!
//! Exposes `generate_image` and `list_providers` as tools. Messages are
//! newline-delimited JSON-RPC 2.0; every `tools/call` runs on its own task and
//! all responses go through one writer so lines never interleave.

use crate::image::{
    AspectRatio, GenerationRequest, ProviderKind, DEFAULT_FILENAME_TEMPLATE,
};
use crate::image::normalize::{
    DEFAULT_GUIDANCE_SCALE, MAX_GUIDANCE_SCALE, MAX_SEED, MIN_GUIDANCE_SCALE,
};
use crate::orchestrator::{describe_error, describe_result, Generator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Semaphore};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Image generations allowed to run at once; further calls wait for a slot.
const MAX_CONCURRENT_GENERATIONS: usize = 5;

/// Rejects paths containing `..` components.
fn validate_output_dir(path: &str) -> std::result::Result<(), String> {
    if Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err("output_dir must not contain '..' components".into());
    }
    Ok(())
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }

    fn text(id: Value, text: impl Into<String>, is_error: bool) -> Self {
        let mut result = json!({
            "content": [{ "type": "text", "text": text.into() }]
        });
        if is_error {
            result["isError"] = Value::Bool(true);
        }
        Self::success(id, result)
    }
}

/// MCP tool definition.
#[derive(Debug, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

/// `generate_image` tool arguments.
#[derive(Debug, Clone, Deserialize)]
struct GenerateImageParams {
    prompt: String,
    #[serde(default)]
    negative_prompt: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    aspect_ratio: Option<String>,
    #[serde(default, alias = "cfg_scale")]
    guidance_scale: Option<f64>,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default)]
    output_dir: Option<String>,
    #[serde(default)]
    filename_template: Option<String>,
}

/// MCP server for image generation.
pub struct McpServer {
    generator: Generator,
    initialized: AtomicBool,
    generations: Semaphore,
}

impl McpServer {
    /// Creates a server that runs requests through `generator`.
    pub fn new(generator: Generator) -> Self {
        Self {
            generator,
            initialized: AtomicBool::new(false),
            generations: Semaphore::new(MAX_CONCURRENT_GENERATIONS),
        }
    }

    /// Runs the server, reading from stdin and writing to stdout until stdin closes.
    ///
    /// In-flight tool calls finish before this returns.
    pub async fn run(self) -> io::Result<()> {
        let server = Arc::new(self);
        let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(64);

        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(resp) = rx.recv().await {
                let line = serde_json::to_string(&resp).unwrap_or_else(|e| {
                    json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32603, "message": e.to_string()}}).to_string()
                });
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            Ok::<_, io::Error>(())
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let request = match parse_request(&line) {
                Ok(request) => request,
                Err(resp) => {
                    send(&tx, resp).await;
                    continue;
                }
            };

            if request.method == "tools/call" {
                let server = Arc::clone(&server);
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(resp) = server.dispatch(request).await {
                        send(&tx, resp).await;
                    }
                });
            } else if let Some(resp) = server.dispatch(request).await {
                send(&tx, resp).await;
            }
        }

        tracing::debug!("stdin closed, waiting for in-flight tool calls");
        drop(tx);
        writer
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    #[cfg(test)]
    async fn handle_message(&self, message: &str) -> Option<JsonRpcResponse> {
        match parse_request(message) {
            Ok(request) => self.dispatch(request).await,
            Err(resp) => Some(resp),
        }
    }

    async fn dispatch(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(id, &request.params)),
            // Notifications get no response.
            "initialized" | "notifications/initialized" => None,
            m if m.starts_with("notifications/") => None,
            "tools/list" => Some(self.handle_tools_list(id)),
            "tools/call" => Some(self.handle_tools_call(id, &request.params).await),
            "ping" => Some(JsonRpcResponse::success(id, json!({}))),
            _ => Some(JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            )),
        }
    }

    fn handle_initialize(&self, id: Value, params: &Value) -> JsonRpcResponse {
        self.initialized.store(true, Ordering::SeqCst);

        if let Some(client_info) = params.get("clientInfo") {
            tracing::info!(
                client = client_info
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown"),
                version = client_info
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown"),
                "MCP client connected"
            );
        }

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Value) -> JsonRpcResponse {
        let providers: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();
        let ratios: Vec<&str> = AspectRatio::ALL.iter().map(|r| r.as_str()).collect();
        let models: Vec<&str> = ProviderKind::ALL
            .iter()
            .flat_map(|k| self.generator.spec(*k).models.iter().copied())
            .collect();
        let config = self.generator.config();

        let tools = vec![
            Tool {
                name: "generate_image",
                description: "Generate an image from a text prompt with Stability AI or Black Forest Labs (Flux) and save it to disk. Returns the saved path and the parameters actually used.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "prompt": {
                            "type": "string",
                            "maxLength": crate::image::normalize::MAX_PROMPT_CHARS,
                            "description": "Detailed text description of the image to generate"
                        },
                        "negative_prompt": {
                            "type": "string",
                            "description": "What to keep out of the image (Stability only; ignored by turbo models)"
                        },
                        "provider": {
                            "type": "string",
                            "enum": providers,
                            "default": ProviderKind::Stability.as_str(),
                            "description": "Image generation provider"
                        },
                        "model": {
                            "type": "string",
                            "enum": models,
                            "description": "Model variant. Must belong to the selected provider; unknown models fall back to the provider default."
                        },
                        "aspect_ratio": {
                            "type": "string",
                            "enum": ratios,
                            "default": AspectRatio::Square.as_str(),
                            "description": "Aspect ratio of the image"
                        },
                        "guidance_scale": {
                            "type": "number",
                            "minimum": MIN_GUIDANCE_SCALE,
                            "maximum": MAX_GUIDANCE_SCALE,
                            "default": DEFAULT_GUIDANCE_SCALE,
                            "description": "How strictly to follow the prompt (Stability only). Also accepted as cfg_scale."
                        },
                        "seed": {
                            "type": "integer",
                            "minimum": 0,
                            "maximum": MAX_SEED,
                            "description": "Seed for reproducible generation (Stability only)"
                        },
                        "output_dir": {
                            "type": "string",
                            "default": config.output_dir.display().to_string(),
                            "description": "Directory to save the image in; created if missing"
                        },
                        "filename_template": {
                            "type": "string",
                            "default": config.filename_template,
                            "description": format!(
                                "File name template, e.g. {}. Placeholders: {{{{.Timestamp}}}}, {{{{.Date}}}}, {{{{.Time}}}}, {{{{.Provider}}}}, {{{{.Model}}}}, {{{{.Subject}}}}, {{{{.Hash}}}}",
                                DEFAULT_FILENAME_TEMPLATE
                            )
                        }
                    },
                    "required": ["prompt"]
                }),
            },
            Tool {
                name: "list_providers",
                description: "List image providers with their models, defaults, supported parameters and API key status",
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
        ];

        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        if !self.initialized.load(Ordering::SeqCst) {
            tracing::warn!(tool = tool_name, "tools/call received before initialize");
        }
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match tool_name {
            "generate_image" => self.generate_image(id, arguments).await,
            "list_providers" => self.list_providers(id),
            _ => JsonRpcResponse::error(id, -32602, format!("Unknown tool: {}", tool_name)),
        }
    }

    fn list_providers(&self, id: Value) -> JsonRpcResponse {
        let config = self.generator.config();
        let providers: Vec<Value> = ProviderKind::ALL
            .iter()
            .map(|kind| {
                let spec = self.generator.spec(*kind);
                json!({
                    "name": kind.as_str(),
                    "display_name": kind.display_name(),
                    "api_key_env": kind.api_key_env_var(),
                    "api_key_set": config.is_configured(*kind),
                    "default_model": spec.default_model,
                    "models": spec.models,
                    "aspect_ratios": AspectRatio::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
                    "supports": {
                        "negative_prompt": spec.supports_negative_prompt,
                        "guidance_scale": spec.supports_guidance_scale,
                        "seed": spec.supports_seed
                    }
                })
            })
            .collect();

        let body = json!({ "providers": providers });
        JsonRpcResponse::text(
            id,
            serde_json::to_string_pretty(&body).unwrap_or_default(),
            false,
        )
    }

    async fn generate_image(&self, id: Value, arguments: Value) -> JsonRpcResponse {
        let params: GenerateImageParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid parameters: {}", e));
            }
        };

        if let Some(dir) = &params.output_dir {
            if let Err(msg) = validate_output_dir(dir) {
                return JsonRpcResponse::error(id, -32602, msg);
            }
        }

        let request = self.build_request(params);
        tracing::info!(
            provider = %request.provider,
            model = request.model.as_deref().unwrap_or("default"),
            aspect_ratio = %request.aspect_ratio,
            "generate_image called"
        );

        let _permit = match self.generations.acquire().await {
            Ok(permit) => permit,
            Err(_) => return JsonRpcResponse::error(id, -32603, "server is shutting down"),
        };
        match self.generator.run(&request).await {
            Ok(result) => JsonRpcResponse::text(id, describe_result(&result), false),
            Err(err) => JsonRpcResponse::text(id, describe_error(&err), true),
        }
    }

    fn build_request(&self, params: GenerateImageParams) -> GenerationRequest {
        let mut request = self.generator.request(params.prompt);

        if let Some(provider) = params.provider {
            request = request.with_provider(provider);
        }
        if let Some(negative) = params.negative_prompt {
            request = request.with_negative_prompt(negative);
        }
        if let Some(model) = params.model {
            request = request.with_model(model);
        }
        if let Some(ratio) = params.aspect_ratio {
            request = request.with_aspect_ratio(ratio);
        }
        if let Some(scale) = params.guidance_scale {
            request = request.with_guidance_scale(scale);
        }
        match params.seed {
            Some(seed) if seed >= 0 => request = request.with_seed(seed as u64),
            Some(seed) => tracing::warn!(seed, "negative seed, using a random seed"),
            None => {}
        }
        if let Some(dir) = params.output_dir {
            request = request.with_output_dir(PathBuf::from(dir));
        }
        if let Some(template) = params.filename_template {
            request = request.with_filename_template(template);
        }
        request
    }
}

fn parse_request(message: &str) -> std::result::Result<JsonRpcRequest, JsonRpcResponse> {
    let request: JsonRpcRequest = serde_json::from_str(message).map_err(|e| {
        JsonRpcResponse::error(Value::Null, -32700, format!("Parse error: {}", e))
    })?;

    if request.jsonrpc != "2.0" {
        return Err(JsonRpcResponse::error(
            request.id.unwrap_or(Value::Null),
            -32600,
            "Invalid JSON-RPC version",
        ));
    }
    Ok(request)
}

async fn send(tx: &mpsc::Sender<JsonRpcResponse>, resp: JsonRpcResponse) {
    if tx.send(resp).await.is_err() {
        tracing::warn!("response writer closed, dropping response");
    }
}
