#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// Canned behavior for the stub: text responses are chosen by the first
/// needle found in the prompt; embeddings count keyword occurrences.
#[derive(Debug, Clone, Default)]
pub struct ApiStubConfig {
    pub responses: Vec<(String, String)>,
    pub keywords: Vec<String>,
    /// Polls answered with "incomplete" before an image job finishes.
    pub pending_polls: u32,
}

impl ApiStubConfig {
    pub fn respond(mut self, needle: &str, text: &str) -> Self {
        self.responses.push((needle.to_owned(), text.to_owned()));
        self
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn pending_polls(mut self, pending_polls: u32) -> Self {
        self.pending_polls = pending_polls;
        self
    }
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub prompts: Vec<String>,
    pub image_prompts: Vec<String>,
    pub authorization: Vec<String>,
}

/// OpenAI (`/v1`) and imagine/message (`/img`) APIs on one local port.
pub struct ApiStub {
    pub openai_base_url: String,
    pub image_base_url: String,
    recorded: Arc<Mutex<Recorded>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ApiStub {
    pub fn spawn(config: ApiStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start api stub server");
        let addr = server.server_addr();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_recorded = Arc::clone(&recorded);
        let handle = thread::spawn(move || {
            let mut jobs: HashMap<String, u32> = HashMap::new();
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                if let Some(auth) = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                {
                    thread_recorded
                        .lock()
                        .unwrap()
                        .authorization
                        .push(auth.value.as_str().to_owned());
                }

                let url = request.url().to_string();
                let path = url.split('?').next().unwrap_or(&url).to_owned();
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

                let (status, payload) = match (request.method(), path.as_str()) {
                    (tiny_http::Method::Post, "/v1/responses") => {
                        let prompt = parsed.get("input").and_then(|v| v.as_str()).unwrap_or("");
                        thread_recorded.lock().unwrap().prompts.push(prompt.to_owned());
                        match config
                            .responses
                            .iter()
                            .find(|(needle, _)| prompt.contains(needle.as_str()))
                        {
                            Some((_, text)) => (200, responses_body(text)),
                            None => (
                                400,
                                serde_json::json!({"error": {"message": "unknown prompt mode"}}),
                            ),
                        }
                    }
                    (tiny_http::Method::Post, "/v1/embeddings") => {
                        let inputs = parsed
                            .get("input")
                            .and_then(|v| v.as_array())
                            .cloned()
                            .unwrap_or_default();
                        let data = inputs
                            .iter()
                            .enumerate()
                            .rev()
                            .map(|(index, input)| {
                                let text = input.as_str().unwrap_or("").to_lowercase();
                                serde_json::json!({
                                    "index": index,
                                    "embedding": embed(&text, &config.keywords),
                                })
                            })
                            .collect::<Vec<_>>();
                        (200, serde_json::json!({"object": "list", "data": data}))
                    }
                    (tiny_http::Method::Post, "/img/imagine") => {
                        let prompt = parsed.get("msg").and_then(|v| v.as_str()).unwrap_or("");
                        let mut recorded = thread_recorded.lock().unwrap();
                        let id = format!("msg-{}", recorded.image_prompts.len());
                        recorded.image_prompts.push(prompt.to_owned());
                        jobs.insert(id.clone(), 0);
                        (200, serde_json::json!({"success": true, "messageId": id}))
                    }
                    (tiny_http::Method::Get, p) if p.starts_with("/img/message/") => {
                        let id = p.trim_start_matches("/img/message/").to_owned();
                        match jobs.get_mut(&id) {
                            Some(polls) => {
                                *polls += 1;
                                if *polls <= config.pending_polls {
                                    (200, serde_json::json!({"progress": "incomplete", "response": {}}))
                                } else {
                                    (
                                        200,
                                        serde_json::json!({
                                            "progress": 100,
                                            "response": {
                                                "imageUrls": [
                                                    image_url(&id),
                                                    format!("https://images.stub/{id}-alt.png"),
                                                ]
                                            }
                                        }),
                                    )
                                }
                            }
                            None => (404, serde_json::json!({"error": "unknown message"})),
                        }
                    }
                    _ => (404, serde_json::json!({"error": "not found"})),
                };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(payload.to_string())
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            openai_base_url: format!("http://{addr}/v1"),
            image_base_url: format!("http://{addr}/img"),
            recorded,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.recorded.lock().unwrap().prompts.clone()
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.recorded.lock().unwrap().image_prompts.clone()
    }

    pub fn authorization(&self) -> Vec<String> {
        self.recorded.lock().unwrap().authorization.clone()
    }
}

impl Drop for ApiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn image_url(message_id: &str) -> String {
    format!("https://images.stub/{message_id}.png")
}

fn responses_body(text: &str) -> Value {
    serde_json::json!({
        "id": "resp_stub",
        "object": "response",
        "output": [
            {
                "type": "message",
                "role": "assistant",
                "content": [
                    { "type": "output_text", "text": text }
                ]
            }
        ],
        "output_text": text
    })
}

fn embed(text: &str, keywords: &[String]) -> Vec<f32> {
    let mut vector = keywords
        .iter()
        .map(|keyword| text.matches(keyword.as_str()).count() as f32)
        .collect::<Vec<_>>();
    vector.push(0.1);
    vector
}
