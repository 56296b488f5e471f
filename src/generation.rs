//! Streaming text generation backend (Ollama)

use std::collections::VecDeque;
use std::fmt::Display;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};

use crate::conversation::{Turn, build_prompt};

/// Text generation capability
///
/// The stream yields fragments in arrival order. Failures surface as one
/// final sentinel fragment (`[Error: …]`) rather than as an error, so the
/// caller speaks them like any other text.
pub trait ResponseGenerator: Send + Sync {
    /// Start generating a reply to the conversation so far
    fn generate(&self, turns: &[Turn]) -> BoxStream<'static, String>;
}

/// Request body for `/api/generate`
#[derive(serde::Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One NDJSON line of a streamed `/api/generate` response
#[derive(serde::Deserialize)]
struct GenerateLine {
    response: Option<String>,
    error: Option<String>,
}

/// Generates replies with a local Ollama server
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    system_prompt: String,
}

impl OllamaGenerator {
    /// Create a generator for `model` served at `base_url`
    #[must_use]
    pub fn new(base_url: String, model: String, system_prompt: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            system_prompt,
        }
    }

    /// Model name sent with each request
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ResponseGenerator for OllamaGenerator {
    fn generate(&self, turns: &[Turn]) -> BoxStream<'static, String> {
        let prompt = build_prompt(&self.system_prompt, turns);
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));

        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "requesting generation");

        let request = self.client.post(&url).json(&GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream: true,
        });

        stream::once(async move { request.send().await })
            .flat_map(|result| match result {
                Ok(response) if response.status().is_success() => {
                    fragments(response.bytes_stream()).boxed()
                }
                Ok(response) => {
                    let status = response.status();
                    tracing::error!(status = %status, "generation backend error");
                    stream::iter([format!("[Error: {}]", status.as_u16())]).boxed()
                }
                Err(e) => {
                    tracing::error!(error = %e, "generation request failed");
                    stream::iter([format!("[Error: {e}]")]).boxed()
                }
            })
            .boxed()
    }
}

/// Parsed content of one response line
#[derive(Debug, PartialEq, Eq)]
enum LineItem {
    /// Text fragment to forward
    Text(String),
    /// Sentinel that terminates the stream
    Stop(String),
}

/// Splits a byte stream into NDJSON lines and interprets them
#[derive(Debug, Default)]
struct LineDecoder {
    partial: Vec<u8>,
}

impl LineDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<LineItem> {
        self.partial.extend_from_slice(bytes);

        let mut items = Vec::new();
        while let Some(newline) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=newline).collect();
            if let Some(item) = parse_line(&line) {
                let stop = matches!(item, LineItem::Stop(_));
                items.push(item);
                if stop {
                    break;
                }
            }
        }
        items
    }

    fn flush(&mut self) -> Option<LineItem> {
        let line = std::mem::take(&mut self.partial);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Option<LineItem> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    match serde_json::from_str::<GenerateLine>(text) {
        Ok(GenerateLine {
            response: Some(fragment),
            ..
        }) => (!fragment.is_empty()).then_some(LineItem::Text(fragment)),
        Ok(GenerateLine {
            error: Some(error), ..
        }) => Some(LineItem::Stop(format!("[Error: {error}]"))),
        Ok(_) => None,
        Err(e) => Some(LineItem::Stop(format!("[Parse error: {e}]"))),
    }
}

/// Turn a streamed NDJSON body into text fragments
fn fragments<S, B, E>(body: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Display,
{
    struct State<S> {
        body: std::pin::Pin<Box<S>>,
        decoder: LineDecoder,
        queue: VecDeque<String>,
        finished: bool,
    }

    let state = State {
        body: Box::pin(body),
        decoder: LineDecoder::default(),
        queue: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.queue.pop_front() {
                return Some((fragment, state));
            }
            if state.finished {
                return None;
            }

            let items = match state.body.next().await {
                Some(Ok(bytes)) => state.decoder.feed(bytes.as_ref()),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "generation stream interrupted");
                    vec![LineItem::Stop(format!("[Error: {e}]"))]
                }
                None => {
                    state.finished = true;
                    state.decoder.flush().into_iter().collect()
                }
            };

            for item in items {
                match item {
                    LineItem::Text(text) => state.queue.push_back(text),
                    LineItem::Stop(text) => {
                        state.queue.push_back(text);
                        state.finished = true;
                        break;
                    }
                }
            }
        }
    })
}
