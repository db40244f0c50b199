use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;

use super::schemas::{
    DetokenizeRequest, DetokenizeResponse, EmbeddingRequest, EmbeddingResponse, PredictRequest,
    Prediction, TokenizeRequest, TokenizeResponse,
};
use super::sse;
use crate::check_cancelled;
use crate::error::{Result, RunnerError};
use crate::execution::cancellable::CancellationToken;
use crate::options::GenerationOptions;
use crate::types::{ConversationContext, GenerateResponse, PredictSummary, StreamEvent, Token};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

trait ResponseExt {
    fn map_to_runner_err(self, operation: &str) -> Result<reqwest::blocking::Response>;
}

impl ResponseExt for reqwest::blocking::Response {
    fn map_to_runner_err(self, operation: &str) -> Result<reqwest::blocking::Response> {
        let status = self.status();
        if status.is_success() {
            Ok(self)
        } else {
            let body = self.text()?;
            log::warn!("llm {operation} error: {body}");
            Err(RunnerError::InferenceServer {
                status: Some(status),
                message: body,
            })
        }
    }
}

/// A client speaking the runner's JSON and event-stream protocol.
///
/// The client is stateless apart from the runner's address: every call is independent and none
/// is retried. Retrying belongs to the supervisor, which restarts whole runners.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http_client: reqwest::blocking::Client,
    probe_client: reqwest::blocking::Client,
    base_url: Url,
    port: u16,
}

impl InferenceClient {
    pub fn new(host: &str, port: u16, probe_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&format!("http://{host}:{port}/"))
            .map_err(|e| RunnerError::Validation(format!("invalid runner address: {e}")))?;

        // Generations can run for minutes, only liveness probes are bounded.
        // The runner is a local process, so proxies from the environment never apply.
        let http_client = reqwest::blocking::Client::builder()
            .no_proxy()
            .timeout(None::<Duration>)
            .build()?;
        let probe_client = reqwest::blocking::Client::builder()
            .no_proxy()
            .timeout(probe_timeout)
            .build()?;

        Ok(Self {
            http_client,
            probe_client,
            base_url,
            port,
        })
    }

    /// Client for a runner listening on the loopback interface.
    pub fn local(port: u16) -> Result<Self> {
        Self::new("127.0.0.1", port, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RunnerError::Validation(format!("invalid runner url {path}: {e}")))
    }

    fn send_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        cancel: &CancellationToken,
    ) -> Result<reqwest::blocking::Response> {
        check_cancelled!(cancel);

        let response = self
            .http_client
            .post(self.join(path)?)
            .json(body)
            .send()?;

        check_cancelled!(cancel);
        response.map_to_runner_err(path)
    }

    fn post_json<T, R>(&self, path: &str, body: &T, cancel: &CancellationToken) -> Result<R>
    where
        T: Serialize,
        R: for<'de> serde::Deserialize<'de>,
    {
        let text = self.send_json(path, body, cancel)?.text()?;
        serde_json::from_str(&text)
            .map_err(|e| RunnerError::server(format!("unmarshal {path} response: {e}")))
    }

    /// Liveness probe: a `HEAD /` answered with `200 OK`.
    pub fn ping(&self) -> Result<()> {
        let response = self.probe_client.head(self.base_url.clone()).send()?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(RunnerError::InferenceServer {
                status: Some(response.status()),
                message: format!("unexpected ping status: {}", response.status()),
            });
        }
        Ok(())
    }

    pub fn is_healthy(&self) -> bool {
        self.ping().is_ok()
    }

    /// Tokenize `text`. An empty text is still sent to the runner.
    pub fn encode(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<Token>> {
        let encoded: TokenizeResponse =
            self.post_json("tokenize", &TokenizeRequest { content: text }, cancel)?;
        Ok(encoded.tokens)
    }

    /// Turn tokens back into text. An empty token list returns an empty string without
    /// contacting the runner.
    pub fn decode(&self, tokens: &[Token], cancel: &CancellationToken) -> Result<String> {
        if tokens.is_empty() {
            return Ok(String::new());
        }

        let decoded: DetokenizeResponse =
            self.post_json("detokenize", &DetokenizeRequest { tokens }, cancel)?;

        // The runner prefixes detokenized content with a space.
        match decoded.content.strip_prefix(' ') {
            Some(content) => Ok(content.to_string()),
            None => Ok(decoded.content),
        }
    }

    /// Embedding vector of `text`, exactly as returned by the runner.
    pub fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f64>> {
        let embedding: EmbeddingResponse =
            self.post_json("embedding", &EmbeddingRequest { content: text }, cancel)?;
        Ok(embedding.embedding)
    }

    /// Open a streaming completion for `prompt`.
    ///
    /// The returned [`PredictStream`] yields the text fragments as they arrive, then a single
    /// [`StreamEvent::Final`] carrying the re-encoded conversation context.
    pub fn predict_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<PredictStream<'_>> {
        let request = PredictRequest::new(prompt, options);
        let response = self.send_json("completion", &request, cancel)?;

        Ok(PredictStream {
            client: self,
            lines: BufReader::new(response).lines(),
            cancel: cancel.clone(),
            context_text: prompt.to_string(),
            pending_stop: None,
            finished: false,
        })
    }

    /// Callback flavour of [`predict_stream`](Self::predict_stream).
    ///
    /// `on_fragment` sees every text fragment, then exactly one response with `done` set. When
    /// the call fails or is cancelled the done response is never delivered.
    pub fn stream_predict<F>(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
        mut on_fragment: F,
    ) -> Result<()>
    where
        F: FnMut(GenerateResponse),
    {
        for event in self.predict_stream(prompt, options, cancel)? {
            on_fragment(event?.into());
        }
        Ok(())
    }
}

/// Iterator over the events of one completion.
///
/// Cancellation is checked once per received line. After an error, a cancellation or the final
/// event, the iterator is exhausted.
pub struct PredictStream<'a> {
    client: &'a InferenceClient,
    lines: Lines<BufReader<reqwest::blocking::Response>>,
    cancel: CancellationToken,
    context_text: String,
    pending_stop: Option<Prediction>,
    finished: bool,
}

impl PredictStream<'_> {
    fn read_event(&mut self) -> Result<StreamEvent> {
        if let Some(stop) = self.pending_stop.take() {
            return self.finish(stop);
        }

        loop {
            check_cancelled!(self.cancel);

            let line = match self.lines.next() {
                Some(line) => line
                    .map_err(|e| RunnerError::server(format!("error reading llm response: {e}")))?,
                None => {
                    return Err(RunnerError::server(
                        "llm response ended before a stop event",
                    ));
                }
            };

            check_cancelled!(self.cancel);

            let Some(prediction) = sse::parse_line(&line)? else {
                continue;
            };
            self.context_text.push_str(&prediction.content);

            if prediction.stop {
                if prediction.content.is_empty() {
                    return self.finish(prediction);
                }
                let content = prediction.content.clone();
                self.pending_stop = Some(prediction);
                return Ok(StreamEvent::Fragment(content));
            }

            if !prediction.content.is_empty() {
                return Ok(StreamEvent::Fragment(prediction.content));
            }
        }
    }

    fn finish(&mut self, stop: Prediction) -> Result<StreamEvent> {
        let tokens = self.client.encode(&self.context_text, &self.cancel)?;

        Ok(StreamEvent::Final(PredictSummary {
            context: ConversationContext::from(tokens),
            prompt_eval_count: stop.timings.prompt_n,
            prompt_eval_duration: duration_from_ms(stop.timings.prompt_ms),
            eval_count: stop.timings.predicted_n,
            eval_duration: duration_from_ms(stop.timings.predicted_ms),
        }))
    }

    /// Full text of the conversation so far: the prompt followed by every received fragment.
    pub fn context_text(&self) -> &str {
        &self.context_text
    }
}

impl Iterator for PredictStream<'_> {
    type Item = Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let event = self.read_event();
        if !matches!(event, Ok(StreamEvent::Fragment(_))) {
            self.finished = true;
        }
        Some(event)
    }
}

fn duration_from_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_nanos((ms * 1_000_000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}
