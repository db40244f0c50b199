//! In-process stand-in for a runner's HTTP server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::http::InferenceClient;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

pub enum Reply {
    Status(u16),
    Json(u16, String),
    /// Body written piece by piece, each after its delay, then the connection is closed.
    Stream(Vec<(Duration, String)>),
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Reply::Json(200, value.to_string())
    }

    pub fn events(events: &[&str]) -> Self {
        Reply::Stream(
            events
                .iter()
                .map(|event| (Duration::ZERO, format!("data: {event}\n\n")))
                .collect(),
        )
    }
}

type Handler = dyn Fn(&RecordedRequest) -> Reply + Send + Sync;

pub struct FakeRunnerServer {
    port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown: Arc<AtomicBool>,
}

impl FakeRunnerServer {
    pub fn start<H>(handler: H) -> Self
    where
        H: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let handler: Arc<Handler> = Arc::new(handler);

        let recorded = requests.clone();
        let stop = shutdown.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                let handler = handler.clone();
                let recorded = recorded.clone();
                thread::spawn(move || serve(stream, handler.as_ref(), &recorded));
            }
        });

        Self {
            port,
            requests,
            shutdown,
        }
    }

    /// A server mimicking a runner: healthy, a character level tokenizer whose detokenizer adds
    /// the usual leading space, and the given completion events.
    pub fn llama(events: &'static [&'static str]) -> Self {
        Self::start(move |req| match (req.method.as_str(), req.path.as_str()) {
            ("HEAD", "/") => Reply::Status(200),
            ("POST", "/tokenize") => {
                let content = req.json()["content"].as_str().unwrap().to_string();
                let tokens: Vec<i32> = content.chars().map(|c| c as i32).collect();
                Reply::json(serde_json::json!({ "tokens": tokens }))
            }
            ("POST", "/detokenize") => {
                let content: String = req.json()["tokens"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|t| char::from_u32(t.as_u64().unwrap() as u32).unwrap())
                    .collect();
                Reply::json(serde_json::json!({ "content": format!(" {content}") }))
            }
            ("POST", "/embedding") => {
                Reply::json(serde_json::json!({ "embedding": [0.5, -1.25, 3.0] }))
            }
            ("POST", "/completion") => Reply::events(events),
            _ => Reply::Json(404, "not found".to_string()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client(&self) -> InferenceClient {
        InferenceClient::local(self.port).unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

impl Drop for FakeRunnerServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the accept loop so it observes the flag.
        let _ = TcpStream::connect(("127.0.0.1", self.port));
    }
}

fn serve(mut stream: TcpStream, handler: &Handler, recorded: &Mutex<Vec<RecordedRequest>>) {
    let Some(request) = read_request(&stream) else {
        return;
    };
    recorded.lock().unwrap().push(request.clone());

    match handler(&request) {
        Reply::Status(status) => {
            let _ = write!(
                stream,
                "HTTP/1.1 {status} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                reason(status)
            );
        }
        Reply::Json(status, body) => {
            let _ = write!(
                stream,
                "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                reason(status),
                body.len()
            );
        }
        Reply::Stream(chunks) => {
            let _ = write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.flush();
            for (delay, chunk) in chunks {
                thread::sleep(delay);
                if stream.write_all(chunk.as_bytes()).is_err() || stream.flush().is_err() {
                    break;
                }
            }
        }
    }
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Both);
}

fn read_request(stream: &TcpStream) -> Option<RecordedRequest> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut content_length = 0;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).ok()? == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok()?;
            }
        }
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).ok()?;

    Some(RecordedRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
