use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use carassist_agent::{GenerationRequest, Generator, OllamaGenerator, TokenSink, ToolRegistry};

#[derive(Default)]
struct VecSink(Vec<String>);

impl TokenSink for VecSink {
    fn on_token(&mut self, token: &str) { self.0.push(token.to_string()); }
    fn is_cancelled(&self) -> bool { false }
}

/// Serve one canned HTTP response and hand back the raw request.
fn serve_once(status: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).unwrap();
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text[..header_end]
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap()))
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/x-ndjson\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).unwrap();
        String::from_utf8_lossy(&raw).to_string()
    });
    (url, handle)
}

fn request() -> GenerationRequest {
    GenerationRequest { question: "How often should I rotate tires?".into(), history: vec![] }
}

#[test]
fn streams_chat_fragments_in_order() {
    let body = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Final\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\" Answer: every\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\" 5000 miles\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
    );
    let (url, server) = serve_once("200 OK", body);
    let generator = OllamaGenerator::new(&url, "mistral:latest", Duration::from_secs(10), Arc::new(ToolRegistry::new())).unwrap();
    let mut sink = VecSink::default();
    generator.generate(&request(), &mut sink).unwrap();
    assert_eq!(sink.0, vec!["Final", " Answer: every", " 5000 miles"]);

    let raw = server.join().unwrap();
    assert!(raw.starts_with("POST /api/chat"));
    assert!(raw.contains("\"model\":\"mistral:latest\""));
    assert!(raw.contains("\"stream\":true"));
}

#[test]
fn http_errors_fail_the_generation() {
    let (url, server) = serve_once("404 Not Found", "{\"error\":\"model 'nope' not found\"}");
    let generator = OllamaGenerator::new(&url, "nope", Duration::from_secs(10), Arc::new(ToolRegistry::new())).unwrap();
    let err = generator.generate(&request(), &mut VecSink::default()).unwrap_err();
    assert!(err.to_string().contains("404"), "{err}");
    server.join().unwrap();
}
