use std::io::Read;
use std::thread;
use std::time::Duration;

const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) attempts: usize,
    pub(crate) retry_delay: Duration,
}

impl RetryPolicy {
    pub(crate) const SEARCH: Self = Self {
        connect_timeout: Duration::from_secs(3),
        read_timeout: Duration::from_secs(20),
        attempts: 3,
        retry_delay: Duration::from_secs(1),
    };

    pub(crate) const POSTER: Self = Self {
        connect_timeout: Duration::from_secs(3),
        read_timeout: Duration::from_secs(10),
        attempts: 2,
        retry_delay: Duration::from_millis(500),
    };
}

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

pub(crate) fn get_text_with_retries(
    url: &str,
    referer: &str,
    query: &[(String, String)],
    policy: RetryPolicy,
) -> Result<String, String> {
    let response = call_with_retries(url, referer, query, policy)?;
    response
        .into_string()
        .map_err(|err| format!("request failed: response decode failed: {err}"))
}

pub(crate) fn get_bytes_with_retries(
    url: &str,
    referer: &str,
    policy: RetryPolicy,
) -> Result<Vec<u8>, String> {
    let response = call_with_retries(url, referer, &[], policy)?;
    let mut body = Vec::new();
    response
        .into_reader()
        .take(MAX_BODY_BYTES)
        .read_to_end(&mut body)
        .map_err(|err| format!("request failed: response read failed: {err}"))?;
    Ok(body)
}

fn call_with_retries(
    url: &str,
    referer: &str,
    query: &[(String, String)],
    policy: RetryPolicy,
) -> Result<ureq::Response, String> {
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(policy.connect_timeout)
            .timeout_read(policy.read_timeout)
            .timeout_write(policy.read_timeout)
            .user_agent(concat!("anishelf/", env!("CARGO_PKG_VERSION")))
            .build();

        let mut request = agent.get(url).set("Referer", referer);
        for (key, value) in query {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(response) => return Ok(response),
            Err(ureq::Error::Status(status, response)) => {
                let response_body = response.into_string().ok().unwrap_or_default();
                let body = response_body.trim();
                let status_error = if body.is_empty() {
                    format!("HTTP status {status}")
                } else {
                    let truncated = body.chars().take(240).collect::<String>();
                    format!("HTTP status {status} ({truncated})")
                };

                if should_retry_http_status(status) && attempt < attempts {
                    tracing::debug!(url, status, attempt, "retrying HTTP request");
                    thread::sleep(policy.retry_delay);
                    continue;
                }

                if should_retry_http_status(status) {
                    return Err(format!(
                        "request failed after {attempts} attempt(s): {status_error}"
                    ));
                }

                return Err(format!("request failed: {status_error}"));
            }
            Err(ureq::Error::Transport(err)) => {
                let transport_error = format!("transport error: {err}");
                if attempt < attempts {
                    tracing::debug!(url, attempt, error = %err, "retrying HTTP request");
                    thread::sleep(policy.retry_delay);
                    continue;
                }
                return Err(format!(
                    "request failed after {attempts} attempt(s): {transport_error}"
                ));
            }
        }
    }

    Err("request failed: exhausted attempts without a concrete error".to_string())
}

/// Minimal HTTP/1.1 server for exercising clients against scripted responses.
#[cfg(test)]
pub(crate) mod test_server {
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub(crate) enum Behavior {
        Respond(u16, Vec<u8>),
        DelayRespond(Duration, u16, Vec<u8>),
    }

    impl Behavior {
        pub(crate) fn text(status: u16, body: &str) -> Self {
            Self::Respond(status, body.as_bytes().to_vec())
        }
    }

    #[derive(Debug)]
    pub(crate) struct TestServer {
        pub(crate) base_url: String,
        requests: Arc<AtomicUsize>,
        request_lines: Arc<Mutex<Vec<String>>>,
        shutdown_tx: mpsc::Sender<()>,
        join_handle: Option<std::thread::JoinHandle<()>>,
    }

    impl TestServer {
        pub(crate) fn spawn(behaviors: Vec<Behavior>) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind test server");
            listener.set_nonblocking(true).expect("set nonblocking");
            let addr = listener.local_addr().expect("local addr");

            let requests = Arc::new(AtomicUsize::new(0));
            let requests_clone = Arc::clone(&requests);
            let request_lines = Arc::new(Mutex::new(Vec::new()));
            let request_lines_clone = Arc::clone(&request_lines);
            let shared_behaviors = Arc::new(Mutex::new(VecDeque::from(behaviors)));
            let behaviors_clone = Arc::clone(&shared_behaviors);
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

            let join_handle = std::thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    match listener.accept() {
                        Ok((mut stream, _)) => {
                            requests_clone.fetch_add(1, Ordering::SeqCst);
                            let behavior = {
                                let mut queue = behaviors_clone.lock().expect("lock behaviors");
                                queue
                                    .pop_front()
                                    .unwrap_or_else(|| Behavior::text(200, "default-ok"))
                            };
                            let lines = Arc::clone(&request_lines_clone);
                            std::thread::spawn(move || {
                                if let Ok(line) = consume_request(&mut stream) {
                                    lines.lock().expect("lock request lines").push(line);
                                }
                                serve_behavior(&mut stream, behavior);
                            });
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            });

            Self {
                base_url: format!("http://{addr}"),
                requests,
                request_lines,
                shutdown_tx,
                join_handle: Some(join_handle),
            }
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        /// Request lines (`GET /path?query HTTP/1.1`) in arrival order.
        pub(crate) fn request_lines(&self) -> Vec<String> {
            self.request_lines
                .lock()
                .expect("lock request lines")
                .clone()
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            let _ = self.shutdown_tx.send(());
            if let Some(handle) = self.join_handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn consume_request(stream: &mut TcpStream) -> std::io::Result<String> {
        stream.set_read_timeout(Some(Duration::from_millis(200)))?;
        let mut buf = [0_u8; 1024];
        let mut data = Vec::new();
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => {
                    data.extend_from_slice(&buf[..read]);
                    if data.windows(4).any(|window| window == b"\r\n\r\n") {
                        break;
                    }
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        let text = String::from_utf8_lossy(&data);
        Ok(text.lines().next().unwrap_or_default().to_string())
    }

    fn reason_phrase(status: u16) -> &'static str {
        match status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            408 => "Request Timeout",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Status",
        }
    }

    fn serve_behavior(stream: &mut TcpStream, behavior: Behavior) {
        match behavior {
            Behavior::Respond(status, body) => {
                let _ = write_response(stream, status, &body);
            }
            Behavior::DelayRespond(delay, status, body) => {
                std::thread::sleep(delay);
                let _ = write_response(stream, status, &body);
            }
        }
    }

    fn write_response(stream: &mut TcpStream, status: u16, payload: &[u8]) -> std::io::Result<()> {
        let reason = reason_phrase(status);
        write!(
            stream,
            "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            payload.len()
        )?;
        stream.write_all(payload)?;
        stream.flush()
    }
}
