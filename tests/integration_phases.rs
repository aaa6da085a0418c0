use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use restgate::prelude::{
    AttributeList, ModuleSettings, Outcome, PipelineState, RestModule, SectionSettings, Worker,
};
use restgate::STATUS_CODE_ATTR;
use serde_json::Value;

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into().into_bytes(),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(3);
            let mut response_index = 0;

            while response_index < responses.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;

                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }

                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        410 => "Gone",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn worker_for(settings: ModuleSettings) -> Worker {
    let module = Arc::new(RestModule::resolve(&settings).expect("module should resolve"));
    Worker::new(module, 4)
}

fn authorize_worker(base_url: &str, section: SectionSettings) -> Worker {
    worker_for(ModuleSettings {
        authorize: Some(SectionSettings {
            uri: format!("{base_url}/user/%{{User-Name}}"),
            ..section
        }),
        ..ModuleSettings::default()
    })
}

fn state_of(pairs: &[(&str, &str)]) -> AttributeList {
    pairs.iter().copied().collect()
}

#[tokio::test]
async fn authorize_decodes_json_updates() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        r#"{"Reply-Message":"hello","Session-Timeout":600}"#,
    )]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    let outcome = worker.authorize(&mut state).await;

    assert_eq!(outcome, Outcome::Updated);
    assert_eq!(state.get(STATUS_CODE_ATTR), Some("200"));
    assert_eq!(state.get("Reply-Message"), Some("hello"));
    assert_eq!(state.get("Session-Timeout"), Some("600"));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/user/bob");
}

#[tokio::test]
async fn authorize_success_without_updates_is_ok() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        "",
    )]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::Ok);
    assert_eq!(state.get(STATUS_CODE_ATTR), Some("200"));
}

#[tokio::test]
async fn authorize_no_content_is_ok() {
    let server = MockServer::start(vec![MockResponse::new(204, Vec::<(&str, &str)>::new(), "")]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::Ok);
    assert_eq!(state.get(STATUS_CODE_ATTR), Some("204"));
}

#[tokio::test]
async fn authorize_missing_resource_is_not_found() {
    let server = MockServer::start(vec![
        MockResponse::new(404, Vec::<(&str, &str)>::new(), "no such user"),
        MockResponse::new(410, Vec::<(&str, &str)>::new(), "user removed"),
    ]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::NotFound);
    assert_eq!(worker.authorize(&mut state).await, Outcome::NotFound);
    assert_eq!(worker.handles_in_use(), 0);
}

#[tokio::test]
async fn authorize_forbidden_locks_the_user() {
    let server = MockServer::start(vec![MockResponse::new(
        403,
        Vec::<(&str, &str)>::new(),
        "account disabled",
    )]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::UserLock);
    assert_eq!(state.get(STATUS_CODE_ATTR), Some("403"));
}

#[tokio::test]
async fn authorize_rejection_still_decodes_reply_attributes() {
    let server = MockServer::start(vec![MockResponse::new(
        401,
        vec![("Content-Type", "application/json")],
        r#"{"Reply-Message":"access denied"}"#,
    )]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::Reject);
    assert_eq!(state.get("Reply-Message"), Some("access denied"));
}

#[tokio::test]
async fn authorize_rejection_with_malformed_body_fails() {
    let server = MockServer::start(vec![MockResponse::new(
        401,
        vec![("Content-Type", "application/json")],
        "this is not json",
    )]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::Fail);
}

#[tokio::test]
async fn authorize_server_error_fails() {
    let server = MockServer::start(vec![MockResponse::new(
        500,
        Vec::<(&str, &str)>::new(),
        "boom",
    )]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::Fail);
    assert_eq!(state.get(STATUS_CODE_ATTR), Some("500"));
}

#[tokio::test]
async fn authorize_force_to_overrides_response_content_type() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "text/plain")],
        r#"{"Reply-Message":"forced"}"#,
    )]);
    let worker = authorize_worker(
        &server.base_url,
        SectionSettings {
            force_to: Some("json".to_owned()),
            ..SectionSettings::default()
        },
    );

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::Updated);
    assert_eq!(state.get("Reply-Message"), Some("forced"));
}

#[tokio::test]
async fn authenticate_sends_basic_credentials_from_the_request() {
    let server = MockServer::start(vec![MockResponse::new(204, Vec::<(&str, &str)>::new(), "")]);
    let worker = worker_for(ModuleSettings {
        authenticate: Some(SectionSettings {
            uri: format!("{}/auth", server.base_url),
            auth: "basic".to_owned(),
            ..SectionSettings::default()
        }),
        ..ModuleSettings::default()
    });

    let mut state = state_of(&[("User-Name", "bob"), ("User-Password", "secret")]);
    assert_eq!(worker.authenticate(&mut state).await, Outcome::Ok);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Basic Ym9iOnNlY3JldA==")
    );
}

#[tokio::test]
async fn authenticate_rejection_maps_to_reject() {
    let server = MockServer::start(vec![MockResponse::new(
        401,
        Vec::<(&str, &str)>::new(),
        "bad password",
    )]);
    let worker = worker_for(ModuleSettings {
        authenticate: Some(SectionSettings {
            uri: format!("{}/auth", server.base_url),
            auth: "basic".to_owned(),
            ..SectionSettings::default()
        }),
        ..ModuleSettings::default()
    });

    let mut state = state_of(&[("User-Name", "bob"), ("User-Password", "wrong")]);
    assert_eq!(worker.authenticate(&mut state).await, Outcome::Reject);
}

#[tokio::test]
async fn accounting_posts_encoded_attributes() {
    let server = MockServer::start(vec![MockResponse::new(204, Vec::<(&str, &str)>::new(), "")]);
    let worker = worker_for(ModuleSettings {
        accounting: Some(SectionSettings {
            uri: format!("{}/acct", server.base_url),
            method: "POST".to_owned(),
            body: "json".to_owned(),
            ..SectionSettings::default()
        }),
        ..ModuleSettings::default()
    });

    let mut state = state_of(&[("Acct-Status-Type", "Start"), ("User-Name", "bob")]);
    assert_eq!(worker.accounting(&mut state).await, Outcome::Ok);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    let payload: Value =
        serde_json::from_slice(&requests[0].body).expect("request body should be json");
    assert_eq!(payload["Acct-Status-Type"], Value::String("Start".to_owned()));
    assert_eq!(payload["User-Name"], Value::String("bob".to_owned()));
}

#[tokio::test]
async fn accounting_reduces_auth_statuses_to_invalid() {
    let server = MockServer::start(vec![MockResponse::new(
        401,
        Vec::<(&str, &str)>::new(),
        "unexpected challenge",
    )]);
    let worker = worker_for(ModuleSettings {
        accounting: Some(SectionSettings {
            uri: format!("{}/acct", server.base_url),
            ..SectionSettings::default()
        }),
        ..ModuleSettings::default()
    });

    let mut state = AttributeList::new();
    assert_eq!(worker.accounting(&mut state).await, Outcome::Invalid);
}

#[tokio::test]
async fn post_auth_delivery_follows_the_reduced_table() {
    let server = MockServer::start(vec![MockResponse::new(
        301,
        Vec::<(&str, &str)>::new(),
        "",
    )]);
    let worker = worker_for(ModuleSettings {
        post_auth: Some(SectionSettings {
            uri: format!("{}/post-auth", server.base_url),
            ..SectionSettings::default()
        }),
        ..ModuleSettings::default()
    });

    let mut state = AttributeList::new();
    assert_eq!(worker.post_auth(&mut state).await, Outcome::Invalid);
}

#[tokio::test]
async fn timed_out_exchange_fails_with_no_status() {
    let server = MockServer::start(vec![
        MockResponse::new(200, Vec::<(&str, &str)>::new(), "late")
            .delayed(Duration::from_millis(700)),
    ]);
    let worker = authorize_worker(
        &server.base_url,
        SectionSettings {
            timeout: 0.15,
            ..SectionSettings::default()
        },
    );

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::Fail);
    assert_eq!(state.get(STATUS_CODE_ATTR), Some("0"));
    assert_eq!(worker.handles_in_use(), 0);
    assert_eq!(server.served_count(), 1);
}

#[tokio::test]
async fn refused_connection_fails_with_no_status() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind throwaway listener");
    let address = listener.local_addr().expect("read local address");
    drop(listener);

    let worker = authorize_worker(&format!("http://{address}"), SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    assert_eq!(worker.authorize(&mut state).await, Outcome::Fail);
    assert_eq!(state.get(STATUS_CODE_ATTR), Some("0"));
    assert_eq!(worker.handles_in_use(), 0);
}

#[tokio::test]
async fn cancelled_invocation_releases_the_handle_and_aborts_the_transfer() {
    let server = MockServer::start(vec![
        MockResponse::new(200, Vec::<(&str, &str)>::new(), "late")
            .delayed(Duration::from_millis(600)),
    ]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    let cancelled =
        tokio::time::timeout(Duration::from_millis(100), worker.authorize(&mut state)).await;
    assert!(cancelled.is_err(), "invocation should be cancelled mid-exchange");

    // Dropping the invocation future must return the handle and leave no
    // trace of the exchange behind.
    assert_eq!(worker.handles_in_use(), 0);
    assert_eq!(worker.idle_handles(), 1);
    assert_eq!(state.get(STATUS_CODE_ATTR), None);
    assert_eq!(server.served_count(), 1);
}

#[tokio::test]
async fn handles_are_released_and_reused_across_invocations() {
    let server = MockServer::start(vec![
        MockResponse::new(204, Vec::<(&str, &str)>::new(), ""),
        MockResponse::new(204, Vec::<(&str, &str)>::new(), ""),
        MockResponse::new(204, Vec::<(&str, &str)>::new(), ""),
    ]);
    let worker = authorize_worker(&server.base_url, SectionSettings::default());

    let mut state = state_of(&[("User-Name", "bob")]);
    for _ in 0..3 {
        assert_eq!(worker.authorize(&mut state).await, Outcome::Ok);
    }

    assert_eq!(worker.handles_in_use(), 0);
    assert_eq!(worker.idle_handles(), 1);
    assert_eq!(server.served_count(), 3);
}
