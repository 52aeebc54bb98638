//! End-to-end test of the record server: HTTP in, provider calls out.

use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use vane::ddns::context::ServerContext;
use vane::ddns::protocol::Record;
use vane::ddns::registry::{Registry, RegistryError};
use vane::ddns::shutdown::Shutdown;
use vane::web::server::ApiServer;

/// Records every provider call into a log shared with the test body. The
/// planner builds a fresh instance per batch; all instances share the log.
struct RecordingRegistry {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Registry for RecordingRegistry {
    fn append_record(&self, record: &Record) -> Result<(), RegistryError> {
        self.calls.lock().unwrap().push(format!(
            "append {} {} {}",
            record.canonical_name, record.value, record.ttl
        ));
        Ok(())
    }

    fn delete_record(&self, record: &Record) -> Result<(), RegistryError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {} {}", record.canonical_name, record.value));
        Ok(())
    }

    fn delete_all_for_name(&self, canonical_name: &str) -> Result<(), RegistryError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("purge {}", canonical_name));
        Ok(())
    }

    fn close(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

struct TestServer {
    base_url: String,
    calls: Arc<Mutex<Vec<String>>>,
    shutdown: Arc<Shutdown>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn write_definitions(dir: &PathBuf) {
    fs::create_dir_all(dir.join("role")).unwrap();
    fs::create_dir_all(dir.join("registry")).unwrap();
    fs::write(
        dir.join("role/alice.json"),
        r#"{
            "keys": {"t1": {"expire": 0}, "stale": {"expire": 1}},
            "managed_domains": {"example.com": {"registry": "r", "glob": ""}}
        }"#,
    )
    .unwrap();
    fs::write(dir.join("registry/r.json"), r#"{"builder":"mock"}"#).unwrap();
}

fn start_server(tag: &str) -> TestServer {
    let dir = std::env::temp_dir().join(format!("vane-flow-{}-{}", std::process::id(), tag));
    write_definitions(&dir);

    // Grab a free port, then hand it to the server.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let listen = format!("127.0.0.1:{}", port);

    let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let mut context = ServerContext::new(
        dir.to_str().unwrap(),
        Duration::from_secs(600),
        &listen,
        "/",
    );
    let sink = Arc::clone(&calls);
    context.builders.register("mock", move |_params| {
        Ok(Box::new(RecordingRegistry {
            calls: Arc::clone(&sink),
        }) as Box<dyn Registry>)
    });

    let shutdown = Shutdown::new();
    let server = ApiServer::new(context.into_shared());
    let server_shutdown = Arc::clone(&shutdown);
    let handle = std::thread::spawn(move || {
        server.run(&server_shutdown).unwrap();
    });

    let server = TestServer {
        base_url: format!("http://{}", listen),
        calls,
        shutdown,
        handle: Some(handle),
    };
    wait_until_up(&server.base_url);
    server
}

fn wait_until_up(base_url: &str) {
    let client = reqwest::blocking::Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if client.get(base_url).send().is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("server did not come up at {}", base_url);
}

fn wait_for_calls(server: &TestServer, expected: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let calls = server.calls.lock().unwrap().clone();
        if calls.len() >= expected {
            return calls;
        }
        if Instant::now() > deadline {
            panic!(
                "timed out waiting for {} provider calls, have {:?}",
                expected, calls
            );
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn post(server: &TestServer, body: serde_json::Value) -> (u16, serde_json::Value) {
    let client = reqwest::blocking::Client::new();
    let response = client
        .post(format!("{}/v1/do", server.base_url))
        .json(&body)
        .send()
        .unwrap();
    let status = response.status().as_u16();
    let body: serde_json::Value = response.json().unwrap_or(serde_json::json!({}));
    (status, body)
}

#[test]
fn test_apex_update_reaches_the_provider() {
    let server = start_server("apex");

    let (status, body) = post(
        &server,
        serde_json::json!({
            "role": "alice",
            "token": "t1",
            "operations": [{
                "op": "update", "domain": "example.com", "subdomain": "",
                "type": "A", "name": "", "value": "192.0.2.1", "ttl": 60
            }]
        }),
    );
    assert_eq!(status, 200);
    assert_eq!(body, serde_json::json!({}));

    let calls = wait_for_calls(&server, 2);
    assert_eq!(
        calls,
        vec!["purge example.com", "append example.com 192.0.2.1 60"]
    );
}

#[test]
fn test_subdomain_outside_delegation_is_denied() {
    let server = start_server("denied");

    let (status, body) = post(
        &server,
        serde_json::json!({
            "role": "alice",
            "token": "t1",
            "operations": [{
                "op": "update", "domain": "example.com", "subdomain": "www",
                "type": "A", "name": "", "value": "192.0.2.1", "ttl": 60
            }]
        }),
    );
    assert_eq!(status, 400);
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("permission denied"), "got: {}", message);

    // No provider traffic for a denied batch.
    std::thread::sleep(Duration::from_millis(200));
    assert!(server.calls.lock().unwrap().is_empty());
}

#[test]
fn test_bad_and_expired_tokens_are_unauthenticated() {
    let server = start_server("tokens");

    for token in ["wrong", "stale"] {
        let (status, body) = post(
            &server,
            serde_json::json!({
                "role": "alice",
                "token": token,
                "operations": []
            }),
        );
        assert_eq!(status, 401, "token {}", token);
        assert_eq!(body["error"], "authorization failed");
    }

    let (status, _body) = post(
        &server,
        serde_json::json!({"role": "nobody", "token": "t1", "operations": []}),
    );
    assert_eq!(status, 401);

    std::thread::sleep(Duration::from_millis(200));
    assert!(server.calls.lock().unwrap().is_empty());
}

#[test]
fn test_malformed_body_is_a_user_error() {
    let server = start_server("malformed");

    let client = reqwest::blocking::Client::new();
    let response = client
        .post(format!("{}/v1/do", server.base_url))
        .body("{not json")
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}
