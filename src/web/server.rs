use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tiny_http::{Method, Request, Response, ResponseBox, Server};

use crate::ddns::authorize::{self, AuthError, RoleDef};
use crate::ddns::context::ServerContext;
use crate::ddns::planner;
use crate::ddns::protocol::{DoRequest, OpKind, Operation};
use crate::ddns::shutdown::Shutdown;

#[derive(Debug)]
pub enum WebError {
    Bind(String),
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebError::Bind(msg) => write!(f, "failed to start HTTP server: {}", msg),
        }
    }
}

impl std::error::Error for WebError {}

type Result<T> = std::result::Result<T, WebError>;

/// How a request failed, reduced to what the client is allowed to learn.
/// Permission problems stay a 400 so the response does not reveal whether a
/// role exists; only bad credentials earn a 401.
#[derive(Debug)]
enum ApiFailure {
    NotFound,
    User(String),
    Unauthenticated,
    Internal(String),
}

impl From<AuthError> for ApiFailure {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => ApiFailure::Unauthenticated,
            AuthError::PermissionDenied(_) | AuthError::InvalidInput(_) => {
                ApiFailure::User(err.to_string())
            }
            AuthError::InvalidGlob(_) | AuthError::Store(_) => {
                ApiFailure::Internal(err.to_string())
            }
        }
    }
}

fn status_of(failure: &ApiFailure) -> u16 {
    match failure {
        ApiFailure::NotFound => 404,
        ApiFailure::User(_) => 400,
        ApiFailure::Unauthenticated => 401,
        ApiFailure::Internal(_) => 500,
    }
}

/// Split a request URL into path segments below the configured route prefix.
/// Returns `None` when the URL is outside the prefix.
fn route_parts<'a>(prefix: &str, url: &'a str) -> Option<Vec<&'a str>> {
    let path = url.split('?').next().unwrap_or(url);
    let below = if prefix.is_empty() {
        path
    } else {
        path.strip_prefix(prefix)?
    };
    Some(below.split('/').filter(|part| !part.is_empty()).collect())
}

pub struct ApiServer {
    pub context: Arc<ServerContext>,
}

impl ApiServer {
    pub fn new(context: Arc<ServerContext>) -> ApiServer {
        ApiServer { context }
    }

    /// Serve until cancellation. The accept loop polls so the shutdown flag
    /// is observed within half a second; in-flight handlers finish before
    /// the loop exits.
    pub fn run(&self, shutdown: &Shutdown) -> Result<()> {
        let server = Server::http(self.context.http_listen.as_str())
            .map_err(|e| WebError::Bind(e.to_string()))?;

        log::info!(
            "Listening on http://{}{}/",
            self.context.http_listen,
            self.context.route_prefix
        );

        loop {
            if shutdown.is_cancelled() {
                log::info!("Shutting down");
                return Ok(());
            }
            match server.recv_timeout(Duration::from_millis(500)) {
                Ok(Some(request)) => self.handle(request),
                Ok(None) => {}
                Err(e) => log::warn!("Accepting request failed: {}", e),
            }
        }
    }

    fn handle(&self, mut request: Request) {
        log::info!("HTTP {:?} {}", request.method(), request.url());

        let url = request.url().to_string();
        let method = request.method().clone();
        let outcome = match route_parts(&self.context.route_prefix, &url) {
            Some(parts) => match (method, parts.as_slice()) {
                (Method::Post, ["v1", "do"]) => self.handle_do(&mut request),
                _ => Err(ApiFailure::NotFound),
            },
            None => Err(ApiFailure::NotFound),
        };

        respond(request, outcome);
    }

    fn handle_do(&self, request: &mut Request) -> std::result::Result<(), ApiFailure> {
        let mut body = String::new();
        request
            .as_reader()
            .read_to_string(&mut body)
            .map_err(|e| ApiFailure::User(format!("reading request body failed: {}", e)))?;

        let req: DoRequest = serde_json::from_str(&body)
            .map_err(|e| ApiFailure::User(format!("invalid input: {}", e)))?;

        let role_def = authorize::authenticate(&self.context.store, &req.role, &req.token)?;

        let mut operations = req.operations;
        authorize::validate_all(&self.context.globs, &role_def, &req.role, &mut operations)?;

        let context = Arc::clone(&self.context);
        std::thread::spawn(move || execute_batch(context, role_def, operations));

        Ok(())
    }
}

/// Background half of a `/v1/do` request. Nothing here can reach the HTTP
/// response any more; results are visible through the server log only.
fn execute_batch(context: Arc<ServerContext>, role_def: RoleDef, mut operations: Vec<Operation>) {
    let registries = match planner::build_registries(
        &context.store,
        &context.builders,
        &role_def,
        &mut operations,
    ) {
        Ok(registries) => registries,
        Err(e) => {
            log::error!("Building registries failed: {}", e);
            return;
        }
    };

    planner::execute_all(&operations, &registries, |err, op| match (op.op, err) {
        (OpKind::Update, None) => log::info!(
            "Role [{}] updates [{}] => [{}] with TTL [{}]",
            op.role,
            op.record.canonical_name,
            op.record.value,
            op.record.ttl
        ),
        (OpKind::Update, Some(e)) => log::error!(
            "Role [{}] updates [{}] => [{}] with TTL [{}], failed: {}",
            op.role,
            op.record.canonical_name,
            op.record.value,
            op.record.ttl,
            e
        ),
        (OpKind::Delete, None) => log::info!(
            "Role [{}] deletes [{}]",
            op.role,
            op.record.canonical_name
        ),
        (OpKind::Delete, Some(e)) => log::error!(
            "Role [{}] deletes [{}], failed: {}",
            op.role,
            op.record.canonical_name,
            e
        ),
    });

    planner::close_all(&registries);
}

fn respond(request: Request, outcome: std::result::Result<(), ApiFailure>) {
    let response = match outcome {
        Ok(()) => json_response(200, "{}".to_string()),
        Err(failure) => {
            let status = status_of(&failure);
            match failure {
                ApiFailure::Internal(msg) => {
                    log::error!("Internal error: {}", msg);
                    Response::empty(500).boxed()
                }
                ApiFailure::Unauthenticated => {
                    json_response(status, error_body("authorization failed"))
                }
                ApiFailure::NotFound => json_response(status, error_body("not found")),
                ApiFailure::User(msg) => json_response(status, error_body(&msg)),
            }
        }
    };

    if let Err(e) = request.respond(response) {
        log::warn!("Failed to write response to client: {:?}", e);
    }
}

fn json_response(status: u16, body: String) -> ResponseBox {
    Response::from_string(body)
        .with_status_code(status)
        .with_header(
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("static header"),
        )
        .boxed()
}

fn error_body(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}
