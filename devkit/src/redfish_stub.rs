/*!
Mock BMC Redfish pour développement sans matériel

Sert des documents JSON enregistrés par chemin sur un vrai listener HTTP
(port loopback éphémère). Gère login/logout de session et basic auth,
enregistre chaque requête et permet d'injecter des pannes par chemin
(délais, statuts d'erreur, corps invalides, expiration de session).
*/

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SESSIONS_PATH: &str = "/redfish/v1/SessionService/Sessions";
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Mode d'autorisation d'une requête enregistrée
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    None,
    Basic,
    Token,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub auth: AuthKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Répond normalement, mais après une pause
    Delay(Duration),
    /// Répond avec ce statut et un corps d'erreur JSON
    Status(u16),
    /// Répond 200 avec un corps qui n'est pas du JSON
    Garbage,
}

#[derive(Debug)]
struct ArmedFault {
    fault: Fault,
    remaining: usize,
}

#[derive(Debug)]
struct BmcState {
    username: String,
    password: String,
    sessions_only: bool,
    resources: HashMap<String, Value>,
    faults: HashMap<String, ArmedFault>,
    tokens: HashSet<String>,
    next_session: u64,
    logins: usize,
    logouts: usize,
    requests: Vec<RecordedRequest>,
}

/// Handle partagé vers le mock ; les clones voient le même état
#[derive(Clone)]
pub struct MockBmc {
    state: Arc<Mutex<BmcState>>,
}

/// Mock démarré ; le listener s'arrête au drop
pub struct RunningBmc {
    base_url: String,
    handle: JoinHandle<()>,
}

impl RunningBmc {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for RunningBmc {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockBmc {
    pub fn new<S: Into<String>>(username: S, password: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(BmcState {
                username: username.into(),
                password: password.into(),
                sessions_only: false,
                resources: HashMap::new(),
                faults: HashMap::new(),
                tokens: HashSet::new(),
                next_session: 1,
                logins: 0,
                logouts: 0,
                requests: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BmcState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refuse la basic auth ; seules les sessions `X-Auth-Token` passent
    pub fn require_sessions(&self) -> &Self {
        self.lock().sessions_only = true;
        self
    }

    /// Change le mot de passe accepté ; les logins avec l'ancien échouent
    pub fn set_password<S: Into<String>>(&self, password: S) {
        self.lock().password = password.into();
    }

    /// Enregistre (ou remplace) le document servi sur `path`
    pub fn set_resource<S: Into<String>>(&self, path: S, document: Value) -> &Self {
        self.lock().resources.insert(path.into(), document);
        self
    }

    pub fn remove_resource(&self, path: &str) {
        self.lock().resources.remove(path);
    }

    /// Applique `fault` aux `times` prochaines requêtes sur `path`
    pub fn inject_fault<S: Into<String>>(&self, path: S, fault: Fault, times: usize) {
        let path = path.into();
        log::info!("💥 Injecting {:?} on {} ({} times)", fault, path, times);
        self.lock().faults.insert(path, ArmedFault { fault, remaining: times });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Oublie tous les tokens émis, comme un BMC après expiration de session
    pub fn expire_sessions(&self) {
        let mut state = self.lock();
        log::info!("⌛ Expiring {} session(s)", state.tokens.len());
        state.tokens.clear();
    }

    pub fn active_sessions(&self) -> usize {
        self.lock().tokens.len()
    }

    pub fn login_count(&self) -> usize {
        self.lock().logins
    }

    pub fn logout_count(&self) -> usize {
        self.lock().logouts
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Nombre de GET reçus sur `path`
    pub fn request_count(&self, path: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == Method::GET && r.path == path)
            .count()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    /// Écoute sur 127.0.0.1 (port éphémère) et sert en tâche de fond
    pub async fn start(&self) -> Result<RunningBmc> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = Router::new().fallback(handle_request).with_state(self.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                log::error!("❌ Mock BMC stopped: {}", e);
            }
        });

        log::info!("🖥️  Mock BMC listening on http://{}", addr);
        Ok(RunningBmc { base_url: format!("http://{addr}"), handle })
    }

    fn take_fault(&self, path: &str) -> Option<Fault> {
        let mut state = self.lock();
        let armed = state.faults.get_mut(path)?;
        if armed.remaining == 0 {
            return None;
        }
        armed.remaining -= 1;
        Some(armed.fault.clone())
    }

    fn classify_auth(&self, headers: &HeaderMap) -> (AuthKind, bool) {
        let state = self.lock();
        if let Some(token) = headers.get(AUTH_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
            return (AuthKind::Token, state.tokens.contains(token));
        }
        if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            let expected = format!("Basic {}", STANDARD.encode(format!("{}:{}", state.username, state.password)));
            return (AuthKind::Basic, !state.sessions_only && value == expected);
        }
        (AuthKind::None, false)
    }

    fn login(&self, body: &[u8]) -> Response {
        let credentials: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        let mut state = self.lock();
        let user_ok = credentials.get("UserName").and_then(Value::as_str) == Some(state.username.as_str());
        let pass_ok = credentials.get("Password").and_then(Value::as_str) == Some(state.password.as_str());
        if !user_ok || !pass_ok {
            log::warn!("🔒 Rejected login attempt");
            return (StatusCode::UNAUTHORIZED, axum::Json(error_body("invalid credentials"))).into_response();
        }

        let id = state.next_session;
        state.next_session += 1;
        state.logins += 1;
        let token = format!("mock-token-{id}");
        let location = format!("{SESSIONS_PATH}/{id}");
        let session = json!({"@odata.id": location, "Id": id.to_string(), "UserName": state.username});
        state.tokens.insert(token.clone());
        state.resources.insert(location.clone(), session);

        let mut response = (
            StatusCode::CREATED,
            axum::Json(json!({"@odata.id": location, "Id": id.to_string()})),
        )
            .into_response();
        if let (Ok(token), Ok(location)) = (HeaderValue::from_str(&token), HeaderValue::from_str(&location)) {
            response.headers_mut().insert(AUTH_TOKEN_HEADER, token);
            response.headers_mut().insert(header::LOCATION, location);
        }
        response
    }

    fn logout(&self, path: &str, headers: &HeaderMap) -> Response {
        let mut state = self.lock();
        if state.resources.remove(path).is_none() {
            return StatusCode::NOT_FOUND.into_response();
        }
        if let Some(token) = headers.get(AUTH_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
            state.tokens.remove(token);
        }
        state.logouts += 1;
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn handle_request(
    State(bmc): State<MockBmc>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let (auth, authorized) = bmc.classify_auth(&headers);
    bmc.lock().requests.push(RecordedRequest { method: method.clone(), path: path.clone(), auth });
    log::debug!("➡️  {} {} ({:?})", method, path, auth);

    if method == Method::POST && path == SESSIONS_PATH {
        return bmc.login(&body);
    }
    if !authorized {
        return (StatusCode::UNAUTHORIZED, axum::Json(error_body("authentication required"))).into_response();
    }
    if method == Method::DELETE && path.starts_with(SESSIONS_PATH) {
        return bmc.logout(&path, &headers);
    }
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    match bmc.take_fault(&path) {
        Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
        Some(Fault::Status(code)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, axum::Json(error_body("injected fault"))).into_response();
        }
        Some(Fault::Garbage) => {
            return ([(header::CONTENT_TYPE, "application/json")], "{\"Reading\": ").into_response();
        }
        None => {}
    }

    let document = bmc.lock().resources.get(&path).cloned();
    match document {
        Some(document) => axum::Json(document).into_response(),
        None => (StatusCode::NOT_FOUND, axum::Json(error_body("resource not found"))).into_response(),
    }
}

fn error_body(message: &str) -> Value {
    json!({"error": {"code": "Base.1.0.GeneralError", "message": message}})
}
