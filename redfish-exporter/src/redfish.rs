/**
 * CLIENT CAPTEURS - Client Redfish authentifié pour la découverte des capteurs
 *
 * RÔLE :
 * Dialogue avec le BMC en HTTP(S)/JSON et remet les documents capteurs bruts
 * au normaliseur. Possède le handle de session et la politique de retry.
 *
 * FONCTIONNEMENT :
 * - Basic auth sur chaque requête, ou session Redfish (X-Auth-Token) créée
 *   une fois et réutilisée entre les cycles
 * - 401 sur une session -> token invalidé, nouveau login, un seul retry
 * - Timeout / connexion / TLS / 5xx -> un retry après un court backoff,
 *   puis TransportError étiquetée avec la catégorie
 * - Collections : chaque lien `Members` récupéré (concurrence bornée) ;
 *   tableaux embarqués (Fans, Temperatures) lus sur place
 * - Un document source partagé (Thermal) n'est lu qu'une fois par cycle
 * - Un membre cassé (4xx, JSON invalide) est ignoré et compté, pas fatal
 */

use crate::config::{AuthMode, ExporterConfig, SourceConf};
use crate::error::RedfishError;
use crate::health::HealthTracker;
use crate::models::{Credentials, RawRecord, SensorCategory};
use crate::state::{new_state, Shared};
use futures::stream::{self, StreamExt};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const SESSIONS_PATH: &str = "/redfish/v1/SessionService/Sessions";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const MEMBER_CONCURRENCY: usize = 4;

/// Authorization handle reused across cycles.
#[derive(Clone, PartialEq, Eq)]
pub enum Session {
    Basic,
    Token { token: String, location: Option<String> },
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => f.write_str("Session::Basic"),
            Self::Token { location, .. } => f
                .debug_struct("Session::Token")
                .field("token", &"<redacted>")
                .field("location", location)
                .finish(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CategoryFetch {
    pub records: Vec<RawRecord>,
    /// Members that could not be read; the rest of the category is kept.
    pub skipped: Vec<RedfishError>,
}

pub struct RedfishClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    auth: AuthMode,
    retry_backoff: Duration,
    session: Shared<Option<Session>>,
    login_gate: tokio::sync::Mutex<()>,
    health: Option<HealthTracker>,
}

impl RedfishClient {
    pub fn new(cfg: &ExporterConfig, credentials: Credentials) -> Result<Self, RedfishError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.bmc.timeout_secs))
            .danger_accept_invalid_certs(!cfg.bmc.verify_tls)
            .user_agent(concat!("redfish-exporter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RedfishError::Setup(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.base_url(),
            credentials,
            auth: cfg.bmc.auth,
            retry_backoff: Duration::from_millis(cfg.bmc.retry_backoff_ms),
            session: new_state(None),
            login_gate: tokio::sync::Mutex::new(()),
            health: None,
        })
    }

    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn authorize(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        match session {
            Session::Basic => request.basic_auth(&self.credentials.username, Some(&self.credentials.password)),
            Session::Token { token, .. } => request.header(AUTH_TOKEN_HEADER, token),
        }
    }

    /// Creates a new session. In basic mode there is nothing to negotiate.
    pub async fn authenticate(&self) -> Result<Session, RedfishError> {
        if self.auth == AuthMode::Basic {
            return Ok(Session::Basic);
        }

        let body = serde_json::json!({
            "UserName": self.credentials.username,
            "Password": self.credentials.password,
        });
        let url = self.url(SESSIONS_PATH);

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.http.post(&url).json(&body).send().await {
                Ok(resp) => break resp,
                Err(e) if attempt == 1 => {
                    warn!("session login failed ({}), retrying in {:?}", describe_transport(&e), self.retry_backoff);
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => {
                    return Err(RedfishError::Auth(format!("BMC unreachable: {}", describe_transport(&e))));
                }
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RedfishError::Auth(format!("credentials rejected (HTTP {})", status.as_u16())));
        }
        if !status.is_success() {
            return Err(RedfishError::Auth(format!("session creation returned HTTP {}", status.as_u16())));
        }

        let token = response
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RedfishError::Auth("session response carries no X-Auth-Token".into()))?;
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        info!(bmc = %self.credentials.host, user = %self.credentials.username, "opened Redfish session");
        Ok(Session::Token { token, location })
    }

    /// Returns the cached session, logging in first when there is none.
    pub async fn ensure_session(&self) -> Result<Session, RedfishError> {
        let cached = self.session.lock().clone();
        if let Some(session) = cached {
            return Ok(session);
        }

        let _gate = self.login_gate.lock().await;
        // another category may have logged in while we waited
        let cached = self.session.lock().clone();
        if let Some(session) = cached {
            return Ok(session);
        }

        let session = self.authenticate().await?;
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    fn invalidate(&self, stale: &Session) {
        let mut current = self.session.lock();
        if current.as_ref() == Some(stale) {
            *current = None;
        }
    }

    /// Best-effort `DELETE` of the session resource.
    pub async fn logout(&self) {
        let session = self.session.lock().take();
        let Some(Session::Token { token, location: Some(location) }) = session else {
            return;
        };
        let request = self.http.delete(self.url(&location)).header(AUTH_TOKEN_HEADER, token);
        match request.send().await {
            Ok(resp) => debug!("closed Redfish session (HTTP {})", resp.status().as_u16()),
            Err(e) => warn!("failed to close Redfish session: {}", describe_transport(&e)),
        }
    }

    /// GET a JSON document with re-login and transport retry.
    pub async fn get_json(&self, path: &str, category: SensorCategory) -> Result<Value, RedfishError> {
        let url = self.url(path);
        let mut reauthenticated = false;
        let mut retried = false;

        loop {
            let session = self.ensure_session().await?;
            let failure = match self.authorize(self.http.get(&url), &session).send().await {
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                    if matches!(session, Session::Basic) || reauthenticated {
                        return Err(RedfishError::Auth(format!("{path} rejected credentials (HTTP 401)")));
                    }
                    warn!("session rejected by BMC, logging in again");
                    self.invalidate(&session);
                    if let Some(health) = &self.health {
                        health.record_reauthentication();
                    }
                    reauthenticated = true;
                    continue;
                }
                Ok(resp) if resp.status().is_server_error() => format!("HTTP {}", resp.status().as_u16()),
                Ok(resp) if !resp.status().is_success() => {
                    return Err(RedfishError::Status {
                        uri: path.to_string(),
                        status: resp.status().as_u16(),
                    });
                }
                Ok(resp) => match resp.bytes().await {
                    Ok(bytes) => {
                        return serde_json::from_slice(&bytes).map_err(|e| RedfishError::Parse {
                            uri: path.to_string(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => describe_transport(&e),
                },
                Err(e) => describe_transport(&e),
            };

            if retried {
                return Err(RedfishError::Transport {
                    category,
                    reason: format!("{path}: {failure}"),
                });
            }
            retried = true;
            warn!(category = %category, "GET {} failed ({}), retrying in {:?}", path, failure, self.retry_backoff);
            tokio::time::sleep(self.retry_backoff).await;
        }
    }

    /// Reads every sensor record of one category.
    pub async fn fetch_sensors(
        &self,
        category: SensorCategory,
        source: &SourceConf,
    ) -> Result<CategoryFetch, RedfishError> {
        self.fetch_sensors_with(category, source, &IndexMemo::default()).await
    }

    /// Same as `fetch_sensors`, reading the source document through `memo`.
    pub async fn fetch_sensors_with(
        &self,
        category: SensorCategory,
        source: &SourceConf,
        memo: &IndexMemo,
    ) -> Result<CategoryFetch, RedfishError> {
        let index = memo.get(self, &source.path, category).await?;
        let array_name = source.array.as_deref().unwrap_or("Members");
        let entries = match index.get(array_name) {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Err(RedfishError::Parse {
                    uri: source.path.clone(),
                    reason: format!("no {array_name} array"),
                })
            }
        };

        let mut fetch = CategoryFetch::default();
        let mut links = Vec::new();

        for (position, entry) in entries.into_iter().enumerate() {
            let link = entry.get("@odata.id").and_then(Value::as_str).map(str::to_string);
            if let Some(link) = &link {
                if !source.member_filter.is_empty() && !source.member_filter.iter().any(|f| link.contains(f.as_str())) {
                    continue;
                }
            }

            let embedded = source.array.is_some() && !is_link_only(&entry);
            if embedded {
                fetch.records.push(RawRecord::new(link, entry));
                continue;
            }
            match link {
                Some(link) => links.push(link),
                None => fetch.skipped.push(RedfishError::Parse {
                    uri: format!("{}#{}", source.path, position),
                    reason: "member without @odata.id".into(),
                }),
            }
        }

        debug!(category = %category, members = links.len(), embedded = fetch.records.len(), "resolved sensor resources");

        let results: Vec<(String, Result<Value, RedfishError>)> = stream::iter(links)
            .map(|link| async move {
                let result = self.get_json(&link, category).await;
                (link, result)
            })
            .buffered(MEMBER_CONCURRENCY)
            .collect()
            .await;

        for (link, result) in results {
            match result {
                Ok(body) => fetch.records.push(RawRecord::new(Some(link), body)),
                Err(e @ (RedfishError::Status { .. } | RedfishError::Parse { .. })) => {
                    warn!(category = %category, "skipping sensor member: {}", e);
                    fetch.skipped.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(fetch)
    }
}

type IndexCell = Arc<OnceCell<Result<Value, RedfishError>>>;

/// Source documents of one cycle, fetched once per path.
///
/// Fans and temperatures usually share the Thermal resource; categories
/// reading the same path wait on a single GET and get their own copy.
#[derive(Default)]
pub struct IndexMemo {
    cells: parking_lot::Mutex<HashMap<String, IndexCell>>,
}

impl IndexMemo {
    async fn get(&self, client: &RedfishClient, path: &str, category: SensorCategory) -> Result<Value, RedfishError> {
        let cell = self.cells.lock().entry(path.to_string()).or_default().clone();
        let result = cell.get_or_init(|| client.get_json(path, category)).await;
        result.clone().map_err(|e| e.for_category(category))
    }
}

/// An array entry that only points at the real resource.
fn is_link_only(entry: &Value) -> bool {
    entry
        .as_object()
        .is_some_and(|o| o.contains_key("@odata.id") && o.keys().all(|k| k.starts_with("@odata")))
}

fn describe_transport(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}
