//! DNSSEC HTTP API
//!
//! Read surface for peers and operators:
//! - GET  /api/v1/dnssec/keys    public key set (pulled by peer syncers)
//! - GET  /api/v1/dnssec/ds      DS records, optionally `?zone=`
//! - GET  /api/v1/dnssec/status  key info, signing and sync status
//! - POST /api/v1/dnssec/sync    run a sync pass now

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dns_types::canonical_name;
use super::dnssec::DnssecSigner;
use super::dnssec_keys::{KeyPair, KeyRegistry};
use super::key_store::KeyInfo;
use super::key_sync::{KeySyncer, SyncStatus};

/// Base path for every DNSSEC endpoint
pub const API_BASE: &str = "/api/v1/dnssec";

/// GET /api/v1/dnssec/keys
#[derive(Debug, Serialize, Deserialize)]
pub struct KeysResponse {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<KeyPair>>,
}

/// One DS record in API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsRecordResponse {
    pub zone: String,
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: String,
    pub ds_record: String,
    pub created_at: String,
}

/// GET /api/v1/dnssec/ds
#[derive(Debug, Serialize, Deserialize)]
pub struct DsResponse {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub ds_records: Vec<DsRecordResponse>,
}

/// Signing parameters reported by the status endpoint
#[derive(Debug, Serialize)]
pub struct SigningStatus {
    pub signature_validity_secs: u64,
    pub inception_offset_secs: u64,
    pub signature_ttl: u32,
    pub nsec3_iterations: u16,
    pub signable_zones: Vec<String>,
}

/// GET /api/v1/dnssec/status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub enabled: bool,
    pub keys: Vec<KeyInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing: Option<SigningStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncStatus>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

/// DNSSEC API handler
pub struct DnssecApi {
    enabled: bool,
    registry: Arc<KeyRegistry>,
    signer: Option<Arc<DnssecSigner>>,
    syncer: Option<Arc<KeySyncer>>,
}

impl DnssecApi {
    pub fn new(enabled: bool, registry: Arc<KeyRegistry>) -> Self {
        Self {
            enabled,
            registry,
            signer: None,
            syncer: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<DnssecSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_syncer(mut self, syncer: Arc<KeySyncer>) -> Self {
        self.syncer = Some(syncer);
        self
    }

    /// Handle an incoming HTTP request
    pub async fn handle_request(&self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().trim_end_matches('/').to_string();
        let query = req.uri().query().map(str::to_string);

        debug!("DNSSEC API request: {} {}", method, path);

        let endpoint = match path.strip_prefix(API_BASE) {
            Some(rest) => rest.trim_start_matches('/'),
            None => return Ok(json_error(StatusCode::NOT_FOUND, "endpoint not found")),
        };

        let response = match (method, endpoint) {
            (Method::GET, "keys") => self.handle_keys(),
            (Method::GET, "ds") => self.handle_ds(query.as_deref()),
            (Method::GET, "") | (Method::GET, "status") => self.handle_status(),
            (Method::POST, "sync") => self.handle_sync().await,
            (_, "keys") | (_, "ds") | (_, "") | (_, "status") | (_, "sync") => {
                json_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
            }
            _ => json_error(StatusCode::NOT_FOUND, "endpoint not found"),
        };

        Ok(response)
    }

    fn handle_keys(&self) -> Response<Body> {
        if !self.enabled {
            return json_response(
                StatusCode::OK,
                &KeysResponse {
                    enabled: false,
                    keys: None,
                },
            );
        }

        // Peers only ever import public material
        let keys = self
            .registry
            .get_all()
            .iter()
            .map(KeyPair::public_only)
            .collect();

        json_response(
            StatusCode::OK,
            &KeysResponse {
                enabled: true,
                keys: Some(keys),
            },
        )
    }

    fn handle_ds(&self, query: Option<&str>) -> Response<Body> {
        if !self.enabled {
            return json_response(
                StatusCode::OK,
                &DsResponse {
                    enabled: false,
                    message: Some("DNSSEC is disabled".to_string()),
                    ds_records: Vec::new(),
                },
            );
        }

        let zone_filter = query
            .and_then(|q| query_param(q, "zone"))
            .filter(|zone| !zone.is_empty())
            .map(|zone| canonical_name(&zone));

        let mut records = Vec::new();
        for key in self.registry.get_all() {
            if let Some(ref zone) = zone_filter {
                if key.zone() != zone.as_str() {
                    continue;
                }
            }

            let ds = match key.ds_record() {
                Ok(ds) => ds,
                Err(e) => {
                    warn!("Failed to compute DS record for zone {}: {}", key.zone(), e);
                    continue;
                }
            };

            records.push(DsRecordResponse {
                zone: key.zone().to_string(),
                key_tag: ds.key_tag,
                algorithm: ds.algorithm,
                digest_type: ds.digest_type,
                digest: ds.digest_hex(),
                ds_record: ds.to_zone_format(key.zone()),
                created_at: key.created_at().to_rfc3339(),
            });
        }

        json_response(
            StatusCode::OK,
            &DsResponse {
                enabled: true,
                message: None,
                ds_records: records,
            },
        )
    }

    fn handle_status(&self) -> Response<Body> {
        let keys = if self.enabled {
            self.registry.get_all().iter().map(KeyInfo::from).collect()
        } else {
            Vec::new()
        };

        let signing = self.signer.as_ref().filter(|_| self.enabled).map(|signer| {
            let config = signer.config();
            SigningStatus {
                signature_validity_secs: config.signature_validity.as_secs(),
                inception_offset_secs: config.inception_offset.as_secs(),
                signature_ttl: config.signature_ttl,
                nsec3_iterations: signer.nsec3().config().iterations,
                signable_zones: self
                    .registry
                    .get_all()
                    .into_iter()
                    .filter(KeyPair::can_sign)
                    .map(|key| key.zone().to_string())
                    .collect(),
            }
        });

        let response = StatusResponse {
            enabled: self.enabled,
            keys,
            signing,
            sync: self.syncer.as_ref().map(|syncer| syncer.status()),
        };

        json_response(StatusCode::OK, &response)
    }

    async fn handle_sync(&self) -> Response<Body> {
        if !self.enabled {
            return json_error(StatusCode::BAD_REQUEST, "DNSSEC is disabled");
        }

        let syncer = match self.syncer {
            Some(ref syncer) => syncer,
            None => return json_error(StatusCode::BAD_REQUEST, "key sync is not configured"),
        };

        info!("Triggered manual DNSSEC key sync");
        let imported = syncer.sync_now().await;

        json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "ok",
                "message": "key sync completed",
                "imported": imported,
                "sync": syncer.status(),
            }),
        )
    }
}

/// Look up a single query parameter
fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .find_map(|(key, value)| (key == name).then_some(value))
}

/// Create JSON response
fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let json = serde_json::to_string(body).unwrap_or_else(|e| {
        error!("Failed to encode response: {}", e);
        "{}".to_string()
    });

    let mut response = Response::new(Body::from(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Create JSON error response
fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    json_response(
        status,
        &ErrorResponse {
            error: message.to_string(),
            code: status.as_u16(),
        },
    )
}

/// Bind the API and serve it in the background until `shutdown` resolves.
/// Returns the bound address, which differs from `addr` when port 0 is used.
pub fn spawn_dnssec_api<F>(
    addr: SocketAddr,
    api: Arc<DnssecApi>,
    shutdown: F,
) -> Result<(SocketAddr, JoinHandle<()>), hyper::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let make_svc = make_service_fn(move |_conn| {
        let api = Arc::clone(&api);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let api = Arc::clone(&api);
                async move { api.handle_request(req).await }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    let local_addr = server.local_addr();
    info!("DNSSEC API listening on http://{}", local_addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = server.with_graceful_shutdown(shutdown).await {
            error!("DNSSEC API server error: {}", e);
        }
        info!("DNSSEC API stopped");
    });

    Ok((local_addr, handle))
}
