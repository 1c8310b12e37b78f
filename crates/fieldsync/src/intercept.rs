//! Network interceptor.
//!
//! Every outbound request passes through [`Interceptor::handle`], which picks
//! one routing rule in order:
//!
//! 1. Attendance writes go to the network; on failure the body is stored as
//!    a pending record and a synthetic success flagged `offline` is returned.
//! 2. Page navigations go to the network, else the pre-cached offline page.
//! 3. API reads are network-first with a cached fallback.
//! 4. Static assets are cache-first.
//!
//! Responses are cached per cache version. A new version installs as
//! waiting and only replaces the active one on `SKIP_WAITING`.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::InterceptConfig;
use crate::entity::{CachedEntity, EntityKind};
use crate::error::{Error, Result};
use crate::record::{AttendancePayload, Capture};
use crate::remote::{HttpRequest, HttpResponse, Method, RequestMode};
use crate::store::{CachedResponse, Store};
use crate::sync::SyncEngine;

/// Metadata key holding the active cache version.
const ACTIVE_VERSION_KEY: &str = "active_cache_version";

/// How a request is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Write to the attendance endpoint.
    AttendanceWrite,
    /// Full-page navigation.
    Navigation,
    /// API or data request.
    Api,
    /// Static asset.
    StaticAsset,
    /// Anything else; sent as is.
    Passthrough,
}

#[derive(Debug)]
struct Versions {
    active: String,
    waiting: Option<String>,
}

/// Routes requests between the network, the response cache and the store.
#[derive(Debug)]
pub struct Interceptor {
    engine: Arc<SyncEngine>,
    config: InterceptConfig,
    static_assets: Regex,
    versions: RwLock<Versions>,
}

fn cache_name(version: &str) -> String {
    format!("fieldsync-{version}")
}

fn cache_key(method: Method, path: &str) -> String {
    blake3::hash(format!("{method} {path}").as_bytes())
        .to_hex()
        .to_string()
}

impl Interceptor {
    /// Create an interceptor for the configured cache version.
    ///
    /// The first version ever seen becomes active at once; a different one
    /// waits for [`Interceptor::skip_waiting`].
    ///
    /// # Errors
    ///
    /// Returns an error if the static asset pattern is not a valid regex.
    pub fn new(engine: Arc<SyncEngine>, config: InterceptConfig) -> Result<Self> {
        let static_assets = Regex::new(&config.static_asset_pattern).map_err(|e| {
            Error::ConfigValidation {
                message: format!("invalid static asset pattern: {e}"),
            }
        })?;

        let stored = engine
            .store()
            .ok()
            .and_then(|store| store.get_meta(ACTIVE_VERSION_KEY).ok().flatten());

        let versions = match stored {
            Some(active) if active != config.cache_version => {
                info!(%active, waiting = %config.cache_version, "New cache version waiting");
                Versions {
                    active,
                    waiting: Some(config.cache_version.clone()),
                }
            }
            Some(active) => Versions {
                active,
                waiting: None,
            },
            None => {
                if let Ok(store) = engine.store() {
                    if let Err(e) = store.set_meta(ACTIVE_VERSION_KEY, &config.cache_version) {
                        warn!("Cannot record cache version: {e}");
                    }
                }
                Versions {
                    active: config.cache_version.clone(),
                    waiting: None,
                }
            }
        };

        Ok(Self {
            engine,
            config,
            static_assets,
            versions: RwLock::new(versions),
        })
    }

    /// The cache version answering requests.
    #[must_use]
    pub fn active_version(&self) -> String {
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .clone()
    }

    /// The installed version waiting to activate.
    #[must_use]
    pub fn waiting_version(&self) -> Option<String> {
        self.versions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .waiting
            .clone()
    }

    /// Pre-cache the offline page into the newest installed version.
    ///
    /// Returns `true` if the page was fetched and cached.
    pub async fn install(&self) -> bool {
        let version = self
            .waiting_version()
            .unwrap_or_else(|| self.active_version());
        let request = HttpRequest::get(self.config.offline_page_path.clone());

        match self.fetch(&request).await {
            Ok(response) if response.is_success() => {
                self.cache_put(&version, &request, &response);
                info!(%version, "Offline page cached");
                true
            }
            Ok(response) => {
                warn!(status = response.status, "Offline page not cached");
                false
            }
            Err(e) => {
                warn!("Offline page not cached: {e}");
                false
            }
        }
    }

    /// Activate the waiting cache version and drop every other version.
    ///
    /// Returns the newly active version, or `None` if nothing was waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot record the switch.
    pub fn skip_waiting(&self) -> Result<Option<String>> {
        let mut versions = self
            .versions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(waiting) = versions.waiting.take() else {
            return Ok(None);
        };

        if let Ok(store) = self.engine.store() {
            store.set_meta(ACTIVE_VERSION_KEY, &waiting)?;
            store.evict_caches_except(&cache_name(&waiting))?;
        }
        info!(version = %waiting, "Cache version activated");
        versions.active = waiting.clone();
        Ok(Some(waiting))
    }

    /// Decide how a request is routed.
    #[must_use]
    pub fn classify(&self, request: &HttpRequest) -> RequestClass {
        let route = request.route();
        if request.method == Method::Post && route == self.config.attendance_write_path {
            RequestClass::AttendanceWrite
        } else if request.mode == RequestMode::Navigate {
            RequestClass::Navigation
        } else if self
            .config
            .api_prefixes
            .iter()
            .any(|prefix| route.starts_with(prefix.as_str()))
        {
            RequestClass::Api
        } else if self.static_assets.is_match(route) {
            RequestClass::StaticAsset
        } else {
            RequestClass::Passthrough
        }
    }

    /// Serve a request.
    ///
    /// Never fails: when neither the network nor the cache can answer, the
    /// caller gets a 503.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let class = self.classify(&request);
        debug!(?class, method = %request.method, path = %request.path, "Intercepted");

        match class {
            RequestClass::AttendanceWrite => self.attendance_write(&request).await,
            RequestClass::Navigation => self.navigation(&request).await,
            RequestClass::Api if request.method.is_read() => self.api_read(&request).await,
            RequestClass::Api | RequestClass::Passthrough => self
                .fetch(&request)
                .await
                .unwrap_or_else(|e| Self::unavailable(&e)),
            RequestClass::StaticAsset => self.static_asset(&request).await,
        }
    }

    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut request = request.clone();
        self.engine.remote().authorize(&mut request);
        self.engine.remote().transport().fetch(&request).await
    }

    fn unavailable(error: &Error) -> HttpResponse {
        HttpResponse::json(
            503,
            &json!({ "success": false, "offline": true, "error": error.to_string() }),
        )
    }

    async fn attendance_write(&self, request: &HttpRequest) -> HttpResponse {
        let fallback = match self.fetch(request).await {
            Ok(response) if response.is_success() => return response,
            Ok(response) => {
                info!(status = response.status, "Attendance write refused, storing offline");
                response
            }
            Err(e) => {
                info!("Attendance write failed, storing offline: {e}");
                Self::unavailable(&e)
            }
        };

        let payload = match request
            .body
            .as_deref()
            .map(serde_json::from_str::<AttendancePayload>)
        {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => {
                warn!("Attendance body not storable: {e}");
                return fallback;
            }
            None => return fallback,
        };

        match self.engine.store_offline(&Capture::attendance(payload)) {
            Ok(id) => HttpResponse::json(200, &json!({ "success": true, "offline": true, "id": id })),
            Err(e) => {
                warn!("Attendance could not be stored offline: {e}");
                Self::unavailable(&e)
            }
        }
    }

    async fn navigation(&self, request: &HttpRequest) -> HttpResponse {
        match self.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Navigation failed, serving offline page: {e}");
                let offline_page = HttpRequest::get(self.config.offline_page_path.clone());
                self.cache_get(&offline_page)
                    .unwrap_or_else(|| HttpResponse::text(503, "You are offline."))
            }
        }
    }

    async fn api_read(&self, request: &HttpRequest) -> HttpResponse {
        if !self.engine.monitor().is_online() {
            if let Some(cached) = self.cache_get(request) {
                return cached;
            }
        }

        match self.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.cache_put(&self.active_version(), request, &response);
                    self.cache_entities(request, &response);
                }
                response
            }
            Err(e) => self
                .cache_get(request)
                .unwrap_or_else(|| Self::unavailable(&e)),
        }
    }

    async fn static_asset(&self, request: &HttpRequest) -> HttpResponse {
        if let Some(cached) = self.cache_get(request) {
            return cached;
        }
        match self.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.cache_put(&self.active_version(), request, &response);
                }
                response
            }
            Err(e) => Self::unavailable(&e),
        }
    }

    fn store(&self) -> Option<&Arc<Store>> {
        self.engine.store().ok()
    }

    fn cache_get(&self, request: &HttpRequest) -> Option<HttpResponse> {
        let store = self.store()?;
        let name = cache_name(&self.active_version());
        match store.cached_response(&name, &cache_key(request.method, &request.path)) {
            Ok(hit) => hit.map(|cached| HttpResponse {
                status: cached.status,
                content_type: cached.content_type,
                body: cached.body,
            }),
            Err(e) => {
                warn!("Cache read failed: {e}");
                None
            }
        }
    }

    fn cache_put(&self, version: &str, request: &HttpRequest, response: &HttpResponse) {
        let Some(store) = self.store() else {
            return;
        };
        let cached = CachedResponse {
            path: request.path.clone(),
            status: response.status,
            content_type: response.content_type.clone(),
            body: response.body.clone(),
            cached_at: Utc::now(),
        };
        if let Err(e) = store.cache_response(
            &cache_name(version),
            &cache_key(request.method, &request.path),
            &cached,
        ) {
            warn!("Cache write failed: {e}");
        }
    }

    /// Keep snapshots of any entities in a successful API response.
    fn cache_entities(&self, request: &HttpRequest, response: &HttpResponse) {
        let (Some(kind), Some(store)) = (EntityKind::from_path(request.route()), self.store())
        else {
            return;
        };
        if !response.is_json() {
            return;
        }
        let Ok(body) = response.body_json::<Value>() else {
            return;
        };

        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("results") {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(map)],
            },
            _ => return,
        };

        let mut cached = 0;
        for entity in items
            .into_iter()
            .filter_map(|item| CachedEntity::from_json(kind, item))
        {
            match store.put_entity(&entity) {
                Ok(()) => cached += 1,
                Err(e) => warn!(%kind, "Entity cache write failed: {e}"),
            }
        }
        if cached > 0 {
            debug!(%kind, cached, "Cached entities");
        }
    }
}
