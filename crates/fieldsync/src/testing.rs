//! In-process test doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::remote::{HttpRequest, HttpResponse, Transport};

/// Scriptable remote.
///
/// Records every request it receives. While offline every fetch fails with
/// a network error, as a real transport would.
#[derive(Debug, Default)]
pub struct MockTransport {
    online: AtomicBool,
    requests: Mutex<Vec<HttpRequest>>,
    rejections: Mutex<HashMap<String, u16>>,
    conflicts: Mutex<Vec<Value>>,
    canned: Mutex<HashMap<String, HttpResponse>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn online() -> Self {
        let transport = Self::default();
        transport.set_online(true);
        transport
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Answer submissions of this record with `status`.
    pub fn reject(&self, offline_id: Uuid, status: u16) {
        self.rejections
            .lock()
            .unwrap()
            .insert(offline_id.to_string(), status);
    }

    pub fn accept(&self, offline_id: Uuid) {
        self.rejections
            .lock()
            .unwrap()
            .remove(&offline_id.to_string());
    }

    /// Report a conflict in every bulk response.
    pub fn add_conflict(&self, conflict: Value) {
        self.conflicts.lock().unwrap().push(conflict);
    }

    /// Serve a fixed response for `METHOD path`.
    pub fn respond(&self, method: &str, path: &str, response: HttpResponse) {
        self.canned
            .lock()
            .unwrap()
            .insert(format!("{method} {path}"), response);
    }

    /// Hold every response back for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose JSON body mentions this offline id.
    pub fn deliveries(&self, offline_id: Uuid) -> usize {
        let needle = offline_id.to_string();
        self.requests()
            .iter()
            .filter(|r| r.body.as_deref().is_some_and(|b| b.contains(&needle)))
            .count()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn rejection_for(&self, body: &Value) -> Option<u16> {
        let offline_id = body.get("offlineId")?.as_str()?;
        self.rejections.lock().unwrap().get(offline_id).copied()
    }

    fn bulk_response(&self, body: &Value) -> HttpResponse {
        let results: Vec<Value> = body["results"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|item| {
                let offline_id = item["offlineId"].clone();
                match self.rejection_for(item) {
                    Some(status) => json!({
                        "offlineId": offline_id,
                        "success": false,
                        "error": format!("rejected with {status}"),
                    }),
                    None => json!({
                        "offlineId": offline_id,
                        "success": true,
                        "resultId": item["id"],
                    }),
                }
            })
            .collect();
        let conflicts = self.conflicts.lock().unwrap().clone();
        HttpResponse::json(
            200,
            &json!({ "success": true, "results": results, "conflicts": conflicts }),
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::network("connection refused"));
        }

        let key = format!("{} {}", request.method, request.path);
        if let Some(response) = self.canned.lock().unwrap().get(&key) {
            return Ok(response.clone());
        }

        if request.method.is_read() {
            return Ok(HttpResponse::text(404, "not found"));
        }

        let body: Value = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_str(b).ok())
            .unwrap_or(Value::Null);

        if request.path == "/assessments/bulk-sync" {
            return Ok(self.bulk_response(&body));
        }

        if let Some(status) = self.rejection_for(&body) {
            return Ok(HttpResponse::json(
                status,
                &json!({ "success": false, "error": "rejected" }),
            ));
        }

        let id = self.request_count();
        Ok(HttpResponse::json(200, &json!({ "success": true, "id": id })))
    }
}
