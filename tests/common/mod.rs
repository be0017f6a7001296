//! In-memory hub for integration tests: routes requests by method and URL,
//! records every request, and answers from per-route scripts.

#![allow(dead_code)]

use async_trait::async_trait;
use hubsync::config::HubConfig;
use hubsync::transport::{HubRequest, HubResponse, HubTransport, RequestBody, TransportError};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const MODEL_ID: &str = "m1";
pub const API_ROOT: &str = "http://hub.test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    FetchModel,
    Metrics,
    Upload,
    Heartbeat,
    DatasetProbe,
}

pub fn route_of(req: &HubRequest) -> Route {
    if req.method == Method::HEAD {
        Route::DatasetProbe
    } else if req.url.contains("/v1/agent/heartbeat/") {
        Route::Heartbeat
    } else if req.url.ends_with("/upload") {
        Route::Upload
    } else if req.method == Method::GET {
        Route::FetchModel
    } else {
        Route::Metrics
    }
}

type Responder = Box<dyn FnMut(&HubRequest) -> Result<HubResponse, TransportError> + Send>;

pub struct ScriptedTransport {
    responders: Mutex<HashMap<Route, Responder>>,
    requests: Mutex<Vec<HubRequest>>,
}

pub fn ok_json(value: Value) -> Result<HubResponse, TransportError> {
    Ok(HubResponse::json_body(StatusCode::OK, &value))
}

pub fn status(code: u16) -> Result<HubResponse, TransportError> {
    Ok(HubResponse::new(
        StatusCode::from_u16(code).unwrap(),
        format!("status {code}"),
    ))
}

pub fn ready_model() -> Value {
    json!({
        "data": {
            "id": MODEL_ID,
            "name": "yolo-run",
            "data": { "name": "coco128", "size": 6_984_509 }
        }
    })
}

impl ScriptedTransport {
    /// A healthy hub serving a ready model
    pub fn new() -> Self {
        let transport = Self {
            responders: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        };
        transport
            .on(Route::FetchModel, |_| ok_json(ready_model()))
            .on(Route::Metrics, |_| ok_json(json!({ "success": true })))
            .on(Route::Upload, |_| ok_json(json!({ "success": true })))
            .on(Route::Heartbeat, |_| {
                ok_json(json!({ "data": { "agentId": "agent-1" } }))
            })
            .on(Route::DatasetProbe, |_| status(200))
    }

    /// Replace the script for `route`
    pub fn on<F>(self, route: Route, responder: F) -> Self
    where
        F: FnMut(&HubRequest) -> Result<HubResponse, TransportError> + Send + 'static,
    {
        self.responders
            .lock()
            .unwrap()
            .insert(route, Box::new(responder));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn requests(&self) -> Vec<HubRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, route: Route) -> Vec<HubRequest> {
        self.requests()
            .into_iter()
            .filter(|req| route_of(req) == route)
            .collect()
    }

    pub fn count(&self, route: Route) -> usize {
        self.requests_to(route).len()
    }
}

#[async_trait]
impl HubTransport for ScriptedTransport {
    async fn send(&self, request: HubRequest) -> Result<HubResponse, TransportError> {
        let route = route_of(&request);
        self.requests.lock().unwrap().push(request.clone());

        let mut responders = self.responders.lock().unwrap();
        match responders.get_mut(&route) {
            Some(responder) => responder(&request),
            None => status(404),
        }
    }
}

/// Config pointed at the scripted hub with millisecond backoffs
pub fn test_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.hub.api_root = API_ROOT.to_string();
    let t = &mut config.transport;
    for profile in [
        &mut t.fetch_model,
        &mut t.metrics,
        &mut t.epoch_checkpoint,
        &mut t.final_checkpoint,
        &mut t.dataset_probe,
    ] {
        profile.backoff_base_ms = 10;
        profile.backoff_max_ms = 40;
    }
    config
}

pub fn json_body(req: &HubRequest) -> Value {
    match &req.body {
        RequestBody::Json(value) => value.clone(),
        other => panic!("expected a JSON body, got {other:?}"),
    }
}

/// Multipart text fields and file part name of an upload request
pub fn multipart(req: &HubRequest) -> (HashMap<String, String>, String, usize) {
    match &req.body {
        RequestBody::Multipart { fields, file } => (
            fields.iter().cloned().collect(),
            file.name.clone(),
            file.bytes.len(),
        ),
        other => panic!("expected a multipart body, got {other:?}"),
    }
}
