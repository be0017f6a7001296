//! Model record returned by the hub, and the URLs a session talks to.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

use crate::config::HubEndpointConfig;
use crate::error::{HubError, Result};

/// Dataset attached to a model; present once the hub finished processing it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    #[serde(default)]
    pub name: Option<String>,
    /// Download location of the packed dataset
    #[serde(default)]
    pub url: Option<String>,
    /// Packed dataset size in bytes
    #[serde(default, alias = "sizeBytes", deserialize_with = "size_bytes")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn bytes_from_f64(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value < u64::MAX as f64).then(|| value.ceil() as u64)
}

fn bytes_from_number(n: &Number) -> Option<u64> {
    n.as_u64().or_else(|| n.as_f64().and_then(bytes_from_f64))
}

/// Dataset size as an integer, a float or a numeric string.
fn size_bytes<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => bytes_from_number(&n)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid dataset size: {n}"))),
        Some(Value::String(raw)) => {
            let raw = raw.trim();
            raw.parse::<u64>()
                .ok()
                .or_else(|| raw.parse::<f64>().ok().and_then(bytes_from_f64))
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid dataset size: {raw:?}")))
        }
        Some(other) => Err(D::Error::custom(format!("invalid dataset size: {other}"))),
    }
}

/// Model metadata fetched once at session start
#[derive(Debug, Clone, PartialEq)]
pub struct HubModel {
    /// Canonical id as reported by the hub
    pub id: String,
    pub dataset: DatasetInfo,
    /// Full `data` object, for fields this crate does not model
    pub raw: Value,
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(_) => false,
    }
}

impl HubModel {
    /// Parse a `GET /v1/models/{id}` body: `{ data: { id, data: {...} } }`.
    ///
    /// A missing record is `ModelNotFound`; a record whose dataset is missing or
    /// empty is `DatasetNotReady`; a dataset that does not parse is `Json`.
    pub fn from_response(requested_id: &str, body: &Value) -> Result<Self> {
        let record = match body.get("data") {
            Some(record) if !is_blank(record) => record,
            _ => {
                return Err(HubError::ModelNotFound {
                    model_id: requested_id.to_string(),
                })
            }
        };

        let id = record
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .unwrap_or(requested_id)
            .to_string();

        let dataset = match record.get("data") {
            Some(dataset) if !is_blank(dataset) => {
                serde_json::from_value::<DatasetInfo>(dataset.clone())?
            }
            _ => return Err(HubError::DatasetNotReady { model_id: id }),
        };

        Ok(Self {
            id,
            dataset,
            raw: record.clone(),
        })
    }
}

/// URL layout of the hub API for one model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEndpoints {
    api_root: String,
    web_root: String,
    model_id: String,
}

impl HubEndpoints {
    pub fn new(config: &HubEndpointConfig, model_id: &str) -> Self {
        Self {
            api_root: config.api_root().to_string(),
            web_root: config.web_root.trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
        }
    }

    /// Same layout, pointed at another model id
    pub fn for_model(&self, model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            ..self.clone()
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// `GET` model record, `POST` metrics
    pub fn model(&self) -> String {
        format!("{}/v1/models/{}", self.api_root, self.model_id)
    }

    /// `POST` multipart checkpoint
    pub fn upload(&self) -> String {
        format!("{}/v1/models/{}/upload", self.api_root, self.model_id)
    }

    /// `POST` liveness announcement
    pub fn heartbeat(&self) -> String {
        format!(
            "{}/v1/agent/heartbeat/models/{}",
            self.api_root, self.model_id
        )
    }

    /// Human-facing page for the model
    pub fn web_page(&self) -> String {
        format!("{}/models/{}", self.web_root, self.model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ready_model() {
        let body = json!({
            "data": {
                "id": "canonical-id",
                "name": "yolo-run",
                "data": { "name": "coco128", "url": "https://data/coco128.zip", "size": 7_000_000, "format": "yolo" }
            }
        });
        let model = HubModel::from_response("requested", &body).unwrap();
        assert_eq!(model.id, "canonical-id");
        assert_eq!(model.dataset.name.as_deref(), Some("coco128"));
        assert_eq!(model.dataset.size, Some(7_000_000));
        assert_eq!(model.dataset.extra.get("format"), Some(&json!("yolo")));
        assert_eq!(model.raw["name"], json!("yolo-run"));
    }

    #[test]
    fn test_missing_dataset_is_not_ready() {
        for body in [
            json!({ "data": { "id": "m1" } }),
            json!({ "data": { "id": "m1", "data": null } }),
            json!({ "data": { "id": "m1", "data": {} } }),
        ] {
            match HubModel::from_response("m1", &body) {
                Err(HubError::DatasetNotReady { model_id }) => assert_eq!(model_id, "m1"),
                other => panic!("unexpected result for {body}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_record_is_not_found() {
        for body in [json!({}), json!({ "data": null }), json!({ "data": {} })] {
            assert!(matches!(
                HubModel::from_response("m1", &body),
                Err(HubError::ModelNotFound { .. })
            ));
        }
    }

    #[test]
    fn test_id_falls_back_to_requested() {
        let body = json!({ "data": { "data": { "url": "https://x/y.zip" } } });
        let model = HubModel::from_response("m7", &body).unwrap();
        assert_eq!(model.id, "m7");
        assert_eq!(model.dataset.size, None);
    }

    #[test]
    fn test_size_accepts_floats_and_strings() {
        for size in [json!(6_984_509.0), json!("6984509"), json!(" 6984509 "), json!("6984508.2")] {
            let body = json!({
                "data": { "id": "m1", "data": { "name": "coco128", "url": "https://d/x.zip", "size": size } }
            });
            let model = HubModel::from_response("m1", &body).unwrap();
            assert_eq!(model.dataset.size, Some(6_984_509), "size {size}");
            assert_eq!(model.dataset.name.as_deref(), Some("coco128"));
            assert_eq!(model.dataset.url.as_deref(), Some("https://d/x.zip"));
        }

        let body = json!({ "data": { "id": "m1", "data": { "name": "coco128", "sizeBytes": null } } });
        let model = HubModel::from_response("m1", &body).unwrap();
        assert_eq!(model.dataset.size, None);
    }

    #[test]
    fn test_malformed_dataset_is_an_error() {
        for dataset in [
            json!({ "name": "coco128", "size": -1 }),
            json!({ "name": "coco128", "size": "large" }),
            json!({ "name": "coco128", "size": [1, 2] }),
            json!({ "name": 12, "size": 10 }),
        ] {
            let body = json!({ "data": { "id": "m1", "data": dataset } });
            assert!(
                matches!(HubModel::from_response("m1", &body), Err(HubError::Json(_))),
                "dataset {dataset} should not parse"
            );
        }
    }

    #[test]
    fn test_endpoint_layout() {
        let config = HubEndpointConfig {
            api_root: "https://api.example.com/".to_string(),
            web_root: "https://hub.example.com".to_string(),
            agent_name: None,
        };
        let endpoints = HubEndpoints::new(&config, "abc");
        assert_eq!(endpoints.model(), "https://api.example.com/v1/models/abc");
        assert_eq!(endpoints.upload(), "https://api.example.com/v1/models/abc/upload");
        assert_eq!(
            endpoints.heartbeat(),
            "https://api.example.com/v1/agent/heartbeat/models/abc"
        );
        assert_eq!(endpoints.web_page(), "https://hub.example.com/models/abc");
        assert_eq!(endpoints.for_model("xyz").model(), "https://api.example.com/v1/models/xyz");
    }
}
