use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    RemoteUrl(String),
    InlineBinary {
        data: Vec<u8>,
        mime_type: String,
        filename: String,
    },
}

/// One image attached to an entry. Remote URLs are identified by the URL
/// itself; inline payloads carry a content-digest id assigned when the
/// upload was admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: Option<String>,
    pub source: ImageSource,
    pub created_at_ms: Option<i64>,
}

impl ImageRecord {
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            id: None,
            source: ImageSource::RemoteUrl(url.into()),
            created_at_ms: Some(Utc::now().timestamp_millis()),
        }
    }

    pub fn inline(
        id: impl Into<String>,
        data: Vec<u8>,
        mime_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            source: ImageSource::InlineBinary {
                data,
                mime_type: mime_type.into(),
                filename: filename.into(),
            },
            created_at_ms: Some(Utc::now().timestamp_millis()),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.source {
            ImageSource::RemoteUrl(url) => Some(url.as_str()),
            ImageSource::InlineBinary { .. } => None,
        }
    }

    pub fn data_uri(&self) -> Option<String> {
        match &self.source {
            ImageSource::RemoteUrl(_) => None,
            ImageSource::InlineBinary {
                data, mime_type, ..
            } => Some(encode_data_uri(mime_type, data)),
        }
    }

    /// Wire shape: a bare string for remote URLs, an object
    /// `{id, data, filename, mimeType, timestampMs}` for inline payloads.
    pub fn to_value(&self) -> Value {
        match &self.source {
            ImageSource::RemoteUrl(url) => Value::String(url.clone()),
            ImageSource::InlineBinary {
                data,
                mime_type,
                filename,
            } => {
                let mut row = Map::new();
                if let Some(id) = &self.id {
                    row.insert("id".to_string(), Value::String(id.clone()));
                }
                row.insert(
                    "data".to_string(),
                    Value::String(encode_data_uri(mime_type, data)),
                );
                row.insert("filename".to_string(), Value::String(filename.clone()));
                row.insert("mimeType".to_string(), Value::String(mime_type.clone()));
                if let Some(ts) = self.created_at_ms {
                    row.insert("timestampMs".to_string(), Value::Number(ts.into()));
                }
                Value::Object(row)
            }
        }
    }

    /// Accepts every shape a previous draft of the extension may have
    /// written. Returns `None` for rows that cannot be understood; the
    /// store skips those instead of failing the whole load.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(url) if !url.trim().is_empty() => Some(Self {
                id: None,
                source: ImageSource::RemoteUrl(url.trim().to_string()),
                created_at_ms: None,
            }),
            Value::Object(row) => {
                if let Some(url) = row.get("url").and_then(Value::as_str) {
                    return Some(Self {
                        id: row.get("id").and_then(Value::as_str).map(str::to_string),
                        source: ImageSource::RemoteUrl(url.to_string()),
                        created_at_ms: row.get("timestampMs").and_then(Value::as_i64),
                    });
                }
                let data_uri = row.get("data").and_then(Value::as_str)?;
                let (uri_mime, data) = decode_data_uri(data_uri)?;
                let mime_type = row
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(uri_mime);
                let filename = row
                    .get("filename")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                Some(Self {
                    id: row.get("id").and_then(Value::as_str).map(str::to_string),
                    source: ImageSource::InlineBinary {
                        data,
                        mime_type,
                        filename,
                    },
                    created_at_ms: row.get("timestampMs").and_then(Value::as_i64),
                })
            }
            _ => None,
        }
    }
}

pub fn encode_data_uri(mime_type: &str, data: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(data))
}

pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (mime_type, encoded) = rest.split_once(";base64,")?;
    let data = BASE64.decode(encoded.trim()).ok()?;
    Some((mime_type.to_string(), data))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_data_uri, encode_data_uri, ImageRecord, ImageSource};

    #[test]
    fn remote_record_round_trips_as_bare_string() {
        let record = ImageRecord::remote("https://x/a.png");
        assert_eq!(record.to_value(), json!("https://x/a.png"));

        let parsed = ImageRecord::from_value(&json!("https://x/a.png")).expect("parse");
        assert_eq!(parsed.url(), Some("https://x/a.png"));
        assert_eq!(parsed.id, None);
    }

    #[test]
    fn inline_record_round_trips_through_wire_object() {
        let record = ImageRecord::inline("abc123", vec![1, 2, 3], "image/png", "map.png");
        let value = record.to_value();
        assert_eq!(value["id"], json!("abc123"));
        assert_eq!(value["mimeType"], json!("image/png"));
        assert_eq!(value["filename"], json!("map.png"));
        assert!(value["data"]
            .as_str()
            .expect("data uri")
            .starts_with("data:image/png;base64,"));

        let parsed = ImageRecord::from_value(&value).expect("parse");
        assert_eq!(parsed, record);
    }

    #[test]
    fn object_without_usable_payload_is_skipped() {
        assert!(ImageRecord::from_value(&json!({"filename": "x.png"})).is_none());
        assert!(ImageRecord::from_value(&json!("")).is_none());
        assert!(ImageRecord::from_value(&json!(42)).is_none());
    }

    #[test]
    fn data_uri_helpers_round_trip() {
        let uri = encode_data_uri("image/jpeg", &[0xff, 0xd8, 0xff]);
        let (mime, data) = decode_data_uri(&uri).expect("decode");
        assert_eq!(mime, "image/jpeg");
        assert_eq!(data, vec![0xff, 0xd8, 0xff]);
        assert!(decode_data_uri("https://not-a-data-uri").is_none());
    }

    #[test]
    fn inline_source_exposes_data_uri_but_no_url() {
        let record = ImageRecord::inline("id", vec![9], "image/gif", "a.gif");
        assert!(record.url().is_none());
        assert!(record.data_uri().is_some());
        match &record.source {
            ImageSource::InlineBinary { filename, .. } => assert_eq!(filename, "a.gif"),
            ImageSource::RemoteUrl(_) => panic!("expected inline source"),
        }
    }
}
