use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of a record. Names outside the well-known set are carried through
/// untouched, the sink decides what to do with them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum MetricType {
    #[default]
    Counter,
    Gauge,
    Histogram,
    Timer,
    Set,
    Status,
    Other(String),
}

impl MetricType {
    pub fn as_str(&self) -> &str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Timer => "timer",
            MetricType::Set => "set",
            MetricType::Status => "status",
            MetricType::Other(name) => name,
        }
    }
}

impl From<String> for MetricType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "counter" => MetricType::Counter,
            "gauge" => MetricType::Gauge,
            "histogram" => MetricType::Histogram,
            "timer" => MetricType::Timer,
            "set" => MetricType::Set,
            "status" => MetricType::Status,
            _ => MetricType::Other(name),
        }
    }
}

impl From<MetricType> for String {
    fn from(kind: MetricType) -> Self {
        match kind {
            MetricType::Other(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

/// Either a plain sample, or the base64 serialized state (digest, set...)
/// forwarded by another collector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Encoded(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(value) => Some(*value),
            MetricValue::Encoded(_) => None,
        }
    }

    pub fn decode_encoded(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        match self {
            MetricValue::Number(_) => None,
            MetricValue::Encoded(data) => {
                Some(base64::engine::general_purpose::STANDARD.decode(data))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetricRecord {
    pub name: String,
    #[serde(rename = "type", default)]
    pub metric_type: MetricType,
    // Go collectors send a nil slice as `null`
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tags: Vec<String>,
    #[serde(rename = "tagstring", default, skip_serializing_if = "Option::is_none")]
    pub joined_tags: Option<String>,
    pub value: MetricValue,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl MetricRecord {
    /// Explicit tags win over the pre-joined `tagstring`.
    pub fn tags(&self) -> Vec<&str> {
        if !self.tags.is_empty() {
            return self.tags.iter().map(String::as_str).collect();
        }
        match &self.joined_tags {
            Some(joined) => joined.split(',').filter(|t| !t.is_empty()).collect(),
            None => Vec::new(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.metric_type.as_str(), self.name)
    }
}

/// Records submitted in one request body, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct MetricBatch {
    records: Vec<MetricRecord>,
}

impl MetricBatch {
    pub fn new(records: Vec<MetricRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MetricRecord> {
        self.records
    }
}

impl IntoIterator for MetricBatch {
    type Item = MetricRecord;
    type IntoIter = std::vec::IntoIter<MetricRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
