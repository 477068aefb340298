//! HTTP REST API Protocol
//!
//! OpenAI-style embeddings contract:
//! - Endpoint: POST /v1/embeddings
//! - Request body: {"input": "..." | ["...", ...], "model": "..."}
//! - Response body: {"object": "list", "data": [{"object": "embedding", "index": 0, "embedding": [...]}], "model": "..."}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Embedding, EmbeddingError, EmbeddingResult};

/// HTTP Embedding Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// A string or a list of values; missing means an empty list
    #[serde(default = "default_input")]
    pub input: Value,

    /// Optional label echoed back in the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_input() -> Value {
    Value::Array(Vec::new())
}

impl EmbeddingRequest {
    pub fn new(input: impl Into<Value>) -> Self {
        Self {
            input: input.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Parse a raw request body
    pub fn from_slice(body: &[u8]) -> EmbeddingResult<Self> {
        serde_json::from_slice(body).map_err(|e| EmbeddingError::InvalidRequest {
            message: format!("invalid JSON body: {}", e),
        })
    }

    /// Coerce `input` into the ordered list of texts to embed.
    ///
    /// Strings are used as-is. Non-string list elements use their JSON text.
    pub fn texts(&self) -> EmbeddingResult<Vec<String>> {
        match &self.input {
            Value::String(text) => Ok(vec![text.clone()]),
            Value::Array(items) => Ok(items.iter().map(coerce_to_string).collect()),
            other => Err(EmbeddingError::InvalidInputType {
                found: json_type_name(other).to_string(),
            }),
        }
    }
}

/// String form of a list element. Booleans and null render as `True`,
/// `False` and `None`; other values as compact JSON.
fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One vector in the response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingData {
    pub object: String,
    pub index: usize,
    pub embedding: Embedding,
}

/// HTTP Embedding Response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingResponse {
    pub object: String,
    pub data: Vec<EmbeddingData>,
    pub model: String,
}

impl EmbeddingResponse {
    /// Shape vectors in input order, indices `0..n-1`
    pub fn new(vectors: Vec<Embedding>, model: impl Into<String>) -> Self {
        let data = vectors
            .into_iter()
            .enumerate()
            .map(|(index, embedding)| EmbeddingData {
                object: "embedding".to_string(),
                index,
                embedding,
            })
            .collect();

        Self {
            object: "list".to_string(),
            data,
            model: model.into(),
        }
    }
}

/// HTTP Error Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error message
    pub error: String,
}

impl HttpErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }

    pub fn not_found() -> Self {
        Self::new("not found")
    }
}

impl From<&EmbeddingError> for HttpErrorResponse {
    fn from(error: &EmbeddingError) -> Self {
        match error {
            EmbeddingError::InvalidInputType { .. } => Self::new("invalid input type"),
            other => Self::new(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_string_input() {
        let req = EmbeddingRequest::new("hello");
        assert_eq!(req.texts().unwrap(), vec!["hello".to_string()]);

        let req = EmbeddingRequest::new("");
        assert_eq!(req.texts().unwrap(), vec![String::new()]);
    }

    #[test]
    fn test_list_elements_are_coerced() {
        let req = EmbeddingRequest::new(json!(["a", 42, true, false, null, 1.5]));
        assert_eq!(
            req.texts().unwrap(),
            vec!["a", "42", "True", "False", "None", "1.5"]
        );
    }

    #[test]
    fn test_invalid_input_types() {
        for input in [json!(42), json!(true), json!(null), json!({"text": "a"})] {
            let req = EmbeddingRequest::new(input);
            assert!(matches!(req.texts(), Err(EmbeddingError::InvalidInputType { .. })));
        }
    }

    #[test]
    fn test_missing_input_is_empty_list() {
        let req = EmbeddingRequest::from_slice(br#"{"model": "m"}"#).unwrap();
        assert!(req.texts().unwrap().is_empty());
        assert_eq!(req.model.as_deref(), Some("m"));
    }

    #[test]
    fn test_malformed_body() {
        let err = EmbeddingRequest::from_slice(b"{not json").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_response_shape() {
        let response = EmbeddingResponse::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]], "bge");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["object"], "list");
        assert_eq!(value["model"], "bge");
        assert_eq!(value["data"][1]["object"], "embedding");
        assert_eq!(value["data"][1]["index"], 1);
        assert_eq!(value["data"][1]["embedding"], json!([0.0, 1.0]));
    }
}
