use serde_json;
use crate::encoding::{DataCodec, EncodingError};

/// JSON string encoding/decoding implementation
/// This codec encodes raw bytes as JSON-escaped strings
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec instance
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl DataCodec for JsonCodec {
    fn encode(&self, data: &[u8]) -> Result<String, EncodingError> {
        // Convert bytes to string (lossy conversion for non-UTF8 data)
        let string_data = String::from_utf8_lossy(data);
        
        // Use serde_json to properly escape the string
        serde_json::to_string(&string_data.as_ref())
            .map_err(|e| EncodingError::EncodingFailed(format!("JSON encode error: {}", e)))
    }

    fn decode(&self, encoded: &str) -> Result<Vec<u8>, EncodingError> {
        let trimmed = encoded.trim();
        
        // Parse the JSON string
        let decoded_string: String = serde_json::from_str(trimmed)
            .map_err(|e| EncodingError::DecodingFailed(format!("JSON decode error: {}", e)))?;
        
        // Convert back to bytes
        Ok(decoded_string.into_bytes())
    }

    fn can_decode(&self, data: &str) -> bool {
        let trimmed = data.trim();
        
        // Empty string is not valid JSON
        if trimmed.is_empty() {
            return false;
        }
        
        // Must start and end with quotes for JSON string
        if !trimmed.starts_with('"') || !trimmed.ends_with('"') {
            return false;
        }
        
        // Must have at least 2 characters (opening and closing quotes)
        if trimmed.len() < 2 {
            return false;
        }
        
        // Try to parse as JSON string
        serde_json::from_str::<String>(trimmed).is_ok()
    }

    fn format_name(&self) -> &'static str {
        "json"
    }
}
