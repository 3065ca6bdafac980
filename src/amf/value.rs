//! AMF value representation
//!
//! The RTMP command plane (connect, publish, play, onStatus) is encoded as
//! AMF0 values. This enum covers the types those commands actually use.

use std::collections::HashMap;

/// An AMF0 value
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// Null (marker 0x05)
    Null,

    /// Undefined (marker 0x06)
    Undefined,

    /// Boolean (marker 0x01)
    Boolean(bool),

    /// IEEE 754 double (marker 0x00)
    Number(f64),

    /// UTF-8 string (marker 0x02, or long string 0x0C)
    String(String),

    /// Key-value object (marker 0x03)
    Object(HashMap<String, AmfValue>),

    /// ECMA array: an object with a length prefix (marker 0x08)
    EcmaArray(HashMap<String, AmfValue>),

    /// Dense array (marker 0x0A)
    StrictArray(Vec<AmfValue>),

    /// Milliseconds since Unix epoch, time zone ignored (marker 0x0B)
    Date(f64),
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, AmfValue>> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            _ => None,
        }
    }

    /// Get a property from an object value
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    /// Get a string property from an object value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get a number property from an object value
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(AmfValue::from("live").as_str(), Some("live"));
        assert_eq!(AmfValue::from(1.5).as_number(), Some(1.5));
        assert_eq!(AmfValue::from(true).as_bool(), Some(true));
        assert_eq!(AmfValue::Null.as_str(), None);
    }

    #[test]
    fn test_object_lookup() {
        let mut map = HashMap::new();
        map.insert("app".to_string(), AmfValue::from("live"));
        map.insert("objectEncoding".to_string(), AmfValue::from(0.0));
        let obj = AmfValue::Object(map);

        assert_eq!(obj.get_str("app"), Some("live"));
        assert_eq!(obj.get_number("objectEncoding"), Some(0.0));
        assert!(obj.get("missing").is_none());
    }

    #[test]
    fn test_ecma_array_reads_as_object() {
        let mut map = HashMap::new();
        map.insert("width".to_string(), AmfValue::from(1280.0));
        let arr = AmfValue::EcmaArray(map);
        assert_eq!(arr.get_number("width"), Some(1280.0));
    }
}
