//! AMF0 value model and codec for the RTMP command plane

pub mod amf0;
pub mod value;

pub use value::AmfValue;
