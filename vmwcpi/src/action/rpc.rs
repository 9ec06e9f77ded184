//! The JSON request and response exchanged with the director

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

pub const CPI_ERROR: &str = "Bosh::Clouds::CpiError";
pub const NOT_IMPLEMENTED: &str = "Bosh::Clouds::NotImplemented";
pub const VM_NOT_FOUND: &str = "Bosh::Clouds::VMNotFound";
pub const DISK_NOT_FOUND: &str = "Bosh::Clouds::DiskNotFound";
pub const CLOUD_ERROR: &str = "Bosh::Clouds::CloudError";

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub api_version: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResponseError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub ok_to_retry: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Response {
    pub result: Value,
    pub error: Option<ResponseError>,
    pub log: String,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            error: None,
            log: String::new(),
        }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: Some(ResponseError {
                kind: kind.to_string(),
                message: message.into(),
                ok_to_retry: false,
            }),
            log: String::new(),
        }
    }

    /// Respond to a failed call with the director's error type for `err`
    pub fn from_error(err: &Error) -> Self {
        let kind = match err.root() {
            Error::VmNotFound(_) => VM_NOT_FOUND,
            Error::DiskNotFound(_) => DISK_NOT_FOUND,
            Error::InvalidArgument(_) | Error::Validation { .. } => CPI_ERROR,
            _ => CLOUD_ERROR,
        };
        Self::error(kind, err.to_string())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::{ValidationErrors, WithContext};

    #[test]
    fn test_request_defaults() {
        let request: Request = serde_json::from_value(json!({
            "method": "has_vm",
            "arguments": ["5b7c"],
            "context": {"director_uuid": "d"}
        }))
        .unwrap();
        assert_eq!(request.method, "has_vm");
        assert_eq!(request.api_version, None);

        let bare: Request = serde_json::from_value(json!({"method": "info"})).unwrap();
        assert!(bare.arguments.is_empty());
    }

    #[test]
    fn test_error_types() {
        let wrapped: crate::error::Result<()> = Err(Error::VmNotFound("vm-1".to_string()));
        let wrapped = wrapped.context("attaching disk-1").unwrap_err();
        let response = Response::from_error(&wrapped);
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.kind, VM_NOT_FOUND);
        assert_eq!(error.message, "attaching disk-1: vm not found: vm-1");
        assert!(!error.ok_to_retry);

        let kind = |err: Error| Response::from_error(&err).error.unwrap().kind;
        assert_eq!(kind(Error::DiskNotFound("disk-1".to_string())), DISK_NOT_FOUND);
        assert_eq!(kind(Error::InvalidArgument("x".to_string())), CPI_ERROR);
        assert_eq!(
            kind(Error::Validation {
                what: "vm cloud properties".to_string(),
                errors: ValidationErrors::default()
            }),
            CPI_ERROR
        );
        assert_eq!(kind(Error::Timeout("x".to_string())), CLOUD_ERROR);
    }

    #[test]
    fn test_response_json() {
        let json = serde_json::to_value(Response::ok(json!("5b7c"))).unwrap();
        assert_eq!(json, json!({"result": "5b7c", "error": null, "log": ""}));

        let json = serde_json::to_value(Response::error(NOT_IMPLEMENTED, "nope")).unwrap();
        assert_eq!(
            json,
            json!({"result": null, "error": {"type": NOT_IMPLEMENTED, "message": "nope", "ok_to_retry": false}, "log": ""})
        );
    }
}
