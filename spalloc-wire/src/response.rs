//! Outbound message shapes (spec §3, §6): exactly one of these is sent per
//! line. `Frame` wraps the four variants so the session task has a single
//! serialisable type to hand the codec.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ReturnResponse {
    #[serde(rename = "return")]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionResponse {
    pub exception: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobNotifyMessage {
    pub jobs_changed: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineNotifyMessage {
    pub machines_changed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Frame {
    Return(ReturnResponse),
    Exception(ExceptionResponse),
    JobNotify(JobNotifyMessage),
    MachineNotify(MachineNotifyMessage),
}

impl Frame {
    pub fn returning(value: Value) -> Self {
        Frame::Return(ReturnResponse { value })
    }

    pub fn exception(text: impl Into<String>) -> Self {
        Frame::Exception(ExceptionResponse {
            exception: text.into(),
        })
    }

    pub fn jobs_changed(ids: Vec<u64>) -> Self {
        Frame::JobNotify(JobNotifyMessage { jobs_changed: ids })
    }

    pub fn machines_changed(names: Vec<String>) -> Self {
        Frame::MachineNotify(MachineNotifyMessage {
            machines_changed: names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_response_uses_return_keyword() {
        let frame = Frame::returning(Value::from(42));
        let encoded = serde_json::to_string(&frame).unwrap();
        assert_eq!(encoded, r#"{"return":42}"#);
    }

    #[test]
    fn return_null_encodes_explicit_null() {
        let frame = Frame::returning(Value::Null);
        let encoded = serde_json::to_string(&frame).unwrap();
        assert_eq!(encoded, r#"{"return":null}"#);
    }

    #[test]
    fn exception_response_shape() {
        let frame = Frame::exception("no such job");
        let encoded = serde_json::to_string(&frame).unwrap();
        assert_eq!(encoded, r#"{"exception":"no such job"}"#);
    }

    #[test]
    fn jobs_changed_shape() {
        let frame = Frame::jobs_changed(vec![7, 9]);
        let encoded = serde_json::to_string(&frame).unwrap();
        assert_eq!(encoded, r#"{"jobs_changed":[7,9]}"#);
    }

    #[test]
    fn machines_changed_shape() {
        let frame = Frame::machines_changed(vec!["m1".to_string()]);
        let encoded = serde_json::to_string(&frame).unwrap();
        assert_eq!(encoded, r#"{"machines_changed":["m1"]}"#);
    }
}
