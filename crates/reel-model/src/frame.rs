//! JSON text frames exchanged with the job-assignment endpoint.
//!
//! Worker → endpoint:
//! - announce: `["<job_id>", ...]` (first frame after every connect)
//! - request:  `["request", {}]`
//! - success:  `["success", {"job_id": "<job_id>"}]`
//! - failure:  `["failure", {"job_id": "<job_id>", "reason": "..."}]`
//!
//! Endpoint → worker: a JSON object of a [`RequestRecording`].
use serde_json::{Value, json};

use crate::{JobId, ModelError, ModelResult, RequestRecording};

const TAG_REQUEST: &str = "request";
const TAG_SUCCESS: &str = "success";
const TAG_FAILURE: &str = "failure";

/// Frame sent by the worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    /// Jobs this worker is already executing.
    Announce(Vec<JobId>),
    /// Ask for one job.
    Request,
    Success { job_id: JobId },
    Failure { job_id: JobId, reason: String },
}

impl ClientFrame {
    /// Short name for logs.
    pub fn tag(&self) -> &'static str {
        match self {
            ClientFrame::Announce(_) => "announce",
            ClientFrame::Request => TAG_REQUEST,
            ClientFrame::Success { .. } => TAG_SUCCESS,
            ClientFrame::Failure { .. } => TAG_FAILURE,
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> String {
        let value = match self {
            ClientFrame::Announce(ids) => json!(ids),
            ClientFrame::Request => json!([TAG_REQUEST, {}]),
            ClientFrame::Success { job_id } => json!([TAG_SUCCESS, { "job_id": job_id }]),
            ClientFrame::Failure { job_id, reason } => {
                json!([TAG_FAILURE, { "job_id": job_id, "reason": reason }])
            }
        };
        value.to_string()
    }

    /// Decode a frame produced by [`ClientFrame::encode`].
    ///
    /// An array whose first element is a known tag is a tagged frame; any
    /// other array (including the empty one) is an announce.
    pub fn decode(text: &str) -> ModelResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(items) = value else {
            return Err(ModelError::MalformedFrame("expected a JSON array".into()));
        };

        let tag = items.first().and_then(Value::as_str);
        match tag {
            Some(TAG_REQUEST) => Ok(ClientFrame::Request),
            Some(TAG_SUCCESS) => {
                let job_id = body_job_id(&items)?;
                Ok(ClientFrame::Success { job_id })
            }
            Some(TAG_FAILURE) => {
                let job_id = body_job_id(&items)?;
                let reason = items
                    .get(1)
                    .and_then(|b| b.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(ClientFrame::Failure { job_id, reason })
            }
            _ => {
                let ids = items
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .ok_or_else(|| ModelError::MalformedFrame(v.to_string()))
                            .and_then(str::parse)
                    })
                    .collect::<ModelResult<Vec<JobId>>>()?;
                Ok(ClientFrame::Announce(ids))
            }
        }
    }
}

fn body_job_id(items: &[Value]) -> ModelResult<JobId> {
    items
        .get(1)
        .and_then(|b| b.get("job_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| ModelError::MalformedFrame("missing job_id".into()))?
        .parse()
}

/// Parse a job assignment frame.
pub fn decode_assignment(text: &str) -> ModelResult<RequestRecording> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> JobId {
        "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap()
    }

    #[test]
    fn request_encodes_as_tagged_array() {
        assert_eq!(ClientFrame::Request.encode(), r#"["request",{}]"#);
    }

    #[test]
    fn failure_carries_reason() {
        let frame = ClientFrame::Failure {
            job_id: id(),
            reason: "Recorder failed.".into(),
        };
        let text = frame.encode();
        assert!(text.starts_with(r#"["failure","#));
        assert_eq!(ClientFrame::decode(&text).unwrap(), frame);
    }

    #[test]
    fn announce_is_a_bare_id_list() {
        let frame = ClientFrame::Announce(vec![id()]);
        assert_eq!(
            frame.encode(),
            r#"["67e55044-10b1-426f-9247-bb680e5fe0c8"]"#
        );
        assert_eq!(
            ClientFrame::decode("[]").unwrap(),
            ClientFrame::Announce(Vec::new())
        );
    }

    #[test]
    fn decode_rejects_objects() {
        assert!(matches!(
            ClientFrame::decode(r#"{"job_id": 1}"#),
            Err(ModelError::MalformedFrame(_))
        ));
    }

    #[test]
    fn assignment_errors_on_missing_fields() {
        assert!(decode_assignment(r#"{"job_id": "67e55044-10b1-426f-9247-bb680e5fe0c8"}"#).is_err());
    }
}
