//! Line protocol spoken between clients and the sequence service.
//!
//! Each exchange is one line in each direction:
//!
//! ```text
//! -> {"AppName": "app1", "IdQueue": "b1", "Step": 10}
//! <- 1
//! -> {"AppName": "app1", "IdQueue": "b1", "Step": 10}
//! <- nil
//! ```
//!
//! A reply is either the decimal ID or [`EXHAUSTED_REPLY`] when the bucket's
//! buffer was empty at that instant. Clients treat `nil` as "retry shortly".
//! There is no error reply: a request the server cannot serve closes the
//! connection.

use crate::{BucketKey, Error, Result, types::Allocation};
use serde::{Deserialize, Serialize};

/// Reply line sent when the bucket had nothing buffered.
pub const EXHAUSTED_REPLY: &str = "nil";

/// One decoded request line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    #[serde(rename = "AppName")]
    pub app_name: String,
    #[serde(rename = "IdQueue")]
    pub id_queue: String,
    /// Refill size requested by the client. `0` (or absent) means "use the
    /// server default".
    #[serde(rename = "Step", default)]
    pub step: u64,
}

impl AllocationRequest {
    pub fn new(app_name: impl Into<String>, id_queue: impl Into<String>, step: u64) -> Self {
        Self {
            app_name: app_name.into(),
            id_queue: id_queue.into(),
            step,
        }
    }

    /// Decodes a single line (without its terminator).
    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim_end_matches('\r'))
            .map_err(|e| Error::protocol(format!("invalid request: {e}")))
    }

    /// Encodes the request as a single line (without its terminator).
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::protocol(e.to_string()))
    }

    pub fn bucket_key(&self) -> Result<BucketKey> {
        BucketKey::new(self.app_name.as_str(), self.id_queue.as_str())
    }

    /// Resolves the effective step against the server's default and ceiling.
    pub fn effective_step(&self, default_step: u64, max_step: u64) -> Result<u64> {
        match self.step {
            0 => Ok(default_step),
            step if step > max_step => Err(Error::protocol(format!(
                "Step {step} exceeds maximum allowed ({max_step})"
            ))),
            step => Ok(step),
        }
    }
}

/// Encodes an allocation as a reply line (without its terminator).
pub fn encode_reply(allocation: Allocation) -> String {
    match allocation {
        Allocation::Issued(id) => id.to_string(),
        Allocation::Exhausted => EXHAUSTED_REPLY.to_owned(),
    }
}

/// Decodes a reply line as sent by [`encode_reply`].
pub fn decode_reply(line: &str) -> Result<Allocation> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line == EXHAUSTED_REPLY {
        return Ok(Allocation::Exhausted);
    }
    line.parse::<u64>()
        .map(Allocation::Issued)
        .map_err(|e| Error::protocol(format!("invalid reply {line:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_field_names() {
        let req = AllocationRequest::decode(r#"{"AppName":"app1","IdQueue":"b1","Step":10}"#)
            .unwrap();
        assert_eq!(req, AllocationRequest::new("app1", "b1", 10));
        assert_eq!(req.bucket_key().unwrap().to_string(), "app1:b1");
    }

    #[test]
    fn tolerates_crlf_and_missing_step() {
        let req = AllocationRequest::decode("{\"AppName\":\"a\",\"IdQueue\":\"q\"}\r").unwrap();
        assert_eq!(req.step, 0);
        assert_eq!(req.effective_step(100, 1_000).unwrap(), 100);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(AllocationRequest::decode("not json").is_err());
        assert!(AllocationRequest::decode(r#"{"AppName":"a"}"#).is_err());
        assert!(
            AllocationRequest::decode(r#"{"AppName":"a","IdQueue":"q","Step":-1}"#).is_err()
        );
    }

    #[test]
    fn step_above_ceiling_is_rejected() {
        let req = AllocationRequest::new("a", "q", 5_000);
        assert!(matches!(
            req.effective_step(100, 1_000),
            Err(Error::Protocol { .. })
        ));
        assert_eq!(req.effective_step(100, 5_000).unwrap(), 5_000);
    }

    #[test]
    fn replies_keep_zero_and_exhaustion_apart() {
        assert_eq!(encode_reply(Allocation::Issued(0)), "0");
        assert_eq!(encode_reply(Allocation::Exhausted), "nil");
        assert_eq!(decode_reply("0\n").unwrap(), Allocation::Issued(0));
        assert_eq!(decode_reply("nil\n").unwrap(), Allocation::Exhausted);
        assert!(decode_reply("").is_err());
    }
}
