//! Typed request and reply messages.
//!
//! Every message is a MessagePack map with a string `type` discriminator.
//! Requests may carry a `rid`; when present the client expects exactly one
//! `ack` or one `proto_error` correlated by it.

use crate::error::ProtocolError;
use crate::types::{opt_bin, ListDiff, ObjectId, ObjectSnapshot, QueryId, RequestId, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every request kind the protocol defines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Create,
    Modify,
    Delete,
    List,
    Get,
    GetData,
    GetBin,
    MethodRun,
    Unsub,
    MethodDone,
    ProcDone,
    MethodRegister,
    ProcRegister,
}

impl RequestKind {
    pub const ALL: [RequestKind; 13] = [
        RequestKind::Create,
        RequestKind::Modify,
        RequestKind::Delete,
        RequestKind::List,
        RequestKind::Get,
        RequestKind::GetData,
        RequestKind::GetBin,
        RequestKind::MethodRun,
        RequestKind::Unsub,
        RequestKind::MethodDone,
        RequestKind::ProcDone,
        RequestKind::MethodRegister,
        RequestKind::ProcRegister,
    ];

    /// Wire tag of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Create => "create",
            RequestKind::Modify => "modify",
            RequestKind::Delete => "delete",
            RequestKind::List => "list",
            RequestKind::Get => "get",
            RequestKind::GetData => "get_data",
            RequestKind::GetBin => "get_bin",
            RequestKind::MethodRun => "mthd_run",
            RequestKind::Unsub => "unsub",
            RequestKind::MethodDone => "mthd_done",
            RequestKind::ProcDone => "proc_done",
            RequestKind::MethodRegister => "mthd_reg",
            RequestKind::ProcRegister => "proc_reg",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == tag)
    }
}

/// Fields common to every request.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    rid: Option<RequestId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub id: ObjectId,
    #[serde(default)]
    pub parent: Option<ObjectId>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attr: BTreeMap<String, Value>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    #[serde(default, with = "opt_bin")]
    pub bindata: Option<Vec<u8>>,
    #[serde(default)]
    pub pos_start: i64,
    #[serde(default)]
    pub pos_end: i64,
}

impl CreateRequest {
    pub fn into_snapshot(self) -> ObjectSnapshot {
        let mut object = ObjectSnapshot::new(self.id).with_pos(self.pos_start, self.pos_end);
        object.parent = self.parent;
        object.tags = self.tags.into_iter().collect();
        object.attr = self.attr;
        object.data = self.data;
        object.bindata = self.bindata;
        object
    }
}

/// Ids are kept untyped so a bad entry can be reported without dropping
/// the rest of the message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    pub qid: QueryId,
    #[serde(default)]
    pub parent: Option<ObjectId>,
    #[serde(default)]
    pub pos_start: Option<i64>,
    #[serde(default)]
    pub pos_end: Option<i64>,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub sub: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    pub qid: QueryId,
    pub id: ObjectId,
    #[serde(default)]
    pub sub: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetDataRequest {
    pub qid: QueryId,
    pub id: ObjectId,
    pub key: String,
    #[serde(default)]
    pub sub: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnsubRequest {
    pub qid: QueryId,
}

/// Kind-specific request payload.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Create(CreateRequest),
    Delete(DeleteRequest),
    List(ListRequest),
    Get(GetRequest),
    GetData(GetDataRequest),
    Unsub(UnsubRequest),
    /// A kind whose semantics are not defined yet. Its body is not decoded.
    Extension(RequestKind),
}

/// A decoded inbound request.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub rid: Option<RequestId>,
    pub body: RequestBody,
}

/// A frame that decoded as MessagePack but not as a valid request.
#[derive(Debug)]
pub struct Rejected {
    pub rid: Option<RequestId>,
    pub error: ProtocolError,
}

#[derive(Serialize)]
struct Outgoing<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rid: Option<RequestId>,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Serialize)]
struct NoBody {}

impl Request {
    pub fn new(body: RequestBody) -> Self {
        Self { rid: None, body }
    }

    pub fn with_rid(mut self, rid: u64) -> Self {
        self.rid = Some(RequestId(rid));
        self
    }

    pub fn kind(&self) -> RequestKind {
        match &self.body {
            RequestBody::Create(_) => RequestKind::Create,
            RequestBody::Delete(_) => RequestKind::Delete,
            RequestBody::List(_) => RequestKind::List,
            RequestBody::Get(_) => RequestKind::Get,
            RequestBody::GetData(_) => RequestKind::GetData,
            RequestBody::Unsub(_) => RequestKind::Unsub,
            RequestBody::Extension(kind) => *kind,
        }
    }

    /// Decode one complete frame.
    pub fn decode(frame: &[u8]) -> Result<Request, Rejected> {
        let envelope: Envelope = rmp_serde::from_slice(frame).map_err(|e| Rejected {
            rid: None,
            error: ProtocolError::Malformed {
                kind: "message".to_string(),
                reason: e.to_string(),
            },
        })?;
        let rid = envelope.rid;
        let reject = |error| Rejected { rid, error };

        let kind = RequestKind::from_tag(&envelope.kind)
            .ok_or_else(|| reject(ProtocolError::UnknownType(envelope.kind.clone())))?;

        let body = match kind {
            RequestKind::Create => RequestBody::Create(parse_body(kind, frame).map_err(reject)?),
            RequestKind::Delete => RequestBody::Delete(parse_body(kind, frame).map_err(reject)?),
            RequestKind::List => RequestBody::List(parse_body(kind, frame).map_err(reject)?),
            RequestKind::Get => RequestBody::Get(parse_body(kind, frame).map_err(reject)?),
            RequestKind::GetData => RequestBody::GetData(parse_body(kind, frame).map_err(reject)?),
            RequestKind::Unsub => RequestBody::Unsub(parse_body(kind, frame).map_err(reject)?),
            other => RequestBody::Extension(other),
        };

        Ok(Request { rid, body })
    }

    /// Encode as a client would send it.
    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        let kind = self.kind().as_str();
        let rid = self.rid;
        match &self.body {
            RequestBody::Create(body) => encode_outgoing(kind, rid, body),
            RequestBody::Delete(body) => encode_outgoing(kind, rid, body),
            RequestBody::List(body) => encode_outgoing(kind, rid, body),
            RequestBody::Get(body) => encode_outgoing(kind, rid, body),
            RequestBody::GetData(body) => encode_outgoing(kind, rid, body),
            RequestBody::Unsub(body) => encode_outgoing(kind, rid, body),
            RequestBody::Extension(_) => encode_outgoing(kind, rid, &NoBody {}),
        }
    }
}

fn parse_body<T: DeserializeOwned>(kind: RequestKind, frame: &[u8]) -> Result<T, ProtocolError> {
    rmp_serde::from_slice(frame).map_err(|e| ProtocolError::Malformed {
        kind: kind.as_str().to_string(),
        reason: e.to_string(),
    })
}

fn encode_outgoing<T: Serialize>(
    kind: &'static str,
    rid: Option<RequestId>,
    body: &T,
) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(&Outgoing { kind, rid, body })
}

/// Object fields as they appear in `get_reply` and `list_reply` entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectBody {
    pub parent: Option<ObjectId>,
    pub pos_start: i64,
    pub pos_end: i64,
    pub tags: Vec<String>,
    pub attr: BTreeMap<String, Value>,
    /// Keys of the object's data slots.
    pub data: Vec<String>,
    #[serde(default, with = "opt_bin")]
    pub bindata: Option<Vec<u8>>,
}

impl ObjectBody {
    pub fn from_snapshot(object: &ObjectSnapshot) -> Self {
        Self {
            parent: object.parent,
            pos_start: object.pos.start,
            pos_end: object.pos.end,
            tags: object.tags.iter().cloned().collect(),
            attr: object.attr.clone(),
            data: object.data_keys(),
            bindata: object.bindata.clone(),
        }
    }
}

/// One record in a `list_reply`: a full object or a tombstone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListEntry {
    pub id: ObjectId,
    pub gone: bool,
    #[serde(flatten)]
    pub object: Option<ObjectBody>,
}

impl ListEntry {
    pub fn object(object: &ObjectSnapshot) -> Self {
        Self {
            id: object.id,
            gone: false,
            object: Some(ObjectBody::from_snapshot(object)),
        }
    }

    pub fn tombstone(id: ObjectId) -> Self {
        Self {
            id,
            gone: true,
            object: None,
        }
    }
}

/// Messages sent from server to client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ack {
        rid: RequestId,
    },

    ProtoError {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rid: Option<RequestId>,
    },

    GetReply {
        qid: QueryId,
        id: ObjectId,
        #[serde(flatten)]
        object: ObjectBody,
    },

    GetDataReply {
        qid: QueryId,
        data: Value,
    },

    ListReply {
        qid: QueryId,
        objs: Vec<ListEntry>,
    },

    ObjGone {
        qid: QueryId,
    },

    SubGone {
        qid: QueryId,
    },
}

impl Reply {
    pub fn object(qid: QueryId, object: &ObjectSnapshot) -> Self {
        Reply::GetReply {
            qid,
            id: object.id,
            object: ObjectBody::from_snapshot(object),
        }
    }

    /// New objects first, then tombstones, so the client can apply the
    /// whole diff in one step.
    pub fn list(qid: QueryId, diff: &ListDiff) -> Self {
        let objs = diff
            .new
            .iter()
            .map(ListEntry::object)
            .chain(diff.gone.iter().copied().map(ListEntry::tombstone))
            .collect();
        Reply::ListReply { qid, objs }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Ack { .. } => "ack",
            Reply::ProtoError { .. } => "proto_error",
            Reply::GetReply { .. } => "get_reply",
            Reply::GetDataReply { .. } => "get_data_reply",
            Reply::ListReply { .. } => "list_reply",
            Reply::ObjGone { .. } => "obj_gone",
            Reply::SubGone { .. } => "sub_gone",
        }
    }
}
