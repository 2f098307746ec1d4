use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use silo_types::{Checksum, TransactionId};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Bit set on a request's tag to form the tag of its matching response.
pub const RESPONSE_TAG_BIT: u8 = 0x80;

/// A framed wire message: a closed set of kinds, each with a stable tag.
///
/// The tag registry is closed by construction: both directions are
/// exhaustive enums, and the codec rejects any frame whose tag does not
/// match what the payload decodes to.
pub trait Message: Serialize + DeserializeOwned + Send {
    fn type_tag(&self) -> u8;
    fn type_name(&self) -> &'static str;
}

/// Client → server repository RPC messages.
///
/// The dedup write sequence is: `Transaction` to open, `ReferenceChunks` /
/// `ReferenceObjects` to learn what the store already holds, `PutChunk` /
/// `PutObject` for what it doesn't, `PutIndex` for the manifest, `Commit`
/// to publish atomically.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    Open,
    Close,
    GetIndexes,
    GetIndex { id: Checksum },
    GetObject { checksum: Checksum },
    GetChunk { checksum: Checksum },
    CheckObject { checksum: Checksum },
    CheckChunk { checksum: Checksum },
    Purge { id: Checksum },
    Transaction,
    ReferenceChunks { tx: TransactionId, keys: Vec<Checksum> },
    ReferenceObjects { tx: TransactionId, keys: Vec<Checksum> },
    PutChunk { tx: TransactionId, checksum: Checksum, data: Vec<u8> },
    PutObject { tx: TransactionId, checksum: Checksum, data: Vec<u8> },
    PutIndex { tx: TransactionId, data: Vec<u8> },
    Commit { tx: TransactionId },
}

/// Server → client repository RPC messages.
///
/// Every request kind has exactly one matching response kind, and every
/// response carries an optional error; absence of the error signals success.
/// A store-level failure travels in the error field with the connection left
/// alive so the caller can decide whether to retry that operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    Open { error: Option<String> },
    Close { error: Option<String> },
    GetIndexes { indexes: Vec<Checksum>, error: Option<String> },
    GetIndex { data: Option<Vec<u8>>, error: Option<String> },
    GetObject { data: Option<Vec<u8>>, error: Option<String> },
    GetChunk { data: Option<Vec<u8>>, error: Option<String> },
    CheckObject { exists: bool, error: Option<String> },
    CheckChunk { exists: bool, error: Option<String> },
    Purge { error: Option<String> },
    Transaction { tx: Option<TransactionId>, error: Option<String> },
    /// Existence flags positionally aligned with the request's key list.
    ReferenceChunks { exists: Vec<bool>, error: Option<String> },
    ReferenceObjects { exists: Vec<bool>, error: Option<String> },
    PutChunk { error: Option<String> },
    PutObject { error: Option<String> },
    PutIndex { error: Option<String> },
    Commit { error: Option<String> },
}

impl Request {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Open => 1,
            Self::Close => 2,
            Self::GetIndexes => 3,
            Self::GetIndex { .. } => 4,
            Self::GetObject { .. } => 5,
            Self::GetChunk { .. } => 6,
            Self::CheckObject { .. } => 7,
            Self::CheckChunk { .. } => 8,
            Self::Purge { .. } => 9,
            Self::Transaction => 10,
            Self::ReferenceChunks { .. } => 11,
            Self::ReferenceObjects { .. } => 12,
            Self::PutChunk { .. } => 13,
            Self::PutObject { .. } => 14,
            Self::PutIndex { .. } => 15,
            Self::Commit { .. } => 16,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Close => "Close",
            Self::GetIndexes => "GetIndexes",
            Self::GetIndex { .. } => "GetIndex",
            Self::GetObject { .. } => "GetObject",
            Self::GetChunk { .. } => "GetChunk",
            Self::CheckObject { .. } => "CheckObject",
            Self::CheckChunk { .. } => "CheckChunk",
            Self::Purge { .. } => "Purge",
            Self::Transaction => "Transaction",
            Self::ReferenceChunks { .. } => "ReferenceChunks",
            Self::ReferenceObjects { .. } => "ReferenceObjects",
            Self::PutChunk { .. } => "PutChunk",
            Self::PutObject { .. } => "PutObject",
            Self::PutIndex { .. } => "PutIndex",
            Self::Commit { .. } => "Commit",
        }
    }
}

impl Response {
    pub fn type_tag(&self) -> u8 {
        let request_tag = match self {
            Self::Open { .. } => 1,
            Self::Close { .. } => 2,
            Self::GetIndexes { .. } => 3,
            Self::GetIndex { .. } => 4,
            Self::GetObject { .. } => 5,
            Self::GetChunk { .. } => 6,
            Self::CheckObject { .. } => 7,
            Self::CheckChunk { .. } => 8,
            Self::Purge { .. } => 9,
            Self::Transaction { .. } => 10,
            Self::ReferenceChunks { .. } => 11,
            Self::ReferenceObjects { .. } => 12,
            Self::PutChunk { .. } => 13,
            Self::PutObject { .. } => 14,
            Self::PutIndex { .. } => 15,
            Self::Commit { .. } => 16,
        };
        request_tag | RESPONSE_TAG_BIT
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "Open",
            Self::Close { .. } => "Close",
            Self::GetIndexes { .. } => "GetIndexes",
            Self::GetIndex { .. } => "GetIndex",
            Self::GetObject { .. } => "GetObject",
            Self::GetChunk { .. } => "GetChunk",
            Self::CheckObject { .. } => "CheckObject",
            Self::CheckChunk { .. } => "CheckChunk",
            Self::Purge { .. } => "Purge",
            Self::Transaction { .. } => "Transaction",
            Self::ReferenceChunks { .. } => "ReferenceChunks",
            Self::ReferenceObjects { .. } => "ReferenceObjects",
            Self::PutChunk { .. } => "PutChunk",
            Self::PutObject { .. } => "PutObject",
            Self::PutIndex { .. } => "PutIndex",
            Self::Commit { .. } => "Commit",
        }
    }

    /// The error field common to every response kind.
    pub fn error(&self) -> Option<&str> {
        let error = match self {
            Self::Open { error }
            | Self::Close { error }
            | Self::Purge { error }
            | Self::PutChunk { error }
            | Self::PutObject { error }
            | Self::PutIndex { error }
            | Self::Commit { error } => error,
            Self::GetIndexes { error, .. }
            | Self::GetIndex { error, .. }
            | Self::GetObject { error, .. }
            | Self::GetChunk { error, .. }
            | Self::CheckObject { error, .. }
            | Self::CheckChunk { error, .. }
            | Self::Transaction { error, .. }
            | Self::ReferenceChunks { error, .. }
            | Self::ReferenceObjects { error, .. } => error,
        };
        error.as_deref()
    }

    /// Returns `true` iff this response answers the given request kind.
    pub fn answers(&self, request: &Request) -> bool {
        self.type_tag() == request.type_tag() | RESPONSE_TAG_BIT
    }
}

impl Message for Request {
    fn type_tag(&self) -> u8 {
        Request::type_tag(self)
    }

    fn type_name(&self) -> &'static str {
        Request::type_name(self)
    }
}

impl Message for Response {
    fn type_tag(&self) -> u8 {
        Response::type_tag(self)
    }

    fn type_name(&self) -> &'static str {
        Response::type_name(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_requests() -> Vec<Request> {
        let tx = TransactionId::generate();
        let c = Checksum::of(b"c");
        vec![
            Request::Open,
            Request::Close,
            Request::GetIndexes,
            Request::GetIndex { id: c },
            Request::GetObject { checksum: c },
            Request::GetChunk { checksum: c },
            Request::CheckObject { checksum: c },
            Request::CheckChunk { checksum: c },
            Request::Purge { id: c },
            Request::Transaction,
            Request::ReferenceChunks { tx, keys: vec![c] },
            Request::ReferenceObjects { tx, keys: vec![c] },
            Request::PutChunk { tx, checksum: c, data: vec![1] },
            Request::PutObject { tx, checksum: c, data: vec![2] },
            Request::PutIndex { tx, data: vec![3] },
            Request::Commit { tx },
        ]
    }

    fn all_responses() -> Vec<Response> {
        vec![
            Response::Open { error: None },
            Response::Close { error: None },
            Response::GetIndexes { indexes: vec![], error: None },
            Response::GetIndex { data: None, error: None },
            Response::GetObject { data: None, error: None },
            Response::GetChunk { data: None, error: None },
            Response::CheckObject { exists: false, error: None },
            Response::CheckChunk { exists: false, error: None },
            Response::Purge { error: None },
            Response::Transaction { tx: None, error: None },
            Response::ReferenceChunks { exists: vec![], error: None },
            Response::ReferenceObjects { exists: vec![], error: None },
            Response::PutChunk { error: None },
            Response::PutObject { error: None },
            Response::PutIndex { error: None },
            Response::Commit { error: None },
        ]
    }

    #[test]
    fn request_tags_unique() {
        let mut tags: Vec<u8> = all_requests().iter().map(|r| r.type_tag()).collect();
        let len = tags.len();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), len, "request tags should be unique");
    }

    #[test]
    fn every_request_has_a_matching_response() {
        for (req, resp) in all_requests().iter().zip(all_responses().iter()) {
            assert!(resp.answers(req), "{} should answer {}", resp.type_name(), req.type_name());
            assert_eq!(req.type_name(), resp.type_name());
        }
    }

    #[test]
    fn response_tags_carry_the_response_bit() {
        for resp in all_responses() {
            assert!(resp.type_tag() & RESPONSE_TAG_BIT != 0);
        }
    }

    #[test]
    fn mismatched_kinds_do_not_answer() {
        let resp = Response::Commit { error: None };
        assert!(!resp.answers(&Request::Open));
    }

    #[test]
    fn error_accessor_covers_every_kind() {
        for resp in all_responses() {
            assert!(resp.error().is_none());
        }
        let failed = Response::Commit {
            error: Some("transaction not found".into()),
        };
        assert_eq!(failed.error(), Some("transaction not found"));
    }
}
