use silo_protocol::{ProtocolError, Request, Response, Transport};
use silo_types::{Checksum, TransactionId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Outcome of a deduplicated batch write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DedupReport {
    /// Chunks actually transferred.
    pub chunks_sent: usize,
    /// Chunks the store already held.
    pub chunks_skipped: usize,
    /// Payload bytes transferred (excluding skipped chunks).
    pub bytes_sent: u64,
}

/// Turn-based client for the repository RPC.
///
/// Every call takes `&mut self`, so at most one request is ever outstanding
/// on the connection; responses therefore arrive in strict request order. A
/// response of the wrong kind is a protocol violation and fails the call; a
/// response with its error field set is a store-level failure, surfaced as
/// [`ClientError::Remote`] with the connection still usable.
pub struct RepositoryClient<S> {
    transport: Transport<S>,
}

impl RepositoryClient<TcpStream> {
    /// Connect to a repository server and open the session.
    pub async fn connect(addr: &str) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::open(stream).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> RepositoryClient<S> {
    /// Open a session over an established stream.
    pub async fn open(stream: S) -> ClientResult<Self> {
        let mut client = Self {
            transport: Transport::new(stream),
        };
        match client.call(Request::Open).await? {
            Response::Open { .. } => Ok(client),
            other => Err(unexpected("Open", &other)),
        }
    }

    /// End the session cleanly.
    pub async fn close(mut self) -> ClientResult<()> {
        match self.call(Request::Close).await? {
            Response::Close { .. } => Ok(()),
            other => Err(unexpected("Close", &other)),
        }
    }

    async fn call(&mut self, request: Request) -> ClientResult<Response> {
        debug!(kind = request.type_name(), "sending request");
        self.transport.send(&request).await.map_err(ClientError::Protocol)?;
        let response = self
            .transport
            .recv::<Response>()
            .await?
            .ok_or(ClientError::Disconnected)?;
        if !response.answers(&request) {
            return Err(unexpected(request.type_name(), &response));
        }
        if let Some(message) = response.error() {
            return Err(ClientError::Remote(message.to_string()));
        }
        Ok(response)
    }

    /// List the ids of all index records in the repository.
    pub async fn get_indexes(&mut self) -> ClientResult<Vec<Checksum>> {
        match self.call(Request::GetIndexes).await? {
            Response::GetIndexes { indexes, .. } => Ok(indexes),
            other => Err(unexpected("GetIndexes", &other)),
        }
    }

    /// Fetch one index record.
    pub async fn get_index(&mut self, id: Checksum) -> ClientResult<Option<Vec<u8>>> {
        match self.call(Request::GetIndex { id }).await? {
            Response::GetIndex { data, .. } => Ok(data),
            other => Err(unexpected("GetIndex", &other)),
        }
    }

    /// Fetch an object payload.
    pub async fn get_object(&mut self, checksum: Checksum) -> ClientResult<Option<Vec<u8>>> {
        match self.call(Request::GetObject { checksum }).await? {
            Response::GetObject { data, .. } => Ok(data),
            other => Err(unexpected("GetObject", &other)),
        }
    }

    /// Fetch a chunk payload.
    pub async fn get_chunk(&mut self, checksum: Checksum) -> ClientResult<Option<Vec<u8>>> {
        match self.call(Request::GetChunk { checksum }).await? {
            Response::GetChunk { data, .. } => Ok(data),
            other => Err(unexpected("GetChunk", &other)),
        }
    }

    /// Check whether an object exists.
    pub async fn check_object(&mut self, checksum: Checksum) -> ClientResult<bool> {
        match self.call(Request::CheckObject { checksum }).await? {
            Response::CheckObject { exists, .. } => Ok(exists),
            other => Err(unexpected("CheckObject", &other)),
        }
    }

    /// Check whether a chunk exists.
    pub async fn check_chunk(&mut self, checksum: Checksum) -> ClientResult<bool> {
        match self.call(Request::CheckChunk { checksum }).await? {
            Response::CheckChunk { exists, .. } => Ok(exists),
            other => Err(unexpected("CheckChunk", &other)),
        }
    }

    /// Remove an index record from the repository.
    pub async fn purge(&mut self, id: Checksum) -> ClientResult<()> {
        match self.call(Request::Purge { id }).await? {
            Response::Purge { .. } => Ok(()),
            other => Err(unexpected("Purge", &other)),
        }
    }

    /// Open a transaction and return its id.
    pub async fn begin_transaction(&mut self) -> ClientResult<TransactionId> {
        match self.call(Request::Transaction).await? {
            Response::Transaction { tx: Some(tx), .. } => Ok(tx),
            Response::Transaction { tx: None, .. } => {
                Err(ClientError::Remote("server returned no transaction id".into()))
            }
            other => Err(unexpected("Transaction", &other)),
        }
    }

    /// Ask which of the given chunks the store already holds. The returned
    /// flags align positionally with `keys`.
    pub async fn reference_chunks(
        &mut self,
        tx: TransactionId,
        keys: Vec<Checksum>,
    ) -> ClientResult<Vec<bool>> {
        match self.call(Request::ReferenceChunks { tx, keys }).await? {
            Response::ReferenceChunks { exists, .. } => Ok(exists),
            other => Err(unexpected("ReferenceChunks", &other)),
        }
    }

    /// Ask which of the given objects the store already holds.
    pub async fn reference_objects(
        &mut self,
        tx: TransactionId,
        keys: Vec<Checksum>,
    ) -> ClientResult<Vec<bool>> {
        match self.call(Request::ReferenceObjects { tx, keys }).await? {
            Response::ReferenceObjects { exists, .. } => Ok(exists),
            other => Err(unexpected("ReferenceObjects", &other)),
        }
    }

    /// Stage a chunk under the transaction.
    pub async fn put_chunk(
        &mut self,
        tx: TransactionId,
        checksum: Checksum,
        data: Vec<u8>,
    ) -> ClientResult<()> {
        match self.call(Request::PutChunk { tx, checksum, data }).await? {
            Response::PutChunk { .. } => Ok(()),
            other => Err(unexpected("PutChunk", &other)),
        }
    }

    /// Stage an object under the transaction.
    pub async fn put_object(
        &mut self,
        tx: TransactionId,
        checksum: Checksum,
        data: Vec<u8>,
    ) -> ClientResult<()> {
        match self.call(Request::PutObject { tx, checksum, data }).await? {
            Response::PutObject { .. } => Ok(()),
            other => Err(unexpected("PutObject", &other)),
        }
    }

    /// Stage the transaction's index manifest. A second call replaces the
    /// first.
    pub async fn put_index(&mut self, tx: TransactionId, data: Vec<u8>) -> ClientResult<()> {
        match self.call(Request::PutIndex { tx, data }).await? {
            Response::PutIndex { .. } => Ok(()),
            other => Err(unexpected("PutIndex", &other)),
        }
    }

    /// Commit the transaction, publishing everything staged under it.
    pub async fn commit(&mut self, tx: TransactionId) -> ClientResult<()> {
        match self.call(Request::Commit { tx }).await? {
            Response::Commit { .. } => Ok(()),
            other => Err(unexpected("Commit", &other)),
        }
    }

    /// The full deduplicated write path: open a transaction, reference the
    /// chunk keys, put only what the store is missing, stage the index, and
    /// commit.
    pub async fn upload(
        &mut self,
        chunks: &[(Checksum, Vec<u8>)],
        index: Vec<u8>,
    ) -> ClientResult<DedupReport> {
        let tx = self.begin_transaction().await?;
        let keys: Vec<Checksum> = chunks.iter().map(|(checksum, _)| *checksum).collect();
        let exists = self.reference_chunks(tx, keys).await?;

        let mut report = DedupReport::default();
        for ((checksum, data), present) in chunks.iter().zip(exists) {
            if present {
                report.chunks_skipped += 1;
                continue;
            }
            self.put_chunk(tx, *checksum, data.clone()).await?;
            report.chunks_sent += 1;
            report.bytes_sent += data.len() as u64;
        }

        self.put_index(tx, index).await?;
        self.commit(tx).await?;
        debug!(
            sent = report.chunks_sent,
            skipped = report.chunks_skipped,
            "dedup upload committed"
        );
        Ok(report)
    }
}

fn unexpected(expected: &'static str, actual: &Response) -> ClientError {
    ClientError::Protocol(ProtocolError::UnexpectedKind {
        expected,
        actual: actual.type_name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_protocol::Transport;

    async fn scripted_peer<F, Fut>(script: F) -> tokio::io::DuplexStream
    where
        F: FnOnce(Transport<tokio::io::DuplexStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let (near, far) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            script(Transport::new(far)).await;
        });
        near
    }

    async fn answer_open(transport: &mut Transport<tokio::io::DuplexStream>) {
        let req = transport.recv::<Request>().await.unwrap().unwrap();
        assert!(matches!(req, Request::Open));
        transport.send(&Response::Open { error: None }).await.unwrap();
    }

    #[tokio::test]
    async fn open_then_check_chunk() {
        let stream = scripted_peer(|mut transport| async move {
            answer_open(&mut transport).await;
            let req = transport.recv::<Request>().await.unwrap().unwrap();
            assert!(matches!(req, Request::CheckChunk { .. }));
            transport
                .send(&Response::CheckChunk { exists: true, error: None })
                .await
                .unwrap();
        })
        .await;

        let mut client = RepositoryClient::open(stream).await.unwrap();
        assert!(client.check_chunk(Checksum::of(b"x")).await.unwrap());
    }

    #[tokio::test]
    async fn mismatched_response_kind_fails_the_call() {
        let stream = scripted_peer(|mut transport| async move {
            answer_open(&mut transport).await;
            transport.recv::<Request>().await.unwrap().unwrap();
            // Answer a Commit the caller never issued.
            transport.send(&Response::Commit { error: None }).await.unwrap();
        })
        .await;

        let mut client = RepositoryClient::open(stream).await.unwrap();
        let err = client.check_chunk(Checksum::of(b"x")).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::UnexpectedKind { .. })
        ));
    }

    #[tokio::test]
    async fn remote_error_is_surfaced_and_connection_survives() {
        let stream = scripted_peer(|mut transport| async move {
            answer_open(&mut transport).await;
            transport.recv::<Request>().await.unwrap().unwrap();
            transport
                .send(&Response::Commit { error: Some("transaction not found".into()) })
                .await
                .unwrap();
            // The connection is still alive for the next call.
            let req = transport.recv::<Request>().await.unwrap().unwrap();
            assert!(matches!(req, Request::CheckChunk { .. }));
            transport
                .send(&Response::CheckChunk { exists: false, error: None })
                .await
                .unwrap();
        })
        .await;

        let mut client = RepositoryClient::open(stream).await.unwrap();
        let err = client.commit(TransactionId::generate()).await.unwrap_err();
        match err {
            ClientError::Remote(message) => assert_eq!(message, "transaction not found"),
            other => panic!("wrong error: {other}"),
        }
        assert!(!client.check_chunk(Checksum::of(b"y")).await.unwrap());
    }

    #[tokio::test]
    async fn disconnect_mid_call_is_reported() {
        let stream = scripted_peer(|mut transport| async move {
            answer_open(&mut transport).await;
            transport.recv::<Request>().await.unwrap().unwrap();
            // Drop without answering.
        })
        .await;

        let mut client = RepositoryClient::open(stream).await.unwrap();
        let err = client.get_indexes().await.unwrap_err();
        assert!(matches!(err, ClientError::Disconnected));
    }
}
