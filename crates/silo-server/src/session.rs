use std::sync::Arc;
use std::time::Duration;

use silo_protocol::{Request, Response, Transport};
use silo_store::Store;
use silo_types::Checksum;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::registry::TransactionRegistry;
use crate::error::{ServerError, ServerResult};

/// One connection's serving loop: read a request, apply it, answer it.
///
/// Requests are processed to completion one at a time, so effects are
/// totally ordered per connection and every response goes out in request
/// order. The registry lives inside the session, so transactions die with
/// their connection and are unreachable from any other.
pub struct Session<S> {
    transport: Transport<S>,
    registry: TransactionRegistry,
    store: Arc<dyn Store>,
    lock_ttl: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, store: Arc<dyn Store>, lock_ttl: Duration) -> Self {
        Self {
            transport: Transport::new(stream),
            registry: TransactionRegistry::new(),
            store,
            lock_ttl,
        }
    }

    /// Serve until the peer closes, sends `Close`, or violates the protocol.
    /// Open transactions are discarded on the way out; uncommitted writes
    /// are void, with no recovery across reconnects.
    pub async fn run(mut self) -> ServerResult<()> {
        let outcome = self.serve_loop().await;
        let abandoned = self.registry.discard_all();
        if abandoned > 0 {
            debug!(abandoned, "discarded open transactions at session end");
        }
        outcome
    }

    async fn serve_loop(&mut self) -> ServerResult<()> {
        while let Some(request) = self.transport.recv::<Request>().await? {
            debug!(kind = request.type_name(), "request");
            let closing = matches!(request, Request::Close);
            let (response, fatal) = self.handle(request);
            self.transport.send(&response).await?;
            if fatal {
                warn!("request named an unknown transaction; closing connection");
                break;
            }
            if closing {
                break;
            }
        }
        Ok(())
    }

    /// Apply one request. Store-level failures land in the response's error
    /// field and leave the connection alive. A request naming a transaction
    /// this registry never issued (or no longer holds) is a protocol
    /// violation: the error response is still sent, then the returned flag
    /// tells the serving loop to terminate.
    fn handle(&self, request: Request) -> (Response, bool) {
        match request {
            Request::Open => (Response::Open { error: None }, false),
            Request::Close => (Response::Close { error: None }, false),

            Request::GetIndexes => match self.store.indexes() {
                Ok(indexes) => (Response::GetIndexes { indexes, error: None }, false),
                Err(e) => (
                    Response::GetIndexes {
                        indexes: Vec::new(),
                        error: Some(e.to_string()),
                    },
                    false,
                ),
            },
            Request::GetIndex { id } => match self.store.get_index(&id) {
                Ok(data) => (Response::GetIndex { data, error: None }, false),
                Err(e) => (Response::GetIndex { data: None, error: Some(e.to_string()) }, false),
            },
            Request::GetObject { checksum } => match self.store.get_object(&checksum) {
                Ok(data) => (Response::GetObject { data, error: None }, false),
                Err(e) => (Response::GetObject { data: None, error: Some(e.to_string()) }, false),
            },
            Request::GetChunk { checksum } => match self.store.get_chunk(&checksum) {
                Ok(data) => (Response::GetChunk { data, error: None }, false),
                Err(e) => (Response::GetChunk { data: None, error: Some(e.to_string()) }, false),
            },
            Request::CheckObject { checksum } => match self.store.has_object(&checksum) {
                Ok(exists) => (Response::CheckObject { exists, error: None }, false),
                Err(e) => (
                    Response::CheckObject { exists: false, error: Some(e.to_string()) },
                    false,
                ),
            },
            Request::CheckChunk { checksum } => match self.store.has_chunk(&checksum) {
                Ok(exists) => (Response::CheckChunk { exists, error: None }, false),
                Err(e) => (
                    Response::CheckChunk { exists: false, error: Some(e.to_string()) },
                    false,
                ),
            },
            // Purging an index that is already gone is a success, not an
            // error, like every other dedup-adjacent no-op.
            Request::Purge { id } => match self.store.purge(&id) {
                Ok(_) => (Response::Purge { error: None }, false),
                Err(e) => (Response::Purge { error: Some(e.to_string()) }, false),
            },

            Request::Transaction => (
                Response::Transaction {
                    tx: Some(self.registry.open()),
                    error: None,
                },
                false,
            ),
            Request::ReferenceChunks { tx, keys } => {
                match self.registry.reference_chunks(tx, self.store.as_ref(), &keys) {
                    Ok(exists) => (Response::ReferenceChunks { exists, error: None }, false),
                    Err(e) => {
                        let (error, fatal) = failure(e);
                        (Response::ReferenceChunks { exists: Vec::new(), error }, fatal)
                    }
                }
            }
            Request::ReferenceObjects { tx, keys } => {
                match self.registry.reference_objects(tx, self.store.as_ref(), &keys) {
                    Ok(exists) => (Response::ReferenceObjects { exists, error: None }, false),
                    Err(e) => {
                        let (error, fatal) = failure(e);
                        (Response::ReferenceObjects { exists: Vec::new(), error }, fatal)
                    }
                }
            }
            Request::PutChunk { tx, checksum, data } => {
                if let Err(reason) = verify(&checksum, &data) {
                    return (Response::PutChunk { error: Some(reason) }, false);
                }
                match self.registry.stage_chunk(tx, checksum, data) {
                    Ok(()) => (Response::PutChunk { error: None }, false),
                    Err(e) => {
                        let (error, fatal) = failure(e);
                        (Response::PutChunk { error }, fatal)
                    }
                }
            }
            Request::PutObject { tx, checksum, data } => {
                if let Err(reason) = verify(&checksum, &data) {
                    return (Response::PutObject { error: Some(reason) }, false);
                }
                match self.registry.stage_object(tx, checksum, data) {
                    Ok(()) => (Response::PutObject { error: None }, false),
                    Err(e) => {
                        let (error, fatal) = failure(e);
                        (Response::PutObject { error }, fatal)
                    }
                }
            }
            Request::PutIndex { tx, data } => match self.registry.stage_index(tx, data) {
                Ok(()) => (Response::PutIndex { error: None }, false),
                Err(e) => {
                    let (error, fatal) = failure(e);
                    (Response::PutIndex { error }, fatal)
                }
            },
            Request::Commit { tx } => {
                match self.registry.commit(tx, self.store.as_ref(), self.lock_ttl) {
                    Ok(()) => (Response::Commit { error: None }, false),
                    Err(e) => {
                        let (error, fatal) = failure(e);
                        (Response::Commit { error }, fatal)
                    }
                }
            }
        }
    }
}

/// Classify a registry failure: the message always travels in the response,
/// and an unknown transaction id additionally ends the connection.
fn failure(e: ServerError) -> (Option<String>, bool) {
    let fatal = matches!(e, ServerError::TransactionNotFound(_));
    (Some(e.to_string()), fatal)
}

/// A put whose payload does not hash to its declared checksum would poison
/// the dedup namespace; reject it before staging.
fn verify(checksum: &Checksum, data: &[u8]) -> Result<(), String> {
    let computed = Checksum::of(data);
    if computed != *checksum {
        return Err(format!(
            "checksum mismatch: declared {checksum}, computed {computed}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_protocol::Transport;
    use silo_store::MemoryStore;
    use silo_types::TransactionId;

    const TTL: Duration = Duration::from_secs(60);

    fn spawn_session(store: Arc<MemoryStore>) -> Transport<tokio::io::DuplexStream> {
        let (near, far) = tokio::io::duplex(1024 * 1024);
        tokio::spawn(async move {
            let _ = Session::new(far, store as Arc<dyn Store>, TTL).run().await;
        });
        Transport::new(near)
    }

    async fn call(
        transport: &mut Transport<tokio::io::DuplexStream>,
        request: Request,
    ) -> Response {
        transport.send(&request).await.unwrap();
        transport.recv::<Response>().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn mismatched_put_checksum_is_rejected() {
        let mut transport = spawn_session(Arc::new(MemoryStore::new()));
        let tx = match call(&mut transport, Request::Transaction).await {
            Response::Transaction { tx: Some(tx), .. } => tx,
            other => panic!("wrong kind: {}", other.type_name()),
        };
        let response = call(
            &mut transport,
            Request::PutChunk {
                tx,
                checksum: Checksum::of(b"declared"),
                data: b"different".to_vec(),
            },
        )
        .await;
        assert!(response.error().unwrap().contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn unknown_transaction_answers_then_ends_the_session() {
        let mut transport = spawn_session(Arc::new(MemoryStore::new()));
        let response = call(
            &mut transport,
            Request::Commit { tx: TransactionId::generate() },
        )
        .await;
        assert!(response.error().unwrap().contains("transaction not found"));

        // The violation is fatal: the server sends the error, then closes.
        assert!(transport.recv::<Response>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_level_error_leaves_the_connection_alive() {
        let mut transport = spawn_session(Arc::new(MemoryStore::new()));
        let tx = match call(&mut transport, Request::Transaction).await {
            Response::Transaction { tx: Some(tx), .. } => tx,
            other => panic!("wrong kind: {}", other.type_name()),
        };
        let response = call(
            &mut transport,
            Request::PutChunk {
                tx,
                checksum: Checksum::of(b"declared"),
                data: b"different".to_vec(),
            },
        )
        .await;
        assert!(response.error().is_some());

        // A bad payload is the caller's problem, not the connection's.
        let response = call(&mut transport, Request::GetIndexes).await;
        assert!(response.error().is_none());
    }

    #[tokio::test]
    async fn close_ends_the_session_after_the_response() {
        let mut transport = spawn_session(Arc::new(MemoryStore::new()));
        let response = call(&mut transport, Request::Close).await;
        assert!(matches!(response, Response::Close { error: None }));
        assert!(transport.recv::<Response>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connection_loss_discards_open_transactions() {
        let store = Arc::new(MemoryStore::new());
        let mut transport = spawn_session(Arc::clone(&store));
        let tx = match call(&mut transport, Request::Transaction).await {
            Response::Transaction { tx: Some(tx), .. } => tx,
            other => panic!("wrong kind: {}", other.type_name()),
        };
        call(
            &mut transport,
            Request::PutChunk {
                tx,
                checksum: Checksum::of(b"doomed"),
                data: b"doomed".to_vec(),
            },
        )
        .await;
        drop(transport);

        // The staged chunk dies with the connection; nothing reaches the store.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.chunk_count(), 0);
    }
}
