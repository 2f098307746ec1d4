use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::codec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Message, MAX_MESSAGE_SIZE};

/// Write side of a framed stream.
pub struct FramedSender<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FramedSender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode and send one message. An encode failure aborts the send
    /// without writing any bytes, so the stream stays frame-aligned.
    pub async fn send<M: Message>(&mut self, msg: &M) -> ProtocolResult<()> {
        let frame = codec::encode(msg)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Read side of a framed stream.
pub struct FramedReceiver<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> FramedReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Receive one message. `Ok(None)` is a clean end-of-stream at a frame
    /// boundary; EOF inside a frame, a malformed frame, or an unknown kind
    /// are all errors, and no partial message is ever delivered.
    pub async fn recv<M: Message>(&mut self) -> ProtocolResult<Option<M>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    ProtocolError::FramingError("stream closed mid-frame".into())
                }
                _ => ProtocolError::Io(e),
            })?;

        let msg = codec::decode_body(body[0], &body[1..])?;
        Ok(Some(msg))
    }
}

/// Both directions of one framed, ordered, reliable stream.
///
/// The transport carries no sequencing of its own; ordering and matching
/// are the business of the caller (turn-based discipline or the
/// [`crate::mux::Multiplexer`]).
pub struct Transport<S> {
    sender: FramedSender<WriteHalf<S>>,
    receiver: FramedReceiver<ReadHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> Transport<S> {
    pub fn new(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            sender: FramedSender::new(write),
            receiver: FramedReceiver::new(read),
        }
    }

    /// Split into independently owned halves (one task may read while
    /// another writes).
    pub fn into_split(self) -> (FramedSender<WriteHalf<S>>, FramedReceiver<ReadHalf<S>>) {
        (self.sender, self.receiver)
    }

    pub async fn send<M: Message>(&mut self, msg: &M) -> ProtocolResult<()> {
        self.sender.send(msg).await
    }

    pub async fn recv<M: Message>(&mut self) -> ProtocolResult<Option<M>> {
        self.receiver.recv::<M>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response};
    use silo_types::Checksum;

    #[tokio::test]
    async fn send_and_recv_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = Transport::new(client);
        let mut server = Transport::new(server);

        client
            .send(&Request::CheckChunk {
                checksum: Checksum::of(b"chunk"),
            })
            .await
            .unwrap();
        let received = server.recv::<Request>().await.unwrap().unwrap();
        assert_eq!(received.type_name(), "CheckChunk");

        server
            .send(&Response::CheckChunk {
                exists: true,
                error: None,
            })
            .await
            .unwrap();
        let reply = client.recv::<Response>().await.unwrap().unwrap();
        match reply {
            Response::CheckChunk { exists, .. } => assert!(exists),
            other => panic!("wrong kind: {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn clean_close_yields_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut server = Transport::new(server);
        assert!(server.recv::<Request>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let (mut client, server) = tokio::io::duplex(64);
        // A frame header promising more bytes than will ever arrive.
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0, 0, 0, 10, 1])
            .await
            .unwrap();
        drop(client);
        let mut server = Transport::new(server);
        let err = server.recv::<Request>().await.unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[tokio::test]
    async fn unknown_kind_terminates_delivery() {
        let (mut client, server) = tokio::io::duplex(256);
        let payload = bincode::serialize(&200u32).unwrap();
        let mut frame = Vec::new();
        frame.extend_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
        frame.push(0xEE);
        frame.extend_from_slice(&payload);
        tokio::io::AsyncWriteExt::write_all(&mut client, &frame)
            .await
            .unwrap();

        let mut server = Transport::new(server);
        assert!(server.recv::<Request>().await.is_err());
    }

    #[tokio::test]
    async fn ordering_is_preserved() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client = Transport::new(client);
        let mut server = Transport::new(server);

        for i in 0..10u8 {
            client
                .send(&Request::GetChunk {
                    checksum: Checksum::of(&[i]),
                })
                .await
                .unwrap();
        }
        for i in 0..10u8 {
            let msg = server.recv::<Request>().await.unwrap().unwrap();
            match msg {
                Request::GetChunk { checksum } => {
                    assert_eq!(checksum, Checksum::of(&[i]));
                }
                other => panic!("wrong kind: {}", other.type_name()),
            }
        }
    }
}
