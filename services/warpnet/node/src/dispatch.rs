//! Command dispatch over a node's transports.
//!
//! The dispatcher chooses one of three paths from a command's response
//! type: fire-and-forget, single response with retransmission, or buffer
//! transfer with whole-buffer re-request.

use bytes::Bytes;
use tracing::{debug, warn};
use wn_wire::{Buffer, Response, ResponseType};

use crate::cmds::{Command, Reply};
use crate::error::{NodeError, TransportError};
use crate::transport::Transport;

/// Transmissions of one command before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Sends commands to one node and collects their replies
pub struct Dispatcher {
    unicast: Box<dyn Transport>,
    broadcast: Box<dyn Transport>,
    max_attempts: u32,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("unicast", &self.unicast.remote_addr())
            .field("broadcast", &self.broadcast.remote_addr())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher over already-configured transports
    pub fn new(unicast: Box<dyn Transport>, broadcast: Box<dyn Transport>) -> Self {
        Self {
            unicast,
            broadcast,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the transmission limit (at least one transmission is always made)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.set_max_attempts(max_attempts);
        self
    }

    /// Set the transmission limit
    pub fn set_max_attempts(&mut self, max_attempts: u32) {
        self.max_attempts = max_attempts.max(1);
    }

    /// Transmission limit
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Unicast transport
    pub fn unicast(&self) -> &dyn Transport {
        self.unicast.as_ref()
    }

    /// Mutable unicast transport
    pub fn unicast_mut(&mut self) -> &mut dyn Transport {
        self.unicast.as_mut()
    }

    /// Broadcast transport
    pub fn broadcast(&self) -> &dyn Transport {
        self.broadcast.as_ref()
    }

    /// Send `command` over the unicast transport and return its result
    pub async fn send<C: Command>(&mut self, command: &C) -> Result<C::Output, NodeError> {
        let payload = command.message().to_bytes();

        let reply = match command.resp_type() {
            ResponseType::NoResponse => {
                self.unicast.send(&payload, false).await?;
                Reply::None
            }
            ResponseType::SingleResponse => Reply::Response(self.receive_resp(&payload).await?),
            ResponseType::BufferResponse => {
                let (buffer_id, flags, size) =
                    command
                        .buffer_request()
                        .ok_or_else(|| NodeError::UnexpectedReply {
                            command: command.message().command,
                            reason: "buffer response without a buffer request".to_string(),
                        })?;
                Reply::Buffer(self.receive_buffer(&payload, buffer_id, flags, size).await?)
            }
        };

        command.process_response(reply)
    }

    /// Send `command` over the broadcast transport; never waits, never retries
    pub async fn send_broadcast<C: Command>(&mut self, command: &C) -> Result<(), NodeError> {
        let payload = command.message().to_bytes();
        self.broadcast.send(&payload, false).await?;
        debug!(
            "Broadcast command {:#010x} ({} bytes)",
            command.message().command,
            payload.len()
        );
        Ok(())
    }

    async fn receive_resp(&mut self, payload: &Bytes) -> Result<Response, NodeError> {
        let mut attempt = 1;
        self.unicast.send(payload, true).await?;

        loop {
            match self.unicast.receive().await {
                Ok(reply) => {
                    let (resp, _) = Response::decode_prefix(&reply)?;
                    return Ok(resp);
                }
                Err(e) => {
                    attempt = self.retransmit(payload, attempt, e).await?;
                }
            }
        }
    }

    async fn receive_buffer(
        &mut self,
        payload: &Bytes,
        buffer_id: u32,
        flags: u32,
        size: u32,
    ) -> Result<Buffer, NodeError> {
        let mut attempt = 1;
        let mut buffer = Buffer::new(buffer_id, flags, size);
        self.unicast.send(payload, true).await?;

        while !buffer.is_complete() {
            match self.unicast.receive().await {
                Ok(reply) => {
                    buffer.add_data(&reply);
                }
                Err(e) => {
                    attempt = self.retransmit(payload, attempt, e).await?;
                    // The whole buffer is requested again
                    buffer = Buffer::new(buffer_id, flags, size);
                }
            }
        }

        Ok(buffer)
    }

    /// Resend `payload` after a failed receive, or fail once the limit is reached
    async fn retransmit(
        &mut self,
        payload: &Bytes,
        attempt: u32,
        error: TransportError,
    ) -> Result<u32, NodeError> {
        if matches!(error, TransportError::Closed | TransportError::NotOpen) {
            return Err(error.into());
        }
        if attempt >= self.max_attempts {
            warn!(
                "Max retransmissions without reply from node ({} attempts): {}",
                attempt, error
            );
            return Err(TransportError::MaxRetransmissions { attempts: attempt }.into());
        }

        warn!(
            "No reply from node ({}); retransmitting ({}/{})",
            error,
            attempt + 1,
            self.max_attempts
        );
        self.unicast.send(payload, true).await?;
        Ok(attempt + 1)
    }

    /// Take one queued datagram, if any, and split it into responses
    pub fn drain_responses(&mut self) -> Result<Vec<Response>, NodeError> {
        let mut output = Vec::new();

        let Some(datagram) = self.unicast.try_receive()? else {
            return Ok(output);
        };

        let mut rest = &datagram[..];
        while !rest.is_empty() {
            let (resp, used) = Response::decode_prefix(rest)?;
            output.push(resp);
            rest = &rest[used..];
        }

        Ok(output)
    }

    /// Close both transports
    pub fn close(&mut self) {
        self.unicast.close();
        self.broadcast.close();
    }

    /// Give back the transports
    pub fn into_transports(self) -> (Box<dyn Transport>, Box<dyn Transport>) {
        (self.unicast, self.broadcast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmds::{GetHwInfo, GetNodeType, Identify, NetworkSetup, ReadBuffer};
    use crate::transport::mock::{datagram, MockHandle, Scripted};
    use bytes::BytesMut;
    use std::net::{IpAddr, Ipv4Addr};
    use wn_wire::{BufferChunk, CmdMessage};

    async fn dispatcher() -> (Dispatcher, MockHandle, MockHandle) {
        let unicast = MockHandle::default();
        let broadcast = MockHandle::default();
        let mut uni = unicast.transport();
        let mut bcast = broadcast.transport();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        uni.open(ip, 9500).await.unwrap();
        bcast.open(ip, 10000).await.unwrap();
        (
            Dispatcher::new(Box::new(uni), Box::new(bcast)),
            unicast,
            broadcast,
        )
    }

    fn chunk(buffer_id: u32, start_byte: u32, payload: &[u8]) -> Bytes {
        let chunk = BufferChunk {
            command: 0x0000_0006,
            buffer_id,
            flags: 0,
            start_byte,
            payload: Bytes::copy_from_slice(payload),
        };
        let mut buf = BytesMut::new();
        chunk.encode(&mut buf);
        buf.freeze()
    }

    #[tokio::test]
    async fn test_no_response_path() {
        let (mut dispatcher, unicast, _) = dispatcher().await;
        dispatcher.send(&Identify::new(1234).unwrap()).await.unwrap();

        let sent = unicast.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].1);
        assert_eq!(&sent[0].0[..], &Identify::new(1234).unwrap().message().to_bytes()[..]);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (mut dispatcher, unicast, _) = dispatcher().await;
        unicast.push_reply(Scripted::Timeout);
        unicast.push_reply(Scripted::response(0xFFFF_FFFF, &[0x0000_0000]));

        let node_type = dispatcher.send(&GetNodeType::new()).await.unwrap();
        assert_eq!(node_type, 0);

        // Exactly two identical transmissions
        let sent = unicast.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert!(sent[0].1);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let (mut dispatcher, unicast, _) = dispatcher().await;
        let err = dispatcher.send(&GetHwInfo::new()).await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::Transport(TransportError::MaxRetransmissions { attempts: 2 })
        ));
        assert_eq!(unicast.sent().len(), 2);

        dispatcher.set_max_attempts(3);
        let err = dispatcher.send(&GetHwInfo::new()).await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::Transport(TransportError::MaxRetransmissions { attempts: 3 })
        ));
        assert_eq!(unicast.sent().len(), 5);
    }

    #[tokio::test]
    async fn test_closed_transport_is_not_retried() {
        let (mut dispatcher, unicast, _) = dispatcher().await;
        dispatcher.close();

        let err = dispatcher.send(&GetNodeType::new()).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(TransportError::Closed)));
        assert!(unicast.sent().is_empty());
    }

    #[tokio::test]
    async fn test_buffer_transfer() {
        let (mut dispatcher, unicast, _) = dispatcher().await;
        unicast.push_reply(Scripted::Reply(chunk(4, 4, &[5, 6, 7, 8])));
        unicast.push_reply(Scripted::Reply(chunk(9, 0, &[0xEE; 4])));
        unicast.push_reply(Scripted::Reply(chunk(4, 0, &[1, 2, 3, 4])));

        let buffer = dispatcher.send(&ReadBuffer::new(4, 0, 0, 8)).await.unwrap();
        assert!(buffer.is_complete());
        assert_eq!(buffer.bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(unicast.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_buffer_retry_requests_whole_buffer() {
        let (mut dispatcher, unicast, _) = dispatcher().await;
        unicast.push_reply(Scripted::Reply(chunk(4, 0, &[0xAA; 4])));
        unicast.push_reply(Scripted::Timeout);
        unicast.push_reply(Scripted::Reply(chunk(4, 4, &[5, 6, 7, 8])));
        unicast.push_reply(Scripted::Reply(chunk(4, 0, &[1, 2, 3, 4])));

        let buffer = dispatcher.send(&ReadBuffer::new(4, 0, 0, 8)).await.unwrap();
        assert_eq!(buffer.bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);

        let sent = unicast.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
    }

    #[tokio::test]
    async fn test_broadcast_not_retried() {
        let (mut dispatcher, unicast, broadcast) = dispatcher().await;
        let setup = NetworkSetup::new(1, 1, Ipv4Addr::new(10, 0, 0, 1), 9500, 10000).unwrap();
        dispatcher.send_broadcast(&setup).await.unwrap();

        assert!(unicast.sent().is_empty());
        let sent = broadcast.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].1);
    }

    #[tokio::test]
    async fn test_drain_responses() {
        let (mut dispatcher, unicast, _) = dispatcher().await;
        assert!(dispatcher.drain_responses().unwrap().is_empty());

        unicast.push_queued(datagram(&[
            CmdMessage::with_args(1, &[10]).unwrap().to_bytes(),
            CmdMessage::new(2).to_bytes(),
            CmdMessage::with_args(3, &[30, 31]).unwrap().to_bytes(),
        ]));
        let responses = dispatcher.drain_responses().unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].command, 1);
        assert_eq!(responses[1].args(), &[] as &[u32]);
        assert_eq!(responses[2].args(), &[30, 31]);

        // Malformed tail
        unicast.push_queued(datagram(&[
            CmdMessage::new(1).to_bytes(),
            Bytes::from_static(&[0, 0]),
        ]));
        assert!(matches!(
            dispatcher.drain_responses(),
            Err(NodeError::Frame(_))
        ));
    }
}
