//! Scripted in-memory transport for dispatcher, node and factory tests.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use wn_wire::{CmdMessage, TransportHeader};

use super::{Transport, TransportConnector, TransportParams, STANDARD_MAX_PAYLOAD};
use crate::error::TransportError;

/// What the next `receive` call yields
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Reply payload (transport header already stripped)
    Reply(Bytes),
    /// Receive timeout
    Timeout,
}

impl Scripted {
    /// Reply carrying a single response frame
    pub fn response(command: u32, args: &[u32]) -> Self {
        Scripted::Reply(CmdMessage::with_args(command, args).unwrap().to_bytes())
    }
}

/// State shared between a test and the transports it hands out
#[derive(Debug, Default)]
pub struct MockState {
    /// Every payload sent, with its robust flag
    pub sent: Vec<(Bytes, bool)>,
    /// Replies returned by successive `receive` calls
    pub replies: VecDeque<Scripted>,
    /// Datagrams returned by `try_receive`
    pub queued: VecDeque<Bytes>,
    /// Addresses passed to `open`
    pub opened: Vec<(IpAddr, u16)>,
}

/// Handle used by tests to script and inspect one channel
#[derive(Debug, Clone, Default)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    /// Queue a reply for `receive`
    pub fn push_reply(&self, reply: Scripted) {
        self.0.lock().unwrap().replies.push_back(reply);
    }

    /// Queue a datagram for `try_receive`
    pub fn push_queued(&self, datagram: Bytes) {
        self.0.lock().unwrap().queued.push_back(datagram);
    }

    /// Payloads sent so far
    pub fn sent(&self) -> Vec<(Bytes, bool)> {
        self.0.lock().unwrap().sent.clone()
    }

    /// Addresses opened so far
    pub fn opened(&self) -> Vec<(IpAddr, u16)> {
        self.0.lock().unwrap().opened.clone()
    }

    /// Build a transport sharing this handle's state
    pub fn transport(&self) -> ScriptedTransport {
        ScriptedTransport {
            state: self.0.clone(),
            header: TransportHeader::default(),
            remote: None,
            closed: false,
            max_payload: STANDARD_MAX_PAYLOAD,
            params: TransportParams::default(),
        }
    }
}

/// Transport whose replies come from a [`MockHandle`] script
#[derive(Debug)]
pub struct ScriptedTransport {
    state: Arc<Mutex<MockState>>,
    header: TransportHeader,
    remote: Option<SocketAddr>,
    closed: bool,
    max_payload: usize,
    params: TransportParams,
}

impl ScriptedTransport {
    fn check_open(&self) -> Result<(), TransportError> {
        match (self.remote, self.closed) {
            (_, true) => Err(TransportError::Closed),
            (None, false) => Err(TransportError::NotOpen),
            (Some(_), false) => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&mut self, ip: IpAddr, port: u16) -> Result<(), TransportError> {
        self.state.lock().unwrap().opened.push((ip, port));
        self.remote = Some(SocketAddr::new(ip, port));
        self.closed = false;
        self.header.reset();
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_open(&self) -> bool {
        self.remote.is_some() && !self.closed
    }

    async fn send(&mut self, payload: &[u8], robust: bool) -> Result<(), TransportError> {
        self.check_open()?;
        self.header.length = payload.len() as u16;
        self.header.increment(1);
        self.state
            .lock()
            .unwrap()
            .sent
            .push((Bytes::copy_from_slice(payload), robust));
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        self.check_open()?;
        match self.state.lock().unwrap().replies.pop_front() {
            Some(Scripted::Reply(bytes)) => Ok(bytes),
            Some(Scripted::Timeout) | None => Err(TransportError::Timeout),
        }
    }

    fn try_receive(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.check_open()?;
        Ok(self.state.lock().unwrap().queued.pop_front())
    }

    fn header(&self) -> &TransportHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut TransportHeader {
        &mut self.header
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn set_max_payload(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
    }

    fn params(&self) -> &TransportParams {
        &self.params
    }

    fn set_params(&mut self, params: TransportParams) {
        self.params = params;
    }
}

/// Connector handing out transports bound to two shared handles
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    /// Unicast channel script
    pub unicast: MockHandle,
    /// Broadcast channel script
    pub broadcast: MockHandle,
}

impl TransportConnector for MockConnector {
    fn unicast(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(self.unicast.transport()))
    }

    fn broadcast(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(self.broadcast.transport()))
    }
}

/// Concatenate raw frames into one datagram
pub fn datagram(frames: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::new();
    for frame in frames {
        buf.put_slice(frame);
    }
    buf.freeze()
}
