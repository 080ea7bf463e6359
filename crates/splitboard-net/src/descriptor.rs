#![forbid(unsafe_code)]

//! Per-connection descriptor records.

use std::collections::VecDeque;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use splitboard_core::message::RawMessage;

/// One pollable socket: the listener or an accepted client.
#[derive(Debug)]
pub(crate) enum Endpoint {
    Listener(TcpListener),
    Client(TcpStream),
}

impl Endpoint {
    pub(crate) fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Listener(l) => l.as_fd(),
            Self::Client(s) => s.as_fd(),
        }
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        match self {
            Self::Listener(l) => l.as_raw_fd(),
            Self::Client(s) => s.as_raw_fd(),
        }
    }

    pub(crate) fn is_listener(&self) -> bool {
        matches!(self, Self::Listener(_))
    }

    pub(crate) fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        match self {
            Self::Client(s) => Some(s),
            Self::Listener(_) => None,
        }
    }
}

/// Connection-scoped parse and queue state.
///
/// The unique name stays distinct across the whole descriptor table for
/// the lifetime of the connection; clients address each other by it in
/// the `*` command.
#[derive(Debug, Default)]
pub(crate) struct DescriptorInfo {
    /// Unique source name (peer IPv4, starred until unique).
    pub(crate) name: String,
    /// Bytes received but not yet split into lines.
    pub(crate) unprocessed: Vec<u8>,
    /// Parsed messages not yet routed.
    pub(crate) inbound: VecDeque<RawMessage>,
    /// Reply bytes waiting for a writable socket.
    pub(crate) pending_writes: VecDeque<Vec<u8>>,
    /// This client asked to see every displayed message echoed back.
    pub(crate) echo_enabled: bool,
}

/// An entry of the descriptor table.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) endpoint: Endpoint,
    pub(crate) info: DescriptorInfo,
}

impl Slot {
    pub(crate) fn listener(listener: TcpListener) -> Self {
        Self {
            endpoint: Endpoint::Listener(listener),
            info: DescriptorInfo {
                name: "(listener)".to_string(),
                ..DescriptorInfo::default()
            },
        }
    }

    pub(crate) fn client(stream: TcpStream, name: String) -> Self {
        Self {
            endpoint: Endpoint::Client(stream),
            info: DescriptorInfo {
                name,
                ..DescriptorInfo::default()
            },
        }
    }
}
