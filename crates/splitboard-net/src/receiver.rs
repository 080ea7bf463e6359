#![forbid(unsafe_code)]

//! The multi-client TCP receiver.
//!
//! # Threads and locks
//!
//! Two threads touch this state: the network thread (owned by the
//! receiver) and the render thread calling the public API. Four mutexes
//! partition the shared state; when the network thread holds more than
//! one it acquires them in the order
//!
//! ```text
//! outbox -> descriptors -> report -> running
//! ```
//!
//! Public methods take one lock at a time. Sockets are non-blocking
//! throughout, so no lock is ever held across a call that can stall.
//!
//! # Message routing
//!
//! Bytes accumulate per client until a CR appears, lines are classified
//! (command, formatted text, vendor timing), and the resulting messages
//! land on the client's inbound queue. Commands execute on the network
//! thread and never travel further. For the active client the remaining
//! messages drain into the active outbox the render thread pops; for
//! standby clients the queue collapses to the most recent displayable
//! message so a later hand-over restores a sane picture.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{self, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn, sockopt};
use tracing::{debug, error, info, warn};

/// `nix`'s `PollFlags` does not expose this Linux-only extension, so build it
/// from the raw `libc` bit. Behaves identically to a named `PollFlags` constant.
const POLLRDHUP: PollFlags = PollFlags::from_bits_retain(libc::POLLRDHUP);

use splitboard_core::message::{self, MAX_LINE, Protocol, RawMessage, classify_line};
use splitboard_core::order::TextOrder;
use splitboard_core::text::escape_nonprintable;
use splitboard_core::timing;
use splitboard_core::wire;

use crate::descriptor::{DescriptorInfo, Slot};

/// Default TCP port of the panel service.
pub const TCP_PORT_DEFAULT: u16 = 21967;

/// Listen backlog for the accept queue.
const LISTEN_BACKLOG: i32 = 10;

/// Sleep between loop iterations when poll reports no activity.
const IDLE_SLEEP: Duration = Duration::from_millis(15);

/// Read chunk size; matches the longest valid protocol line.
const READ_CHUNK: usize = MAX_LINE;

// Markers shown on the panel when the listener dies.
const LED_ERROR_SOCKET: &str = "P-ERR-S";
const LED_ERROR_OPTIONS: &str = "P-ERR-O";
const LED_ERROR_BIND: &str = "P-ERR-B";
const LED_ERROR_LISTEN: &str = "P-ERR-L";
const LED_ERROR_ACCEPT: &str = "P-ERR-A";
const LED_ERROR_POLL: &str = "P-ERR-P";
const LED_ERROR_CLOSED: &str = "P-ERR-C";

/// Tuning knobs of a [`Receiver`].
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// TCP port to bind; 0 picks an ephemeral port.
    pub port: u16,
    /// Descriptor-table bound, listener included.
    pub max_descriptors: usize,
    /// Inject an empty clear order when a line matches no protocol.
    pub clear_on_unrecognized: bool,
    /// Wire-form prefix (ending in `=`) used to show client names for
    /// the `!` command.
    pub roster_template: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: TCP_PORT_DEFAULT,
            max_descriptors: 20,
            clear_on_unrecognized: true,
            roster_template: "~+/S1=".to_string(),
        }
    }
}

/// Snapshot of connected clients for the render thread.
#[derive(Debug, Clone, Default)]
pub struct ClientSummary {
    /// Unique names of all connected clients, in table order.
    pub names: Vec<String>,
    /// Name of the active client, when one exists.
    pub active: Option<String>,
}

// ── Shared state ─────────────────────────────────────────────────────────

/// Descriptor table plus the routing state that travels with it.
#[derive(Debug, Default)]
struct DescriptorTable {
    slots: Vec<Slot>,
    /// Fd of the active client, -1 when none.
    active_fd: RawFd,
    /// Promote the next client that sends a displayable message.
    pending_active_at_next_message: bool,
    /// Name of the client requested to become active; applied by the
    /// network thread at the top of its loop.
    pending_active_name: String,
    /// Last displayable message forwarded for the active client.
    last_displayed_for_active: Option<RawMessage>,
    /// Wire encoding of the most recently displayed order, for echoes.
    last_displayed_wire: Option<String>,
    /// Bound port once the listener is up.
    local_port: Option<u16>,
}

impl DescriptorTable {
    fn index_of_fd(&self, fd: RawFd) -> Option<usize> {
        self.slots.iter().position(|s| s.endpoint.raw_fd() == fd)
    }

    fn client_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.endpoint.is_listener()).count()
    }
}

#[derive(Debug, Default)]
struct ReportState {
    any_echo_requested: bool,
}

#[derive(Debug)]
struct Shared {
    running: Mutex<bool>,
    outbox: Mutex<VecDeque<RawMessage>>,
    table: Mutex<DescriptorTable>,
    report: Mutex<ReportState>,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: Mutex::new(false),
            outbox: Mutex::new(VecDeque::new()),
            table: Mutex::new(DescriptorTable {
                active_fd: -1,
                // Promote the first source that speaks; nothing else could
                // ever become active before the first `*` command.
                pending_active_at_next_message: true,
                ..DescriptorTable::default()
            }),
            report: Mutex::new(ReportState::default()),
        }
    }

    fn is_running(&self) -> bool {
        *lock(&self.running)
    }

    fn set_running(&self, value: bool) {
        *lock(&self.running) = value;
    }
}

/// Poison-tolerant lock: a panicked peer must not wedge the service.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Receiver ─────────────────────────────────────────────────────────────

/// The concurrent TCP server; owns the network thread and all sockets.
#[derive(Debug)]
pub struct Receiver {
    shared: Arc<Shared>,
    config: ReceiverConfig,
    handle: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Create a stopped receiver.
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            config,
            handle: None,
        }
    }

    /// Spawn the network thread. Calling `start` on a running receiver is
    /// a no-op.
    pub fn start(&mut self) {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.shared.set_running(true);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name("splitboard-net".to_string())
            .spawn(move || network_loop(&shared, &config));
        match handle {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => {
                error!(%err, "failed to spawn network thread");
                self.shared.set_running(false);
            }
        }
    }

    /// Ask the network thread to wind down at its next loop check.
    /// Calling `stop` twice is a no-op.
    pub fn stop(&self) {
        self.shared.set_running(false);
    }

    /// Whether the network thread has been asked to run.
    pub fn running(&self) -> bool {
        self.shared.is_running()
    }

    /// True when the active outbox holds a message for the render thread.
    pub fn has_pending_message(&self) -> bool {
        !lock(&self.shared.outbox).is_empty()
    }

    /// Pop the oldest message from the active outbox.
    pub fn pop_pending_message(&self) -> Option<RawMessage> {
        lock(&self.shared.outbox).pop_front()
    }

    /// True when no client can currently drive the panel: nobody is
    /// connected, or no active source exists and none is pending.
    pub fn no_active_source_or_pending(&self) -> bool {
        let table = lock(&self.shared.table);
        table.slots.len() < 2
            || (table.active_fd < 0 && !table.pending_active_at_next_message)
    }

    /// Snapshot of connected client names and the active one.
    pub fn client_summary(&self) -> ClientSummary {
        let table = lock(&self.shared.table);
        let names = table
            .slots
            .iter()
            .filter(|s| !s.endpoint.is_listener())
            .map(|s| s.info.name.clone())
            .collect();
        let active = table
            .index_of_fd(table.active_fd)
            .map(|idx| table.slots[idx].info.name.clone());
        ClientSummary { names, active }
    }

    /// Request that the named client become the active source at the next
    /// network-loop iteration.
    pub fn request_active_client(&self, name: &str) {
        let mut table = lock(&self.shared.table);
        table.pending_active_name = name.to_string();
        table.pending_active_at_next_message = false;
    }

    /// Record the order the panel now shows and echo it to every client
    /// that asked for echoes.
    pub fn report_displayed(&self, order: &TextOrder) {
        let encoded = wire::encode(order);
        let any_echo = lock(&self.shared.report).any_echo_requested;
        let mut table = lock(&self.shared.table);
        table.last_displayed_wire = Some(encoded.clone());
        if any_echo {
            let reply = echo_reply(&encoded);
            for slot in &mut table.slots {
                if slot.info.echo_enabled {
                    slot.info.pending_writes.push_back(reply.clone());
                }
            }
        }
    }

    /// The bound TCP port once the listener is up (differs from the
    /// configured port when binding port 0).
    pub fn local_port(&self) -> Option<u16> {
        lock(&self.shared.table).local_port
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// `=<wire form>` reply bytes; the wire form already ends in CR.
fn echo_reply(encoded_order: &str) -> Vec<u8> {
    let mut reply = Vec::with_capacity(encoded_order.len() + 1);
    reply.push(b'=');
    reply.extend_from_slice(encoded_order.as_bytes());
    reply
}

// ── Network thread ───────────────────────────────────────────────────────

/// A failure that takes the whole listener down.
struct FatalNetError {
    marker: &'static str,
    error: io::Error,
}

fn errno_to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

fn network_loop(shared: &Shared, config: &ReceiverConfig) {
    let listener = match setup_listener(config.port) {
        Ok(listener) => listener,
        Err(fatal) => {
            error!(error = %fatal.error, "listener setup failed");
            lock(&shared.outbox).push_back(RawMessage::new(Protocol::SimpleText, fatal.marker));
            shared.set_running(false);
            return;
        }
    };

    {
        let mut table = lock(&shared.table);
        table.local_port = listener.local_addr().ok().map(|a| a.port());
        if let Some(port) = table.local_port {
            info!(port, "listening");
        }
        table.slots.push(Slot::listener(listener));
    }

    let mut closing_error: Option<&'static str> = None;
    while shared.is_running() {
        apply_pending_active_switch(shared);

        match poll_and_process(shared, config) {
            Ok(0) => thread::sleep(IDLE_SLEEP),
            Ok(_) => {}
            Err(fatal) => {
                error!(error = %fatal.error, marker = fatal.marker, "fatal network error");
                closing_error = Some(fatal.marker);
                shared.set_running(false);
            }
        }

        flush_pending_writes(shared);
    }

    if let Some(marker) = closing_error {
        lock(&shared.outbox).push_back(RawMessage::new(Protocol::SimpleText, marker));
    }

    let mut table = lock(&shared.table);
    table.slots.clear();
    table.active_fd = -1;
    table.local_port = None;
    info!("sockets closed");
}

/// Create, configure, bind, and listen. Accepted sockets are switched to
/// non-blocking individually on accept.
fn setup_listener(port: u16) -> Result<TcpListener, FatalNetError> {
    let fatal = |marker: &'static str| {
        move |errno: nix::errno::Errno| FatalNetError {
            marker,
            error: errno_to_io(errno),
        }
    };

    let fd = socket::socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .map_err(fatal(LED_ERROR_SOCKET))?;

    socket::setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(fatal(LED_ERROR_OPTIONS))?;
    socket::setsockopt(&fd, sockopt::ReusePort, &true).map_err(fatal(LED_ERROR_OPTIONS))?;

    let any = SockaddrIn::new(0, 0, 0, 0, port);
    socket::bind(fd.as_raw_fd(), &any).map_err(fatal(LED_ERROR_BIND))?;

    let backlog = Backlog::new(LISTEN_BACKLOG).map_err(fatal(LED_ERROR_LISTEN))?;
    socket::listen(&fd, backlog).map_err(fatal(LED_ERROR_LISTEN))?;

    let listener = TcpListener::from(fd);
    listener.set_nonblocking(true).map_err(|error| FatalNetError {
        marker: LED_ERROR_SOCKET,
        error,
    })?;
    Ok(listener)
}

/// Hand the active role to the client named in `pending_active_name`.
///
/// The outgoing active client keeps its state: the outbox contents (or
/// the last displayed message when the outbox is empty) move onto its
/// inactive queue so a later switch back restores the picture. The new
/// active client starts from a clear followed by its buffered messages.
fn apply_pending_active_switch(shared: &Shared) {
    let mut outbox = lock(&shared.outbox);
    let mut table = lock(&shared.table);
    if table.pending_active_name.is_empty() {
        return;
    }
    let name = std::mem::take(&mut table.pending_active_name);

    let Some(new_idx) = table
        .slots
        .iter()
        .position(|s| !s.endpoint.is_listener() && s.info.name == name)
    else {
        warn!(name = %name, "requested active client is not connected");
        return;
    };

    if let Some(old_idx) = table.index_of_fd(table.active_fd) {
        let retained = table.last_displayed_for_active.take();
        let old = &mut table.slots[old_idx].info;
        if outbox.is_empty() {
            if let Some(last) = retained {
                old.inbound.push_back(last);
            }
        } else {
            old.inbound.extend(outbox.drain(..));
        }
    }
    table.last_displayed_for_active = None;

    outbox.push_back(RawMessage::clear());
    let new_fd = table.slots[new_idx].endpoint.raw_fd();
    let new_info = &mut table.slots[new_idx].info;
    let mut last_displayable = None;
    for msg in new_info.inbound.drain(..) {
        if msg.is_displayable() {
            last_displayable = Some(msg.clone());
        }
        outbox.push_back(msg);
    }
    table.last_displayed_for_active = last_displayable;
    table.active_fd = new_fd;
    info!(name = %name, fd = new_fd, "active client switched");
}

/// Why a descriptor is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    PeerClosed,
    Hangup,
    SocketError,
}

/// Poll every descriptor once (zero timeout) and handle the activity.
/// Returns the number of descriptors with events.
fn poll_and_process(shared: &Shared, config: &ReceiverConfig) -> Result<usize, FatalNetError> {
    let mut outbox = lock(&shared.outbox);
    let mut table = lock(&shared.table);

    let revents: Vec<(usize, PollFlags)> = {
        let mut pollfds: Vec<PollFd> = table
            .slots
            .iter()
            .map(|s| {
                PollFd::new(
                    s.endpoint.as_fd(),
                    PollFlags::POLLIN | POLLRDHUP,
                )
            })
            .collect();
        match poll(&mut pollfds, PollTimeout::ZERO) {
            Ok(0) => return Ok(0),
            Ok(_) => pollfds
                .iter()
                .enumerate()
                .filter_map(|(idx, p)| p.revents().map(|r| (idx, r)))
                .filter(|(_, r)| !r.is_empty())
                .collect(),
            Err(nix::errno::Errno::EINTR) => return Ok(0),
            Err(errno) => {
                return Err(FatalNetError {
                    marker: LED_ERROR_POLL,
                    error: errno_to_io(errno),
                });
            }
        }
    };

    // Appends from the accept loop must not be visited this round.
    let snapshot_len = table.slots.len();
    let event_count = revents.len();
    let mut to_close: Vec<(usize, CloseReason)> = Vec::new();

    for (idx, flags) in revents {
        if idx >= snapshot_len {
            continue;
        }

        if flags.contains(PollFlags::POLLIN) {
            if table.slots[idx].endpoint.is_listener() {
                accept_all(&mut table, config)?;
            } else {
                match read_available(&mut table.slots[idx]) {
                    ReadOutcome::Data => {}
                    ReadOutcome::WouldBlock => {}
                    ReadOutcome::PeerClosed => to_close.push((idx, CloseReason::PeerClosed)),
                    ReadOutcome::Error(err) => {
                        warn!(name = %table.slots[idx].info.name, %err, "recv failed");
                        to_close.push((idx, CloseReason::SocketError));
                    }
                }
                extract_lines(&mut table.slots[idx].info, config);
                promote_if_pending(&mut table, idx);
                route_inbound(&mut outbox, &mut table, idx, shared, config);
            }
        }

        if flags.intersects(PollFlags::POLLPRI | POLLRDHUP | PollFlags::POLLHUP) {
            to_close.push((idx, CloseReason::Hangup));
        } else if flags.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
            to_close.push((idx, CloseReason::SocketError));
        }
    }

    if !to_close.is_empty() {
        close_and_compact(shared, &mut table, &to_close)?;
    }

    Ok(event_count)
}

/// Accept until the backlog is drained.
fn accept_all(table: &mut DescriptorTable, config: &ReceiverConfig) -> Result<(), FatalNetError> {
    let Some(listener_idx) = table.slots.iter().position(|s| s.endpoint.is_listener()) else {
        return Ok(());
    };
    loop {
        let accepted = match &table.slots[listener_idx].endpoint {
            crate::descriptor::Endpoint::Listener(listener) => listener.accept(),
            crate::descriptor::Endpoint::Client(_) => return Ok(()),
        };
        match accepted {
            Ok((stream, peer)) => {
                if table.slots.len() >= config.max_descriptors {
                    warn!(%peer, "descriptor table full, dropping connection");
                    continue;
                }
                if let Err(err) = stream.set_nonblocking(true) {
                    warn!(%peer, %err, "could not make client socket non-blocking");
                    continue;
                }
                let base = match peer.ip() {
                    std::net::IpAddr::V4(ip) => ip.to_string(),
                    _ => "(non-IPV4)".to_string(),
                };
                let mut name = base;
                while table.slots.iter().any(|s| s.info.name == name) {
                    name.push('*');
                }
                info!(name = %name, "client connected");
                table.slots.push(Slot::client(stream, name));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                return Err(FatalNetError {
                    marker: LED_ERROR_ACCEPT,
                    error,
                });
            }
        }
    }
}

enum ReadOutcome {
    Data,
    WouldBlock,
    PeerClosed,
    Error(io::Error),
}

/// One non-blocking read into the descriptor's accumulation buffer.
fn read_available(slot: &mut Slot) -> ReadOutcome {
    let Some(stream) = slot.endpoint.stream_mut() else {
        return ReadOutcome::WouldBlock;
    };
    let mut buf = [0u8; READ_CHUNK];
    match stream.read(&mut buf) {
        Ok(0) => ReadOutcome::PeerClosed,
        Ok(n) => {
            debug!(name = %slot.info.name, len = n, "received");
            slot.info.unprocessed.extend_from_slice(&buf[..n]);
            ReadOutcome::Data
        }
        Err(err)
            if err.kind() == io::ErrorKind::WouldBlock
                || err.kind() == io::ErrorKind::Interrupted =>
        {
            ReadOutcome::WouldBlock
        }
        Err(err) => ReadOutcome::Error(err),
    }
}

/// Split the accumulation buffer at CRs and classify each line.
fn extract_lines(info: &mut DescriptorInfo, config: &ReceiverConfig) {
    while let Some(pos) = info.unprocessed.iter().position(|&b| b == timing::EOL) {
        let line: Vec<u8> = info.unprocessed.drain(..=pos).collect();

        if line.len() > MAX_LINE {
            warn!(
                name = %info.name,
                len = line.len(),
                line = %escape_nonprintable(&line),
                "line too long"
            );
            unrecognized(info, config);
            continue;
        }

        match classify_line(&line) {
            Protocol::Command => {
                if let Some(payload) = message::command_payload(&line) {
                    let payload = String::from_utf8_lossy(payload).into_owned();
                    info.inbound.push_back(RawMessage::new(Protocol::Command, payload));
                }
            }
            Protocol::FormattedText => {
                let data = String::from_utf8_lossy(strip_cr(&line)).into_owned();
                info.inbound
                    .push_back(RawMessage::new(Protocol::FormattedText, data));
            }
            Protocol::VendorTiming => {
                let data = timing::strip_eol(&line).unwrap_or(&line);
                let data = String::from_utf8_lossy(data).into_owned();
                info.inbound
                    .push_back(RawMessage::new(Protocol::VendorTiming, data));
            }
            _ => {
                debug!(
                    name = %info.name,
                    line = %escape_nonprintable(&line),
                    "discarding unrecognized line"
                );
                unrecognized(info, config);
            }
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(&[timing::EOL]).unwrap_or(line)
}

fn unrecognized(info: &mut DescriptorInfo, config: &ReceiverConfig) {
    if config.clear_on_unrecognized {
        info.inbound.push_back(RawMessage::clear());
    }
}

/// First displayable message wins the active role while the promote flag
/// is armed.
fn promote_if_pending(table: &mut DescriptorTable, idx: usize) {
    if !table.pending_active_at_next_message {
        return;
    }
    let queue = &table.slots[idx].info.inbound;
    let displayable_at_end = queue
        .front()
        .is_some_and(|m| m.protocol != Protocol::Command)
        || queue
            .back()
            .is_some_and(|m| m.protocol != Protocol::Command);
    if displayable_at_end {
        table.active_fd = table.slots[idx].endpoint.raw_fd();
        table.pending_active_at_next_message = false;
        info!(name = %table.slots[idx].info.name, "client promoted to active source");
    }
}

/// Drain one client's inbound queue: execute commands in place, forward
/// displayables for the active client, collapse to one retained message
/// for standby clients.
fn route_inbound(
    outbox: &mut VecDeque<RawMessage>,
    table: &mut DescriptorTable,
    idx: usize,
    shared: &Shared,
    config: &ReceiverConfig,
) {
    let fd = table.slots[idx].endpoint.raw_fd();
    let is_active = table.active_fd >= 0 && fd == table.active_fd;
    let messages: Vec<RawMessage> = table.slots[idx].info.inbound.drain(..).collect();

    if is_active {
        for msg in messages {
            if msg.protocol == Protocol::Command {
                execute_command(outbox, table, idx, &msg, shared, config);
            } else {
                if msg.is_displayable() {
                    table.last_displayed_for_active = Some(msg.clone());
                }
                outbox.push_back(msg);
            }
        }
    } else {
        let mut retained: Option<RawMessage> = None;
        for msg in messages {
            if msg.protocol == Protocol::Command {
                execute_command(outbox, table, idx, &msg, shared, config);
            } else if msg.is_displayable() {
                retained = Some(msg);
            }
        }
        if let Some(msg) = retained {
            table.slots[idx].info.inbound.push_back(msg);
        }
    }
}

/// Dispatch one command line. The command byte follows the `~)'` prefix.
fn execute_command(
    outbox: &mut VecDeque<RawMessage>,
    table: &mut DescriptorTable,
    origin_idx: usize,
    msg: &RawMessage,
    shared: &Shared,
    config: &ReceiverConfig,
) {
    let Some(cmd) = msg.data.chars().next() else {
        return;
    };
    let rest = &msg.data[cmd.len_utf8()..];
    match cmd {
        '*' => {
            info!(name = rest, "active client requested");
            table.pending_active_name = rest.to_string();
            table.pending_active_at_next_message = false;
        }
        '!' => {
            let active_fd = table.active_fd;
            for slot in table.slots.iter().filter(|s| !s.endpoint.is_listener()) {
                let prefix = if slot.endpoint.raw_fd() == active_fd {
                    "* "
                } else {
                    ""
                };
                outbox.push_back(RawMessage::new(
                    Protocol::FormattedText,
                    format!("{}{}{}", config.roster_template, prefix, slot.info.name),
                ));
            }
        }
        '?' => {
            let reply = client_listing(table);
            table.slots[origin_idx]
                .info
                .pending_writes
                .push_back(reply);
        }
        '&' => match rest.chars().next() {
            Some('1') => {
                table.slots[origin_idx].info.echo_enabled = true;
                lock(&shared.report).any_echo_requested = true;
                if let Some(encoded) = table.last_displayed_wire.clone() {
                    table.slots[origin_idx]
                        .info
                        .pending_writes
                        .push_back(echo_reply(&encoded));
                }
            }
            Some('0') => {
                table.slots[origin_idx].info.echo_enabled = false;
                refresh_echo_flag(shared, table);
            }
            other => warn!(?other, "malformed echo command"),
        },
        '0' => {
            outbox.push_back(RawMessage::clear());
        }
        other => {
            warn!(cmd = ?other, payload = %msg.data, "unknown command byte");
        }
    }
}

/// `~~NN` + one `~~`-prefixed entry per client (active marked `*!`),
/// CR-terminated.
fn client_listing(table: &DescriptorTable) -> Vec<u8> {
    let mut reply = format!("~~{:02}", table.client_count());
    for slot in table.slots.iter().filter(|s| !s.endpoint.is_listener()) {
        if slot.endpoint.raw_fd() == table.active_fd {
            reply.push_str("~~*!");
        } else {
            reply.push_str("~~");
        }
        reply.push_str(&slot.info.name);
    }
    reply.push('\r');
    reply.into_bytes()
}

fn refresh_echo_flag(shared: &Shared, table: &DescriptorTable) {
    lock(&shared.report).any_echo_requested =
        table.slots.iter().any(|s| s.info.echo_enabled);
}

/// Close the marked descriptors and compact the table.
fn close_and_compact(
    shared: &Shared,
    table: &mut DescriptorTable,
    to_close: &[(usize, CloseReason)],
) -> Result<(), FatalNetError> {
    let mut listener_lost = false;
    let mut close_fds: Vec<RawFd> = Vec::new();
    for &(idx, reason) in to_close {
        let Some(slot) = table.slots.get(idx) else {
            continue;
        };
        let fd = slot.endpoint.raw_fd();
        if close_fds.contains(&fd) {
            continue;
        }
        close_fds.push(fd);
        if slot.endpoint.is_listener() {
            listener_lost = true;
        } else {
            info!(name = %slot.info.name, ?reason, "closing connection");
        }
    }

    // Dropping the slot closes its socket; retain keeps the pollfd
    // pairing implicit since pollfds are rebuilt from slots every round.
    table
        .slots
        .retain(|s| !close_fds.contains(&s.endpoint.raw_fd()));

    if close_fds.contains(&table.active_fd) {
        table.active_fd = -1;
        table.last_displayed_for_active = None;
        // Let the next source that speaks take over.
        table.pending_active_at_next_message = true;
    }

    refresh_echo_flag(shared, table);

    if listener_lost {
        return Err(FatalNetError {
            marker: LED_ERROR_CLOSED,
            error: io::Error::new(io::ErrorKind::BrokenPipe, "listener closed"),
        });
    }
    Ok(())
}

/// Push queued reply bytes out on every client socket.
fn flush_pending_writes(shared: &Shared) {
    let mut table = lock(&shared.table);
    for slot in &mut table.slots {
        let Some(stream) = slot.endpoint.stream_mut() else {
            continue;
        };
        while let Some(buf) = slot.info.pending_writes.front_mut() {
            match stream.write(buf) {
                Ok(n) if n == buf.len() => {
                    slot.info.pending_writes.pop_front();
                }
                Ok(n) => {
                    buf.drain(..n);
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(name = %slot.info.name, %err, "send failed, discarding replies");
                    slot.info.pending_writes.clear();
                    break;
                }
            }
        }
    }
}
