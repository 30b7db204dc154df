use crate::metrics::{BRIDGE_CONNECTED, COMMANDS_RECEIVED, PROTOCOL_ERRORS};
use crate::protocol::{EstopStateMsg, HelloMsg, IncomingMessage, ProtocolError, StatsMsg};
use bench_core::{ChannelHub, HubError};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind_addr: String,
    pub publish_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7100".to_string(),
            publish_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("bridge socket setup failed: {0}")]
    Io(#[from] io::Error),
}

/// Why an inbound line was not delivered.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Hub(#[from] HubError),
}

/// Per-client session state, reset on disconnect.
#[derive(Debug, Default)]
pub struct InboundState {
    client_id: Option<String>,
    delivered: u64,
    rejected: u64,
}

impl InboundState {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn note_handshake(&mut self, hello: &HelloMsg) {
        self.client_id = hello.client_id.clone();
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

/// Longest inbound line accepted, newline excluded.
pub const MAX_LINE_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("inbound line exceeds {MAX_LINE_BYTES} bytes")]
pub struct LineTooLong;

/// Splits the inbound byte stream into newline-terminated lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every completed, trimmed, non-empty line.
    ///
    /// A line longer than [`MAX_LINE_BYTES`] discards everything buffered.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, LineTooLong> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            if pos > MAX_LINE_BYTES {
                self.buf.clear();
                return Err(LineTooLong);
            }
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        if self.buf.len() > MAX_LINE_BYTES {
            self.buf.clear();
            return Err(LineTooLong);
        }
        Ok(lines)
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Serve the remote side of the channel substrate until `stop` is set.
///
/// One client at a time. Every complete inbound line is delivered to the hub
/// exactly once; telemetry for every device goes out each publish interval.
pub fn run_bridge(
    hub: Arc<ChannelHub>,
    config: BridgeConfig,
    stop: Arc<AtomicBool>,
) -> Result<(), BridgeError> {
    let listener = TcpListener::bind(&config.bind_addr).map_err(|source| BridgeError::Bind {
        addr: config.bind_addr.clone(),
        source,
    })?;
    listener.set_nonblocking(true)?;

    info!(
        addr = %config.bind_addr,
        publish_ms = config.publish_interval.as_millis() as u64,
        devices = hub.devices().count(),
        "Bridge listening"
    );

    let mut client: Option<(TcpStream, SocketAddr)> = None;
    let mut framer = LineFramer::new();
    let mut send_buf: Vec<u8> = Vec::new();
    let mut send_offset: usize = 0;
    let mut last_publish = Instant::now();
    let mut sequence: u64 = 0;
    let mut inbound_state = InboundState::new();

    while !stop.load(Ordering::Relaxed) {
        if client.is_none() {
            match listener.accept() {
                Ok((stream, addr)) => match stream.set_nonblocking(true) {
                    Ok(()) => {
                        info!(client_addr = %addr, "Bridge client connected");
                        client = Some((stream, addr));
                        BRIDGE_CONNECTED.set(1.0);
                    }
                    Err(err) => warn!(client_addr = %addr, error = %err, "Rejecting client"),
                },
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    warn!("Bridge accept error: {}", err);
                }
            }
        }

        let mut drop_client = false;
        if let Some((stream, addr)) = client.as_mut() {
            let mut temp = [0u8; 1024];
            match stream.read(&mut temp) {
                Ok(0) => {
                    info!(client_addr = %addr, "Bridge client disconnected");
                    drop_client = true;
                }
                Ok(n) => match framer.push(&temp[..n]) {
                    Ok(lines) => {
                        for line in &lines {
                            if let Err(err) = handle_line(line, &hub, &mut inbound_state) {
                                warn!(error = %err, line = %line, "Dropping inbound line");
                            }
                        }
                    }
                    Err(err) => {
                        warn!(client_addr = %addr, error = %err, "Dropping bridge client");
                        PROTOCOL_ERRORS.inc();
                        drop_client = true;
                    }
                },
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    warn!(error = %err, "Bridge read error");
                    drop_client = true;
                }
            }

            if send_buf.is_empty() && last_publish.elapsed() >= config.publish_interval {
                sequence = sequence.wrapping_add(1);
                send_buf = encode_telemetry(&hub, sequence);
                send_offset = 0;
                last_publish = Instant::now();
            }

            if !send_buf.is_empty() {
                match stream.write(&send_buf[send_offset..]) {
                    Ok(0) => {
                        info!(client_addr = %addr, "Bridge client disconnected");
                        drop_client = true;
                    }
                    Ok(n) => {
                        send_offset += n;
                        if send_offset >= send_buf.len() {
                            send_buf.clear();
                            send_offset = 0;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => {
                        warn!(error = %err, "Bridge write error");
                        drop_client = true;
                    }
                }
            }
        }

        if drop_client {
            client = None;
            framer.clear();
            send_buf.clear();
            send_offset = 0;
            inbound_state.reset();
            BRIDGE_CONNECTED.set(0.0);
        }

        std::thread::sleep(Duration::from_millis(5));
    }

    info!("Bridge stopped");
    Ok(())
}

/// Parse one inbound line and deliver it to the hub.
#[instrument(skip(hub, state), level = "trace")]
pub fn handle_line(
    line: &str,
    hub: &ChannelHub,
    state: &mut InboundState,
) -> Result<(), InboundError> {
    let result = deliver(line, hub, state);
    match result {
        Ok(()) => state.delivered += 1,
        Err(_) => {
            state.rejected += 1;
            PROTOCOL_ERRORS.inc();
        }
    }
    result
}

fn deliver(line: &str, hub: &ChannelHub, state: &mut InboundState) -> Result<(), InboundError> {
    match IncomingMessage::parse(line)? {
        IncomingMessage::Hello(hello) => {
            state.note_handshake(&hello);
            info!(client_id = ?hello.client_id, "Bridge handshake received");
        }
        IncomingMessage::Command(msg) => {
            let (device, command) = msg.to_command()?;
            hub.post(device, command)?;
            COMMANDS_RECEIVED.inc();
            debug!(%device, ?command, "Command latched");
        }
        IncomingMessage::Estop(msg) => {
            if hub.estop_asserted() != msg.value {
                info!(asserted = msg.value, "Emergency stop changed by remote");
            }
            hub.set_estop(msg.value);
        }
    }
    Ok(())
}

/// One stats line per published device followed by the estop state.
fn encode_telemetry(hub: &ChannelHub, sequence: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    for sample in hub.snapshot() {
        push_line(&mut buf, &StatsMsg::from_sample(sequence, &sample));
    }
    push_line(&mut buf, &EstopStateMsg::new(hub.estop_asserted()));
    buf
}

fn push_line<T: serde::Serialize>(buf: &mut Vec<u8>, msg: &T) {
    match serde_json::to_writer(&mut *buf, msg) {
        Ok(()) => buf.push(b'\n'),
        Err(err) => warn!(error = %err, "Failed to encode telemetry"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::{
        ChannelKind, Command, DeviceId, FleetBuilder, SimulatedMotor, TickContext,
    };

    fn hub() -> (bench_core::Fleet<SimulatedMotor>, Arc<ChannelHub>) {
        let mut builder = FleetBuilder::new();
        builder.register(SimulatedMotor::new(DeviceId(1))).unwrap();
        builder.register(SimulatedMotor::new(DeviceId(2))).unwrap();
        builder.build()
    }

    #[test]
    fn command_lines_reach_the_latch() {
        let (_fleet, hub) = hub();
        let mut state = InboundState::new();

        handle_line(
            r#"{"type":"command","device_id":2,"channel":"desiredSpeed","value":0.4}"#,
            &hub,
            &mut state,
        )
        .unwrap();

        let latch = hub.latch(DeviceId(2)).unwrap();
        assert!(latch.is_pending(ChannelKind::Speed));
        assert_eq!(latch.drain_all().speed, Some(0.4));
        assert_eq!(state.delivered(), 1);
    }

    #[test]
    fn bad_lines_are_counted_not_fatal() {
        let (_fleet, hub) = hub();
        let mut state = InboundState::new();

        assert!(matches!(
            handle_line(
                r#"{"type":"command","device_id":9,"channel":"stop","value":true}"#,
                &hub,
                &mut state,
            ),
            Err(InboundError::Hub(HubError::UnknownDevice(DeviceId(9))))
        ));
        assert!(handle_line("garbage", &hub, &mut state).is_err());
        assert_eq!(state.rejected(), 2);

        handle_line(r#"{"type":"hello","client_id":"ui"}"#, &hub, &mut state).unwrap();
        assert_eq!(state.client_id(), Some("ui"));
    }

    #[test]
    fn estop_lines_toggle_the_signal() {
        let (_fleet, hub) = hub();
        let mut state = InboundState::new();

        handle_line(r#"{"type":"estop","value":true}"#, &hub, &mut state).unwrap();
        assert!(hub.estop_asserted());
        handle_line(r#"{"type":"estop","value":false}"#, &hub, &mut state).unwrap();
        assert!(!hub.estop_asserted());
    }

    #[test]
    fn framer_joins_partial_reads() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"a\n\r\nb").unwrap(), vec!["a".to_string()]);
        assert_eq!(framer.buffered(), 1);
        assert_eq!(framer.push(b"c\n").unwrap(), vec!["bc".to_string()]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn oversized_partial_line_is_discarded() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(&[b'x'; MAX_LINE_BYTES]).unwrap(), Vec::<String>::new());
        assert_eq!(framer.push(b"x"), Err(LineTooLong));
        assert_eq!(framer.buffered(), 0);

        // Framing resumes cleanly after the overflow.
        let line = r#"{"type":"estop","value":true}"#;
        assert_eq!(framer.push(format!("{line}\n").as_bytes()).unwrap(), vec![line]);
    }

    #[test]
    fn oversized_terminated_line_is_discarded() {
        let mut framer = LineFramer::new();
        let mut bytes = vec![b'y'; MAX_LINE_BYTES + 1];
        bytes.extend_from_slice(b"\nnext\n");
        assert_eq!(framer.push(&bytes), Err(LineTooLong));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn telemetry_frame_lists_every_published_device() {
        let (mut fleet, hub) = hub();
        let mut faults = Vec::new();
        hub.post(DeviceId(1), Command::Speed(0.5)).unwrap();
        fleet.tick(
            &TickContext {
                tick: 1,
                timestamp_us: 20_000,
                dt_s: 0.02,
            },
            &mut faults,
        );

        let frame = String::from_utf8(encode_telemetry(&hub, 7)).unwrap();
        let lines: Vec<serde_json::Value> = frame
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["device_id"], 1);
        assert_eq!(lines[0]["setSpeed"], 0.5);
        assert_eq!(lines[1]["device_id"], 2);
        assert_eq!(lines[1]["sequence"], 7);
        assert_eq!(lines[2]["type"], "estop_state");
        assert_eq!(lines[2]["value"], false);
    }
}
