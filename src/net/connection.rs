//! The per-server connection engine.
//!
//! A [`ServerConnection`] owns one transport and drives a synchronous
//! request/response stream over it: every request carries a 31-bit
//! sequence number, and [`ServerConnection::transact`] reads frames until
//! the matching reply arrives, dispatching interleaved callback frames and
//! discarding anything else with a warning.

use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::record::{DataType, FieldValue};

use super::callback::{CallbackHandler, CallbackType};
use super::error::{Error, Result, StatusCode};
use super::format::{self, CodecOptions, DataFormat};
use super::header::{read_frame, NetHeader};
use super::message::{base_type, is_response, MessageType};
use super::{option, FIELD_NAME_WIDTH, HEADER_SIZE, SEQUENCE_MASK};

/// One blocking, framed byte stream to a server.
///
/// Implementations supply connection establishment and frame-granular I/O;
/// the engine supplies sequencing, negotiation, and decoding.
pub trait Transport: Send {
    /// Send one complete frame.
    fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive one complete frame, waiting at most `timeout`.
    fn recv_frame(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Drop the current stream and establish a fresh one.
    fn reconnect(&mut self) -> Result<()>;

    /// Peer description for log messages.
    fn peer(&self) -> String;
}

/// TCP transport speaking the framed protocol over one socket.
pub struct TcpTransport {
    addr: String,
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to `addr` (`host:port`).
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            addr: addr.to_owned(),
            stream,
        })
    }
}

impl Transport for TcpTransport {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame)?;
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match read_frame(&mut self.stream) {
            Ok(frame) => Ok(frame),
            Err(Error::Io(err))
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Err(Error::TimedOut(timeout))
            }
            Err(other) => Err(other),
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        let stream = TcpStream::connect(&self.addr)?;
        stream.set_nodelay(true)?;
        self.stream = stream;
        Ok(())
    }

    fn peer(&self) -> String {
        self.addr.clone()
    }
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for each request/response exchange.
    pub timeout: Duration,
    /// Format to request instead of the server's native one, if set.
    pub preferred_format: Option<DataFormat>,
    /// Negotiate 64-bit transmission of long/ulong/hex values.
    pub use_64bit_longs: bool,
    /// Username reported to the server.
    pub username: String,
    /// Program name reported to the server.
    pub program_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            preferred_format: None,
            use_64bit_longs: false,
            username: std::env::var("USER").unwrap_or_else(|_| "unknown".into()),
            program_name: env!("CARGO_PKG_NAME").to_owned(),
        }
    }
}

struct Inner {
    transport: Box<dyn Transport>,
    codec: CodecOptions,
    remote_header_length: u32,
    next_sequence: u32,
    handle_epoch: u64,
    up: bool,
    callbacks: HashMap<u32, CallbackHandler>,
}

/// One negotiated connection to a server.
///
/// All methods take `&self`; an internal mutex serializes concurrent
/// callers, so the connection can be shared behind an `Arc`.
pub struct ServerConnection {
    inner: Mutex<Inner>,
    config: ConnectionConfig,
}

impl ServerConnection {
    /// Wrap an established transport. No frames are exchanged until
    /// [`ServerConnection::connect`] or the first request.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, config: ConnectionConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                transport,
                codec: CodecOptions::default(),
                remote_header_length: HEADER_SIZE as u32,
                next_sequence: 1,
                handle_epoch: 0,
                up: true,
                callbacks: HashMap::new(),
            }),
            config,
        }
    }

    /// Connect over TCP with the given config.
    pub fn open(addr: &str, config: ConnectionConfig) -> Result<Self> {
        let transport = TcpTransport::connect(addr)?;
        let conn = Self::new(Box::new(transport), config);
        conn.connect()?;
        Ok(conn)
    }

    /// Negotiate the payload format and report the client identity.
    ///
    /// Servers that reject GET_OPTION stay on ASCII, which every peer
    /// understands.
    pub fn connect(&self) -> Result<()> {
        let mut inner = self.lock();
        self.negotiate(&mut inner)?;
        let info = format!("{} {}", self.config.username, self.config.program_name);
        inner.transact(
            MessageType::SetClientInfo,
            0,
            info.as_bytes(),
            self.config.timeout,
        )?;
        Ok(())
    }

    fn negotiate(&self, inner: &mut Inner) -> Result<()> {
        inner.codec = CodecOptions::default();
        let native = match inner.get_option(option::NATIVE_DATAFMT, self.config.timeout) {
            Ok(value) => value,
            Err(Error::Server { code, .. }) if code == StatusCode::UNSUPPORTED => {
                debug!(peer = %inner.transport.peer(), "peer has no format negotiation, staying on ASCII");
                return Ok(());
            }
            Err(other) => return Err(other),
        };
        let chosen = self
            .config
            .preferred_format
            .or_else(|| DataFormat::from_u32(native))
            .unwrap_or(DataFormat::Ascii);
        inner.set_option(option::DATAFMT, chosen.as_u32(), self.config.timeout)?;
        inner.codec.format = chosen;
        if self.config.use_64bit_longs {
            match inner.set_option(option::USE_64BIT_LONGS, 1, self.config.timeout) {
                Ok(()) => inner.codec.use_64bit_longs = true,
                Err(Error::Server { code, .. }) if code == StatusCode::UNSUPPORTED => {
                    warn!(peer = %inner.transport.peer(), "peer rejects 64-bit longs, staying on 32-bit");
                }
                Err(other) => return Err(other),
            }
        }
        debug!(peer = %inner.transport.peer(), format = ?inner.codec.format,
               use_64bit_longs = inner.codec.use_64bit_longs, "format negotiated");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-transaction; the stream state
        // is unknown either way, so keep going and let the next I/O fail.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The codec options currently in effect.
    #[must_use]
    pub fn codec(&self) -> CodecOptions {
        self.lock().codec
    }

    /// Monotonic counter bumped whenever cached handles become invalid.
    #[must_use]
    pub fn handle_epoch(&self) -> u64 {
        self.lock().handle_epoch
    }

    /// True until a transport failure is observed.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.lock().up
    }

    /// Read a connection-level option.
    pub fn get_option(&self, id: u32) -> Result<u32> {
        self.lock().get_option(id, self.config.timeout)
    }

    /// Write a connection-level option.
    pub fn set_option(&self, id: u32, value: u32) -> Result<()> {
        self.lock().set_option(id, value, self.config.timeout)
    }

    /// Switch the payload format mid-connection.
    pub fn set_data_format(&self, data_format: DataFormat) -> Result<()> {
        let mut inner = self.lock();
        inner.set_option(option::DATAFMT, data_format.as_u32(), self.config.timeout)?;
        inner.codec.format = data_format;
        Ok(())
    }

    /// Translate a `"record.field"` name into a handle pair.
    pub fn get_network_handle(&self, name: &str) -> Result<(u32, u32)> {
        let mut inner = self.lock();
        let payload = encode_name(name);
        let (_, reply) = inner.transact(
            MessageType::GetNetworkHandle,
            0,
            &payload,
            self.config.timeout,
        )?;
        let record = take_u32(&reply, 0)?;
        let field = take_u32(&reply, 4)?;
        Ok((record, field))
    }

    /// Ask for the datatype and dimensions of a named field.
    pub fn get_field_type(&self, name: &str) -> Result<(DataType, Vec<u32>)> {
        let mut inner = self.lock();
        let payload = encode_name(name);
        let (_, reply) = inner.transact(
            MessageType::GetFieldType,
            0,
            &payload,
            self.config.timeout,
        )?;
        let raw = take_u32(&reply, 0)?;
        let datatype = DataType::from_u32(raw)
            .ok_or_else(|| Error::Unsupported(format!("peer reports unknown datatype {raw}")))?;
        let ndims = take_u32(&reply, 4)? as usize;
        let mut dims = Vec::with_capacity(ndims);
        for i in 0..ndims {
            dims.push(take_u32(&reply, 8 + 4 * i)?);
        }
        Ok((datatype, dims))
    }

    /// Read a field addressed by name.
    pub fn get_array_by_name(
        &self,
        name: &str,
        datatype: DataType,
        dims: &[u32],
    ) -> Result<FieldValue> {
        let mut inner = self.lock();
        let payload = encode_name(name);
        let (header, reply) = inner.transact(
            MessageType::GetArrayByName,
            datatype.as_u32(),
            &payload,
            self.config.timeout,
        )?;
        inner.decode_reply(&header, &reply, datatype, dims)
    }

    /// Read a field addressed by a cached handle pair.
    pub fn get_array_by_handle(
        &self,
        handles: (u32, u32),
        datatype: DataType,
        dims: &[u32],
    ) -> Result<FieldValue> {
        let mut inner = self.lock();
        let payload = encode_handles(handles);
        let (header, reply) = inner.transact(
            MessageType::GetArrayByHandle,
            datatype.as_u32(),
            &payload,
            self.config.timeout,
        )?;
        inner.decode_reply(&header, &reply, datatype, dims)
    }

    /// Write a field addressed by name.
    pub fn put_array_by_name(&self, name: &str, value: &FieldValue) -> Result<()> {
        let mut inner = self.lock();
        let mut payload = encode_padded_name(name);
        payload.extend_from_slice(&format::encode_value(value, &inner.codec)?);
        inner.transact(
            MessageType::PutArrayByName,
            value.datatype().as_u32(),
            &payload,
            self.config.timeout,
        )?;
        Ok(())
    }

    /// Write a field addressed by a cached handle pair.
    pub fn put_array_by_handle(&self, handles: (u32, u32), value: &FieldValue) -> Result<()> {
        let mut inner = self.lock();
        let mut payload = encode_handles(handles);
        payload.extend_from_slice(&format::encode_value(value, &inner.codec)?);
        inner.transact(
            MessageType::PutArrayByHandle,
            value.datatype().as_u32(),
            &payload,
            self.config.timeout,
        )?;
        Ok(())
    }

    /// Read a per-field attribute.
    pub fn get_attribute(&self, handles: (u32, u32), attribute: u32) -> Result<f64> {
        let mut inner = self.lock();
        let mut payload = encode_handles(handles);
        payload.extend_from_slice(&attribute.to_be_bytes());
        let (_, reply) = inner.transact(
            MessageType::GetAttribute,
            0,
            &payload,
            self.config.timeout,
        )?;
        let bits = take_u64(&reply, 0)?;
        Ok(f64::from_bits(bits))
    }

    /// Write a per-field attribute.
    pub fn set_attribute(&self, handles: (u32, u32), attribute: u32, value: f64) -> Result<()> {
        let mut inner = self.lock();
        let mut payload = encode_handles(handles);
        payload.extend_from_slice(&attribute.to_be_bytes());
        payload.extend_from_slice(&value.to_bits().to_be_bytes());
        inner.transact(MessageType::SetAttribute, 0, &payload, self.config.timeout)?;
        Ok(())
    }

    /// Subscribe to notifications for a field and register its handler.
    ///
    /// Returns the server-assigned callback id. Handlers run while the
    /// connection lock is held and must not call back into it.
    pub fn add_callback(
        &self,
        handles: (u32, u32),
        callback_type: CallbackType,
        handler: CallbackHandler,
    ) -> Result<u32> {
        let mut inner = self.lock();
        let mut payload = encode_handles(handles);
        payload.extend_from_slice(&callback_type.as_u32().to_be_bytes());
        let (_, reply) = inner.transact(
            MessageType::AddCallback,
            0,
            &payload,
            self.config.timeout,
        )?;
        let id = take_u32(&reply, 0)?;
        inner.callbacks.insert(id, handler);
        Ok(id)
    }

    /// Unsubscribe and drop the handler.
    pub fn delete_callback(&self, id: u32) -> Result<()> {
        let mut inner = self.lock();
        inner.transact(
            MessageType::DeleteCallback,
            0,
            &id.to_be_bytes(),
            self.config.timeout,
        )?;
        inner.callbacks.remove(&id);
        Ok(())
    }

    /// Drain and dispatch callback frames for up to `timeout`.
    ///
    /// Returns the number of callbacks delivered. A quiet line is not an
    /// error.
    pub fn process_pending_callbacks(&self, timeout: Duration) -> Result<usize> {
        let mut inner = self.lock();
        let deadline = Instant::now() + timeout;
        let mut delivered = 0;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(delivered);
            };
            let frame = match inner.transport.recv_frame(remaining) {
                Ok(frame) => frame,
                Err(Error::TimedOut(_)) => return Ok(delivered),
                Err(other) => {
                    inner.up = false;
                    return Err(other);
                }
            };
            let (header, payload) = NetHeader::split_frame(&frame)?;
            if header.is_callback() {
                inner.dispatch_callback(&header, payload);
                delivered += 1;
            } else {
                warn!(message_type = format_args!("{:#x}", header.message_type),
                      "discarding unsolicited frame");
            }
        }
    }

    /// Reconnect the transport and re-run negotiation if the connection
    /// has failed. Bumps the handle epoch so every cached handle pair is
    /// re-resolved.
    pub fn reconnect_if_down(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.up {
            return Ok(());
        }
        inner.transport.reconnect()?;
        inner.up = true;
        inner.handle_epoch += 1;
        self.negotiate(&mut inner)?;
        let info = format!("{} {}", self.config.username, self.config.program_name);
        inner.transact(
            MessageType::SetClientInfo,
            0,
            info.as_bytes(),
            self.config.timeout,
        )?;
        debug!(peer = %inner.transport.peer(), epoch = inner.handle_epoch, "reconnected");
        Ok(())
    }
}

impl Inner {
    fn transact(
        &mut self,
        message_type: MessageType,
        data_type: u32,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(NetHeader, Vec<u8>)> {
        let result = self.transact_once(message_type, data_type, payload, timeout);
        if let Err(err) = &result {
            if err.is_recoverable() {
                self.up = false;
            }
        }
        result
    }

    fn transact_once(
        &mut self,
        message_type: MessageType,
        data_type: u32,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(NetHeader, Vec<u8>)> {
        let sequence = self.next_sequence;
        self.next_sequence = (self.next_sequence + 1) & SEQUENCE_MASK;

        let header = NetHeader::new(
            message_type.as_u32(),
            StatusCode::SUCCESS,
            data_type,
            sequence,
        );
        debug!(%message_type, sequence, payload_len = payload.len(), "sending request");
        self.transport.send_frame(&header.encode_frame(payload))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(Error::TimedOut(timeout))?;
            let frame = self.transport.recv_frame(remaining)?;
            let (reply, reply_payload) = NetHeader::split_frame(&frame)?;
            self.remote_header_length = reply.header_length;

            if reply.is_callback() {
                self.dispatch_callback(&reply, reply_payload);
                continue;
            }
            let matches = match reply.sequence() {
                Some(seq) => seq == sequence,
                // Old peers without a message-id word: accept the first
                // reply whose type answers our request.
                None => {
                    is_response(reply.message_type)
                        && base_type(reply.message_type) == message_type.as_u32()
                }
            };
            if !matches {
                warn!(
                    expected = sequence,
                    got = ?reply.sequence(),
                    message_type = format_args!("{:#x}", reply.message_type),
                    "discarding mismatched reply"
                );
                continue;
            }
            if !reply.status_code.is_success() {
                return Err(Error::Server {
                    code: reply.status_code,
                    message: String::from_utf8_lossy(reply_payload).into_owned(),
                });
            }
            return Ok((reply, reply_payload.to_vec()));
        }
    }

    fn dispatch_callback(&mut self, header: &NetHeader, payload: &[u8]) {
        let Some(id) = header.sequence() else {
            warn!("discarding callback frame without a message id");
            return;
        };
        let Some(datatype) = DataType::from_u32(header.data_type) else {
            warn!(id, raw = header.data_type, "discarding callback with unknown datatype");
            return;
        };
        let value = match format::decode_value_flat(payload, datatype, &self.codec) {
            Ok(value) => value,
            Err(err) => {
                warn!(id, %err, "discarding undecodable callback payload");
                return;
            }
        };
        if let Some(handler) = self.callbacks.get_mut(&id) {
            handler(id, value);
        } else {
            warn!(id, "callback for an unknown subscription");
        }
    }

    fn get_option(&mut self, id: u32, timeout: Duration) -> Result<u32> {
        let (_, reply) = self.transact(
            MessageType::GetOption,
            0,
            &id.to_be_bytes(),
            timeout,
        )?;
        take_u32(&reply, 0)
    }

    fn set_option(&mut self, id: u32, value: u32, timeout: Duration) -> Result<()> {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&id.to_be_bytes());
        payload[4..].copy_from_slice(&value.to_be_bytes());
        self.transact(MessageType::SetOption, 0, &payload, timeout)?;
        Ok(())
    }

    fn decode_reply(
        &self,
        header: &NetHeader,
        payload: &[u8],
        requested: DataType,
        dims: &[u32],
    ) -> Result<FieldValue> {
        // The reply header names the datatype the server actually sent,
        // which may differ from the request when the server coerces.
        let actual = DataType::from_u32(header.data_type).unwrap_or(requested);
        format::decode_value(payload, actual, dims, &self.codec)
    }
}

/// Name-only requests carry the `"record.field"` name as a NUL-terminated
/// string.
fn encode_name(name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(name.len() + 1);
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    buf
}

/// PUT_ARRAY_BY_NAME pads the name to [`FIELD_NAME_WIDTH`] with spaces so
/// the value always starts at a fixed offset. Overlong names are clipped.
fn encode_padded_name(name: &str) -> Vec<u8> {
    let mut buf = vec![b' '; FIELD_NAME_WIDTH];
    let len = name.len().min(FIELD_NAME_WIDTH);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

fn encode_handles(handles: (u32, u32)) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&handles.0.to_be_bytes());
    buf.extend_from_slice(&handles.1.to_be_bytes());
    buf
}

fn take_u32(payload: &[u8], offset: usize) -> Result<u32> {
    if payload.len() < offset + 4 {
        return Err(Error::TruncatedFrame {
            needed: offset + 4,
            got: payload.len(),
        });
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&payload[offset..offset + 4]);
    Ok(u32::from_be_bytes(word))
}

fn take_u64(payload: &[u8], offset: usize) -> Result<u64> {
    if payload.len() < offset + 8 {
        return Err(Error::TruncatedFrame {
            needed: offset + 8,
            got: payload.len(),
        });
    }
    let mut word = [0u8; 8];
    word.copy_from_slice(&payload[offset..offset + 8]);
    Ok(u64::from_be_bytes(word))
}
