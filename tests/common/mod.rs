//! Shared harness for the integration tests: a deterministic in-process
//! server that services the wire protocol against a real [`Database`],
//! plus a small set of device drivers and a canned database description.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recnet::net::{
    attribute, base_type, decode_value, decode_value_flat, encode_value, option, CodecOptions,
    ConnectionConfig, DataFormat, Error as NetError, MessageType, NetHeader, Result as NetResult,
    ServerConnection, StatusCode, Transport, CALLBACK_BIT, FIELD_NAME_WIDTH, RESPONSE_BIT,
};
use recnet::record::{
    DataType, Database, Driver, DriverTable, FieldFlags, FieldRef, FieldTemplate, FieldValue,
    RecordId, RecordSupport, Result as RecordResult, Superclass,
};

/// Driver whose `finish_initialization` hook links the record to the
/// record named by its `leader` field.
struct FollowerSupport;

impl RecordSupport for FollowerSupport {
    fn finish_initialization(
        &mut self,
        db: &mut Database,
        record: RecordId,
    ) -> RecordResult<()> {
        let leader = db.record(record)?.value_by_name("leader")?.as_record_ref()?;
        if let FieldRef::Resolved(target) = leader {
            db.add_parent_dependency(record, target, true)?;
        }
        Ok(())
    }
}

/// The driver set used by every integration test.
pub fn test_drivers() -> DriverTable {
    let mut table = DriverTable::new();

    table
        .register(
            Driver::new(
                "soft_motor",
                Superclass::Device,
                "motor",
                101,
                1001,
                vec![
                    FieldTemplate::scalar(
                        "position",
                        1,
                        DataType::Double,
                        FieldFlags::new().with(FieldFlags::IN_DESCRIPTION),
                    ),
                    FieldTemplate::scalar(
                        "backlash",
                        2,
                        DataType::Double,
                        FieldFlags::new().with(FieldFlags::IN_DESCRIPTION),
                    ),
                    FieldTemplate::scalar("speed", 3, DataType::Double, FieldFlags::new())
                        .with_default(FieldValue::double(1.0)),
                    FieldTemplate::scalar(
                        "status_word",
                        4,
                        DataType::Hex,
                        FieldFlags::new().with(FieldFlags::READ_ONLY),
                    ),
                ],
            )
            .unwrap(),
        )
        .unwrap();

    table
        .register(
            Driver::new(
                "soft_scaler",
                Superclass::Device,
                "scaler",
                102,
                1002,
                vec![
                    FieldTemplate::array(
                        "counts",
                        1,
                        DataType::Long,
                        2,
                        FieldFlags::new().with(FieldFlags::IN_DESCRIPTION),
                    ),
                    FieldTemplate::scalar("gain", 2, DataType::Double, FieldFlags::new())
                        .with_default(FieldValue::double(1.0)),
                ],
            )
            .unwrap(),
        )
        .unwrap();

    table
        .register(
            Driver::new(
                "record_list",
                Superclass::Variable,
                "list",
                501,
                5001,
                vec![FieldTemplate {
                    name: "records".into(),
                    label_value: 1,
                    datatype: DataType::Record,
                    dims: vec![0],
                    flags: FieldFlags::new()
                        .with(FieldFlags::IN_DESCRIPTION)
                        .with(FieldFlags::VARARGS),
                    default: None,
                }],
            )
            .unwrap(),
        )
        .unwrap();

    table
        .register(
            Driver::new(
                "follower_motor",
                Superclass::Device,
                "motor",
                101,
                1003,
                vec![
                    FieldTemplate::scalar(
                        "leader",
                        1,
                        DataType::Record,
                        FieldFlags::new().with(FieldFlags::IN_DESCRIPTION),
                    ),
                    FieldTemplate::scalar(
                        "offset",
                        2,
                        DataType::Double,
                        FieldFlags::new().with(FieldFlags::IN_DESCRIPTION),
                    ),
                ],
            )
            .unwrap()
            .with_factory(|| Box::new(FollowerSupport)),
        )
        .unwrap();

    table
}

/// A loaded and initialized database with one motor and one scaler.
pub fn served_database() -> Database {
    let drivers = test_drivers();
    let mut db = Database::new();
    db.load_lines(
        &drivers,
        [
            "motor1  device motor  soft_motor  2.0 0.1",
            "scaler1 device scaler soft_scaler 100 200",
        ],
    )
    .unwrap();
    db.finish_load().unwrap();
    db
}

struct StubState {
    db: Database,
    codec: CodecOptions,
    native_format: DataFormat,
    supports_negotiation: bool,
    supports_64bit: bool,
    handle_salt: u32,
    dead: bool,
    queue: VecDeque<Vec<u8>>,
    subscriptions: HashMap<u32, (RecordId, usize)>,
    next_callback_id: u32,
    attributes: HashMap<(u32, u32, u32), f64>,
    client_info: Option<String>,
}

/// Test-side handle to the stub server's shared state.
pub struct StubServer {
    state: Arc<Mutex<StubState>>,
}

/// Transport half handed to the [`ServerConnection`] under test.
pub struct StubTransport {
    state: Arc<Mutex<StubState>>,
}

impl StubServer {
    pub fn new(db: Database, native_format: DataFormat) -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState {
                db,
                codec: CodecOptions::default(),
                native_format,
                supports_negotiation: true,
                supports_64bit: true,
                handle_salt: 100,
                dead: false,
                queue: VecDeque::new(),
                subscriptions: HashMap::new(),
                next_callback_id: 1,
                attributes: HashMap::new(),
                client_info: None,
            })),
        }
    }

    /// A server speaking only ASCII and predating option negotiation.
    pub fn new_legacy(db: Database) -> Self {
        let server = Self::new(db, DataFormat::Ascii);
        server.state.lock().unwrap().supports_negotiation = false;
        server
    }

    pub fn transport(&self) -> StubTransport {
        StubTransport {
            state: Arc::clone(&self.state),
        }
    }

    /// Sever the connection; the next I/O fails until a reconnect.
    pub fn kill(&self) {
        self.state.lock().unwrap().dead = true;
    }

    /// Invalidate every handle the server has ever issued, without
    /// dropping the connection. Stale handles get `BAD_HANDLE` replies.
    pub fn invalidate_handles(&self) {
        self.state.lock().unwrap().handle_salt += 1000;
    }

    /// Queue a callback notification carrying the subscribed field's
    /// current value.
    pub fn emit_callback(&self, id: u32) {
        let mut state = self.state.lock().unwrap();
        let (record, field_index) = state.subscriptions[&id];
        let value = state.db.read_field(record, field_index).unwrap().clone();
        let payload = encode_value(&value, &state.codec).unwrap();
        let frame = NetHeader::new(
            MessageType::Callback.as_u32(),
            StatusCode::SUCCESS,
            value.datatype().as_u32(),
            id | CALLBACK_BIT,
        )
        .encode_frame(&payload);
        state.queue.push_back(frame.to_vec());
    }

    pub fn client_info(&self) -> Option<String> {
        self.state.lock().unwrap().client_info.clone()
    }

    pub fn format(&self) -> DataFormat {
        self.state.lock().unwrap().codec.format
    }

    pub fn read_field(&self, name: &str) -> FieldValue {
        let state = self.state.lock().unwrap();
        let (id, index) = state.db.lookup_field(name).unwrap();
        state.db.read_field(id, index).unwrap().clone()
    }
}

/// Build a negotiated connection to a fresh stub server.
pub fn connected_pair(native_format: DataFormat) -> (Arc<ServerConnection>, StubServer) {
    let server = StubServer::new(served_database(), native_format);
    let config = ConnectionConfig {
        timeout: Duration::from_millis(200),
        ..ConnectionConfig::default()
    };
    let conn = ServerConnection::new(Box::new(server.transport()), config);
    conn.connect().unwrap();
    (Arc::new(conn), server)
}

impl Transport for StubTransport {
    fn send_frame(&mut self, frame: &[u8]) -> NetResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.dead {
            return Err(NetError::NetworkIo("connection reset by peer".into()));
        }
        state.service(frame);
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> NetResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        if state.dead {
            return Err(NetError::NetworkIo("connection reset by peer".into()));
        }
        state.queue.pop_front().ok_or(NetError::TimedOut(timeout))
    }

    fn reconnect(&mut self) -> NetResult<()> {
        let mut state = self.state.lock().unwrap();
        // A restarted server forgets the negotiated format and every
        // handle it ever issued.
        state.dead = false;
        state.queue.clear();
        state.codec = CodecOptions::default();
        state.handle_salt += 1000;
        Ok(())
    }

    fn peer(&self) -> String {
        "stub".into()
    }
}

impl StubState {
    fn service(&mut self, frame: &[u8]) {
        let (header, payload) = NetHeader::split_frame(frame).expect("client sent a bad frame");
        let sequence = header.sequence().unwrap_or(0);
        let message_type = MessageType::from_u32(base_type(header.message_type));
        let result = match message_type {
            Some(t) => self.dispatch(t, header.data_type, payload),
            None => Err(NetError::Unsupported(format!(
                "message type {:#x}",
                header.message_type
            ))),
        };
        let raw_type = base_type(header.message_type) | RESPONSE_BIT;
        let frame = match result {
            Ok((data_type, reply)) => {
                NetHeader::new(raw_type, StatusCode::SUCCESS, data_type, sequence)
                    .encode_frame(&reply)
            }
            Err(err) => NetHeader::new(raw_type, err.status_code(), 0, sequence)
                .encode_frame(err.to_string().as_bytes()),
        };
        self.queue.push_back(frame.to_vec());
    }

    fn dispatch(
        &mut self,
        message_type: MessageType,
        data_type: u32,
        payload: &[u8],
    ) -> NetResult<(u32, Vec<u8>)> {
        match message_type {
            MessageType::GetOption => self.get_option(payload),
            MessageType::SetOption => self.set_option(payload),
            MessageType::SetClientInfo => {
                self.client_info = Some(String::from_utf8_lossy(payload).into_owned());
                Ok((0, Vec::new()))
            }
            MessageType::GetNetworkHandle => {
                let name = take_name(payload)?;
                let (id, field_index) = self.db.lookup_field(&name)?;
                let record_handle = self.db.record(id)?.handle() + self.handle_salt;
                let mut reply = record_handle.to_be_bytes().to_vec();
                reply.extend_from_slice(&(field_index as u32).to_be_bytes());
                Ok((0, reply))
            }
            MessageType::GetFieldType => {
                let name = take_name(payload)?;
                let (id, field_index) = self.db.lookup_field(&name)?;
                let value = self.db.read_field(id, field_index)?;
                let mut reply = value.datatype().as_u32().to_be_bytes().to_vec();
                reply.extend_from_slice(&(value.dims().len() as u32).to_be_bytes());
                for dim in value.dims() {
                    reply.extend_from_slice(&dim.to_be_bytes());
                }
                Ok((0, reply))
            }
            MessageType::GetArrayByName => {
                let name = take_name(payload)?;
                let (id, field_index) = self.db.lookup_field(&name)?;
                self.read_reply(id, field_index)
            }
            MessageType::GetArrayByHandle => {
                let (id, field_index) = self.handles_from(payload)?;
                self.read_reply(id, field_index)
            }
            MessageType::PutArrayByName => {
                let name = take_padded_name(payload)?;
                let (id, field_index) = self.db.lookup_field(&name)?;
                self.write_from_wire(id, field_index, data_type, &payload[FIELD_NAME_WIDTH..])
            }
            MessageType::PutArrayByHandle => {
                let (id, field_index) = self.handles_from(payload)?;
                self.write_from_wire(id, field_index, data_type, &payload[8..])
            }
            MessageType::GetAttribute => {
                let (id, field_index) = self.handles_from(payload)?;
                let attr = take_u32(payload, 8)?;
                let value = self.attribute_value(id, field_index, attr)?;
                Ok((0, value.to_bits().to_be_bytes().to_vec()))
            }
            MessageType::SetAttribute => {
                let (id, field_index) = self.handles_from(payload)?;
                let attr = take_u32(payload, 8)?;
                let bits = take_u64(payload, 12)?;
                let raw = self.db.record(id)?.handle();
                self.attributes
                    .insert((raw, field_index as u32, attr), f64::from_bits(bits));
                Ok((0, Vec::new()))
            }
            MessageType::AddCallback => {
                let (id, field_index) = self.handles_from(payload)?;
                let callback_id = self.next_callback_id;
                self.next_callback_id += 1;
                self.subscriptions.insert(callback_id, (id, field_index));
                Ok((0, callback_id.to_be_bytes().to_vec()))
            }
            MessageType::DeleteCallback => {
                let id = take_u32(payload, 0)?;
                self.subscriptions.remove(&id);
                Ok((0, Vec::new()))
            }
            MessageType::Callback => Err(NetError::IllegalArgument(
                "clients do not send callback frames".into(),
            )),
        }
    }

    fn get_option(&mut self, payload: &[u8]) -> NetResult<(u32, Vec<u8>)> {
        let id = take_u32(payload, 0)?;
        if !self.supports_negotiation {
            return Err(NetError::Unsupported("options".into()));
        }
        let value = match id {
            option::NATIVE_DATAFMT => self.native_format.as_u32(),
            option::DATAFMT => self.codec.format.as_u32(),
            option::USE_64BIT_LONGS => u32::from(self.codec.use_64bit_longs),
            option::WORDSIZE => 64,
            other => {
                return Err(NetError::IllegalArgument(format!("option {other}")));
            }
        };
        Ok((0, value.to_be_bytes().to_vec()))
    }

    fn set_option(&mut self, payload: &[u8]) -> NetResult<(u32, Vec<u8>)> {
        let id = take_u32(payload, 0)?;
        let value = take_u32(payload, 4)?;
        if !self.supports_negotiation {
            return Err(NetError::Unsupported("options".into()));
        }
        match id {
            option::DATAFMT => {
                self.codec.format = DataFormat::from_u32(value)
                    .ok_or_else(|| NetError::IllegalArgument(format!("data format {value}")))?;
            }
            option::USE_64BIT_LONGS => {
                if !self.supports_64bit {
                    return Err(NetError::Unsupported("64-bit longs".into()));
                }
                self.codec.use_64bit_longs = value != 0;
            }
            other => {
                return Err(NetError::IllegalArgument(format!("option {other}")));
            }
        }
        Ok((0, Vec::new()))
    }

    fn handles_from(&self, payload: &[u8]) -> NetResult<(RecordId, usize)> {
        let record_handle = take_u32(payload, 0)?;
        let field_handle = take_u32(payload, 4)?;
        let bad = || NetError::Server {
            code: StatusCode::BAD_HANDLE,
            message: format!("handle {record_handle} is not valid"),
        };
        let raw = record_handle.checked_sub(self.handle_salt).ok_or_else(bad)?;
        let id = self.db.record_by_handle(raw).map_err(|_| bad())?;
        Ok((id, field_handle as usize))
    }

    fn read_reply(&self, id: RecordId, field_index: usize) -> NetResult<(u32, Vec<u8>)> {
        let value = self.db.read_field(id, field_index)?;
        let payload = encode_value(value, &self.codec)?;
        Ok((value.datatype().as_u32(), payload.to_vec()))
    }

    fn write_from_wire(
        &mut self,
        id: RecordId,
        field_index: usize,
        data_type: u32,
        payload: &[u8],
    ) -> NetResult<(u32, Vec<u8>)> {
        let datatype = DataType::from_u32(data_type)
            .ok_or_else(|| NetError::Unsupported(format!("datatype {data_type}")))?;
        let field_value = self.db.read_field(id, field_index)?;
        let field_datatype = field_value.datatype();
        let field_dims = field_value.dims().to_vec();
        let value = if datatype == DataType::String || field_dims.len() > 1 {
            decode_value(payload, datatype, &field_dims, &self.codec)?
        } else {
            let flat = decode_value_flat(payload, datatype, &self.codec)?;
            if field_dims.is_empty() {
                flat.truncate_to_dims(&[])?
            } else {
                flat
            }
        };
        let value = if value.datatype() == field_datatype {
            value
        } else {
            value.coerce_to(field_datatype)?
        };
        self.db.write_field(id, field_index, value, true)?;
        Ok((0, Vec::new()))
    }

    fn attribute_value(&self, id: RecordId, field_index: usize, attr: u32) -> NetResult<f64> {
        let raw = self.db.record(id)?.handle();
        if let Some(value) = self.attributes.get(&(raw, field_index as u32, attr)) {
            return Ok(*value);
        }
        let record = self.db.record(id)?;
        let field = record
            .fields()
            .get(field_index)
            .ok_or_else(|| NetError::NotFound(format!("field index {field_index}")))?;
        let value = match attr {
            attribute::VALUE_CHANGE_THRESHOLD => 0.0,
            attribute::POLL => f64::from(u8::from(field.flags().has(FieldFlags::POLL))),
            attribute::READ_ONLY => f64::from(u8::from(field.flags().has(FieldFlags::READ_ONLY))),
            attribute::NO_ACCESS => f64::from(u8::from(field.flags().has(FieldFlags::NO_ACCESS))),
            other => {
                return Err(NetError::IllegalArgument(format!("attribute {other}")));
            }
        };
        Ok(value)
    }
}

fn take_u32(payload: &[u8], offset: usize) -> NetResult<u32> {
    let slice = payload
        .get(offset..offset + 4)
        .ok_or(NetError::TruncatedFrame {
            needed: offset + 4,
            got: payload.len(),
        })?;
    let mut word = [0u8; 4];
    word.copy_from_slice(slice);
    Ok(u32::from_be_bytes(word))
}

fn take_u64(payload: &[u8], offset: usize) -> NetResult<u64> {
    let slice = payload
        .get(offset..offset + 8)
        .ok_or(NetError::TruncatedFrame {
            needed: offset + 8,
            got: payload.len(),
        })?;
    let mut word = [0u8; 8];
    word.copy_from_slice(slice);
    Ok(u64::from_be_bytes(word))
}

/// Name-only requests carry a NUL-terminated string.
fn take_name(payload: &[u8]) -> NetResult<String> {
    let end = payload
        .iter()
        .position(|b| *b == 0)
        .ok_or(NetError::IllegalArgument(
            "field name is not NUL-terminated".into(),
        ))?;
    String::from_utf8(payload[..end].to_vec())
        .map_err(|_| NetError::IllegalArgument("field name is not valid UTF-8".into()))
}

/// PUT_ARRAY_BY_NAME carries the name space-padded to a fixed width.
fn take_padded_name(payload: &[u8]) -> NetResult<String> {
    let raw = payload
        .get(..FIELD_NAME_WIDTH)
        .ok_or(NetError::TruncatedFrame {
            needed: FIELD_NAME_WIDTH,
            got: payload.len(),
        })?;
    let name = String::from_utf8(raw.to_vec())
        .map_err(|_| NetError::IllegalArgument("field name is not valid UTF-8".into()))?;
    Ok(name.trim_end().to_owned())
}
