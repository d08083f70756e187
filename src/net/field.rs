//! Client-side binding of one remote field.
//!
//! A [`NetworkField`] holds a `"record.field"` name and lazily resolves it
//! to a `(record_handle, field_handle)` pair. The cached pair is used for
//! the fast BY_HANDLE path; when it goes stale — after a reconnect, or
//! when the server reports a bad handle — the field re-resolves by name
//! and retries once, so callers never observe handle errors.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::record::{DataType, FieldValue};

use super::callback::{CallbackHandler, CallbackType};
use super::connection::ServerConnection;
use super::error::{Error, Result, StatusCode};

#[derive(Clone)]
struct Resolved {
    handles: (u32, u32),
    epoch: u64,
    datatype: DataType,
    dims: Vec<u32>,
}

/// One remote field, addressed as `"record.field"`.
pub struct NetworkField {
    server: Arc<ServerConnection>,
    name: String,
    resolved: Option<Resolved>,
}

impl NetworkField {
    /// Bind `name` on `server`. No frames are exchanged until first use.
    #[must_use]
    pub fn new(server: Arc<ServerConnection>, name: &str) -> Self {
        Self {
            server,
            name: name.to_owned(),
            resolved: None,
        }
    }

    /// The `"record.field"` name this field is bound to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once a handle pair has been cached and is still current.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.resolved
            .as_ref()
            .is_some_and(|r| r.epoch == self.server.handle_epoch())
    }

    /// The datatype the server declared for this field.
    pub fn remote_datatype(&mut self) -> Result<DataType> {
        Ok(self.resolve()?.datatype)
    }

    /// The dimensions the server declared for this field.
    pub fn remote_dims(&mut self) -> Result<Vec<u32>> {
        Ok(self.resolve()?.dims)
    }

    fn resolve(&mut self) -> Result<Resolved> {
        let epoch = self.server.handle_epoch();
        if let Some(resolved) = &self.resolved {
            if resolved.epoch == epoch {
                return Ok(resolved.clone());
            }
        }
        let handles = self.server.get_network_handle(&self.name)?;
        let (datatype, dims) = self.server.get_field_type(&self.name)?;
        debug!(field = %self.name, ?handles, %datatype, "resolved network field");
        let resolved = Resolved {
            handles,
            epoch,
            datatype,
            dims,
        };
        self.resolved = Some(resolved.clone());
        Ok(resolved)
    }

    /// Run `op` against the cached handles, re-resolving and retrying
    /// once when the handles turn out to be stale or the connection has
    /// to be re-established.
    fn with_handles<T>(
        &mut self,
        mut op: impl FnMut(&ServerConnection, (u32, u32)) -> Result<T>,
    ) -> Result<T> {
        let handles = self.resolve()?.handles;
        match op(&self.server, handles) {
            Ok(value) => Ok(value),
            Err(Error::Server { code, .. }) if code == StatusCode::BAD_HANDLE => {
                warn!(field = %self.name, "stale handle, re-resolving by name");
                self.resolved = None;
                let handles = self.resolve()?.handles;
                op(&self.server, handles)
            }
            Err(err) if err.is_recoverable() => {
                self.server.reconnect_if_down()?;
                self.resolved = None;
                let handles = self.resolve()?.handles;
                op(&self.server, handles)
            }
            Err(other) => Err(other),
        }
    }

    /// Read the field as `datatype` with the given dimensions.
    ///
    /// The received value is coerced to `datatype` if the server sent a
    /// different numeric type, and truncated (with a warning) if the
    /// server sent more elements than `dims` holds.
    pub fn get_array(&mut self, datatype: DataType, dims: &[u32]) -> Result<FieldValue> {
        let remote_dims = self.resolve()?.dims;
        let value = self.with_handles(|server, handles| {
            server.get_array_by_handle(handles, datatype, &remote_dims)
        })?;
        let value = if value.datatype() == datatype {
            value
        } else {
            value.coerce_to(datatype)?
        };
        if value.dims() == dims {
            return Ok(value);
        }
        warn!(field = %self.name, from = ?value.dims(), to = ?dims, "truncating received value");
        Ok(value.truncate_to_dims(dims)?)
    }

    /// Read the field as a scalar of `datatype`.
    pub fn get(&mut self, datatype: DataType) -> Result<FieldValue> {
        self.get_array(datatype, &[])
    }

    /// Write `value` to the field.
    pub fn put_array(&mut self, value: &FieldValue) -> Result<()> {
        self.with_handles(|server, handles| server.put_array_by_handle(handles, value))
    }

    /// Write a scalar to the field.
    pub fn put(&mut self, value: &FieldValue) -> Result<()> {
        self.put_array(value)
    }

    /// Read a per-field attribute.
    pub fn get_attribute(&mut self, attribute: u32) -> Result<f64> {
        self.with_handles(|server, handles| server.get_attribute(handles, attribute))
    }

    /// Write a per-field attribute.
    pub fn set_attribute(&mut self, attribute: u32, value: f64) -> Result<()> {
        self.with_handles(|server, handles| server.set_attribute(handles, attribute, value))
    }

    /// Subscribe to notifications for this field.
    pub fn add_callback(
        &mut self,
        callback_type: CallbackType,
        handler: CallbackHandler,
    ) -> Result<u32> {
        let handles = self.resolve()?.handles;
        self.server.add_callback(handles, callback_type, handler)
    }
}

#[cfg(test)]
mod tests {
    // NetworkField behavior against a live message stream is covered by
    // the stub-server integration tests; the unit layer only checks name
    // bookkeeping.
    use super::*;
    use crate::net::{ConnectionConfig, Transport};
    use std::time::Duration;

    struct DeadTransport;

    impl Transport for DeadTransport {
        fn send_frame(&mut self, _frame: &[u8]) -> Result<()> {
            Err(Error::NetworkIo("dead".into()))
        }

        fn recv_frame(&mut self, timeout: Duration) -> Result<Vec<u8>> {
            Err(Error::TimedOut(timeout))
        }

        fn reconnect(&mut self) -> Result<()> {
            Err(Error::NetworkIo("dead".into()))
        }

        fn peer(&self) -> String {
            "dead".into()
        }
    }

    #[test]
    fn starts_unresolved() {
        let server = Arc::new(ServerConnection::new(
            Box::new(DeadTransport),
            ConnectionConfig::default(),
        ));
        let field = NetworkField::new(server, "motor1.position");
        assert_eq!(field.name(), "motor1.position");
        assert!(!field.is_connected());
    }

    #[test]
    fn unreachable_server_yields_an_error() {
        let server = Arc::new(ServerConnection::new(
            Box::new(DeadTransport),
            ConnectionConfig::default(),
        ));
        let mut field = NetworkField::new(server, "motor1.position");
        assert!(field.get(crate::record::DataType::Double).is_err());
        assert!(field.remote_datatype().is_err());
        assert!(!field.is_connected());
    }
}
