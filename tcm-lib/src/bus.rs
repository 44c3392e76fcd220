use crate::error::TcmError;
use bytes::Bytes;
use embedded_hal::i2c::I2c;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Byte transport underneath the message layer.
///
/// One call is one bus transaction. `read` must return exactly `len` bytes.
pub trait Bus: Send + 'static {
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TcmError>> + Send;

    fn read(&mut self, len: usize) -> impl Future<Output = Result<Bytes, TcmError>> + Send;
}

/// `Bus` over a blocking `embedded-hal` I2C peripheral at a fixed address.
///
/// Transactions run on tokio's blocking pool so the runtime worker never
/// stalls on the kernel driver.
pub struct I2cBus<T> {
    i2c: Arc<Mutex<T>>,
    address: u8,
}

impl<T> I2cBus<T>
where
    T: I2c + Send + 'static,
{
    pub fn new(i2c: T, address: u8) -> Self {
        Self {
            i2c: Arc::new(Mutex::new(i2c)),
            address,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

fn bus_error<E: std::fmt::Debug>(err: E) -> TcmError {
    TcmError::Bus(format!("{err:?}"))
}

impl<T> Bus for I2cBus<T>
where
    T: I2c + Send + 'static,
{
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TcmError>> + Send {
        let i2c = self.i2c.clone();
        let address = self.address;
        let data = data.to_vec();
        async move {
            debug!(address, bytes = hex::encode(&data), "I2C Write");
            tokio::task::spawn_blocking(move || {
                let mut i2c = i2c
                    .lock()
                    .map_err(|_| TcmError::Bus("I2C adapter lock poisoned".to_string()))?;
                i2c.write(address, &data).map_err(bus_error)
            })
            .await
            .map_err(bus_error)?
        }
    }

    fn read(&mut self, len: usize) -> impl Future<Output = Result<Bytes, TcmError>> + Send {
        let i2c = self.i2c.clone();
        let address = self.address;
        async move {
            let data = tokio::task::spawn_blocking(move || {
                let mut i2c = i2c
                    .lock()
                    .map_err(|_| TcmError::Bus("I2C adapter lock poisoned".to_string()))?;
                let mut buf = vec![0u8; len];
                i2c.read(address, &mut buf).map_err(bus_error)?;
                Ok::<_, TcmError>(Bytes::from(buf))
            })
            .await
            .map_err(bus_error)??;
            debug!(address, bytes = hex::encode(&data), "I2C Read");
            Ok(data)
        }
    }
}
