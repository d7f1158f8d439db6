//! Power meter acquisition over Modbus RTU.
//!
//! [`MeterClient`] polls two register blocks from the meter on its own thread
//! and publishes decoded [`MeterSnapshot`]s with a `connected` health flag.
//! Failures are classified by [`MeterError::class`]:
//!
//! | Error        | Class     | Effect                                    |
//! |--------------|-----------|-------------------------------------------|
//! | `Decode`     | `Skip`    | keep previous snapshot                    |
//! | `Transport`  | `Backoff` | `connected = false`, wait before retrying |
//! | `Protocol`, `Exception`, `NoResponse` | `Retry` | retry immediately |

pub mod client;
pub mod error;
pub mod mock;
pub mod modbus;
pub mod registers;
pub mod transport;

pub use client::MeterClient;
pub use error::{FaultClass, MeterError};
pub use mock::{MockMeterHandle, MockMeterTransport};
pub use registers::{MeterReading, MeterSnapshot};
pub use transport::{MeterTransport, SerialMeterTransport, SerialSettings};
