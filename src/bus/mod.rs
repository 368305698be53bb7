//! Protocol engines for the two hardware buses: I2C (master/slave TWI)
//! and SPI (master only). Each is a process-wide adapter singleton that
//! serializes client access through its own mutex wait queue.

pub mod i2c;
pub mod spi;

pub use i2c::I2cAdapter;
pub use spi::SpiAdapter;
