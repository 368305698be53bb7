/*
 * Error taxonomy
 *
 * One Result error type threads through every blocking API in the crate:
 * scheduler waits, device acquisition, and the I2C/SPI client calls. Bus
 * transport failures are variants of this enum rather than a parallel type,
 * mirroring the single `dev/error.h` taxonomy the original system used for
 * both generic and bus errors.
 */

use core::fmt;

/// Kinds of failure a blocking primitive or driver call can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BermudaError {
    /// A blocking primitive exhausted its time budget.
    Timeout,
    /// The heap had no free node large enough to satisfy the request.
    NoMemory,
    /// Device lookup failed, or a device is already registered under the
    /// requested name.
    Unavailable,
    /// I2C: NACK received after the address byte.
    BusNackAddress,
    /// I2C: NACK received on a data byte outside the tolerated last-byte case.
    BusNackData,
    /// I2C: this controller lost arbitration to another master.
    BusArbitrationLost,
    /// I2C/SPI: a generic bus error was reported by the hardware.
    BusError,
    /// An API was called from a phase that doesn't permit it (e.g.
    /// `slave_respond` without a prior `slave_listen` completion).
    BadState,
}

impl fmt::Display for BermudaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BermudaError::Timeout => "operation timed out",
            BermudaError::NoMemory => "heap exhausted",
            BermudaError::Unavailable => "device unavailable",
            BermudaError::BusNackAddress => "bus NACK on address",
            BermudaError::BusNackData => "bus NACK on data",
            BermudaError::BusArbitrationLost => "bus arbitration lost",
            BermudaError::BusError => "bus error",
            BermudaError::BadState => "operation invalid in current state",
        };
        f.write_str(s)
    }
}

/// Result of a blocking wait-queue primitive: either the event arrived, or
/// the caller's timeout elapsed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Ok,
    Timeout,
}

pub type BermudaResult<T> = Result<T, BermudaError>;
