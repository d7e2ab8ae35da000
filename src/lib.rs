#![cfg_attr(not(test), no_std)]

//! A platform-agnostic driver for 4-20 mA current-loop receiver and
//! transmitter boards, built on the [`embedded-hal`] traits.
//!
//! [`embedded-hal`]: https://github.com/rust-embedded/embedded-hal
//!
//! Supported hardware:
//!
//! - Current-loop receivers based on the MCP3201 12-bit SPI ADC, such as the
//!   MIKROE-1387 board (max SPI clock 1.6 MHz, max 100 ksps)
//! - Current-loop transmitters based on the MCP4921 12-bit SPI DAC, such as
//!   the MIKROE-1296 board (max SPI clock 20 MHz, settling time 4.5 µs)
//!
//! Both device drivers are generic over an SPI bus and a chip-select
//! [`OutputPin`](embedded_hal::digital::v2::OutputPin). Each driver owns its
//! chip-select pin and borrows the bus for one exchange at a time, so a
//! [`Receiver`] and a [`Transmitter`] can share a single bus. Raw bit values
//! are mapped to and from physical currents by a caller-supplied two-point
//! [`Calibration`].
//!
//! # Filtering
//!
//! Single receiver readings fluctuate a lot. To combat this, the receiver
//! maintains an exponential moving average of oversampled readings; it does
//! not store an array of samples and is hence very memory efficient. The
//! readings are low-pass filtered with a smoothing factor that is derived,
//! on every sample, from the interval that actually elapsed since the
//! previous sample. [`Receiver::poll`] must be called from the main loop at
//! a faster pace than the configured oversampling interval; it decides
//! non-blockingly whether it is time to take a sample.
//!
//! # Fault readings
//!
//! A broken loop, a disconnected device or an error at the transmitter side
//! shows up on the receive side as a current at or below 3.8 mA. Such
//! readings are reported as `NAN` rather than as a small current, whether
//! they come from an instantaneous read or from the moving average. Bus
//! errors, in contrast, are reported as [`Error`].

mod calibration;
mod ema;
mod fault;
mod pressure;
mod receiver;
mod transmitter;

pub use calibration::Calibration;
pub use ema::Ema;
pub use fault::{classify, FAULT_THRESHOLD_MA};
pub use pressure::PressureCalibration;
pub use receiver::Receiver;
pub use transmitter::Transmitter;

use embedded_hal::spi::{Mode, Phase, Polarity};

/// All possible errors in this crate.
///
/// A current-loop fault is not an error: it is an expected operating
/// condition, signalled by `NAN` readings. See [`classify`].
#[derive(Debug, Clone, PartialEq)]
pub enum Error<SpiE, PinE> {
    /// SPI bus error
    Spi(SpiE),
    /// Chip-select pin error
    Pin(PinE),
}

/// SPI mode both chips speak (CPOL = 0, CPHA = 0).
pub const MODE: Mode = Mode {
    phase: Phase::CaptureOnFirstTransition,
    polarity: Polarity::IdleLow,
};

/// Default SPI clock frequency in Hz, comfortable for both chips.
pub const DEFAULT_SPI_CLOCK_HZ: u32 = 1_000_000;

/// Maximum SPI clock frequency in Hz of the MCP3201 ADC (receiver).
pub const RECEIVER_MAX_SPI_CLOCK_HZ: u32 = 1_600_000;

/// Maximum SPI clock frequency in Hz of the MCP4921 DAC (transmitter).
pub const TRANSMITTER_MAX_SPI_CLOCK_HZ: u32 = 20_000_000;
