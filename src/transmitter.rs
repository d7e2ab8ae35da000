use embedded_hal::{blocking::spi::Write, digital::v2::OutputPin};

use crate::{calibration::Calibration, Error};

/// MCP4921 command register, high nibble: write-through, unbuffered, 1x
/// gain, output enabled. The low nibble carries the top 4 data bits.
const CONFIG_BITS: u8 = 0x30;

/// Driver for a 4-20 mA current-loop transmitter built around the MCP4921
/// 12-bit SPI DAC, such as the MIKROE-1296 board.
///
/// The driver owns the chip-select pin and borrows the SPI bus for the
/// duration of each exchange, so it can share the bus with a
/// [`Receiver`](crate::Receiver).
///
/// Set-points are deterministic, so unlike the receive side there is no
/// filtering here: [`set_ma`](Transmitter::set_ma) writes the value and
/// remembers the raw code it commanded, which
/// [`last_raw`](Transmitter::last_raw) returns without touching the bus.
#[derive(Debug)]
pub struct Transmitter<CS> {
    cs: CS,
    calibration: Calibration,
    last_raw: u16,
}

impl<CS: OutputPin> Transmitter<CS> {
    /// Returns a transmitter using the provided calibration.
    ///
    /// The calibration points must be distinct, which is checked when
    /// running in debug mode.
    pub fn new(cs: CS, calibration: Calibration) -> Self {
        debug_assert!(
            calibration.p1_raw != calibration.p2_raw && calibration.p1_ma != calibration.p2_ma,
            "calibration points must be distinct"
        );

        Self {
            cs,
            calibration,
            last_raw: 0,
        }
    }

    /// Puts the chip-select line into its idle state and drives the output
    /// to a safe 4 mA, so an initialized transmitter never floats at an
    /// undefined current.
    pub fn begin<SPI, SpiE>(&mut self, spi: &mut SPI) -> Result<(), Error<SpiE, CS::Error>>
    where
        SPI: Write<u8, Error = SpiE>,
    {
        self.cs.set_high().map_err(Error::Pin)?;
        self.set_ma(spi, 4.0)
    }

    /// Sets the output current in mA.
    ///
    /// The current is mapped to the nearest raw 12-bit code through the
    /// calibration and written in a single two-byte exchange, with the
    /// configuration bits folded into the high byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use four_twenty_ma::{Calibration, Transmitter};
    /// # use embedded_hal_mock::{
    /// #     pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction},
    /// #     spi::{Mock as SpiMock, Transaction as SpiTransaction},
    /// # };
    /// # let cs = PinMock::new(&[
    /// #     PinTransaction::set(PinState::Low),
    /// #     PinTransaction::set(PinState::High),
    /// # ]);
    /// # let mut spi = SpiMock::new(&[SpiTransaction::write(vec![0x39, 0x60])]);
    /// let calibration = Calibration {
    ///     p1_ma: 4.0,
    ///     p2_ma: 20.0,
    ///     p1_raw: 800,
    ///     p2_raw: 4000,
    /// };
    ///
    /// let mut transmitter = Transmitter::new(cs, calibration);
    /// assert_eq!(transmitter.set_ma(&mut spi, 12.0), Ok(()));
    /// assert_eq!(transmitter.last_raw(), 2400);
    /// ```
    pub fn set_ma<SPI, SpiE>(&mut self, spi: &mut SPI, ma: f32) -> Result<(), Error<SpiE, CS::Error>>
    where
        SPI: Write<u8, Error = SpiE>,
    {
        let raw = self.calibration.ma_to_raw(ma);
        let buffer = [CONFIG_BITS | ((raw >> 8) as u8 & 0x0F), raw as u8];

        self.cs.set_low().map_err(Error::Pin)?;
        let result = spi.write(&buffer);
        self.cs.set_high().map_err(Error::Pin)?;
        result.map_err(Error::Spi)?;

        self.last_raw = raw;
        Ok(())
    }

    /// The raw bit value belonging to the last commanded current. Readable
    /// without a bus transaction.
    pub fn last_raw(&self) -> u16 {
        self.last_raw
    }

    /// Destroys the driver and returns the chip-select pin.
    pub fn free(self) -> CS {
        self.cs
    }
}
