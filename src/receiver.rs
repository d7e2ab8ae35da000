use embedded_hal::{blocking::spi::Transfer, digital::v2::OutputPin};

use crate::{calibration::Calibration, ema::Ema, fault::classify, Error};

/// Driver for a 4-20 mA current-loop receiver built around the MCP3201
/// 12-bit SPI ADC, such as the MIKROE-1387 board.
///
/// The driver owns the chip-select pin and borrows the SPI bus for the
/// duration of each exchange, so a receiver and a [`Transmitter`] can share
/// one bus. Chip-select is asserted for exactly one exchange at a time and
/// released unconditionally, even when the bus errors out mid-exchange.
///
/// Single readings fluctuate a lot, so besides the instantaneous
/// [`read_raw`](Receiver::read_raw) and [`read_ma`](Receiver::read_ma) the
/// driver keeps an exponential moving average of oversampled readings.
/// [`poll`](Receiver::poll) must be called repeatedly from the main loop,
/// ideally at a faster pace than the configured oversampling interval;
/// [`filtered_raw`](Receiver::filtered_raw) and
/// [`filtered_ma`](Receiver::filtered_ma) expose the running estimate.
///
/// A broken loop or disconnected transmitter shows up as a low current, not
/// as a bus error: readings at or below the fault threshold are reported as
/// `NAN`. See [`classify`](crate::classify).
///
/// [`Transmitter`]: crate::Transmitter
#[derive(Debug)]
pub struct Receiver<CS> {
    cs: CS,
    calibration: Calibration,
    filter: Ema,
}

impl<CS: OutputPin> Receiver<CS> {
    /// Returns a receiver with the default oversampling configuration
    /// (2000 µs interval, 10 Hz cut-off).
    ///
    /// The calibration points must be distinct, which is checked when
    /// running in debug mode.
    pub fn new(cs: CS, calibration: Calibration) -> Self {
        Self::with_filter(
            cs,
            calibration,
            Ema::DEFAULT_INTERVAL_US,
            Ema::DEFAULT_CUTOFF_HZ,
        )
    }

    /// Returns a receiver that oversamples every `interval_us` microseconds
    /// and low-passes the readings with the given cut-off frequency in Hz.
    pub fn with_filter(cs: CS, calibration: Calibration, interval_us: u32, cutoff_hz: f32) -> Self {
        debug_assert!(
            calibration.p1_raw != calibration.p2_raw && calibration.p1_ma != calibration.p2_ma,
            "calibration points must be distinct"
        );

        Self {
            cs,
            calibration,
            filter: Ema::new(interval_us, cutoff_hz),
        }
    }

    /// Puts the chip-select line into its idle (deasserted) state.
    ///
    /// Bus and pin setup beyond that is the HAL's job; see [`MODE`] and the
    /// clock constants for the bus parameters the chip expects.
    ///
    /// [`MODE`]: crate::MODE
    pub fn begin(&mut self) -> Result<(), CS::Error> {
        self.cs.set_high()
    }

    /// Reads the ADC once and returns the raw 12-bit value.
    ///
    /// Performs a single two-byte exchange. The MCP3201 frames its response
    /// oddly: 5 don't-care bits in the first byte, then a null bit, the
    /// 12-bit reading and a trailing low bit.
    pub fn read_raw<SPI, SpiE>(&mut self, spi: &mut SPI) -> Result<u16, Error<SpiE, CS::Error>>
    where
        SPI: Transfer<u8, Error = SpiE>,
    {
        let mut buffer = [0xFF, 0xFF];

        self.cs.set_low().map_err(Error::Pin)?;
        let result = spi.transfer(&mut buffer);
        self.cs.set_high().map_err(Error::Pin)?;

        let data = result.map_err(Error::Spi)?;
        Ok((((data[0] & 0x1F) as u16) << 8 | data[1] as u16) >> 1)
    }

    /// Reads the ADC once and returns the current in mA, or `NAN` when the
    /// loop is in a fault state.
    ///
    /// Bypasses the moving average entirely.
    ///
    /// # Examples
    ///
    /// ```
    /// use four_twenty_ma::{Calibration, Receiver};
    /// # use embedded_hal_mock::{
    /// #     pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction},
    /// #     spi::{Mock as SpiMock, Transaction as SpiTransaction},
    /// # };
    /// # let cs = PinMock::new(&[
    /// #     PinTransaction::set(PinState::Low),
    /// #     PinTransaction::set(PinState::High),
    /// # ]);
    /// # let mut spi = SpiMock::new(&[SpiTransaction::transfer(
    /// #     vec![0xFF, 0xFF],
    /// #     vec![0x06, 0x40],
    /// # )]);
    /// let calibration = Calibration {
    ///     p1_ma: 4.0,
    ///     p2_ma: 20.0,
    ///     p1_raw: 800,
    ///     p2_raw: 4000,
    /// };
    ///
    /// let mut receiver = Receiver::new(cs, calibration);
    /// assert_eq!(receiver.read_ma(&mut spi), Ok(4.0));
    /// ```
    pub fn read_ma<SPI, SpiE>(&mut self, spi: &mut SPI) -> Result<f32, Error<SpiE, CS::Error>>
    where
        SPI: Transfer<u8, Error = SpiE>,
    {
        let raw = self.read_raw(spi)?;
        Ok(self.raw_to_ma(raw as f32))
    }

    /// Maps a (possibly fractional) raw bit value through the calibration
    /// and classifies the result against the fault threshold.
    pub fn raw_to_ma(&self, raw: f32) -> f32 {
        classify(self.calibration.raw_to_ma(raw))
    }

    /// Takes one oversampled reading if the oversampling interval has
    /// elapsed, blending it into the moving average.
    ///
    /// This is the non-blocking tick of the filter: call it as often as
    /// possible and it decides, from the caller's monotonic microsecond
    /// clock, whether it is time to touch the bus. Returns `Ok(true)` when a
    /// new sample was read and absorbed, `Ok(false)` when it was not yet
    /// time.
    ///
    /// # Examples
    ///
    /// ```
    /// use four_twenty_ma::{Calibration, Receiver};
    /// # use embedded_hal_mock::{
    /// #     pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction},
    /// #     spi::{Mock as SpiMock, Transaction as SpiTransaction},
    /// # };
    /// # let cs = PinMock::new(&[
    /// #     PinTransaction::set(PinState::Low),
    /// #     PinTransaction::set(PinState::High),
    /// # ]);
    /// # let mut spi = SpiMock::new(&[SpiTransaction::transfer(
    /// #     vec![0xFF, 0xFF],
    /// #     vec![0x06, 0x40],
    /// # )]);
    /// # let calibration = Calibration {
    /// #     p1_ma: 4.0,
    /// #     p2_ma: 20.0,
    /// #     p1_raw: 800,
    /// #     p2_raw: 4000,
    /// # };
    /// let mut receiver = Receiver::new(cs, calibration);
    ///
    /// assert_eq!(receiver.poll(&mut spi, 2_000), Ok(true));
    /// assert_eq!(receiver.poll(&mut spi, 2_500), Ok(false));
    /// assert_eq!(receiver.filtered_raw(), 800.0);
    /// ```
    pub fn poll<SPI, SpiE>(
        &mut self,
        spi: &mut SPI,
        now_us: u32,
    ) -> Result<bool, Error<SpiE, CS::Error>>
    where
        SPI: Transfer<u8, Error = SpiE>,
    {
        if !self.filter.due(now_us) {
            return Ok(false);
        }

        let raw = self.read_raw(spi)?;
        self.filter.absorb(now_us, raw);
        Ok(true)
    }

    /// The moving average of the readings as a fractional bit value.
    ///
    /// `NAN` until the first sample has been absorbed by
    /// [`poll`](Receiver::poll), which is the same sentinel a fault reading
    /// produces: a caller reading too early sees a fault, not a bogus value.
    pub fn filtered_raw(&self) -> f32 {
        self.filter.output()
    }

    /// The moving average of the readings in mA, or `NAN` when the loop is
    /// in a fault state.
    ///
    /// Fault classification applies to the running estimate, not to the
    /// individual samples: one noisy low sample that gets smoothed away does
    /// not trigger a fault, a persistently low estimate does.
    pub fn filtered_ma(&self) -> f32 {
        self.raw_to_ma(self.filter.output())
    }

    /// The interval in µs between the two most recent oversampled readings.
    /// Diagnostic only.
    pub fn last_obtained_interval_us(&self) -> u32 {
        self.filter.last_obtained_interval_us()
    }

    /// Destroys the driver and returns the chip-select pin.
    pub fn free(self) -> CS {
        self.cs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::{
        pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction},
        spi::{Mock as SpiMock, Transaction as SpiTransaction},
    };
    use libm::expf;

    fn calibration() -> Calibration {
        Calibration {
            p1_ma: 4.0,
            p2_ma: 20.0,
            p1_raw: 800,
            p2_raw: 4000,
        }
    }

    fn cs(exchanges: usize) -> PinMock {
        let mut expectations = Vec::with_capacity(exchanges * 2);
        for _ in 0..exchanges {
            expectations.push(PinTransaction::set(PinState::Low));
            expectations.push(PinTransaction::set(PinState::High));
        }
        PinMock::new(&expectations)
    }

    fn spi(frames: &[[u8; 2]]) -> SpiMock {
        let expectations: Vec<_> = frames
            .iter()
            .map(|frame| SpiTransaction::transfer(vec![0xFF, 0xFF], frame.to_vec()))
            .collect();
        SpiMock::new(&expectations)
    }

    #[test]
    fn reconstructs_unaligned_frames() {
        // 5 don't-care bits, a null bit, the 12-bit reading, a trailing low
        // bit. Raw value v arrives as ((v << 1) in the masked 13 bits).
        for (frame, expected) in [
            ([0xFF, 0xFF], 4095),
            ([0x06, 0x40], 800),
            ([0xE0, 0x01], 0),
            ([0x00, 0x00], 0),
        ] {
            let mut receiver = Receiver::new(cs(1), calibration());
            let mut spi = spi(&[frame]);

            assert_eq!(receiver.read_raw(&mut spi), Ok(expected));

            spi.done();
            receiver.free().done();
        }
    }

    #[test]
    fn begin_deasserts_chip_select() {
        let pin = PinMock::new(&[PinTransaction::set(PinState::High)]);
        let mut receiver = Receiver::new(pin, calibration());

        receiver.begin().unwrap();
        receiver.free().done();
    }

    #[test]
    fn instantaneous_read_maps_through_calibration() {
        let mut receiver = Receiver::new(cs(1), calibration());
        let mut spi = spi(&[[0x06, 0x40]]);

        assert_eq!(receiver.read_ma(&mut spi), Ok(4.0));

        spi.done();
        receiver.free().done();
    }

    #[test]
    fn instantaneous_read_classifies_faults() {
        let mut receiver = Receiver::new(cs(1), calibration());
        let mut spi = spi(&[[0x00, 0x00]]);

        let ma = receiver.read_ma(&mut spi).unwrap();
        assert!(ma.is_nan());

        spi.done();
        receiver.free().done();
    }

    #[test]
    fn poll_respects_the_sampling_cadence() {
        let mut receiver = Receiver::with_filter(cs(2), calibration(), 1000, 1000.0);
        // 800, then 864
        let mut spi = spi(&[[0x06, 0x40], [0x06, 0xC0]]);

        assert_eq!(receiver.poll(&mut spi, 1000), Ok(true));
        assert_eq!(receiver.filtered_raw(), 800.0);

        // Not yet time: the bus must not be touched.
        assert_eq!(receiver.poll(&mut spi, 1500), Ok(false));

        assert_eq!(receiver.poll(&mut spi, 2000), Ok(true));
        let alpha = 1.0 - expf(-1000.0 * (1000.0 * 1e-6));
        assert_eq!(receiver.filtered_raw(), 800.0 + alpha * (864.0 - 800.0));
        assert_eq!(receiver.last_obtained_interval_us(), 1000);

        spi.done();
        receiver.free().done();
    }

    #[test]
    fn filtered_reading_is_nan_before_first_sample() {
        let receiver = Receiver::new(cs(0), calibration());

        assert!(receiver.filtered_raw().is_nan());
        assert!(receiver.filtered_ma().is_nan());
    }

    #[test]
    fn filtered_ma_classifies_the_running_estimate() {
        let mut receiver = Receiver::with_filter(cs(1), calibration(), 1000, 1000.0);
        let mut spi = spi(&[[0x00, 0x00]]);

        assert_eq!(receiver.poll(&mut spi, 1000), Ok(true));
        assert_eq!(receiver.filtered_raw(), 0.0);
        assert!(receiver.filtered_ma().is_nan());

        spi.done();
        receiver.free().done();
    }

    #[test]
    fn obtained_interval_tracks_late_polling() {
        let mut receiver = Receiver::with_filter(cs(2), calibration(), 1000, 1000.0);
        let mut spi = spi(&[[0x06, 0x40], [0x06, 0x40]]);

        assert_eq!(receiver.poll(&mut spi, 1000), Ok(true));
        assert_eq!(receiver.poll(&mut spi, 3500), Ok(true));
        assert_eq!(receiver.last_obtained_interval_us(), 2500);

        spi.done();
        receiver.free().done();
    }
}
