use libm::roundf;

/// Two-point calibration between raw 12-bit values and loop current in mA,
/// for either a receiver or a transmitter board.
///
/// The mapping is linear through the two points. Point 1 should lie somewhere
/// around 4 mA and point 2 around 20 mA; calibrate against a multimeter. A
/// variable resistor of around 4.7 kOhm on the receiver board can be used to
/// vary the input current over the full range. Typical values are around
/// `{4.0, 20.0, 800, 3980}`.
///
/// The raw values of the two points must be distinct (and likewise the
/// currents), otherwise the mapping degenerates to a division by zero. The
/// driver constructors check this in debug builds.
///
/// # Examples
///
/// ```
/// use four_twenty_ma::Calibration;
///
/// let calibration = Calibration {
///     p1_ma: 4.0,
///     p2_ma: 20.0,
///     p1_raw: 800,
///     p2_raw: 4000,
/// };
///
/// assert_eq!(calibration.raw_to_ma(2400.0), 12.0);
/// assert_eq!(calibration.ma_to_raw(12.0), 2400);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Calibration point 1 in mA
    pub p1_ma: f32,
    /// Calibration point 2 in mA
    pub p2_ma: f32,
    /// Calibration point 1 as a raw bit value
    pub p1_raw: u16,
    /// Calibration point 2 as a raw bit value
    pub p2_raw: u16,
}

impl Calibration {
    /// Transforms a raw bit value into a current in mA.
    ///
    /// `raw` is fractional to accommodate a running average applied to the
    /// bit value. Values outside the calibrated span extrapolate linearly:
    /// real transducers can read slightly beyond their nominal 4-20 mA
    /// range, and the receiver relies on out-of-range results to detect a
    /// broken loop.
    pub fn raw_to_ma(&self, raw: f32) -> f32 {
        self.p1_ma
            + (raw - self.p1_raw as f32) / (self.p2_raw as f32 - self.p1_raw as f32)
                * (self.p2_ma - self.p1_ma)
    }

    /// Transforms a current in mA into the nearest raw bit value.
    pub fn ma_to_raw(&self, ma: f32) -> u16 {
        roundf(
            (ma - self.p1_ma) / (self.p2_ma - self.p1_ma)
                * (self.p2_raw as f32 - self.p1_raw as f32)
                + self.p1_raw as f32,
        ) as u16
    }
}
