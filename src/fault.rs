/// Current in mA at or below which a receiver reading indicates a fault
/// state: a broken current loop, a disconnected device or an error at the
/// transmitter side. 3.8 mA is the conventional low-fault level for 4-20 mA
/// loops (NAMUR NE 43).
pub const FAULT_THRESHOLD_MA: f32 = 3.8;

/// Classifies a current reading against [`FAULT_THRESHOLD_MA`].
///
/// Returns `ma` unchanged for a healthy reading and `NAN` for a reading at
/// or below the threshold, so a broken loop is never reported as a small
/// current. The boundary value of exactly 3.8 mA classifies as a fault.
pub fn classify(ma: f32) -> f32 {
    if ma > FAULT_THRESHOLD_MA {
        ma
    } else {
        f32::NAN
    }
}
