/// Raw ADC reading of the sensor in completely dry soil.
pub const SOIL_DRY: i32 = 950;
/// Raw ADC reading of the sensor in saturated soil.
pub const SOIL_WET: i32 = 350;

/// Two-point linear calibration between the dry and wet sensor readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub dry: i32,
    pub wet: i32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            dry: SOIL_DRY,
            wet: SOIL_WET,
        }
    }
}

impl Calibration {
    /// Maps a moisture percentage back onto the raw instrument scale.
    ///
    /// 100% lands on `wet`, 0% on `dry`. Inputs outside 0..=100 are
    /// extrapolated, not rejected.
    pub fn raw_from_percent(&self, persen: i32) -> i32 {
        let span = f64::from(self.dry - self.wet);
        let raw = f64::from(self.wet) + span * f64::from(100 - persen) / 100.0;
        raw.round() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_points() {
        let cal = Calibration::default();
        assert_eq!(cal.raw_from_percent(100), 350);
        assert_eq!(cal.raw_from_percent(0), 950);
        assert_eq!(cal.raw_from_percent(50), 650);
        assert_eq!(cal.raw_from_percent(40), 710);
    }

    #[test]
    fn test_drier_soil_never_reads_lower() {
        let cal = Calibration::default();
        let mut previous = cal.raw_from_percent(100);
        for persen in (0..100).rev() {
            let raw = cal.raw_from_percent(persen);
            assert!(
                raw >= previous,
                "raw value dropped from {} to {} at {}%",
                previous,
                raw,
                persen
            );
            previous = raw;
        }
    }

    #[test]
    fn test_rounds_to_nearest() {
        // span of 7 does not divide evenly by 100
        let cal = Calibration { dry: 10, wet: 3 };
        assert_eq!(cal.raw_from_percent(50), 7); // 6.5 rounds away from zero
        assert_eq!(cal.raw_from_percent(90), 4); // 3.7
    }
}
