use rand::Rng;
use serde::Serialize;

/// Body published on the data topic.
#[derive(Debug, Clone, Serialize)]
pub struct SoilReading {
    pub persen: u8,
}

/// Bounded random walk of soil moisture. Irrigation kicks in when it gets
/// dry, so the value oscillates and regularly crosses the urgency threshold.
#[derive(Debug, Clone)]
pub struct MoistureWalk {
    value: f64,
    irrigating: bool,
}

impl MoistureWalk {
    pub fn new(start: u8) -> Self {
        Self {
            value: f64::from(start.min(100)),
            irrigating: false,
        }
    }

    pub fn step(&mut self, rng: &mut impl Rng) -> SoilReading {
        if self.value <= 30.0 {
            self.irrigating = true;
        } else if self.value >= 85.0 {
            self.irrigating = false;
        }

        let drift = if self.irrigating {
            rng.gen_range(1.0..6.0)
        } else {
            -rng.gen_range(0.0..2.0)
        };
        let noise = rng.gen_range(-1.5..1.5);
        self.value = (self.value + drift + noise).clamp(0.0, 100.0);

        SoilReading {
            persen: self.value.round() as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_stays_in_range_and_gets_dry() {
        let mut rng = rand::thread_rng();
        let mut walk = MoistureWalk::new(60);
        let mut saw_dry = false;

        for _ in 0..5000 {
            let reading = walk.step(&mut rng);
            assert!(reading.persen <= 100);
            saw_dry |= reading.persen <= 40;
        }

        assert!(saw_dry);
    }

    #[test]
    fn test_reading_serializes_as_persen_object() {
        let body = serde_json::to_string(&SoilReading { persen: 42 }).unwrap();
        assert_eq!(body, r#"{"persen":42}"#);
    }
}
