use super::*;

const FRACTIONAL_DIGITS: f64 = 1e9;

/// Share difficulty relative to the sha256d difficulty-1 target. Derived by
/// dividing the reference target by the share target and rounding to nine
/// fractional digits; the division stays in 256-bit integers until the final
/// quotient-plus-remainder step.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Difficulty(f64);

impl Difficulty {
    pub fn new(difficulty: f64) -> Self {
        assert!(
            difficulty.is_finite() && difficulty > 0.0,
            "difficulty must be finite and > 0"
        );
        Self(difficulty)
    }

    pub fn from_target(target: U256) -> Self {
        assert!(!target.is_zero(), "target must be > 0");

        let (quotient, remainder) = DIFF1_TARGET.div_mod(target);

        let difficulty =
            util::u256_to_f64(quotient) + util::u256_to_f64(remainder) / util::u256_to_f64(target);

        Self((difficulty * FRACTIONAL_DIGITS).round() / FRACTIONAL_DIGITS)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl Serialize for Difficulty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.fract() == 0.0 && self.0 <= u64::MAX as f64 {
            serializer.serialize_u64(self.0 as u64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Int(u64),
            Float(f64),
        }

        let difficulty = match Wire::deserialize(deserializer)? {
            Wire::Int(n) => n as f64,
            Wire::Float(x) => x,
        };

        if !difficulty.is_finite() || difficulty <= 0.0 {
            return Err(de::Error::custom("difficulty must be finite and > 0"));
        }

        Ok(Difficulty(difficulty))
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{}", self.0 as u64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}
