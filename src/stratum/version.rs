use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct Version(i32);

impl Version {
    pub fn to_consensus(self) -> i32 {
        self.0
    }
}

impl FromStr for Version {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = u32::from_str_radix(s, 16).map_err(|e| InternalError::Parse {
            message: format!("invalid version hex string '{}': {}", s, e),
        })?;
        // The as conversion matches consensus behaviour for the sign bit
        Ok(Self(n as i32))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<i32> for Version {
    fn from(value: i32) -> Self {
        Self(value)
    }
}
