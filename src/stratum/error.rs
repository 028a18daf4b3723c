use super::*;

/// Pool-side reply codes for rejected Stratum requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StratumError {
    Other = 20,
    JobNotFound = 21,
    DuplicateShare = 22,
    LowDifficultyShare = 23,
    UnauthorizedWorker = 24,
    NotSubscribed = 25,
}

impl fmt::Display for StratumError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::Other => "other/unknown",
            Self::JobNotFound => "job not found",
            Self::DuplicateShare => "duplicate share",
            Self::LowDifficultyShare => "low difficulty share",
            Self::UnauthorizedWorker => "unauthorized worker",
            Self::NotSubscribed => "not subscribed",
        };
        write!(f, "{}", message)
    }
}

impl StratumError {
    pub fn with_context(self, context: impl fmt::Display) -> StratumErrorResponse {
        StratumErrorResponse {
            error: self,
            context: Some(context.to_string()),
        }
    }
}

impl From<StratumError> for StratumErrorResponse {
    fn from(error: StratumError) -> Self {
        StratumErrorResponse {
            error,
            context: None,
        }
    }
}

/// Serializes as the `[code, message, data]` triple Stratum V1 replies carry.
#[derive(Debug, Clone)]
pub struct StratumErrorResponse {
    pub error: StratumError,
    pub context: Option<String>,
}

impl Serialize for StratumErrorResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.error as i32, self.error.to_string(), &self.context).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StratumErrorResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ErrorArray(i32, String, Option<Value>);

        let ErrorArray(code, _message, traceback) = ErrorArray::deserialize(deserializer)?;

        let error = match code {
            20 => StratumError::Other,
            21 => StratumError::JobNotFound,
            22 => StratumError::DuplicateShare,
            23 => StratumError::LowDifficultyShare,
            24 => StratumError::UnauthorizedWorker,
            25 => StratumError::NotSubscribed,
            _ => {
                return Err(de::Error::custom(format!(
                    "unknown stratum error code: {code}"
                )));
            }
        };

        Ok(StratumErrorResponse {
            error,
            context: traceback.and_then(|value| value.as_str().map(str::to_string)),
        })
    }
}

impl PartialEq for StratumErrorResponse {
    fn eq(&self, other: &Self) -> bool {
        self.error == other.error
    }
}

impl fmt::Display for StratumErrorResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error as i32, self.error)?;
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InternalError {
    #[snafu(display("Failed to parse hex string: {source}"))]
    HexParse { source: hex::FromHexError },

    #[snafu(display("Invalid length: expected {expected}, got {actual}"))]
    InvalidLength { expected: usize, actual: usize },

    #[snafu(display("Invalid value: {reason}"))]
    InvalidValue { reason: String },

    #[snafu(display("Parse error: {message}"))]
    Parse { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(StratumError::Other as i32, 20);
        assert_eq!(StratumError::JobNotFound as i32, 21);
        assert_eq!(StratumError::DuplicateShare as i32, 22);
        assert_eq!(StratumError::LowDifficultyShare as i32, 23);
        assert_eq!(StratumError::UnauthorizedWorker as i32, 24);
        assert_eq!(StratumError::NotSubscribed as i32, 25);
    }

    #[test]
    fn response_serializes_as_triple() {
        let serialized =
            serde_json::to_string(&StratumErrorResponse::from(StratumError::UnauthorizedWorker))
                .unwrap();
        assert_eq!(serialized, r#"[24,"unauthorized worker",null]"#);

        let serialized =
            serde_json::to_string(&StratumErrorResponse::from(StratumError::NotSubscribed))
                .unwrap();
        assert_eq!(serialized, r#"[25,"not subscribed",null]"#);
    }

    #[test]
    fn response_with_context_carries_data() {
        let response = StratumError::JobNotFound.with_context("job_id: 1f");
        let serialized = serde_json::to_string(&response).unwrap();
        assert_eq!(serialized, r#"[21,"job not found","job_id: 1f"]"#);
    }

    #[test]
    fn response_deserializes_from_triple() {
        let response: StratumErrorResponse =
            serde_json::from_str(r#"[22,"duplicate share",null]"#).unwrap();
        assert_eq!(response.error, StratumError::DuplicateShare);
        assert_eq!(response.context, None);

        assert!(serde_json::from_str::<StratumErrorResponse>(r#"[99,"nope",null]"#).is_err());
    }

    #[test]
    fn response_display() {
        assert_eq!(
            StratumErrorResponse::from(StratumError::DuplicateShare).to_string(),
            "22: duplicate share"
        );
        assert_eq!(
            StratumError::Other.with_context("details").to_string(),
            "20: other/unknown (details)"
        );
    }
}
