use super::*;

#[derive(Debug, PartialEq)]
pub struct Authorize {
    pub username: String,
    pub password: Option<String>,
}

impl Serialize for Authorize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.password.is_some() { 2 } else { 1 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.username)?;
        if let Some(password) = &self.password {
            seq.serialize_element(password)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Authorize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One((String,)),
            Two((String, Option<String>)),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One((username,)) => Authorize {
                username,
                password: None,
            },
            Raw::Two((username, password)) => Authorize { username, password },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_password() {
        assert_eq!(
            serde_json::from_str::<Authorize>(r#"["worker.rig","password"]"#).unwrap(),
            Authorize {
                username: "worker.rig".into(),
                password: Some("password".into()),
            },
        );
    }

    #[test]
    fn optional_password() {
        assert_eq!(
            serde_json::from_str::<Authorize>(r#"["worker.rig"]"#).unwrap(),
            Authorize {
                username: "worker.rig".into(),
                password: None,
            },
        );
    }
}
