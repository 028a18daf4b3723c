use super::*;

#[derive(Debug, PartialEq, Clone)]
pub struct Submit {
    pub worker: String,
    pub job_id: JobId,
    pub extranonce2: Extranonce,
    pub ntime: Ntime,
    pub nonce: Nonce,
}

impl Serialize for Submit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(5))?;
        seq.serialize_element(&self.worker)?;
        seq.serialize_element(&self.job_id)?;
        seq.serialize_element(&self.extranonce2)?;
        seq.serialize_element(&self.ntime)?;
        seq.serialize_element(&self.nonce)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Submit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Version-rolling miners append a sixth element; it is accepted and
        // discarded.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Five((String, JobId, Extranonce, Ntime, Nonce)),
            Six((String, JobId, Extranonce, Ntime, Nonce, Value)),
        }

        let (worker, job_id, extranonce2, ntime, nonce) = match Raw::deserialize(deserializer)? {
            Raw::Five(fields) => fields,
            Raw::Six((worker, job_id, extranonce2, ntime, nonce, _)) => {
                (worker, job_id, extranonce2, ntime, nonce)
            }
        };

        Ok(Submit {
            worker,
            job_id,
            extranonce2,
            ntime,
            nonce,
        })
    }
}
