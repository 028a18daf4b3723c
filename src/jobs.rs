use super::*;

/// Assigns extraNonce1 values. The high bits carry a per-process instance id
/// so that pools running several servers against one coin daemon never hand
/// out colliding coinbases.
#[derive(Debug)]
pub struct ExtranonceCounter {
    counter: AtomicU32,
}

impl ExtranonceCounter {
    pub const SIZE: usize = EXTRANONCE1_SIZE;

    pub fn new() -> Self {
        Self::with_instance_id(rand::rng().next_u32() as u8 & 0x1f)
    }

    pub fn with_instance_id(instance_id: u8) -> Self {
        Self {
            counter: AtomicU32::new(u32::from(instance_id & 0x1f) << 27),
        }
    }

    pub fn next(&self) -> Extranonce {
        let n = self.counter.fetch_add(1, atomic::Ordering::Relaxed);
        Extranonce::from_bytes(&util::pack_u32_be(n))
    }
}

impl Default for ExtranonceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// The active-job table: templates by job id, with the table cleared whenever
/// the chain tip moves.
pub struct JobManager {
    next_job_id: JobId,
    current: Option<Arc<BlockTemplate>>,
    valid: HashMap<JobId, Arc<BlockTemplate>>,
    coinbase_config: CoinbaseConfig,
    reward: RewardKind,
    extranonce_size: usize,
}

impl JobManager {
    pub fn new(config: &Config) -> Self {
        Self {
            next_job_id: JobId::new(0),
            current: None,
            valid: HashMap::new(),
            coinbase_config: config.coinbase.clone(),
            reward: config.coin.reward,
            extranonce_size: EXTRANONCE1_SIZE + EXTRANONCE2_SIZE,
        }
    }

    /// Builds a job from a fresh template. Returns the job and whether it
    /// obsoletes outstanding work (the previous-block hash moved), in which
    /// case the job table was flushed.
    pub fn process_template(&mut self, rpc_data: &RpcData) -> Result<(Arc<BlockTemplate>, bool)> {
        let job_id = self.next_job_id;
        self.next_job_id = self.next_job_id.next();

        let template = Arc::new(BlockTemplate::new(
            job_id,
            rpc_data,
            &self.coinbase_config,
            self.reward,
            self.extranonce_size,
        )?);

        let clean_jobs = match &self.current {
            Some(current) => current.job_params().prevhash != template.job_params().prevhash,
            None => true,
        };

        if clean_jobs {
            self.valid.clear();
        }

        self.valid.insert(job_id, template.clone());
        self.current = Some(template.clone());

        Ok((template, clean_jobs))
    }

    pub fn current(&self) -> Option<&Arc<BlockTemplate>> {
        self.current.as_ref()
    }

    pub fn get(&self, job_id: JobId) -> Option<Arc<BlockTemplate>> {
        self.valid.get(&job_id).cloned()
    }
}
