use super::*;

/// What the host answers to mining.authorize.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub authorized: bool,
    pub error: Option<StratumErrorResponse>,
    pub disconnect: bool,
}

/// What the host answers to mining.submit.
#[derive(Debug, Clone)]
pub struct ShareOutcome {
    pub accepted: bool,
    pub error: Option<StratumErrorResponse>,
}

/// The capabilities the host injects into every session. Subscription data,
/// worker authorization, and share validation all live outside the core.
#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// Answers mining.subscribe with the session's extraNonce1 and the
    /// extraNonce2 size miners must use.
    async fn subscription(
        &self,
        subscription_id: &str,
        user_agent: Option<&str>,
    ) -> Result<(Extranonce, u32), StratumErrorResponse>;

    async fn authorize(
        &self,
        remote: SocketAddr,
        local_port: u16,
        worker: &str,
        password: Option<&str>,
    ) -> Authorization;

    async fn submit(&self, share: Share) -> ShareOutcome;

    /// The job a freshly subscribed session should start on.
    fn current_job(&self) -> Option<Arc<Notify>>;
}

/// Server-to-session control messages.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Notify(Arc<Notify>),
    SetDifficulty(Difficulty),
    EnqueueDifficulty(Difficulty),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

#[derive(Debug, Default)]
struct Shares {
    valid: u64,
    invalid: u64,
}

impl Shares {
    fn total(&self) -> u64 {
        self.valid + self.invalid
    }
}

/// One miner connection: line-framed JSON over any byte stream, driven
/// through subscribe, authorize, and submit.
pub struct Session<R, W, H> {
    config: Arc<Config>,
    host: Arc<H>,
    subscription_id: String,
    remote: SocketAddr,
    local_port: u16,
    start_difficulty: Difficulty,
    reader: FramedRead<R, LinesCodec>,
    writer: FramedWrite<W, LinesCodec>,
    commands: mpsc::Receiver<SessionCommand>,
    notices: mpsc::Sender<SessionNotice>,
    extranonce1: Option<Extranonce>,
    authorized: bool,
    worker_name: Option<String>,
    difficulty: Option<Difficulty>,
    previous_difficulty: Option<Difficulty>,
    pending_difficulty: Option<Difficulty>,
    shares: Shares,
    last_activity: Instant,
    saw_first_line: bool,
}

impl<R, W, H> Session<R, W, H>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    H: Host,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        host: Arc<H>,
        subscription_id: String,
        remote: SocketAddr,
        local_port: u16,
        start_difficulty: Difficulty,
        reader: R,
        writer: W,
        commands: mpsc::Receiver<SessionCommand>,
        notices: mpsc::Sender<SessionNotice>,
    ) -> Self {
        Self {
            config,
            host,
            subscription_id,
            remote,
            local_port,
            start_difficulty,
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_REQUEST_SIZE)),
            writer: FramedWrite::new(writer, LinesCodec::new()),
            commands,
            notices,
            extranonce1: None,
            authorized: false,
            worker_name: None,
            difficulty: None,
            previous_difficulty: None,
            pending_difficulty: None,
            shares: Shares::default(),
            last_activity: Instant::now(),
            saw_first_line: false,
        }
    }

    pub async fn run(mut self) {
        if let Err(err) = self.serve().await {
            warn!("Session {} error: {err}", self.remote);
        }

        self.notice(SessionEvent::Disconnected).await;
    }

    async fn serve(&mut self) -> Result {
        loop {
            tokio::select! {
                line = self.reader.next() => match line {
                    Some(Ok(line)) => {
                        if self.handle_line(line).await? == Flow::Close {
                            break;
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!("Flooded by {}", self.remote);
                        self.notice(SessionEvent::Flooded).await;
                        break;
                    }
                    Some(Err(LinesCodecError::Io(err))) => {
                        debug!("Read error from {}: {err}", self.remote);
                        break;
                    }
                    None => {
                        debug!("Connection {} closed", self.remote);
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Notify(job)) => {
                        if self.send_mining_job(&job).await? == Flow::Close {
                            break;
                        }
                    }
                    Some(SessionCommand::SetDifficulty(difficulty)) => {
                        self.send_difficulty(difficulty).await?;
                    }
                    Some(SessionCommand::EnqueueDifficulty(difficulty)) => {
                        self.enqueue_next_difficulty(difficulty);
                    }
                    Some(SessionCommand::Close) | None => break,
                },
            }
        }

        Ok(())
    }

    async fn handle_line(&mut self, line: String) -> Result<Flow> {
        let first_line = !self.saw_first_line;
        self.saw_first_line = true;

        if line.starts_with("PROXY") {
            if first_line && self.config.tcp_proxy_protocol {
                match line.split(' ').nth(2).and_then(|ip| ip.parse().ok()) {
                    Some(ip) => self.remote.set_ip(ip),
                    None => self.notice(SessionEvent::TcpProxyError { line }).await,
                }
            }
            // A PROXY banner outside proxy mode is dropped without comment.
            return Ok(Flow::Continue);
        }

        if first_line && self.config.tcp_proxy_protocol {
            self.notice(SessionEvent::TcpProxyError { line: line.clone() })
                .await;
        }

        let message = match serde_json::from_str::<Message>(&line) {
            Ok(message) => message,
            Err(err) => {
                warn!("Malformed message from {}: {err}", self.remote);
                self.notice(SessionEvent::Malformed { line }).await;
                return Ok(Flow::Close);
            }
        };

        let Message::Request { id, method, params } = message else {
            warn!(?message, "Ignoring non-request from {}", self.remote);
            return Ok(Flow::Continue);
        };

        match method.as_str() {
            "mining.subscribe" => self.subscribe(id, params).await,
            "mining.authorize" => self.authorize(id, params).await,
            "mining.submit" => self.submit(id, params).await,
            "mining.get_transactions" => {
                self.send_raw(json!({"id": id, "result": [], "error": true}))
                    .await?;
                Ok(Flow::Continue)
            }
            method => {
                warn!("Unknown method {method} from {}", self.remote);
                self.notice(SessionEvent::UnknownMethod {
                    method: method.to_string(),
                })
                .await;
                Ok(Flow::Continue)
            }
        }
    }

    async fn subscribe(&mut self, id: Id, params: Value) -> Result<Flow> {
        debug!("SUBSCRIBE from {} with {params}", self.remote);

        let subscribe = serde_json::from_value::<Subscribe>(params).unwrap_or_default();

        let (extranonce1, extranonce2_size) = match self
            .host
            .subscription(&self.subscription_id, subscribe.user_agent.as_deref())
            .await
        {
            Ok(subscription) => subscription,
            Err(error) => {
                self.send_error(id, error).await?;
                return Ok(Flow::Continue);
            }
        };

        let result = SubscribeResult {
            subscriptions: vec![
                (
                    "mining.set_difficulty".to_string(),
                    self.subscription_id.clone(),
                ),
                ("mining.notify".to_string(), self.subscription_id.clone()),
            ],
            extranonce1: extranonce1.clone(),
            extranonce2_size,
        };

        self.send(Message::Response {
            id,
            result: Some(json!(result)),
            error: None,
        })
        .await?;

        self.extranonce1 = Some(extranonce1);
        self.send_difficulty(self.start_difficulty).await?;

        if let Some(job) = self.host.current_job() {
            return self.send_mining_job(&job).await;
        }

        Ok(Flow::Continue)
    }

    async fn authorize(&mut self, id: Id, params: Value) -> Result<Flow> {
        debug!("AUTHORIZE from {} with {params}", self.remote);

        let authorize = match serde_json::from_value::<Authorize>(params) {
            Ok(authorize) => authorize,
            Err(err) => {
                self.send_error(id, StratumError::Other.with_context(err))
                    .await?;
                return Ok(Flow::Continue);
            }
        };

        let authorization = self
            .host
            .authorize(
                self.remote,
                self.local_port,
                &authorize.username,
                authorize.password.as_deref(),
            )
            .await;

        self.authorized = authorization.authorized;
        self.worker_name = Some(authorize.username);

        self.send(Message::Response {
            id,
            result: Some(json!(authorization.authorized)),
            error: authorization.error,
        })
        .await?;

        if authorization.disconnect {
            info!("Disconnecting {} on authorizer's word", self.remote);
            return Ok(Flow::Close);
        }

        Ok(Flow::Continue)
    }

    async fn submit(&mut self, id: Id, params: Value) -> Result<Flow> {
        debug!("SUBMIT from {} with {params}", self.remote);

        self.last_activity = Instant::now();

        if !self.authorized {
            self.send_error(id, StratumError::UnauthorizedWorker.into())
                .await?;
            return self.account_share(false).await;
        }

        let Some(extranonce1) = self.extranonce1.clone() else {
            self.send_error(id, StratumError::NotSubscribed.into())
                .await?;
            return self.account_share(false).await;
        };

        let submit = match serde_json::from_value::<Submit>(params) {
            Ok(submit) => submit,
            Err(err) => {
                self.send_error(id, StratumError::Other.with_context(err))
                    .await?;
                return self.account_share(false).await;
            }
        };

        let share = Share {
            worker: submit.worker,
            job_id: submit.job_id,
            extranonce1,
            extranonce2: submit.extranonce2,
            ntime: submit.ntime,
            nonce: submit.nonce,
            remote: self.remote,
            local_port: self.local_port,
            difficulty: self.difficulty.unwrap_or(self.start_difficulty),
        };

        let outcome = self.host.submit(share).await;

        // The reply is skipped when this share tips the session into a ban.
        let flow = self.account_share(outcome.accepted).await?;
        if flow == Flow::Close {
            return Ok(flow);
        }

        let result = if outcome.error.is_none() {
            Some(json!(outcome.accepted))
        } else {
            None
        };

        self.send(Message::Response {
            id,
            result,
            error: outcome.error,
        })
        .await?;

        Ok(Flow::Continue)
    }

    /// Counts a share against the ban thresholds. Returns Close when the
    /// invalid ratio crossed the line and the session must die.
    async fn account_share(&mut self, valid: bool) -> Result<Flow> {
        let banning = &self.config.banning;
        if !banning.enabled {
            return Ok(Flow::Continue);
        }

        if valid {
            self.shares.valid += 1;
        } else {
            self.shares.invalid += 1;
        }

        if self.shares.total() < banning.check_threshold {
            return Ok(Flow::Continue);
        }

        let invalid_percent = self.shares.invalid as f64 / self.shares.total() as f64 * 100.0;

        if invalid_percent < banning.invalid_percent {
            self.shares = Shares::default();
            return Ok(Flow::Continue);
        }

        warn!(
            "Banning {} (worker {}): {} of {} shares invalid",
            self.remote,
            self.worker_name.as_deref().unwrap_or("unset"),
            self.shares.invalid,
            self.shares.total()
        );

        self.notice(SessionEvent::TriggerBan {
            reason: format!(
                "{}% of shares invalid",
                invalid_percent.round()
            ),
        })
        .await;

        Ok(Flow::Close)
    }

    /// No-op when the difficulty is unchanged; otherwise rotates the current
    /// difficulty into previous and notifies the miner.
    async fn send_difficulty(&mut self, difficulty: Difficulty) -> Result<bool> {
        if self.difficulty == Some(difficulty) {
            return Ok(false);
        }

        self.previous_difficulty = self.difficulty.replace(difficulty);

        debug!(
            "Difficulty for {}: {:?} -> {difficulty:?}",
            self.remote, self.previous_difficulty
        );

        self.send(Message::Notification {
            method: "mining.set_difficulty".into(),
            params: json!(SetDifficulty(difficulty)),
        })
        .await?;

        Ok(true)
    }

    /// Stages a difficulty to be flushed right before the next job.
    fn enqueue_next_difficulty(&mut self, difficulty: Difficulty) {
        self.pending_difficulty = Some(difficulty);
    }

    async fn send_mining_job(&mut self, job: &Notify) -> Result<Flow> {
        let idle = self.last_activity.elapsed();
        if idle > self.config.connection_timeout() {
            info!(
                "Dropping {}: idle for {}s",
                self.remote,
                idle.as_secs()
            );
            return Ok(Flow::Close);
        }

        if let Some(pending) = self.pending_difficulty.take() {
            self.send_difficulty(pending).await?;
        }

        self.send(Message::Notification {
            method: "mining.notify".into(),
            params: json!(job),
        })
        .await?;

        Ok(Flow::Continue)
    }

    async fn send(&mut self, message: Message) -> Result {
        self.send_raw(serde_json::to_value(&message)?).await
    }

    async fn send_raw(&mut self, value: Value) -> Result {
        self.writer.send(value.to_string()).await?;
        Ok(())
    }

    async fn send_error(&mut self, id: Id, error: StratumErrorResponse) -> Result {
        self.send(Message::Response {
            id,
            result: None,
            error: Some(error),
        })
        .await
    }

    async fn notice(&self, event: SessionEvent) {
        let _ = self
            .notices
            .send(SessionNotice {
                subscription_id: self.subscription_id.clone(),
                remote: self.remote,
                event,
            })
            .await;
    }
}
