use super::*;

/// Yields session identifiers: a fixed tag followed by the little-endian hex
/// of a wrapping counter.
#[derive(Debug)]
pub struct SubscriptionCounter {
    count: u64,
}

impl SubscriptionCounter {
    pub fn new() -> Self {
        Self { count: 0 }
    }

    pub fn next(&mut self) -> String {
        let count = self.count;
        self.count = self.count.wrapping_add(1);
        format!(
            "{SUBSCRIPTION_ID_PREFIX}{}",
            hex::encode(util::pack_u64_le(count))
        )
    }
}

impl Default for SubscriptionCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ClientHandle {
    commands: mpsc::Sender<SessionCommand>,
    remote: SocketAddr,
}

/// Accepts miner connections on every configured port, tracks live sessions,
/// fans jobs out to them, and enforces the ban table.
pub struct StratumServer<H> {
    config: Arc<Config>,
    host: Arc<H>,
    clients: Mutex<HashMap<String, ClientHandle>>,
    ban_list: BanList,
    counter: Mutex<SubscriptionCounter>,
    events: mpsc::Sender<PoolEvent>,
    rebroadcast_reset: mpsc::Sender<()>,
    reset_receiver: Mutex<Option<mpsc::Receiver<()>>>,
    notices: mpsc::Sender<SessionNotice>,
    notice_receiver: Mutex<Option<mpsc::Receiver<SessionNotice>>>,
}

impl<H: Host> StratumServer<H> {
    pub fn new(config: Arc<Config>, host: Arc<H>) -> (Arc<Self>, mpsc::Receiver<PoolEvent>) {
        let (events, event_receiver) = mpsc::channel(256);
        let (rebroadcast_reset, reset_receiver) = mpsc::channel(1);
        let (notices, notice_receiver) = mpsc::channel(256);

        let server = Arc::new(Self {
            ban_list: BanList::new(&config.banning),
            config,
            host,
            clients: Mutex::new(HashMap::new()),
            counter: Mutex::new(SubscriptionCounter::new()),
            events,
            rebroadcast_reset,
            reset_receiver: Mutex::new(Some(reset_receiver)),
            notices,
            notice_receiver: Mutex::new(Some(notice_receiver)),
        });

        (server, event_receiver)
    }

    /// Binds every configured port and serves until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result {
        let mut listeners = Vec::new();
        let mut addresses = Vec::new();

        for (port, port_config) in &self.config.ports {
            let listener = TcpListener::bind(("0.0.0.0", *port))
                .await
                .with_context(|| format!("failed to bind stratum port {port}"))?;
            addresses.push(listener.local_addr()?);
            listeners.push((listener, *port_config));
        }

        info!("Stratum server listening on {addresses:?}");

        let _ = self.events.send(PoolEvent::Started { addresses }).await;

        let mut tasks = JoinSet::new();

        tasks.spawn(self.clone().pump_notices(cancel.clone()));
        tasks.spawn(self.clone().sweep_bans(cancel.clone()));
        tasks.spawn(self.clone().watch_rebroadcast(cancel.clone()));

        for (listener, port_config) in listeners {
            tasks.spawn(self.clone().accept_loop(listener, port_config, cancel.clone()));
        }

        cancel.cancelled().await;

        info!("Stratum server shutting down");
        self.clients.lock().expect("client table poisoned").clear();
        tasks.shutdown().await;

        Ok(())
    }

    /// Sends the job to every connected session and re-arms the rebroadcast
    /// timer. Sessions that cannot keep up miss this job and catch the next.
    pub async fn broadcast_mining_jobs(&self, job: Arc<Notify>) {
        let _ = self.rebroadcast_reset.try_send(());

        let handles = {
            let clients = self.clients.lock().expect("client table poisoned");
            clients
                .iter()
                .map(|(id, client)| (id.clone(), client.remote, client.commands.clone()))
                .collect::<Vec<_>>()
        };

        debug!("Broadcasting job to {} sessions", handles.len());

        for (subscription_id, remote, commands) in handles {
            if commands
                .try_send(SessionCommand::Notify(job.clone()))
                .is_err()
            {
                warn!("Session {subscription_id} ({remote}) lagging, skipped broadcast");
            }
        }
    }

    /// Immediately retargets one session.
    pub fn set_difficulty(&self, subscription_id: &str, difficulty: Difficulty) {
        self.command(subscription_id, SessionCommand::SetDifficulty(difficulty));
    }

    /// Stages a difficulty that the session flushes before its next job.
    pub fn enqueue_next_difficulty(&self, subscription_id: &str, difficulty: Difficulty) {
        self.command(
            subscription_id,
            SessionCommand::EnqueueDifficulty(difficulty),
        );
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("client table poisoned").len()
    }

    fn command(&self, subscription_id: &str, command: SessionCommand) {
        let clients = self.clients.lock().expect("client table poisoned");
        if let Some(client) = clients.get(subscription_id) {
            let _ = client.commands.try_send(command);
        }
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        port_config: config::PortConfig,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        self.handle_connection(stream, remote, port_config).await;
                    }
                    Err(err) => {
                        error!("Accept failed: {err}");
                    }
                },
            }
        }
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        port_config: config::PortConfig,
    ) {
        match self.ban_list.check(remote.ip()) {
            BanStatus::Banned { time_left } => {
                info!("Kicked banned ip {remote}, {}s left", time_left.as_secs());
                let _ = self
                    .events
                    .send(PoolEvent::KickedBannedIp { remote, time_left })
                    .await;
                return;
            }
            BanStatus::Forgiven => {
                info!("Forgave banned ip {remote}");
                let _ = self.events.send(PoolEvent::ForgaveBannedIp { remote }).await;
            }
            BanStatus::Clear => {}
        }

        if let Err(err) = stream.set_nodelay(true) {
            warn!("Failed to set nodelay on {remote}: {err}");
        }

        let local_port = stream
            .local_addr()
            .map(|address| address.port())
            .unwrap_or_default();

        let subscription_id = self.counter.lock().expect("counter poisoned").next();
        let (commands, command_receiver) = mpsc::channel(64);

        self.clients
            .lock()
            .expect("client table poisoned")
            .insert(subscription_id.clone(), ClientHandle { commands, remote });

        info!("Accepted connection {remote} as {subscription_id}");

        let _ = self
            .events
            .send(PoolEvent::ClientConnected {
                subscription_id: subscription_id.clone(),
                remote,
            })
            .await;

        let (reader, writer) = stream.into_split();

        let session = Session::new(
            self.config.clone(),
            self.host.clone(),
            subscription_id,
            remote,
            local_port,
            port_config.difficulty,
            reader,
            writer,
            command_receiver,
            self.notices.clone(),
        );

        tokio::spawn(session.run());
    }

    /// Routes session notices: bans are applied here, disconnects clear the
    /// client table, everything is surfaced to the host.
    async fn pump_notices(self: Arc<Self>, cancel: CancellationToken) {
        let Some(mut notices) = self
            .notice_receiver
            .lock()
            .expect("notice receiver poisoned")
            .take()
        else {
            return;
        };

        loop {
            let notice = tokio::select! {
                _ = cancel.cancelled() => break,
                notice = notices.recv() => match notice {
                    Some(notice) => notice,
                    None => break,
                },
            };

            match &notice.event {
                SessionEvent::TriggerBan { reason } => {
                    info!("Banning {} ({reason})", notice.remote);
                    self.ban_list.ban(notice.remote.ip());
                    let _ = self.events.send(PoolEvent::Session(notice)).await;
                }
                SessionEvent::Disconnected => {
                    self.clients
                        .lock()
                        .expect("client table poisoned")
                        .remove(&notice.subscription_id);

                    let _ = self
                        .events
                        .send(PoolEvent::ClientDisconnected {
                            subscription_id: notice.subscription_id,
                            remote: notice.remote,
                        })
                        .await;
                }
                _ => {
                    let _ = self.events.send(PoolEvent::Session(notice)).await;
                }
            }
        }
    }

    async fn sweep_bans(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.config.banning.purge_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = self.ban_list.purge();
                    if purged > 0 {
                        debug!("Purged {purged} lapsed bans");
                    }
                }
            }
        }
    }

    /// Fires BroadcastTimeout when no job has been broadcast for the
    /// configured window. Armed by the first broadcast, re-armed by each one.
    async fn watch_rebroadcast(self: Arc<Self>, cancel: CancellationToken) {
        let Some(mut resets) = self
            .reset_receiver
            .lock()
            .expect("reset receiver poisoned")
            .take()
        else {
            return;
        };

        let window = self.config.job_rebroadcast_timeout();

        'armed: loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                reset = resets.recv() => if reset.is_none() { return },
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    reset = resets.recv() => if reset.is_none() { return },
                    _ = sleep(window) => {
                        debug!("No job broadcast for {}s", window.as_secs());
                        let _ = self.events.send(PoolEvent::BroadcastTimeout).await;
                        continue 'armed;
                    }
                }
            }
        }
    }
}
