use {
    async_trait::async_trait,
    lode::{
        config::Config,
        events::{PoolEvent, SessionEvent, Share},
        server::StratumServer,
        session::{Authorization, Host, ShareOutcome},
        stratum::{Difficulty, Extranonce, Notify, StratumErrorResponse},
    },
    serde_json::{Value, json},
    std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{
            TcpStream,
            tcp::{OwnedReadHalf, OwnedWriteHalf},
        },
        sync::mpsc,
        time::{Duration, timeout},
    },
    tokio_util::sync::CancellationToken,
};

#[derive(Default)]
struct TestHost {
    accept_shares: bool,
    shares: Mutex<Vec<Share>>,
}

#[async_trait]
impl Host for TestHost {
    async fn subscription(
        &self,
        _subscription_id: &str,
        _user_agent: Option<&str>,
    ) -> Result<(Extranonce, u32), StratumErrorResponse> {
        Ok((Extranonce::from_hex("aabbccdd").unwrap(), 4))
    }

    async fn authorize(
        &self,
        _remote: SocketAddr,
        _local_port: u16,
        _worker: &str,
        _password: Option<&str>,
    ) -> Authorization {
        Authorization {
            authorized: true,
            error: None,
            disconnect: false,
        }
    }

    async fn submit(&self, share: Share) -> ShareOutcome {
        self.shares.lock().unwrap().push(share);
        ShareOutcome {
            accepted: self.accept_shares,
            error: None,
        }
    }

    fn current_job(&self) -> Option<Arc<Notify>> {
        None
    }
}

fn config(overrides: Value) -> Arc<Config> {
    let mut base = json!({
        "ports": {"0": {"difficulty": 1}},
        "coin": {"peer_magic": "f9beb4d9"},
        "coinbase": {"pool_script": "51"},
    });

    base.as_object_mut()
        .unwrap()
        .extend(overrides.as_object().unwrap().clone());

    Arc::new(serde_json::from_value(base).unwrap())
}

struct Harness {
    server: Arc<StratumServer<TestHost>>,
    events: mpsc::Receiver<PoolEvent>,
    address: SocketAddr,
    cancel: CancellationToken,
}

impl Harness {
    async fn spawn(config: Arc<Config>, host: Arc<TestHost>) -> Self {
        let (server, events) = StratumServer::new(config, host);

        let cancel = CancellationToken::new();
        tokio::spawn(server.clone().run(cancel.clone()));

        let mut harness = Self {
            server,
            events,
            address: "127.0.0.1:0".parse().unwrap(),
            cancel,
        };

        let PoolEvent::Started { addresses } = harness.next_event().await else {
            panic!("expected Started first");
        };
        harness.address = addresses[0];
        harness.address.set_ip("127.0.0.1".parse().unwrap());

        harness
    }

    async fn next_event(&mut self) -> PoolEvent {
        timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for a pool event")
            .expect("pool event channel closed")
    }

    async fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.address).await.unwrap();
        let (reader, writer) = stream.into_split();
        Client {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn read_json(&mut self) -> Value {
        let mut line = String::new();
        let read = timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a reply")
            .unwrap();
        assert!(read > 0, "server closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    async fn read_eof(&mut self) {
        let mut line = String::new();
        let read = timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        assert_eq!(read, 0, "expected the server to close, got: {line}");
    }

    async fn subscribe(&mut self) -> Value {
        self.send_line(r#"{"id":1,"method":"mining.subscribe","params":[]}"#)
            .await;
        let reply = self.read_json().await;
        let difficulty = self.read_json().await;
        assert_eq!(difficulty["method"], "mining.set_difficulty");
        reply
    }

    async fn authorize(&mut self) -> Value {
        self.send_line(r#"{"id":2,"method":"mining.authorize","params":["w","p"]}"#)
            .await;
        self.read_json().await
    }
}

fn sample_job() -> Arc<Notify> {
    Arc::new(Notify {
        job_id: "2a".parse().unwrap(),
        prevhash: "4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000"
            .parse()
            .unwrap(),
        coinb1: "0100000001".into(),
        coinb2: "ffffffff00000000".into(),
        merkle_branches: Vec::new(),
        version: "20000000".parse().unwrap(),
        nbits: "1d00ffff".parse().unwrap(),
        ntime: "5f000000".parse().unwrap(),
        clean_jobs: true,
    })
}

#[tokio::test]
async fn full_handshake_over_tcp() {
    let mut harness = Harness::spawn(config(json!({})), Arc::new(TestHost::default())).await;
    let mut client = harness.connect().await;

    let connected = harness.next_event().await;
    let PoolEvent::ClientConnected {
        subscription_id, ..
    } = connected
    else {
        panic!("expected ClientConnected, got {connected:?}");
    };
    assert!(subscription_id.starts_with("deadbeefcafebabe"));

    let subscribe = client.subscribe().await;
    assert_eq!(subscribe["result"][1], json!("aabbccdd"));
    assert_eq!(subscribe["result"][0][0][1], json!(subscription_id));

    let authorize = client.authorize().await;
    assert_eq!(authorize["result"], json!(true));

    harness.cancel.cancel();
}

#[tokio::test]
async fn broadcast_reaches_every_session() {
    let mut harness = Harness::spawn(config(json!({})), Arc::new(TestHost::default())).await;

    let mut first = harness.connect().await;
    let mut second = harness.connect().await;
    harness.next_event().await;
    harness.next_event().await;

    first.subscribe().await;
    second.subscribe().await;

    harness.server.broadcast_mining_jobs(sample_job()).await;

    for client in [&mut first, &mut second] {
        let notify = client.read_json().await;
        assert_eq!(notify["method"], json!("mining.notify"));
        assert_eq!(notify["params"][0], json!("2a"));
    }

    harness.cancel.cancel();
}

#[tokio::test]
async fn disconnect_clears_the_client_table() {
    let mut harness = Harness::spawn(config(json!({})), Arc::new(TestHost::default())).await;

    let client = harness.connect().await;
    harness.next_event().await;
    assert_eq!(harness.server.client_count(), 1);

    drop(client);

    let event = harness.next_event().await;
    assert!(
        matches!(event, PoolEvent::ClientDisconnected { .. }),
        "got {event:?}"
    );
    assert_eq!(harness.server.client_count(), 0);

    harness.cancel.cancel();
}

#[tokio::test]
async fn banned_session_gets_kicked_on_reconnect() {
    let mut harness = Harness::spawn(
        config(json!({
            "banning": {"enabled": true, "time": 600, "check_threshold": 4, "invalid_percent": 50.0},
        })),
        Arc::new(TestHost::default()),
    )
    .await;

    let mut client = harness.connect().await;
    harness.next_event().await;

    client.subscribe().await;
    client.authorize().await;

    // every share is rejected by the host; four of four invalid trips the ban
    for i in 0..4 {
        client
            .send_line(&format!(
                r#"{{"id":{},"method":"mining.submit","params":["w","2a","0000000{i}","5f000000","00000000"]}}"#,
                10 + i
            ))
            .await;
    }

    for _ in 0..3 {
        client.read_json().await;
    }
    client.read_eof().await;

    loop {
        match harness.next_event().await {
            PoolEvent::Session(notice)
                if matches!(notice.event, SessionEvent::TriggerBan { .. }) =>
            {
                break;
            }
            PoolEvent::ClientDisconnected { .. } => continue,
            event => panic!("unexpected event {event:?}"),
        }
    }

    // the ip is now persona non grata
    let mut kicked = harness.connect().await;
    loop {
        match harness.next_event().await {
            PoolEvent::KickedBannedIp { time_left, .. } => {
                assert!(time_left <= Duration::from_secs(600));
                break;
            }
            PoolEvent::ClientDisconnected { .. } => continue,
            event => panic!("expected a kick, got {event:?}"),
        }
    }
    kicked.read_eof().await;

    harness.cancel.cancel();
}

#[tokio::test]
async fn lapsed_ban_is_forgiven_on_reconnect() {
    let mut harness = Harness::spawn(
        config(json!({
            "banning": {"enabled": true, "time": 0, "check_threshold": 1, "invalid_percent": 0.0},
        })),
        Arc::new(TestHost::default()),
    )
    .await;

    let mut client = harness.connect().await;
    harness.next_event().await;

    client.subscribe().await;
    client.authorize().await;
    client
        .send_line(r#"{"id":10,"method":"mining.submit","params":["w","2a","00000000","5f000000","00000000"]}"#)
        .await;
    client.read_eof().await;

    loop {
        match harness.next_event().await {
            PoolEvent::Session(notice)
                if matches!(notice.event, SessionEvent::TriggerBan { .. }) =>
            {
                break;
            }
            PoolEvent::ClientDisconnected { .. } => continue,
            event => panic!("unexpected event {event:?}"),
        }
    }

    // a zero-second ban has always lapsed by the next connect
    let mut client = harness.connect().await;
    loop {
        match harness.next_event().await {
            PoolEvent::ForgaveBannedIp { .. } => break,
            PoolEvent::ClientDisconnected { .. } => continue,
            event => panic!("expected forgiveness, got {event:?}"),
        }
    }

    // and the new session works
    harness.next_event().await; // ClientConnected
    let reply = client.subscribe().await;
    assert!(reply["result"].is_array());

    harness.cancel.cancel();
}

#[tokio::test]
async fn quiet_broadcasts_fire_timeout_event() {
    let mut harness = Harness::spawn(
        config(json!({"job_rebroadcast_timeout": 1})),
        Arc::new(TestHost::default()),
    )
    .await;

    // the timer arms on the first broadcast
    harness.server.broadcast_mining_jobs(sample_job()).await;

    let event = harness.next_event().await;
    assert_eq!(event, PoolEvent::BroadcastTimeout);

    harness.cancel.cancel();
}

#[tokio::test]
async fn per_port_difficulty_is_applied() {
    let mut harness = Harness::spawn(
        config(json!({"ports": {"0": {"difficulty": 2048}}})),
        Arc::new(TestHost::default()),
    )
    .await;

    let mut client = harness.connect().await;
    harness.next_event().await;

    client
        .send_line(r#"{"id":1,"method":"mining.subscribe","params":[]}"#)
        .await;
    client.read_json().await;

    let difficulty = client.read_json().await;
    assert_eq!(difficulty["method"], json!("mining.set_difficulty"));
    assert_eq!(difficulty["params"], json!([2048]));

    harness.cancel.cancel();
}

#[tokio::test]
async fn shares_carry_the_session_identity() {
    let host = Arc::new(TestHost {
        accept_shares: true,
        ..Default::default()
    });
    let mut harness = Harness::spawn(config(json!({})), host.clone()).await;

    let mut client = harness.connect().await;
    harness.next_event().await;

    client.subscribe().await;
    client.authorize().await;
    client
        .send_line(r#"{"id":11,"method":"mining.submit","params":["w.rig","2a","00001111","5f000000","00000001"]}"#)
        .await;

    let reply = client.read_json().await;
    assert_eq!(reply["result"], json!(true));

    let shares = host.shares.lock().unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].extranonce1.to_hex(), "aabbccdd");
    assert_eq!(shares[0].worker, "w.rig");
    assert_eq!(shares[0].difficulty, Difficulty::new(1.0));

    harness.cancel.cancel();
}
