use super::*;

const HEADER_SIZE: usize = 24;
const COMMAND_SIZE: usize = 12;
const NET_ADDRESS_SIZE: usize = 26;
const INV_VECTOR_SIZE: usize = 36;
const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

const MSG_BLOCK: u32 = 2;

/// A complete, checksum-verified message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub command: String,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn new(command: &str, payload: Vec<u8>) -> Self {
        Self {
            command: command.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(RawFrame),
    /// The stream lost alignment; reported once per desync run while the
    /// decoder scans forward for the next magic.
    BadMagic,
    /// A well-framed message whose payload failed its checksum; the message
    /// is dropped and the stream stays aligned.
    BadChecksum,
}

/// Framing: `magic(4) ‖ command(12, NUL-padded) ‖ length(4 LE) ‖
/// checksum(4) ‖ payload`, with the checksum being the first four bytes of
/// sha256d(payload).
#[derive(Debug)]
pub struct FrameCodec {
    magic: [u8; 4],
    desynced: bool,
}

impl FrameCodec {
    pub fn new(magic: [u8; 4]) -> Self {
        Self {
            magic,
            desynced: false,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Decoded;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Decoded>> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }

            if src[..4] != self.magic {
                // Scan forward a byte at a time for realignment.
                match src.windows(4).position(|window| window == self.magic) {
                    Some(position) => src.advance(position),
                    None => {
                        let keep = src.len().min(3);
                        let drop = src.len() - keep;
                        src.advance(drop);
                    }
                }

                if !self.desynced {
                    self.desynced = true;
                    return Ok(Some(Decoded::BadMagic));
                }

                if src.len() < 4 || src[..4] != self.magic {
                    return Ok(None);
                }
            }

            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let payload_size = LittleEndian::read_u32(&src[16..20]) as usize;
            if payload_size > MAX_PAYLOAD_SIZE {
                // Nonsense length; treat the magic match as coincidence.
                src.advance(1);
                continue;
            }

            if src.len() < HEADER_SIZE + payload_size {
                src.reserve(HEADER_SIZE + payload_size - src.len());
                return Ok(None);
            }

            let header = src.split_to(HEADER_SIZE);
            let payload = src.split_to(payload_size).to_vec();

            let command = header[4..4 + COMMAND_SIZE]
                .iter()
                .take_while(|byte| **byte != 0)
                .map(|byte| *byte as char)
                .collect::<String>();

            if util::sha256d(&payload)[..4] != header[20..24] {
                return Ok(Some(Decoded::BadChecksum));
            }

            self.desynced = false;

            return Ok(Some(Decoded::Frame(RawFrame { command, payload })));
        }
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: RawFrame, dst: &mut BytesMut) -> io::Result<()> {
        if frame.command.len() > COMMAND_SIZE || !frame.command.is_ascii() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bad command '{}'", frame.command),
            ));
        }

        let mut command = [0u8; COMMAND_SIZE];
        command[..frame.command.len()].copy_from_slice(frame.command.as_bytes());

        dst.reserve(HEADER_SIZE + frame.payload.len());
        dst.extend_from_slice(&self.magic);
        dst.extend_from_slice(&command);
        dst.extend_from_slice(&util::pack_u32_le(frame.payload.len() as u32));
        dst.extend_from_slice(&util::sha256d(&frame.payload)[..4]);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

/// Outbound connection to the coin daemon's peer port, used only to hear
/// about new blocks the moment they propagate.
pub struct Peer {
    host: String,
    port: u16,
    magic: [u8; 4],
    protocol_version: u32,
    relay_transactions: bool,
    events: mpsc::Sender<PeerEvent>,
    verack: bool,
    valid_connection_config: bool,
}

impl Peer {
    pub fn new(config: &Config) -> Result<(Self, mpsc::Receiver<PeerEvent>)> {
        let peer = config
            .peer
            .as_ref()
            .context("peer connection not configured")?;

        let (events, event_receiver) = mpsc::channel(256);

        Ok((
            Self {
                host: peer.host.clone(),
                port: peer.port,
                magic: config.coin.magic()?,
                protocol_version: config.protocol_version,
                relay_transactions: !peer.disable_transactions,
                events,
                verack: false,
                valid_connection_config: true,
            },
            event_receiver,
        ))
    }

    /// Connects and dispatches until cancelled. Reconnects after a lost
    /// handshaken connection; gives up when the endpoint refuses us.
    pub async fn run(mut self, cancel: CancellationToken) -> Result {
        while self.valid_connection_config && !cancel.is_cancelled() {
            self.verack = false;

            let stream = tokio::select! {
                _ = cancel.cancelled() => break,
                stream = TcpStream::connect((self.host.as_str(), self.port)) => stream,
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                    self.valid_connection_config = false;
                    error!("Peer {}:{} refused connection", self.host, self.port);
                    self.emit(PeerEvent::ConnectionFailed).await;
                    break;
                }
                Err(err) => {
                    self.emit(PeerEvent::SocketError {
                        message: err.to_string(),
                    })
                    .await;
                    break;
                }
            };

            info!("Connected to peer {}:{}", self.host, self.port);

            if let Err(err) = self.drive(stream, &cancel).await {
                self.emit(PeerEvent::SocketError {
                    message: err.to_string(),
                })
                .await;
            }

            if cancel.is_cancelled() {
                break;
            }

            if self.verack {
                self.emit(PeerEvent::Disconnected).await;
            } else if self.valid_connection_config {
                self.emit(PeerEvent::ConnectionRejected).await;
                break;
            }
        }

        Ok(())
    }

    async fn drive(&mut self, stream: TcpStream, cancel: &CancellationToken) -> Result {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, FrameCodec::new(self.magic));
        let mut writer = FramedWrite::new(write_half, FrameCodec::new(self.magic));

        self.send_message(&mut writer, RawFrame::new("version", self.version_payload()))
            .await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                decoded = reader.next() => match decoded {
                    None => return Ok(()),
                    Some(Err(err)) => return Err(err.into()),
                    Some(Ok(Decoded::BadMagic)) => {
                        warn!("Peer stream lost magic alignment");
                        self.emit(PeerEvent::ProtocolError {
                            message: "bad magic number".into(),
                        })
                        .await;
                    }
                    Some(Ok(Decoded::BadChecksum)) => {
                        warn!("Peer payload failed checksum");
                        self.emit(PeerEvent::ProtocolError {
                            message: "bad payload - failed checksum".into(),
                        })
                        .await;
                    }
                    Some(Ok(Decoded::Frame(frame))) => {
                        self.handle_frame(&mut writer, frame).await?;
                    }
                },
            }
        }
    }

    async fn handle_frame<W>(
        &mut self,
        writer: &mut FramedWrite<W, FrameCodec>,
        frame: RawFrame,
    ) -> Result
    where
        W: AsyncWrite + Unpin,
    {
        debug!("Peer message {}", frame.command);

        self.emit(PeerEvent::PeerMessage {
            command: frame.command.clone(),
        })
        .await;

        match frame.command.as_str() {
            "verack" => {
                if !self.verack {
                    self.verack = true;
                    self.emit(PeerEvent::Connected).await;
                }
            }
            "version" => {
                self.send_message(writer, RawFrame::new("verack", Vec::new()))
                    .await?;
            }
            "inv" => self.handle_inv(&frame.payload).await,
            _ => {}
        }

        Ok(())
    }

    async fn handle_inv(&self, payload: &[u8]) {
        let Some((count, mut offset)) = util::read_var_int(payload) else {
            self.emit(PeerEvent::ProtocolError {
                message: "bad inv - missing count".into(),
            })
            .await;
            return;
        };

        for _ in 0..count {
            let Some(vector) = payload.get(offset..offset + INV_VECTOR_SIZE) else {
                self.emit(PeerEvent::ProtocolError {
                    message: "bad inv - truncated vector".into(),
                })
                .await;
                return;
            };

            if LittleEndian::read_u32(&vector[..4]) == MSG_BLOCK {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&vector[4..]);

                let hash = BlockHash::from_byte_array(hash);
                info!("Block found via inv: {hash}");
                self.emit(PeerEvent::BlockFound { hash }).await;
            }

            offset += INV_VECTOR_SIZE;
        }
    }

    async fn send_message<W>(
        &self,
        writer: &mut FramedWrite<W, FrameCodec>,
        frame: RawFrame,
    ) -> Result
    where
        W: AsyncWrite + Unpin,
    {
        let command = frame.command.clone();
        writer.send(frame).await?;
        self.emit(PeerEvent::SentMessage { command }).await;
        Ok(())
    }

    fn version_payload(&self) -> Vec<u8> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();

        let mut payload = Vec::with_capacity(86 + USER_AGENT.len());
        payload.extend_from_slice(&util::pack_u32_le(self.protocol_version));
        payload.extend_from_slice(&util::pack_u64_le(0));
        payload.extend_from_slice(&util::pack_i64_le(timestamp));
        payload.extend_from_slice(&[0u8; NET_ADDRESS_SIZE]);
        payload.extend_from_slice(&[0u8; NET_ADDRESS_SIZE]);
        payload.extend_from_slice(&util::pack_u64_le(rand::rng().next_u64()));
        payload.extend_from_slice(&util::var_string(USER_AGENT));
        payload.extend_from_slice(&util::pack_u32_le(0));
        if !self.relay_transactions {
            // A single zero byte: relaying disabled.
            payload.push(0);
        }
        payload
    }

    async fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event).await;
    }
}
