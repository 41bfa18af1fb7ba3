use crate::bot::Bot;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::game::ClientGameState;
use crate::handshake::{Handshake, HandshakeState};
use crate::metrics::MetricsReport;
use log::{debug, error, info, warn};
use shared::message::InitResponse;
use shared::sequence::SequenceCounter;
use shared::{codec, current_timestamp_ms, Message, PlayerId, MAX_DATAGRAM_SIZE};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep_until, MissedTickBehavior};

pub struct Client {
    socket: UdpSocket,
    config: ClientConfig,

    handshake: Handshake,
    game_state: ClientGameState,
    bot: Option<Bot>,

    outbound_seq: SequenceCounter,
    restart_sent_at: Option<Instant>,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let bind_addr: SocketAddr = if config.server_address.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(Client {
            socket,
            handshake: Handshake::new(config.backoff),
            game_state: ClientGameState::new(&config),
            bot: None,
            outbound_seq: SequenceCounter::new(),
            restart_sent_at: None,
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.handshake.response().map(|r| r.player_id)
    }

    pub fn metrics_report(&self) -> MetricsReport {
        self.game_state.metrics_report(Instant::now())
    }

    /// Stamps the next outbound sequence number and sends the message.
    async fn send_message(&mut self, message: &Message) -> Result<u32, ClientError> {
        let seq_num = self.outbound_seq.next();
        let data = message.encode(0, seq_num, current_timestamp_ms())?;
        self.socket
            .send_to(&data, self.config.server_address)
            .await?;
        Ok(seq_num)
    }

    /// Runs the handshake until the server assigns a player id
    pub async fn connect(&mut self) -> Result<InitResponse, ClientError> {
        info!("Connecting to {}...", self.config.server_address);
        self.send_message(&Message::ClientInit).await?;
        self.handshake.start(Instant::now());

        let mut buffer = [0u8; MAX_DATAGRAM_SIZE * 2];

        loop {
            if let Some(response) = self.handshake.response() {
                return Ok(response);
            }
            if self.handshake.state() == HandshakeState::Refused {
                return Err(ClientError::ServerFull);
            }
            let result = self.game_state.result();
            if result.ended {
                return Err(ClientError::GameAlreadyOver {
                    winner: result.winner,
                });
            }
            let Some(deadline) = self.handshake.deadline() else {
                return Err(ClientError::NotConnected);
            };

            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => self.handle_datagram(&buffer[..len], addr),
                        Err(e) => warn!("Error receiving packet: {}", e),
                    }
                },

                _ = sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    if self.handshake.poll_retry(Instant::now())? {
                        self.send_message(&Message::ClientInit).await?;
                    }
                },
            }
        }
    }

    /// Decodes and applies one datagram. Anything that fails validation is
    /// counted and dropped.
    pub fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        if from != self.config.server_address {
            debug!("Ignoring datagram from unexpected address {}", from);
            return;
        }

        let grid_cells = self.game_state.grid_cells();
        let decoded = codec::decode(bytes).and_then(|packet| {
            Message::from_packet(&packet, grid_cells).map(|message| (packet.header, message))
        });
        let (header, message) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                self.game_state.record_malformed();
                debug!("Dropping datagram from server: {}", e);
                return;
            }
        };

        match message {
            Message::Snapshot(payload) => {
                self.game_state.apply_snapshot(
                    header.snapshot_id,
                    header.server_ts_ms,
                    payload,
                    current_timestamp_ms(),
                    Instant::now(),
                );
            }
            Message::ServerInitResponse(response) => self.handle_init_response(response),
            Message::ServerFull => self.handshake.on_server_full(),
            Message::GameOver(winner) => self.game_state.apply_game_over(winner),
            Message::ClaimAck(ack) => {
                if let Some(bot) = self.bot.as_mut() {
                    bot.on_ack(&ack);
                }
            }
            other => warn!("Unexpected {:?} from server", other.message_type()),
        }
    }

    fn handle_init_response(&mut self, response: InitResponse) {
        let restarted = self.handshake.is_established() && self.game_state.result().ended;
        self.handshake.on_init_response(response);
        self.game_state.set_player_id(response.player_id);

        if restarted {
            info!("New game started, respawned at ({}, {})", response.x, response.y);
            self.game_state.start_new_game();
            self.restart_sent_at = None;
        }

        let spawn = (response.x, response.y);
        match self.bot.as_mut() {
            Some(bot) => bot.respawn(response.player_id, spawn),
            None if self.config.bot_enabled => {
                self.bot = Some(Bot::new(
                    response.player_id,
                    spawn,
                    self.config.bot_min_interval,
                    self.config.bot_max_interval,
                ));
            }
            None => {}
        }
    }

    async fn bot_action(&mut self, now: Instant) -> Result<(), ClientError> {
        if self.game_state.result().ended {
            let due = self
                .restart_sent_at
                .map_or(true, |at| now.duration_since(at) >= self.config.heartbeat_interval);
            if self.config.auto_restart && due {
                info!("Requesting a new game");
                self.send_message(&Message::NewGame).await?;
                self.restart_sent_at = Some(now);
            }
            return Ok(());
        }

        let claim = match self.bot.as_mut() {
            Some(bot) => bot.next_claim(&self.game_state, now),
            None => None,
        };
        if let Some(claim) = claim {
            let seq_num = self.send_message(&Message::CellClaimRequest(claim)).await?;
            debug!("Claim #{} for ({}, {})", seq_num, claim.row, claim.col);
        }
        Ok(())
    }

    fn log_metrics(&self) {
        let report = self.metrics_report();
        let own_cells = self.game_state.own_summary().map(|me| me.score);
        info!(
            "Cells held: {:?} | snapshots: {} accepted, {} stale, {} malformed | latency avg {:?} ms, p95 {:?} ms, jitter {:?} ms{}",
            own_cells,
            report.counters.accepted,
            report.counters.stale_dropped,
            report.counters.malformed_dropped,
            report.avg_latency_ms.map(|v| (v * 10.0).round() / 10.0),
            report.p95_latency_ms,
            report.smoothed_jitter_ms.map(|v| (v * 10.0).round() / 10.0),
            if report.stale { " | STALE" } else { "" }
        );
    }

    /// Connects if needed, then runs the steady-state loop until `duration`
    /// elapses, or forever when it is `None`.
    pub async fn run(&mut self, duration: Option<Duration>) -> Result<(), ClientError> {
        if !self.handshake.is_established() {
            self.connect().await?;
        }

        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        let mut visual_interval = interval(self.config.visual_step_interval);
        let mut bot_interval = interval(self.config.bot_min_interval.max(Duration::from_millis(1)));
        let mut metrics_interval = interval(self.config.metrics_log_interval);
        for timer in [
            &mut heartbeat_interval,
            &mut visual_interval,
            &mut bot_interval,
            &mut metrics_interval,
        ] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        let stop_at = duration.map(|d| tokio::time::Instant::now() + d);
        let stop = async move {
            match stop_at {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(stop);

        let mut last_visual_step = Instant::now();
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE * 2];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => self.handle_datagram(&buffer[..len], addr),
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if let Err(e) = self.send_message(&Message::Heartbeat).await {
                        error!("Error sending heartbeat: {}", e);
                    }
                },

                _ = visual_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_visual_step).as_secs_f32();
                    last_visual_step = now;
                    self.game_state.step_visuals(dt);
                },

                _ = bot_interval.tick() => {
                    if let Err(e) = self.bot_action(Instant::now()).await {
                        error!("Error sending claim: {}", e);
                    }
                },

                _ = metrics_interval.tick() => self.log_metrics(),

                _ = &mut stop => break,
            }
        }

        self.log_metrics();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use shared::message::{ClaimAck, SnapshotPayload};
    use shared::Winner;

    async fn test_client(server: SocketAddr) -> Client {
        let config = ClientConfig {
            server_address: server,
            grid_width: 2,
            grid_height: 2,
            ..ClientConfig::default()
        };
        Client::new(config).await.unwrap()
    }

    fn server_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 12000))
    }

    fn snapshot_datagram(snapshot_id: u32) -> Vec<u8> {
        Message::Snapshot(SnapshotPayload {
            cells: vec![None, Some(0), None, None],
            players: vec![shared::PlayerSummary::new(0, 1, 1, 0)],
        })
        .encode(snapshot_id, snapshot_id, current_timestamp_ms())
        .unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_datagram_is_applied() {
        let mut client = test_client(server_addr()).await;
        client.handle_datagram(&snapshot_datagram(3), server_addr());

        assert_eq!(client.game_state().last_snapshot_id(), Some(3));
        assert_eq!(client.game_state().owner(0, 1), Some(0));
        assert_eq!(client.metrics_report().counters.accepted, 1);
    }

    #[tokio::test]
    async fn test_corrupted_datagram_is_counted() {
        let mut client = test_client(server_addr()).await;
        let mut datagram = snapshot_datagram(3);
        let last = datagram.len() - 1;
        datagram[last] ^= 0x01;

        client.handle_datagram(&datagram, server_addr());
        client.handle_datagram(b"garbage", server_addr());

        let counters = client.metrics_report().counters;
        assert_eq!(counters.accepted, 0);
        assert_eq!(counters.malformed_dropped, 2);
    }

    #[tokio::test]
    async fn test_datagram_from_other_address_is_ignored() {
        let mut client = test_client(server_addr()).await;
        let stranger = SocketAddr::from(([127, 0, 0, 1], 4000));
        client.handle_datagram(&snapshot_datagram(3), stranger);
        assert_eq!(client.game_state().last_snapshot_id(), None);
    }

    #[tokio::test]
    async fn test_init_response_creates_bot() {
        let mut client = test_client(server_addr()).await;
        let datagram = Message::ServerInitResponse(InitResponse {
            player_id: 1,
            x: 1,
            y: 1,
        })
        .encode(0, 0, 0)
        .unwrap();
        client.handle_datagram(&datagram, server_addr());

        assert_eq!(client.player_id(), Some(1));
        assert_eq!(client.game_state().player_id(), Some(1));
        assert_eq!(client.bot.as_ref().map(|b| b.position()), Some((1, 1)));
    }

    #[tokio::test]
    async fn test_game_over_then_new_game() {
        let mut client = test_client(server_addr()).await;
        let init = Message::ServerInitResponse(InitResponse {
            player_id: 0,
            x: 0,
            y: 0,
        })
        .encode(0, 0, 0)
        .unwrap();
        client.handle_datagram(&init, server_addr());

        let winner = Winner {
            player_id: 0,
            score: 3,
        };
        let game_over = Message::GameOver(Some(winner)).encode(5, 6, 0).unwrap();
        client.handle_datagram(&game_over, server_addr());
        assert_eq!(client.game_state().result().winner, Some(winner));

        client.handle_datagram(&init, server_addr());
        assert!(!client.game_state().result().ended);
    }

    #[tokio::test]
    async fn test_auto_restart_repeats_new_game_until_answered() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = Client::new(ClientConfig {
            server_address: server_addr,
            grid_width: 2,
            grid_height: 2,
            auto_restart: true,
            bot_enabled: false,
            heartbeat_interval: Duration::from_millis(20),
            ..ClientConfig::default()
        })
        .await
        .unwrap();

        let init = Message::ServerInitResponse(InitResponse {
            player_id: 0,
            x: 0,
            y: 0,
        })
        .encode(0, 0, 0)
        .unwrap();
        client.handle_datagram(&init, server_addr);
        let game_over = Message::GameOver(None).encode(1, 1, 0).unwrap();
        client.handle_datagram(&game_over, server_addr);

        let start = Instant::now();
        client.bot_action(start).await.unwrap();
        client.bot_action(start + Duration::from_millis(5)).await.unwrap();
        client.bot_action(start + Duration::from_millis(25)).await.unwrap();

        let mut buffer = [0u8; 64];
        let mut requests = 0;
        while let Ok(Ok((len, _))) = tokio::time::timeout(
            Duration::from_millis(100),
            server.recv_from(&mut buffer),
        )
        .await
        {
            let packet = codec::decode(&buffer[..len]).unwrap();
            assert_eq!(Message::from_packet(&packet, 4).unwrap(), Message::NewGame);
            requests += 1;
        }
        assert_eq!(requests, 2);

        // The init response ends the restart wait.
        client.handle_datagram(&init, server_addr);
        assert!(!client.game_state().result().ended);
        client.bot_action(start + Duration::from_millis(60)).await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(50), server.recv_from(&mut buffer))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rejected_ack_reaches_bot() {
        let mut client = test_client(server_addr()).await;
        let init = Message::ServerInitResponse(InitResponse {
            player_id: 0,
            x: 0,
            y: 0,
        })
        .encode(0, 0, 0)
        .unwrap();
        client.handle_datagram(&init, server_addr());

        let ack = Message::ClaimAck(ClaimAck {
            claim_seq: 2,
            row: 1,
            col: 1,
            accepted: true,
        })
        .encode(0, 0, 0)
        .unwrap();
        client.handle_datagram(&ack, server_addr());
        assert_eq!(client.bot.as_ref().map(|b| b.position()), Some((1, 1)));
    }

    #[tokio::test]
    async fn test_handshake_times_out_without_server() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = ClientConfig {
            server_address: silent.local_addr().unwrap(),
            ..ClientConfig::default()
        };
        config.backoff.initial_delay = Duration::from_millis(10);
        config.backoff.max_attempts = Some(3);
        let mut client = Client::new(config).await.unwrap();

        let result = client.connect().await;
        assert!(matches!(
            result,
            Err(ClientError::HandshakeTimedOut { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_new_rejects_zero_heartbeat_interval() {
        let config = ClientConfig {
            heartbeat_interval: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert!(matches!(
            Client::new(config).await,
            Err(ClientError::Config(ConfigError::ZeroInterval(
                "heartbeat_interval"
            )))
        ));
    }

    #[tokio::test]
    async fn test_connect_retries_until_answered() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = ClientConfig {
            server_address: server.local_addr().unwrap(),
            ..ClientConfig::default()
        };
        config.backoff.initial_delay = Duration::from_millis(20);
        let mut client = Client::new(config).await.unwrap();

        // Ignore the first CLIENT_INIT and answer the retry.
        let responder = tokio::spawn(async move {
            let mut buffer = [0u8; 64];
            server.recv_from(&mut buffer).await.unwrap();
            let (_, from) = server.recv_from(&mut buffer).await.unwrap();
            let reply = Message::ServerInitResponse(InitResponse {
                player_id: 2,
                x: 4,
                y: 5,
            })
            .encode(0, 0, 0)
            .unwrap();
            server.send_to(&reply, from).await.unwrap();
        });

        let response = tokio_test::assert_ok!(client.connect().await);
        assert_eq!(response.player_id, 2);
        assert_eq!(client.player_id(), Some(2));
        responder.await.unwrap();
    }
}
