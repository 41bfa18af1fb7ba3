//! Server network layer handling UDP communications and the tick loop

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::game::{ClaimOutcome, GameState};
use crate::session_table::{BroadcastTarget, Session, SessionTable};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::message::{ClaimAck, ClaimRequest, InitResponse, SnapshotPayload};
use shared::{
    codec, current_timestamp_ms, GameResult, Message, PacketHeader, PlayerId, PlayerSummary,
    MAX_DATAGRAM_SIZE,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    MessageReceived {
        header: PacketHeader,
        message: Message,
        addr: SocketAddr,
    },
    SessionsReaped {
        player_ids: Vec<PlayerId>,
    },
    /// The OS reported `addr` unreachable while sending
    SendFailed {
        addr: SocketAddr,
    },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendDatagram { data: Vec<u8>, addr: SocketAddr },
}

/// State published after every tick for observers such as tests or a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickObservation {
    pub snapshot_id: u32,
    pub cells: Vec<Option<PlayerId>>,
    pub players: Vec<PlayerSummary>,
    pub result: GameResult,
    pub claimed_cells: usize,
}

/// Cloneable handle for stopping a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

enum InitReply {
    Registered(InitResponse),
    Existing(InitResponse),
    Full,
    AfterGameOver(Vec<PlayerSummary>),
}

/// Main server coordinating networking and the authoritative grid
pub struct Server {
    config: ServerConfig,
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<SessionTable>>,
    game_state: GameState,
    rng: StdRng,
    observation_tx: watch::Sender<TickObservation>,
    tasks: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(config.bind_address).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let game_state = GameState::new(config.grid_width, config.grid_height);
        let (observation_tx, _) = watch::channel(TickObservation {
            snapshot_id: game_state.snapshot_id(),
            cells: game_state.cells().to_vec(),
            players: Vec::new(),
            result: game_state.result(),
            claimed_cells: 0,
        });

        Ok(Server {
            sessions: Arc::new(RwLock::new(SessionTable::new(config.max_clients))),
            config,
            socket,
            game_state,
            rng: StdRng::from_entropy(),
            observation_tx,
            tasks: Vec::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Subscribes to the state published at the end of every tick.
    pub fn observe(&self) -> watch::Receiver<TickObservation> {
        self.observation_tx.subscribe()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that decodes incoming datagrams
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();
        let grid_cells = self.config.grid_capacity();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE * 2];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let decoded = codec::decode(&buffer[..len]).and_then(|packet| {
                            Message::from_packet(&packet, grid_cells)
                                .map(|message| (packet.header, message))
                        });
                        match decoded {
                            Ok((header, message)) => {
                                let received = ServerMessage::MessageReceived {
                                    header,
                                    message,
                                    addr,
                                };
                                if let Err(e) = server_tx.send(received) {
                                    error!("Failed to forward packet to main loop: {}", e);
                                    break;
                                }
                            }
                            Err(e) => warn!("Dropping datagram from {}: {}", addr, e),
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that drains the outgoing datagram queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        self.tasks.push(tokio::spawn(async move {
            while let Some(GameMessage::SendDatagram { data, addr }) = game_rx.recv().await {
                if let Err(e) = socket.send_to(&data, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                    ) && server_tx.send(ServerMessage::SendFailed { addr }).is_err()
                    {
                        break;
                    }
                }
            }
        }));
    }

    /// Spawns task that removes silent sessions
    fn spawn_reaper(&mut self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.heartbeat_timeout;
        let period = self.config.reap_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut interval = interval(period);

            loop {
                interval.tick().await;

                let reaped = {
                    let mut sessions = sessions.write().await;
                    sessions.reap_timed_out(Instant::now(), timeout)
                };

                if reaped.is_empty() {
                    continue;
                }
                let player_ids = reaped.iter().map(|s| s.player_id).collect();
                if let Err(e) = server_tx.send(ServerMessage::SessionsReaped { player_ids }) {
                    error!("Failed to report reaped sessions: {}", e);
                    break;
                }
            }
        }));
    }

    fn queue_datagram(&self, data: Vec<u8>, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendDatagram { data, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn send_message(&self, message: &Message, seq_num: u32, addr: SocketAddr) {
        match message.encode(
            self.game_state.snapshot_id(),
            seq_num,
            current_timestamp_ms(),
        ) {
            Ok(data) => self.queue_datagram(data, addr),
            Err(e) => error!(
                "Failed to encode {:?} for {}: {}",
                message.message_type(),
                addr,
                e
            ),
        }
    }

    /// Encodes the payload once and stamps a per-recipient header.
    fn send_to_targets(&self, message: &Message, snapshot_id: u32, targets: &[BroadcastTarget]) {
        let payload = match message.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {:?}: {}", message.message_type(), e);
                return;
            }
        };
        let timestamp = current_timestamp_ms();
        for target in targets {
            match codec::encode(
                message.message_type(),
                snapshot_id,
                target.seq_num,
                timestamp,
                &payload,
            ) {
                Ok(data) => self.queue_datagram(data, target.addr),
                Err(e) => error!("Failed to frame packet for {}: {}", target.addr, e),
            }
        }
    }

    /// Routes one decoded message from a client
    async fn handle_message(&mut self, header: PacketHeader, message: Message, addr: SocketAddr) {
        match message {
            Message::ClientInit => self.handle_client_init(addr).await,
            Message::Heartbeat => {
                let known = self.sessions.write().await.touch(&addr, Instant::now());
                if !known {
                    debug!("Heartbeat from unknown address {}", addr);
                }
            }
            Message::CellClaimRequest(request) => {
                self.handle_claim(addr, header.seq_num, request).await
            }
            Message::NewGame => self.handle_new_game(addr).await,
            other => {
                warn!(
                    "Unexpected {:?} from client at {}",
                    other.message_type(),
                    addr
                );
                self.sessions.write().await.touch(&addr, Instant::now());
            }
        }
    }

    async fn handle_client_init(&mut self, addr: SocketAddr) {
        let now = Instant::now();
        let reply = {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(&addr) {
                session.touch(now);
                InitReply::Existing(InitResponse {
                    player_id: session.player_id,
                    x: session.position.0,
                    y: session.position.1,
                })
            } else if self.game_state.result().ended {
                InitReply::AfterGameOver(
                    sessions.live_summaries(now, self.config.heartbeat_timeout),
                )
            } else {
                match sessions.next_free_id() {
                    None => InitReply::Full,
                    Some(player_id) => {
                        let position = self.game_state.spawn_position(player_id, &mut self.rng);
                        let mut session = Session::new(player_id, addr, position, now);
                        if self.config.claim_spawn_cell {
                            let (col, row) = (position.0 as u8, position.1 as u8);
                            let outcome = self.game_state.claim(player_id, row, col);
                            session.credit_claim(row, col, outcome == ClaimOutcome::Claimed);
                        }
                        sessions.insert(session);
                        InitReply::Registered(InitResponse {
                            player_id,
                            x: position.0,
                            y: position.1,
                        })
                    }
                }
            }
        };

        match reply {
            InitReply::Registered(response) => {
                self.send_message(&Message::ServerInitResponse(response), 0, addr)
            }
            InitReply::Existing(response) => {
                debug!(
                    "Repeated CLIENT_INIT from {}, resending id {}",
                    addr, response.player_id
                );
                self.send_message(&Message::ServerInitResponse(response), 0, addr);
            }
            InitReply::Full => {
                info!("Rejecting {}: server full", addr);
                self.send_message(&Message::ServerFull, 0, addr);
            }
            InitReply::AfterGameOver(players) => {
                info!("Late join from {} after game over", addr);
                let snapshot = Message::Snapshot(self.game_state.snapshot_payload(players));
                self.send_message(&snapshot, 0, addr);
                self.send_message(&Message::GameOver(self.game_state.result().winner), 0, addr);
            }
        }
    }

    async fn handle_claim(&mut self, addr: SocketAddr, claim_seq: u32, request: ClaimRequest) {
        let ClaimRequest { row, col } = request;
        let outcome = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(&addr) else {
                debug!("Claim from unknown address {}", addr);
                return;
            };
            session.touch(Instant::now());
            let outcome = self.game_state.claim(session.player_id, row, col);
            if outcome.is_accepted() {
                session.credit_claim(row, col, outcome == ClaimOutcome::Claimed);
            }
            outcome
        };

        match outcome {
            ClaimOutcome::OutOfRange => {
                warn!("Claim for ({}, {}) from {} is off the grid", row, col, addr)
            }
            ClaimOutcome::OwnedByOther(owner) => {
                debug!("Claim for ({}, {}) from {} lost to player {}", row, col, addr, owner)
            }
            ClaimOutcome::GameOver => debug!("Claim from {} after game over", addr),
            ClaimOutcome::Claimed | ClaimOutcome::AlreadyOwned => {}
        }

        let ack = ClaimAck {
            claim_seq,
            row,
            col,
            accepted: outcome.is_accepted(),
        };
        self.send_message(&Message::ClaimAck(ack), 0, addr);
    }

    async fn handle_new_game(&mut self, addr: SocketAddr) {
        let current = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(&addr) else {
                debug!("Ignoring NEW_GAME from unknown address {}", addr);
                return;
            };
            session.touch(Instant::now());
            InitResponse {
                player_id: session.player_id,
                x: session.position.0,
                y: session.position.1,
            }
        };
        if !self.game_state.result().ended {
            // The restart already happened; the sender missed its init response.
            debug!("NEW_GAME from {} during a running game, resending init", addr);
            self.send_message(&Message::ServerInitResponse(current), 0, addr);
            return;
        }

        let replies: Vec<(SocketAddr, InitResponse)> = {
            let mut sessions = self.sessions.write().await;
            self.game_state.reset();
            let mut replies = Vec::with_capacity(sessions.len());
            for session in sessions.iter_mut() {
                let position = self
                    .game_state
                    .spawn_position(session.player_id, &mut self.rng);
                session.score = 0;
                session.position = position;
                if self.config.claim_spawn_cell {
                    let (col, row) = (position.0 as u8, position.1 as u8);
                    let outcome = self.game_state.claim(session.player_id, row, col);
                    session.credit_claim(row, col, outcome == ClaimOutcome::Claimed);
                }
                replies.push((
                    session.addr,
                    InitResponse {
                        player_id: session.player_id,
                        x: position.0,
                        y: position.1,
                    },
                ));
            }
            replies
        };

        info!("Player at {} started a new game", addr);
        for (session_addr, response) in replies {
            self.send_message(&Message::ServerInitResponse(response), 0, session_addr);
        }
    }

    /// One broadcast tick: win check, snapshot, observation
    async fn tick(&mut self) {
        let now = Instant::now();
        let timeout = self.config.heartbeat_timeout;

        let players = self.sessions.read().await.live_summaries(now, timeout);
        if let Some(result) = self.game_state.evaluate_win(&players) {
            self.broadcast_game_over(result, now).await;
        }

        let view = self.sessions.write().await.broadcast_view(now, timeout);
        let snapshot_id = self.game_state.next_snapshot_id();
        let snapshot = Message::Snapshot(SnapshotPayload {
            cells: self.game_state.cells().to_vec(),
            players: view.players.clone(),
        });
        self.send_to_targets(&snapshot, snapshot_id, &view.targets);

        self.observation_tx.send_replace(TickObservation {
            snapshot_id,
            cells: self.game_state.cells().to_vec(),
            players: view.players,
            result: self.game_state.result(),
            claimed_cells: self.game_state.claimed_cells(),
        });
    }

    async fn broadcast_game_over(&mut self, result: GameResult, now: Instant) {
        let view = self
            .sessions
            .write()
            .await
            .broadcast_view(now, self.config.heartbeat_timeout);
        info!(
            "Announcing game over to {} players (winner: {:?})",
            view.targets.len(),
            result.winner.map(|w| w.player_id)
        );
        self.send_to_targets(
            &Message::GameOver(result.winner),
            self.game_state.snapshot_id(),
            &view.targets,
        );
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_reaper();

        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Server started: {}x{} grid, {} Hz, up to {} players",
            self.config.grid_width,
            self.config.grid_height,
            self.config.tick_rate_hz,
            self.config.max_clients
        );

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::MessageReceived { header, message, addr }) => {
                            self.handle_message(header, message, addr).await;
                        },
                        Some(ServerMessage::SessionsReaped { player_ids }) => {
                            debug!("Reaped players {:?}", player_ids);
                        },
                        Some(ServerMessage::SendFailed { addr }) => {
                            self.sessions.write().await.disconnect(&addr);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick().await;
                    let snapshot_id = self.game_state.snapshot_id();
                    if snapshot_id % (self.config.tick_rate_hz * 10).max(1) == 0 {
                        debug!(
                            "Snapshot {}: {} players, {}/{} cells claimed",
                            snapshot_id,
                            self.sessions.read().await.len(),
                            self.game_state.claimed_cells(),
                            self.game_state.capacity()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode, MessageType, Packet, Winner};

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            grid_width: 4,
            grid_height: 4,
            claim_spawn_cell: false,
            ..ServerConfig::default()
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn header(seq_num: u32) -> PacketHeader {
        PacketHeader {
            version: shared::PROTOCOL_VERSION,
            msg_type: MessageType::Heartbeat,
            snapshot_id: 0,
            seq_num,
            server_ts_ms: 0,
            payload_len: 0,
            checksum: 0,
        }
    }

    /// Drains every queued datagram and decodes it.
    fn drain(server: &mut Server) -> Vec<(SocketAddr, Packet, Message)> {
        let cells = server.config.grid_capacity();
        let mut sent = Vec::new();
        while let Ok(GameMessage::SendDatagram { data, addr }) = server.game_rx.try_recv() {
            let packet = decode(&data).unwrap();
            let message = Message::from_packet(&packet, cells).unwrap();
            sent.push((addr, packet, message));
        }
        sent
    }

    async fn join(server: &mut Server, port: u16) -> InitResponse {
        server
            .handle_message(header(0), Message::ClientInit, addr(port))
            .await;
        match drain(server).pop() {
            Some((_, _, Message::ServerInitResponse(response))) => response,
            other => panic!("expected init response, got {:?}", other),
        }
    }

    async fn claim(server: &mut Server, port: u16, seq: u32, row: u8, col: u8) -> ClaimAck {
        server
            .handle_message(
                header(seq),
                Message::CellClaimRequest(ClaimRequest { row, col }),
                addr(port),
            )
            .await;
        match drain(server).pop() {
            Some((_, _, Message::ClaimAck(ack))) => ack,
            other => panic!("expected claim ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = ServerConfig {
            tick_rate_hz: 0,
            ..test_config()
        };
        assert!(matches!(
            Server::new(config).await,
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_join_assigns_sequential_ids() {
        let mut server = tokio_test::assert_ok!(Server::new(test_config()).await);
        assert_eq!(join(&mut server, 9000).await.player_id, 0);
        assert_eq!(join(&mut server, 9001).await.player_id, 1);
        assert_eq!(server.sessions.read().await.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_init_resends_same_id() {
        let mut server = Server::new(test_config()).await.unwrap();
        let first = join(&mut server, 9000).await;
        let second = join(&mut server, 9000).await;
        assert_eq!(first, second);
        assert_eq!(server.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_server_full_reply() {
        let config = ServerConfig {
            max_clients: 1,
            ..test_config()
        };
        let mut server = Server::new(config).await.unwrap();
        join(&mut server, 9000).await;

        server
            .handle_message(header(0), Message::ClientInit, addr(9001))
            .await;
        let sent = drain(&mut server);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, addr(9001));
        assert_eq!(sent[0].2, Message::ServerFull);
    }

    #[tokio::test]
    async fn test_spawn_cell_claimed_on_join() {
        let config = ServerConfig {
            claim_spawn_cell: true,
            ..test_config()
        };
        let mut server = Server::new(config).await.unwrap();
        let response = join(&mut server, 9000).await;

        let owner = server
            .game_state
            .owner(response.y as u8, response.x as u8);
        assert_eq!(owner, Some(Some(response.player_id)));
        assert_eq!(server.sessions.read().await.get(&addr(9000)).unwrap().score, 1);
    }

    #[tokio::test]
    async fn test_claim_ack_echoes_sequence() {
        let mut server = Server::new(test_config()).await.unwrap();
        join(&mut server, 9000).await;
        join(&mut server, 9001).await;

        let ack = claim(&mut server, 9000, 41, 1, 2).await;
        assert_eq!(
            ack,
            ClaimAck {
                claim_seq: 41,
                row: 1,
                col: 2,
                accepted: true
            }
        );

        let lost = claim(&mut server, 9001, 7, 1, 2).await;
        assert!(!lost.accepted);
        assert_eq!(server.game_state.owner(1, 2), Some(Some(0)));

        let session = server.sessions.read().await.get(&addr(9000)).cloned().unwrap();
        assert_eq!(session.score, 1);
        assert_eq!(session.position, (2, 1));
    }

    #[tokio::test]
    async fn test_out_of_range_claim_is_rejected() {
        let mut server = Server::new(test_config()).await.unwrap();
        join(&mut server, 9000).await;
        let ack = claim(&mut server, 9000, 1, 4, 0).await;
        assert!(!ack.accepted);
        assert_eq!(server.game_state.claimed_cells(), 0);
    }

    #[tokio::test]
    async fn test_claim_from_unknown_address_is_ignored() {
        let mut server = Server::new(test_config()).await.unwrap();
        server
            .handle_message(
                header(1),
                Message::CellClaimRequest(ClaimRequest { row: 0, col: 0 }),
                addr(9000),
            )
            .await;
        assert!(drain(&mut server).is_empty());
        assert_eq!(server.game_state.claimed_cells(), 0);
    }

    #[tokio::test]
    async fn test_tick_broadcasts_snapshot_and_publishes_observation() {
        let mut server = Server::new(test_config()).await.unwrap();
        let mut observer = server.observe();
        join(&mut server, 9000).await;
        join(&mut server, 9001).await;
        claim(&mut server, 9001, 1, 3, 3).await;

        server.tick().await;
        let sent = drain(&mut server);
        assert_eq!(sent.len(), 2);
        for (_, packet, message) in &sent {
            assert_eq!(packet.header.snapshot_id, 1);
            assert_eq!(packet.header.seq_num, 1);
            match message {
                Message::Snapshot(snapshot) => {
                    assert_eq!(snapshot.cells[15], Some(1));
                    assert_eq!(snapshot.players.len(), 2);
                }
                other => panic!("expected snapshot, got {:?}", other),
            }
        }

        assert!(observer.has_changed().unwrap());
        let observation = observer.borrow_and_update().clone();
        assert_eq!(observation.snapshot_id, 1);
        assert_eq!(observation.claimed_cells, 1);
        assert!(!observation.result.ended);

        server.tick().await;
        let sent = drain(&mut server);
        assert!(sent.iter().all(|(_, packet, _)| packet.header.snapshot_id == 2));
        assert!(sent.iter().all(|(_, packet, _)| packet.header.seq_num == 2));
    }

    #[tokio::test]
    async fn test_game_over_sent_once() {
        let config = ServerConfig {
            grid_width: 1,
            grid_height: 2,
            ..test_config()
        };
        let mut server = Server::new(config).await.unwrap();
        join(&mut server, 9000).await;
        claim(&mut server, 9000, 1, 0, 0).await;
        claim(&mut server, 9000, 2, 1, 0).await;

        server.tick().await;
        let sent = drain(&mut server);
        let game_overs: Vec<_> = sent
            .iter()
            .filter(|(_, _, m)| matches!(m, Message::GameOver(_)))
            .collect();
        assert_eq!(game_overs.len(), 1);
        assert_eq!(
            game_overs[0].2,
            Message::GameOver(Some(Winner {
                player_id: 0,
                score: 2
            }))
        );

        server.tick().await;
        let sent = drain(&mut server);
        assert!(sent
            .iter()
            .all(|(_, _, m)| matches!(m, Message::Snapshot(_))));

        let ack = claim(&mut server, 9000, 3, 0, 0).await;
        assert!(!ack.accepted);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_state_and_result() {
        let config = ServerConfig {
            grid_width: 1,
            grid_height: 1,
            ..test_config()
        };
        let mut server = Server::new(config).await.unwrap();
        join(&mut server, 9000).await;
        claim(&mut server, 9000, 1, 0, 0).await;
        server.tick().await;
        drain(&mut server);

        server
            .handle_message(header(0), Message::ClientInit, addr(9001))
            .await;
        let sent = drain(&mut server);
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0].2, Message::Snapshot(_)));
        assert!(matches!(sent[1].2, Message::GameOver(Some(_))));
        assert_eq!(server.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_new_game_resets_grid_and_scores() {
        let config = ServerConfig {
            grid_width: 1,
            grid_height: 1,
            ..test_config()
        };
        let mut server = Server::new(config).await.unwrap();
        join(&mut server, 9000).await;
        claim(&mut server, 9000, 1, 0, 0).await;
        server.tick().await;
        drain(&mut server);
        let snapshot_before = server.game_state.snapshot_id();

        server
            .handle_message(header(2), Message::NewGame, addr(9000))
            .await;
        let sent = drain(&mut server);
        assert!(matches!(sent[0].2, Message::ServerInitResponse(_)));
        assert!(!server.game_state.result().ended);
        assert_eq!(server.game_state.claimed_cells(), 0);
        assert_eq!(server.game_state.snapshot_id(), snapshot_before);
        assert_eq!(server.sessions.read().await.get(&addr(9000)).unwrap().score, 0);
    }

    #[tokio::test]
    async fn test_new_game_while_running_only_resends_init() {
        let mut server = Server::new(test_config()).await.unwrap();
        join(&mut server, 9000).await;
        claim(&mut server, 9000, 1, 0, 2).await;
        server
            .handle_message(header(2), Message::NewGame, addr(9000))
            .await;

        let sent = drain(&mut server);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].2,
            Message::ServerInitResponse(InitResponse {
                player_id: 0,
                x: 2,
                y: 0
            })
        );
        assert_eq!(server.game_state.claimed_cells(), 1);
        assert_eq!(server.sessions.read().await.get(&addr(9000)).unwrap().score, 1);
    }

    #[tokio::test]
    async fn test_lost_restart_reply_is_recovered() {
        let config = ServerConfig {
            grid_width: 1,
            grid_height: 1,
            ..test_config()
        };
        let mut server = Server::new(config).await.unwrap();
        join(&mut server, 9000).await;
        join(&mut server, 9001).await;
        claim(&mut server, 9000, 1, 0, 0).await;
        server.tick().await;
        drain(&mut server);

        // Player 0 restarts; the reply to player 1 is dropped.
        server
            .handle_message(header(2), Message::NewGame, addr(9000))
            .await;
        drain(&mut server);
        assert!(!server.game_state.result().ended);

        // Player 1 still sees the old result and keeps asking.
        server
            .handle_message(header(5), Message::NewGame, addr(9001))
            .await;
        let sent = drain(&mut server);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, addr(9001));
        assert!(matches!(
            sent[0].2,
            Message::ServerInitResponse(InitResponse { player_id: 1, .. })
        ));
        assert!(!server.game_state.result().ended);
    }

    #[tokio::test]
    async fn test_new_game_from_unknown_address_is_ignored() {
        let mut server = Server::new(test_config()).await.unwrap();
        server
            .handle_message(header(1), Message::NewGame, addr(9000))
            .await;
        assert!(drain(&mut server).is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_session() {
        let mut server = Server::new(test_config()).await.unwrap();
        join(&mut server, 9000).await;
        let before = server.sessions.read().await.get(&addr(9000)).unwrap().last_heartbeat;

        tokio::time::sleep(Duration::from_millis(5)).await;
        server
            .handle_message(header(1), Message::Heartbeat, addr(9000))
            .await;
        let after = server.sessions.read().await.get(&addr(9000)).unwrap().last_heartbeat;
        assert!(after > before);
        assert!(drain(&mut server).is_empty());
    }

    #[test]
    fn test_server_message_creation() {
        let msg = ServerMessage::SessionsReaped {
            player_ids: vec![2, 3],
        };
        match msg {
            ServerMessage::SessionsReaped { player_ids } => assert_eq!(player_ids, vec![2, 3]),
            _ => panic!("Unexpected message type"),
        }
    }
}
