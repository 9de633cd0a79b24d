//! The mirroring side: prediction, reconciliation and chunk reception.
//!
//! The client simulates its own player through the same physics the
//! server runs, sends every input step as a `PlayerUpdate`, and keeps a
//! ring of recent steps. When the server answers with a correction the
//! acknowledged steps are dropped and the remainder replayed from the
//! corrected state; small residues glide away at a centimeter per frame,
//! large ones warp.
//!
//! Everything else the client holds (entities, chunks) is a mirror that
//! server packets write into.

use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::{debug, info};

use hollow_shared::constants::PREDICTION_HISTORY;
use hollow_shared::math::Vec3;
use hollow_world::entity::EntityState;
use hollow_world::world::World;

use crate::connection::{CongestionControl, Connection, ConnectionEvent, EventCollector};
use crate::protocol::{
    block_update, despawn_entity, entity_update, join, login, message, player_correction,
    player_update, spawn_entity, Packet, PacketType,
};
use crate::transfer::ChunkReceiver;
use crate::{NetError, NetResult};

/// Squared displacement (m^2) above which the player warps to the
/// corrected position. Ten centimeters of drift.
const WARP_THRESHOLD: f32 = 0.01;

/// Squared displacement below which the correction is applied outright.
const MAX_DISP: f32 = 0.0001;

/// Milliseconds after which an out-of-order entity update is accepted.
const ENTITY_UPDATE_STALE_MS: i32 = 1_500;

/// One predicted input step.
struct PlayerHistory {
    state: EntityState,
    target_velocity: Vec3,
    delta_t: f32,
    packet: u16,
}

/// Per-entity packet ordering state.
struct UpdateStatus {
    last_packet: u16,
    last_update: i32,
}

/// A text message received from the server.
#[derive(Clone, Debug)]
pub struct ServerMessage {
    /// Message class.
    pub msg_type: u8,
    /// Referral entity id, 0 for none.
    pub referral: u32,
    /// The text.
    pub text: String,
}

/// Client session towards one server.
pub struct Client {
    socket: UdpSocket,
    conn: Connection,
    congestion: CongestionControl,
    receiver: ChunkReceiver,
    history: VecDeque<PlayerHistory>,
    update_status: HashMap<u32, UpdateStatus>,
    clock_ms: i32,
    login_pending: Option<(u16, String)>,
    player_entity: Option<u32>,
    world_name: Option<String>,
    timed_out: bool,
    rejected: bool,
    messages: Vec<ServerMessage>,
}

impl Client {
    /// Resolves the server, binds an ephemeral port and pings once to
    /// open the path.
    pub fn connect(host: &str, port: u16) -> NetResult<Self> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|_| NetError::Resolve(host.to_string()))?
            .collect();
        // the server binds v4; prefer a v4 address when there is one
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| NetError::Resolve(host.to_string()))?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;

        let mut client = Self {
            socket,
            conn: Connection::new(addr),
            congestion: CongestionControl::new(),
            receiver: ChunkReceiver::new(),
            history: VecDeque::with_capacity(PREDICTION_HISTORY),
            update_status: HashMap::new(),
            clock_ms: 0,
            login_pending: None,
            player_entity: None,
            world_name: None,
            timed_out: false,
            rejected: false,
            messages: Vec::new(),
        };
        client.send_ping();
        Ok(client)
    }

    /// Entity id assigned by the server, once joined.
    #[must_use]
    pub const fn player_entity(&self) -> Option<u32> {
        self.player_entity
    }

    /// World name from the join handshake.
    #[must_use]
    pub fn world_name(&self) -> Option<&str> {
        self.world_name.as_deref()
    }

    /// True after the receive timeout expired.
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// True after the server answered a login with a part.
    #[must_use]
    pub const fn rejected(&self) -> bool {
        self.rejected
    }

    /// Congestion diagnostics.
    #[must_use]
    pub fn congestion(&self) -> &CongestionControl {
        &self.congestion
    }

    /// Messages received since the last drain.
    pub fn drain_messages(&mut self) -> Vec<ServerMessage> {
        std::mem::take(&mut self.messages)
    }

    // ------------------------------------------------------------------
    // sending

    fn send(&mut self, pkt: &mut Packet) -> u16 {
        let mut events = EventCollector::default();
        let seq = self.conn.send(pkt, &self.socket, &mut events);
        self.congestion.packet_out(seq, pkt.as_bytes().len());
        seq
    }

    fn send_ping(&mut self) -> u16 {
        let mut pkt = Packet::make(PacketType::Ping);
        self.send(&mut pkt)
    }

    /// Requests to join under the given name; retried on loss until the
    /// server answers.
    pub fn send_login(&mut self, name: &str) -> u16 {
        let mut pkt = Packet::make(PacketType::Login);
        login::write_name(&mut pkt, name);
        let seq = self.send(&mut pkt);
        self.login_pending = Some((seq, name.to_string()));
        seq
    }

    /// Announces an orderly leave.
    pub fn send_part(&mut self) -> u16 {
        let mut pkt = Packet::make(PacketType::Part);
        self.send(&mut pkt)
    }

    /// Sends a text message.
    pub fn send_message(&mut self, msg_type: u8, referral: u32, text: &str) -> u16 {
        let mut pkt = Packet::make(PacketType::Message);
        message::write_type(&mut pkt, msg_type);
        message::write_referral(&mut pkt, referral);
        message::write_message(&mut pkt, text);
        self.send(&mut pkt)
    }

    /// Sends the freshly simulated step and records it for replay.
    pub fn push_player_update(
        &mut self,
        world: &World,
        dt_ms: i32,
        movement: Vec3,
        actions: u8,
        slot: u8,
    ) {
        let Some(id) = self.player_entity else {
            return;
        };
        let Some(entity) = world.entity(id) else {
            return;
        };
        let state = entity.state;
        let target_velocity = entity.target_velocity;

        let mut pkt = Packet::make(PacketType::PlayerUpdate);
        player_update::write_predicted_state(&mut pkt, &state);
        player_update::write_movement(&mut pkt, movement);
        player_update::write_actions(&mut pkt, actions);
        player_update::write_slot(&mut pkt, slot);
        let seq = self.send(&mut pkt);

        if self.history.len() >= PREDICTION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(PlayerHistory {
            state,
            target_velocity,
            delta_t: dt_ms as f32 / 1000.0,
            packet: seq,
        });
    }

    // ------------------------------------------------------------------
    // per-tick work

    /// Timer upkeep: timeouts, receiver aging, keepalive.
    pub fn update(&mut self, dt: i32) {
        self.clock_ms += dt;
        let mut events = EventCollector::default();
        self.conn.update(dt, &mut events);
        for event in &events.events {
            if *event == ConnectionEvent::TimedOut {
                info!("connection to server timed out");
                self.timed_out = true;
            }
        }
        self.receiver.update(dt);
        if self.conn.should_ping() {
            self.send_ping();
        }
    }

    /// Reads all pending datagrams into the mirror world.
    pub fn handle(&mut self, world: &mut World) {
        let mut buf = [0u8; hollow_shared::constants::MAX_PACKET_SIZE];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf) {
                Ok(ok) => ok,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!("recv failed: {err}");
                    break;
                }
            };
            if !self.conn.matches(addr) {
                // someone else's datagram, drop
                continue;
            }
            let Some(pkt) = Packet::parse(&buf[..len]) else {
                continue;
            };
            self.congestion.packet_in(len);

            let mut events = EventCollector::default();
            self.conn.received(&pkt, &mut events);
            self.dispatch(&pkt, world);
            self.process_events(&events.events);
        }
    }

    fn process_events(&mut self, events: &[ConnectionEvent]) {
        for event in events {
            match *event {
                ConnectionEvent::Received(seq) => {
                    self.congestion.packet_received(seq);
                }
                ConnectionEvent::Lost(seq) => {
                    self.congestion.packet_lost(seq);
                    if let Some((login_seq, name)) = self.login_pending.clone() {
                        if login_seq == seq {
                            debug!("login packet lost, retrying");
                            self.send_login(&name);
                        }
                    }
                }
                ConnectionEvent::TimedOut => {
                    self.timed_out = true;
                }
            }
        }
    }

    fn dispatch(&mut self, pkt: &Packet, world: &mut World) {
        match pkt.packet_type() {
            Some(PacketType::Join) => self.on_join(pkt, world),
            Some(PacketType::Part) => {
                self.rejected = true;
                self.login_pending = None;
                self.conn.close();
            }
            Some(PacketType::SpawnEntity) => self.on_spawn_entity(pkt, world),
            Some(PacketType::DespawnEntity) => self.on_despawn_entity(pkt, world),
            Some(PacketType::EntityUpdate) => self.on_entity_update(pkt, world),
            Some(PacketType::PlayerCorrection) => {
                let seq = player_correction::read_packet_seq(pkt);
                let corrected = player_correction::read_player_state(pkt);
                self.merge_player_correction(seq, corrected, world);
            }
            Some(PacketType::ChunkBegin) => self.receiver.handle_begin(pkt, world.chunks_mut()),
            Some(PacketType::ChunkData) => self.receiver.handle_data(pkt, world.chunks_mut()),
            Some(PacketType::BlockUpdate) => Self::on_block_update(pkt, world),
            Some(PacketType::Message) => {
                self.messages.push(ServerMessage {
                    msg_type: message::read_type(pkt),
                    referral: message::read_referral(pkt),
                    text: message::read_message(pkt),
                });
            }
            // Ping only freshens timers; clients never receive the
            // client-to-server types
            _ => {}
        }
    }

    fn on_join(&mut self, pkt: &Packet, world: &mut World) {
        let id = join::read_player_id(pkt);
        let state = join::read_player_state(pkt);
        let name = join::read_world_name(pkt);
        info!("joined world \"{name}\" as entity {id}");

        let player_name = self
            .login_pending
            .take()
            .map_or_else(|| String::from("player"), |(_, n)| n);

        if self.player_entity.is_none() {
            if let Some(player) = world.add_player_with_id(&player_name, id) {
                if let Some(e) = world.entity_mut(player.entity) {
                    e.state = state;
                }
            }
            self.player_entity = Some(id);
        }
        self.world_name = Some(name);
    }

    fn on_spawn_entity(&mut self, pkt: &Packet, world: &mut World) {
        let id = spawn_entity::read_entity_id(pkt);
        if Some(id) == self.player_entity {
            return;
        }
        self.track_update(id, pkt.seq());
        let entity = world.force_add_entity(id);
        entity.state = spawn_entity::read_state(pkt);
        entity.bounds = spawn_entity::read_bounds(pkt);
        entity.model_id = spawn_entity::read_model_id(pkt);
        entity.set_world_collidable(
            spawn_entity::read_flags(pkt) & spawn_entity::FLAG_WORLD_COLLIDABLE != 0,
        );
        entity.set_name(spawn_entity::read_name(pkt));
        debug!("spawned entity #{id}");
    }

    fn on_despawn_entity(&mut self, pkt: &Packet, world: &mut World) {
        let id = despawn_entity::read_entity_id(pkt);
        self.update_status.remove(&id);
        if Some(id) == self.player_entity {
            return;
        }
        if let Some(entity) = world.entity_mut(id) {
            entity.kill();
            debug!("despawned entity #{id}");
        }
    }

    fn on_entity_update(&mut self, pkt: &Packet, world: &mut World) {
        let count = entity_update::read_entity_count(pkt) as usize;
        let base = entity_update::read_chunk_base(pkt);
        let count = count.min(entity_update::MAX_ENTITIES);

        for i in 0..count {
            let id = entity_update::read_entity_id(pkt, i);
            if world.entity(id).is_none() {
                // not spawned here (yet); nothing to update
                continue;
            }
            if self.track_update(id, pkt.seq()) {
                let state = entity_update::read_entity_state(pkt, i, base);
                if let Some(entity) = world.entity_mut(id) {
                    entity.state = state;
                }
            }
        }
    }

    /// True if a packet with this sequence should update the entity.
    fn track_update(&mut self, id: u32, seq: u16) -> bool {
        let now = self.clock_ms;
        match self.update_status.get_mut(&id) {
            None => {
                self.update_status.insert(
                    id,
                    UpdateStatus {
                        last_packet: seq,
                        last_update: now,
                    },
                );
                true
            }
            Some(status) => {
                let pack_diff = i32::from(seq.wrapping_sub(status.last_packet) as i16);
                let time_diff = now - status.last_update;
                status.last_update = now;
                if pack_diff > 0 || time_diff > ENTITY_UPDATE_STALE_MS {
                    status.last_packet = seq;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_block_update(pkt: &Packet, world: &mut World) {
        let pos = block_update::read_chunk_coords(pkt);
        let Some(chunk) = world.chunks().get(pos) else {
            // this change doesn't concern us
            return;
        };
        let count = (block_update::read_block_count(pkt) as usize).min(block_update::MAX_BLOCKS);
        for i in 0..count {
            let (index, block) = block_update::read_block(pkt, i);
            if usize::from(index) < hollow_shared::constants::BLOCKS_PER_CHUNK
                && world.types().contains(block.type_id)
            {
                world.set_block(chunk, usize::from(index), block);
            }
        }
    }

    /// Reconciles the prediction history against an authoritative state.
    pub fn merge_player_correction(&mut self, seq: u16, corrected: EntityState, world: &mut World) {
        if self.history.is_empty() {
            return;
        }
        // we may have received an older packet
        let first_diff =
            i32::from(seq.wrapping_sub(self.history.front().expect("nonempty").packet) as i16);
        if first_diff < 0 {
            return;
        }

        // drop anything older than the fix
        while let Some(front) = self.history.front() {
            if i32::from(seq.wrapping_sub(front.packet) as i16) > 0 {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let Some(id) = self.player_entity else {
            return;
        };
        let Some(dynamics) = world.entity(id).map(|e| e.dynamics()) else {
            return;
        };

        let mut replay = corrected;
        let mut entries = self.history.iter_mut();
        if let Some(entry) = entries.next() {
            entry.state.pos = replay.pos;
        }
        for entry in entries {
            replay.velocity = entry.state.velocity;
            let mut d = dynamics;
            d.target_velocity = entry.target_velocity;
            world.step_entity(&d, &mut replay, entry.delta_t);
            entry.state.pos = replay.pos;
        }

        let Some(entity) = world.entity_mut(id) else {
            return;
        };
        let displacement = replay.diff(&entity.state);
        let disp_squared = displacement.length_squared();
        if disp_squared < 16.0 * f32::EPSILON {
            return;
        }

        // warp threshold is ten centimeters of drift; below it the player
        // glides at most a centimeter per frame towards the fix
        if disp_squared > WARP_THRESHOLD {
            entity.state.pos = replay.pos;
        } else if disp_squared < MAX_DISP {
            entity.state.pos.block += displacement;
        } else {
            entity.state.pos.block += displacement * (0.01 / disp_squared.sqrt());
        }
        entity.state.adjust();
    }
}
