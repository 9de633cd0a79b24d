//! The authoritative side: client sessions, entity visibility, chunk
//! streaming and corrections.
//!
//! One [`ClientConnection`] per remote address. Each tick the session
//! walks the sorted world entity list against its sorted known-spawn
//! list, emitting spawns and despawns for entities crossing the client's
//! interest radius and queuing updates for the rest. Spawns and despawns
//! are retransmitted on loss until acknowledged; state updates are
//! fire-and-forget.

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};

use tracing::info;

use hollow_shared::constants::{DEFAULT_PORT, SPAWN_RADIUS};
use hollow_shared::math::IVec3;
use hollow_shared::timer::IntervalTimer;
use hollow_world::block::Block;
use hollow_world::entity::EntityState;
use hollow_world::save::{PlayerRecord, WorldSave};
use hollow_world::store::IndexHandle;
use hollow_world::world::World;

use crate::connection::{
    CongestionControl, Connection, ConnectionEvent, EventCollector,
};
use crate::protocol::{
    block_update, despawn_entity, entity_update, join, login, message, player_correction,
    player_update, spawn_entity, Packet, PacketType,
};
use crate::transfer::ChunkTransmitter;
use crate::NetResult;

/// Squared drift (in m^2) beyond which the server corrects a client.
const FIX_THRESHOLD: f32 = 0.0001;

/// Milliseconds without input before an out-of-order update is taken
/// anyway.
const PLAYER_UPDATE_STALE_MS: i32 = 1_500;

/// Chunk queue probes per tick while looking for a sendable chunk.
const CHUNK_QUEUE_PROBES: usize = 64;

/// Unsent/acked marker in spawn bookkeeping.
const NO_PACK: i32 = -1;

/// A message a client sent for the command layer to interpret.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Entity id of the sending player.
    pub entity: u32,
    /// Message class from the packet.
    pub msg_type: u8,
    /// The text.
    pub text: String,
}

/// Server network configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// UDP port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Spawn bookkeeping for one entity on one client.
struct SpawnStatus {
    entity: u32,
    /// Sequence of the spawn packet, or -1 once acked.
    spawn_pack: i32,
    /// Sequence of the despawn packet, or -1 if none sent.
    despawn_pack: i32,
}

/// Player attachment of a client connection.
struct PlayerSession {
    entity: u32,
    chunks: IndexHandle,
    name: String,
}

/// One remote client.
pub struct ClientConnection {
    conn: Connection,
    congestion: CongestionControl,
    player: Option<PlayerSession>,
    spawns: Vec<SpawnStatus>,
    confirm_wait: u32,
    entity_updates: Vec<u32>,
    player_update_state: EntityState,
    player_update_pack: u16,
    player_update_timer: IntervalTimer,
    transmitter: ChunkTransmitter,
    chunk_queue: VecDeque<IVec3>,
    old_base: IVec3,
    inventory_slot: u8,
}

impl ClientConnection {
    fn new(addr: SocketAddr) -> Self {
        let mut player_update_timer = IntervalTimer::new(PLAYER_UPDATE_STALE_MS);
        player_update_timer.start();
        Self {
            conn: Connection::new(addr),
            congestion: CongestionControl::new(),
            player: None,
            spawns: Vec::new(),
            confirm_wait: 0,
            entity_updates: Vec::new(),
            player_update_state: EntityState::default(),
            player_update_pack: 0,
            player_update_timer,
            transmitter: ChunkTransmitter::new(),
            chunk_queue: VecDeque::new(),
            old_base: IVec3::ZERO,
            inventory_slot: 0,
        }
    }

    /// The remote address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.conn.addr()
    }

    /// True once the connection is closed.
    #[must_use]
    pub fn disconnected(&self) -> bool {
        self.conn.closed()
    }

    /// Entity id of the attached player, if logged in.
    #[must_use]
    pub fn player_entity(&self) -> Option<u32> {
        self.player.as_ref().map(|p| p.entity)
    }

    /// Congestion diagnostics for this client.
    #[must_use]
    pub fn congestion(&self) -> &CongestionControl {
        &self.congestion
    }

    fn send(&mut self, pkt: &mut Packet, socket: &UdpSocket) -> u16 {
        let mut events = EventCollector::default();
        let seq = self.conn.send(pkt, socket, &mut events);
        self.congestion.packet_out(seq, pkt.as_bytes().len());
        seq
    }

    // ------------------------------------------------------------------
    // per-tick work

    fn update(&mut self, dt: i32, world: &mut World, save: &WorldSave, socket: &UdpSocket) {
        let mut events = EventCollector::default();
        self.conn.update(dt, &mut events);
        self.player_update_timer.update(dt);
        self.process_events(&events.events, world, save, socket);

        if self.disconnected() {
            return;
        }
        if self.player.is_some() {
            self.sync_entities(world, socket);
            self.send_updates(world, socket);
            self.check_player_fix(world, socket);
            self.check_chunk_queue(world, socket);
        }
        if self.conn.should_ping() {
            let mut events = EventCollector::default();
            self.conn.send_ping(socket, &mut events);
        }
    }

    fn process_events(
        &mut self,
        events: &[ConnectionEvent],
        world: &mut World,
        save: &WorldSave,
        socket: &UdpSocket,
    ) {
        for event in events {
            match *event {
                ConnectionEvent::Received(seq) => self.on_packet_received(seq, world),
                ConnectionEvent::Lost(seq) => self.on_packet_lost(seq, world, socket),
                ConnectionEvent::TimedOut => {
                    info!("connection to {} timed out", self.conn.addr());
                    self.detach_player(world, save);
                }
            }
        }
    }

    fn on_packet_received(&mut self, seq: u16, world: &mut World) {
        if self.transmitter.waiting() {
            self.transmitter.ack(world.chunks_mut(), seq);
        }
        self.congestion.packet_received(seq);
        if self.confirm_wait == 0 {
            return;
        }
        let seq = i32::from(seq);
        for i in 0..self.spawns.len() {
            if self.spawns[i].spawn_pack == seq {
                self.spawns[i].spawn_pack = NO_PACK;
                self.confirm_wait -= 1;
                return;
            }
            if self.spawns[i].despawn_pack == seq {
                let status = self.spawns.remove(i);
                if let Some(e) = world.entity_mut(status.entity) {
                    e.remove_ref();
                }
                self.confirm_wait -= 1;
                return;
            }
        }
    }

    fn on_packet_lost(&mut self, seq: u16, world: &mut World, socket: &UdpSocket) {
        if self.transmitter.waiting() {
            let conn = &mut self.conn;
            let congestion = &mut self.congestion;
            let mut send = |pkt: &mut Packet| {
                let mut events = EventCollector::default();
                let seq = conn.send(pkt, socket, &mut events);
                congestion.packet_out(seq, pkt.as_bytes().len());
                seq
            };
            self.transmitter.nack(seq, &mut send);
        }
        self.congestion.packet_lost(seq);
        if self.confirm_wait == 0 {
            return;
        }
        let seq = i32::from(seq);
        for i in 0..self.spawns.len() {
            if self.spawns[i].spawn_pack == seq {
                self.spawns[i].spawn_pack = NO_PACK;
                self.confirm_wait -= 1;
                self.send_spawn(i, world, socket);
                return;
            }
            if self.spawns[i].despawn_pack == seq {
                self.spawns[i].despawn_pack = NO_PACK;
                self.confirm_wait -= 1;
                self.send_despawn(i, world, socket);
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // entity visibility

    fn can_spawn(&self, world: &World, entity: u32) -> bool {
        let Some(player) = &self.player else {
            return false;
        };
        if entity == player.entity {
            return false;
        }
        let (Some(e), Some(p)) = (world.entity(entity), world.entity(player.entity)) else {
            return false;
        };
        !e.dead() && (e.chunk_coords() - p.chunk_coords()).manhattan_radius() <= SPAWN_RADIUS
    }

    fn can_despawn(&self, world: &World, entity: u32) -> bool {
        let Some(player) = &self.player else {
            return true;
        };
        let Some(p) = world.entity(player.entity) else {
            return true;
        };
        match world.entity(entity) {
            None => true,
            Some(e) => {
                e.dead() || (e.chunk_coords() - p.chunk_coords()).manhattan_radius() > SPAWN_RADIUS
            }
        }
    }

    /// Ordered merge of the world's entity list with the known spawns.
    fn sync_entities(&mut self, world: &mut World, socket: &UdpSocket) {
        enum Step {
            Spawn(u32),
            Despawn(u32),
            Update(u32),
        }

        let mut steps: Vec<Step> = Vec::new();
        {
            let entities = world.entities();
            let mut gi = 0;
            let mut li = 0;
            while gi < entities.len() && li < self.spawns.len() {
                let gid = entities[gi].id();
                let lid = self.spawns[li].entity;
                if gid == lid {
                    if self.can_despawn(world, gid) {
                        steps.push(Step::Despawn(gid));
                    } else {
                        steps.push(Step::Update(gid));
                    }
                    gi += 1;
                    li += 1;
                } else if gid < lid {
                    if self.can_spawn(world, gid) {
                        steps.push(Step::Spawn(gid));
                    }
                    gi += 1;
                } else {
                    // the entity fell out of the world entirely
                    steps.push(Step::Despawn(lid));
                    li += 1;
                }
            }
            while gi < entities.len() {
                let gid = entities[gi].id();
                if self.can_spawn(world, gid) {
                    steps.push(Step::Spawn(gid));
                }
                gi += 1;
            }
            while li < self.spawns.len() {
                steps.push(Step::Despawn(self.spawns[li].entity));
                li += 1;
            }
        }

        for step in steps {
            match step {
                Step::Spawn(id) => {
                    if let Some(e) = world.entity_mut(id) {
                        e.add_ref();
                    }
                    let idx = self
                        .spawns
                        .binary_search_by_key(&id, |s| s.entity)
                        .unwrap_err();
                    self.spawns.insert(
                        idx,
                        SpawnStatus {
                            entity: id,
                            spawn_pack: NO_PACK,
                            despawn_pack: NO_PACK,
                        },
                    );
                    self.send_spawn(idx, world, socket);
                }
                Step::Despawn(id) => {
                    if let Ok(idx) = self.spawns.binary_search_by_key(&id, |s| s.entity) {
                        self.send_despawn(idx, world, socket);
                    }
                }
                Step::Update(id) => {
                    let idx = self
                        .spawns
                        .binary_search_by_key(&id, |s| s.entity)
                        .expect("update step for known spawn");
                    // no state updates before the spawn is acked or after
                    // a despawn went out
                    if self.spawns[idx].spawn_pack == NO_PACK
                        && self.spawns[idx].despawn_pack == NO_PACK
                    {
                        self.entity_updates.push(id);
                    }
                }
            }
        }
    }

    fn send_spawn(&mut self, idx: usize, world: &World, socket: &UdpSocket) {
        if self.spawns[idx].spawn_pack != NO_PACK {
            return;
        }
        let Some(entity) = world.entity(self.spawns[idx].entity) else {
            return;
        };
        let mut pkt = Packet::make(PacketType::SpawnEntity);
        let flags = if entity.world_collidable() {
            spawn_entity::FLAG_WORLD_COLLIDABLE
        } else {
            0
        };
        spawn_entity::write_entity(
            &mut pkt,
            entity.id(),
            entity.model_id,
            &entity.state,
            &entity.bounds,
            flags,
            entity.name(),
        );
        let seq = self.send(&mut pkt, socket);
        self.spawns[idx].spawn_pack = i32::from(seq);
        self.confirm_wait += 1;
    }

    fn send_despawn(&mut self, idx: usize, _world: &World, socket: &UdpSocket) {
        if self.spawns[idx].despawn_pack != NO_PACK {
            return;
        }
        let mut pkt = Packet::make(PacketType::DespawnEntity);
        despawn_entity::write_entity_id(&mut pkt, self.spawns[idx].entity);
        let seq = self.send(&mut pkt, socket);
        self.spawns[idx].despawn_pack = i32::from(seq);
        self.confirm_wait += 1;
    }

    /// Flushes queued entity updates in full batches.
    fn send_updates(&mut self, world: &World, socket: &UdpSocket) {
        if self.entity_updates.is_empty() {
            return;
        }
        let Some(player) = &self.player else {
            self.entity_updates.clear();
            return;
        };
        let base = world
            .entity(player.entity)
            .map_or(IVec3::ZERO, |e| e.chunk_coords());

        let updates = std::mem::take(&mut self.entity_updates);
        let mut pkt = Packet::make(PacketType::EntityUpdate);
        entity_update::write_chunk_base(&mut pkt, base);
        let mut count = 0usize;
        for id in updates {
            let Some(entity) = world.entity(id) else {
                continue;
            };
            entity_update::write_entity(&mut pkt, count, id, &entity.state, base);
            count += 1;
            if count == entity_update::MAX_ENTITIES {
                entity_update::write_entity_count(&mut pkt, count as u32);
                self.send(&mut pkt, socket);
                pkt = Packet::make(PacketType::EntityUpdate);
                entity_update::write_chunk_base(&mut pkt, base);
                count = 0;
            }
        }
        if count > 0 {
            entity_update::write_entity_count(&mut pkt, count as u32);
            self.send(&mut pkt, socket);
        }
    }

    /// Sends a correction when the client's prediction drifted too far.
    fn check_player_fix(&mut self, world: &World, socket: &UdpSocket) {
        let Some(player) = &self.player else {
            return;
        };
        let Some(entity) = world.entity(player.entity) else {
            return;
        };
        let diff = self.player_update_state.diff(&entity.state);
        if diff.length_squared() > FIX_THRESHOLD {
            let mut pkt = Packet::make(PacketType::PlayerCorrection);
            player_correction::write_packet_seq(&mut pkt, self.player_update_pack);
            player_correction::write_player_state(&mut pkt, &entity.state);
            self.send(&mut pkt, socket);
        }
    }

    /// Keeps the chunk stream moving: requeues on rebase, pushes the
    /// in-flight transfer, starts the next one when idle.
    fn check_chunk_queue(&mut self, world: &mut World, socket: &UdpSocket) {
        let Some(player) = &self.player else {
            return;
        };
        let chunks = player.chunks;
        let index_base = world.chunks().index(chunks).base();
        let extent = world.chunks().index(chunks).extent();
        if index_base != self.old_base {
            let begin = world.chunks().index(chunks).coords_begin();
            let end = world.chunks().index(chunks).coords_end();
            for z in begin.z..end.z {
                for y in begin.y..end.y {
                    for x in begin.x..end.x {
                        let pos = IVec3::new(x, y, z);
                        if (pos - self.old_base).manhattan_radius() > extent {
                            self.chunk_queue.push_back(pos);
                        }
                    }
                }
            }
            self.old_base = index_base;
        }

        let conn = &mut self.conn;
        let congestion = &mut self.congestion;
        let mut send = |pkt: &mut Packet| {
            let mut events = EventCollector::default();
            let seq = conn.send(pkt, socket, &mut events);
            congestion.packet_out(seq, pkt.as_bytes().len());
            seq
        };

        if self.transmitter.transmitting() {
            self.transmitter.transmit(&mut send);
            return;
        }
        if self.transmitter.idle() {
            let mut probes = 0;
            while probes < CHUNK_QUEUE_PROBES {
                let Some(pos) = self.chunk_queue.pop_front() else {
                    break;
                };
                if !world.chunks().index(chunks).in_range(pos) {
                    continue;
                }
                if let Some(handle) = world.chunks().index(chunks).get(pos) {
                    self.transmitter.send(world.chunks_mut(), handle, &mut send);
                    return;
                }
                // not loaded yet, try again later
                self.chunk_queue.push_back(pos);
                probes += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // inbound packets

    fn dispatch(
        &mut self,
        pkt: &Packet,
        world: &mut World,
        save: &WorldSave,
        socket: &UdpSocket,
        messages: &mut Vec<InboundMessage>,
    ) {
        match pkt.packet_type() {
            Some(PacketType::Login) => self.on_login(pkt, world, save, socket),
            Some(PacketType::Part) => {
                self.detach_player(world, save);
                self.conn.close();
            }
            Some(PacketType::PlayerUpdate) => self.on_player_update(pkt, world),
            Some(PacketType::Message) => {
                if let Some(player) = &self.player {
                    messages.push(InboundMessage {
                        entity: player.entity,
                        msg_type: message::read_type(pkt),
                        text: message::read_message(pkt),
                    });
                }
            }
            // Ping carries nothing beyond its control header; clients do
            // not send the server-authoritative types
            _ => {}
        }
    }

    fn on_login(&mut self, pkt: &Packet, world: &mut World, save: &WorldSave, socket: &UdpSocket) {
        let name = login::read_name(pkt);
        match world.add_player(&name) {
            Some(player) => {
                if save.player_exists(&name) {
                    match save.read_player(&name) {
                        Ok(record) => {
                            if let Some(e) = world.entity_mut(player.entity) {
                                e.state.pos =
                                    hollow_shared::location::ExactLocation::new(
                                        record.chunk,
                                        record.position,
                                    )
                                    .sanitize();
                                e.state.orient = record.orientation;
                                e.state.pitch = record.pitch;
                                e.state.yaw = record.yaw;
                            }
                            self.inventory_slot = record.slot;
                        }
                        Err(err) => {
                            tracing::error!("failed to read player {name}: {err}");
                        }
                    }
                }

                info!("accepted login from player \"{name}\"");
                self.player = Some(PlayerSession {
                    entity: player.entity,
                    chunks: player.chunks,
                    name: name.clone(),
                });

                // queue the whole interest cube for streaming
                self.old_base = world.chunks().index(player.chunks).base();
                let begin = world.chunks().index(player.chunks).coords_begin();
                let end = world.chunks().index(player.chunks).coords_end();
                for z in begin.z..end.z {
                    for y in begin.y..end.y {
                        for x in begin.x..end.x {
                            self.chunk_queue.push_back(IVec3::new(x, y, z));
                        }
                    }
                }

                let state = world
                    .entity(player.entity)
                    .map(|e| e.state)
                    .unwrap_or_default();
                let mut out = Packet::make(PacketType::Join);
                join::write_player(&mut out, player.entity, &state);
                join::write_world_name(&mut out, world.name());
                self.send(&mut out, socket);

                self.player_update_state = state;
                self.player_update_pack = pkt.seq();
                self.player_update_timer.reset();
            }
            None => {
                info!("rejected login from player \"{name}\"");
                let mut out = Packet::make(PacketType::Part);
                self.send(&mut out, socket);
                self.conn.close();
            }
        }
    }

    fn on_player_update(&mut self, pkt: &Packet, world: &mut World) {
        let Some(player) = &self.player else {
            return;
        };
        let entity_id = player.entity;

        let pack_diff = i32::from(pkt.seq().wrapping_sub(self.player_update_pack) as i16);
        let overdue = self.player_update_timer.hit_once();
        self.player_update_timer.reset();
        if pack_diff <= 0 && !overdue {
            return;
        }
        self.player_update_pack = pkt.seq();
        self.player_update_state = player_update::read_predicted_state(pkt);
        self.inventory_slot = player_update::read_slot(pkt);
        if let Some(p) = world.player_by_entity_mut(entity_id) {
            p.inventory_slot = self.inventory_slot;
        }

        // velocity and orientation are accepted as user input; position
        // stays authoritative
        if let Some(e) = world.entity_mut(entity_id) {
            e.state.velocity = self.player_update_state.velocity;
            e.state.orient = self.player_update_state.orient;
            e.state.pitch = self.player_update_state.pitch;
            e.state.yaw = self.player_update_state.yaw;
            e.target_velocity = self.player_update_state.velocity;
        }
    }

    fn detach_player(&mut self, world: &mut World, save: &WorldSave) {
        let Some(player) = self.player.take() else {
            return;
        };
        info!("player \"{}\" left", player.name);

        if let Some(e) = world.entity(player.entity) {
            let record = PlayerRecord {
                chunk: e.state.pos.chunk,
                position: e.state.pos.block,
                orientation: e.state.orient,
                pitch: e.state.pitch,
                yaw: e.state.yaw,
                slot: self.inventory_slot,
            };
            if let Err(err) = save.write_player(&player.name, &record) {
                tracing::error!("failed to save player {}: {err}", player.name);
            }
        }

        world.remove_player(player.entity);
        self.transmitter.abort(world.chunks_mut());
        self.chunk_queue.clear();

        // release every spawn reference
        for status in self.spawns.drain(..) {
            if let Some(e) = world.entity_mut(status.entity) {
                e.remove_ref();
            }
        }
        self.confirm_wait = 0;
    }
}

/// The server session: socket plus per-client connections.
pub struct Server {
    socket: UdpSocket,
    clients: Vec<ClientConnection>,
    messages: Vec<InboundMessage>,
}

impl Server {
    /// Binds the server socket, non-blocking.
    pub fn bind(config: &ServerConfig) -> NetResult<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", config.port))?;
        socket.set_nonblocking(true)?;
        info!("listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            clients: Vec::new(),
            messages: Vec::new(),
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The connected (or connecting) clients.
    #[must_use]
    pub fn clients(&self) -> &[ClientConnection] {
        &self.clients
    }

    /// Messages received since the last drain, for the command layer.
    pub fn drain_messages(&mut self) -> Vec<InboundMessage> {
        std::mem::take(&mut self.messages)
    }

    /// Reads all pending datagrams and dispatches them.
    pub fn handle(&mut self, world: &mut World, save: &WorldSave) {
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
            let Some(pkt) = Packet::parse(&buf[..len]) else {
                // mistagged or truncated, drop silently
                continue;
            };

            let idx = match self.clients.iter().position(|c| c.conn.matches(addr)) {
                Some(idx) => idx,
                None => {
                    info!("new connection from {addr}");
                    self.clients.push(ClientConnection::new(addr));
                    self.clients.len() - 1
                }
            };

            let client = &mut self.clients[idx];
            client.congestion.packet_in(len);
            let mut events = EventCollector::default();
            client.conn.received(&pkt, &mut events);
            client.dispatch(&pkt, world, save, &self.socket, &mut self.messages);
            client.process_events(&events.events, world, save, &self.socket);
        }
    }

    /// Per-tick client maintenance; drops dead connections.
    pub fn update(&mut self, dt: i32, world: &mut World, save: &WorldSave) {
        for client in &mut self.clients {
            client.update(dt, world, save, &self.socket);
        }
        for i in (0..self.clients.len()).rev() {
            if self.clients[i].disconnected() {
                let mut client = self.clients.remove(i);
                client.detach_player(world, save);
            }
        }
    }

    /// Writes a block authoritatively and fans the edit out to every
    /// client whose interest region covers the chunk.
    pub fn set_block(
        &mut self,
        world: &mut World,
        chunk: hollow_world::store::ChunkHandle,
        index: usize,
        block: Block,
    ) {
        let pos = world.chunks().chunk(chunk).position();
        world.set_block(chunk, index, block);

        for client in &mut self.clients {
            let Some(player) = &client.player else {
                continue;
            };
            if !world.chunks().index(player.chunks).in_range(pos) {
                continue;
            }
            let mut pkt = Packet::make(PacketType::BlockUpdate);
            block_update::write_chunk_coords(&mut pkt, pos);
            block_update::write_block(&mut pkt, 0, index as u16, block);
            block_update::write_block_count(&mut pkt, 1);
            client.send(&mut pkt, &self.socket);
        }
    }

    /// Sends a text message to one client by player entity id.
    pub fn send_message(&mut self, entity: u32, msg_type: u8, text: &str) {
        for client in &mut self.clients {
            if client.player_entity() == Some(entity) {
                let mut pkt = Packet::make(PacketType::Message);
                message::write_type(&mut pkt, msg_type);
                message::write_referral(&mut pkt, entity);
                message::write_message(&mut pkt, text);
                client.send(&mut pkt, &self.socket);
                return;
            }
        }
    }

    /// Broadcasts a text message to every logged-in client.
    pub fn broadcast_message(&mut self, referral: u32, msg_type: u8, text: &str) {
        for client in &mut self.clients {
            if client.player.is_some() {
                let mut pkt = Packet::make(PacketType::Message);
                message::write_type(&mut pkt, msg_type);
                message::write_referral(&mut pkt, referral);
                message::write_message(&mut pkt, text);
                client.send(&mut pkt, &self.socket);
            }
        }
    }
}
