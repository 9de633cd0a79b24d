//! Fixed-layout message framing with quantized state encoding.
//!
//! Every datagram is at most 500 bytes: a 4-byte magic tag, the 8-byte
//! transmission control (sequence, ack, ack history), a type code, then a
//! payload whose field offsets are fixed per type. Integers are
//! little-endian throughout.
//!
//! ## Quantization
//!
//! - angles: 16-bit signed, normalized to the relevant pi range
//! - in-chunk positions: 16-bit unsigned over [0, 16)
//! - chunk deltas relative to a base: 8-bit signed per axis
//! - orientation quaternions: four 16-bit normalized components,
//!   renormalized after decoding

use hollow_shared::constants::{CHUNK_FSIZE, MAX_PACKET_SIZE, PI, PI_0P5};
use hollow_shared::geometry::Aabb;
use hollow_shared::location::ExactLocation;
use hollow_shared::math::{IVec3, Quat, Vec3};
use hollow_world::block::Block;
use hollow_world::entity::EntityState;

/// Magic tag leading every valid packet.
pub const TAG: u32 = 0xFB1A_B1AF;

/// Byte offset of the sequence field.
const OFF_SEQ: usize = 4;
/// Byte offset of the ack field.
const OFF_ACK: usize = 6;
/// Byte offset of the ack history field.
const OFF_HIST: usize = 8;
/// Byte offset of the type code.
const OFF_TYPE: usize = 12;
/// Payload offset; the header is padded to keep payloads 4-aligned.
pub const HEADER_SIZE: usize = 16;

/// Largest payload a packet can carry.
pub const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Packed size of an absolute entity state.
pub const STATE_SIZE: usize = 42;
/// Packed size of a base-relative entity state.
pub const STATE_RELATIVE_SIZE: usize = 33;

/// Transmission control: what we send, what we saw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TControl {
    /// Next (outgoing) or latest seen (incoming) sequence number.
    pub seq: u16,
    /// Latest remote sequence acknowledged.
    pub ack: u16,
    /// Bit k set: sequence `ack - k - 1` was also received.
    pub hist: u32,
}

impl TControl {
    /// Fresh control: pretends everything before sequence 0 arrived.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            seq: 0,
            ack: 0xFFFF,
            hist: 0xFFFF_FFFF,
        }
    }

    /// True if this control acknowledges the given sequence.
    #[must_use]
    pub fn acks(&self, seq: u16) -> bool {
        let diff = i32::from(self.ack.wrapping_sub(seq) as i16);
        if diff == 0 {
            return true;
        }
        if !(1..=32).contains(&diff) {
            return false;
        }
        self.hist & (1 << (diff - 1)) != 0
    }

    /// First sequence this control speaks about (inclusive).
    #[must_use]
    pub const fn ack_begin(&self) -> u16 {
        self.ack
    }

    /// One past the last sequence this control speaks about, counting
    /// downwards.
    #[must_use]
    pub const fn ack_end(&self) -> u16 {
        self.ack.wrapping_sub(33)
    }
}

impl Default for TControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Packet type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Keepalive.
    Ping = 0,
    /// Client requests to join under a name.
    Login = 1,
    /// Server accepts a login.
    Join = 2,
    /// Either side leaves / rejects.
    Part = 3,
    /// Client input and prediction.
    PlayerUpdate = 4,
    /// Entity entered the client's interest region.
    SpawnEntity = 5,
    /// Entity left the client's interest region.
    DespawnEntity = 6,
    /// Batched authoritative entity states.
    EntityUpdate = 7,
    /// Authoritative correction of a drifted prediction.
    PlayerCorrection = 8,
    /// Chunk transfer header.
    ChunkBegin = 9,
    /// Chunk transfer fragment.
    ChunkData = 10,
    /// Individual block edits.
    BlockUpdate = 11,
    /// Chat / console text.
    Message = 12,
}

impl PacketType {
    /// Type from its wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Ping,
            1 => Self::Login,
            2 => Self::Join,
            3 => Self::Part,
            4 => Self::PlayerUpdate,
            5 => Self::SpawnEntity,
            6 => Self::DespawnEntity,
            7 => Self::EntityUpdate,
            8 => Self::PlayerCorrection,
            9 => Self::ChunkBegin,
            10 => Self::ChunkData,
            11 => Self::BlockUpdate,
            12 => Self::Message,
            _ => return None,
        })
    }
}

/// A datagram under construction or under inspection.
#[derive(Clone)]
pub struct Packet {
    data: [u8; MAX_PACKET_SIZE],
    len: usize,
}

impl Packet {
    /// Empty packet of the given type, tagged, with zeroed control.
    #[must_use]
    pub fn make(ty: PacketType) -> Self {
        let mut pkt = Self {
            data: [0; MAX_PACKET_SIZE],
            len: HEADER_SIZE,
        };
        pkt.data[0..4].copy_from_slice(&TAG.to_le_bytes());
        pkt.data[OFF_TYPE] = ty as u8;
        pkt
    }

    /// Parses an incoming datagram; `None` for short or mistagged data.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE || bytes.len() > MAX_PACKET_SIZE {
            return None;
        }
        let mut data = [0u8; MAX_PACKET_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        let pkt = Self {
            data,
            len: bytes.len(),
        };
        (pkt.tag() == TAG).then_some(pkt)
    }

    /// The wire bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Magic tag field.
    #[must_use]
    pub fn tag(&self) -> u32 {
        u32::from_le_bytes(self.data[0..4].try_into().expect("fixed slice"))
    }

    /// Type code, if recognized.
    #[must_use]
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_code(self.data[OFF_TYPE])
    }

    /// Transmission control carried in the header.
    #[must_use]
    pub fn control(&self) -> TControl {
        TControl {
            seq: u16::from_le_bytes(self.data[OFF_SEQ..OFF_SEQ + 2].try_into().expect("fixed")),
            ack: u16::from_le_bytes(self.data[OFF_ACK..OFF_ACK + 2].try_into().expect("fixed")),
            hist: u32::from_le_bytes(self.data[OFF_HIST..OFF_HIST + 4].try_into().expect("fixed")),
        }
    }

    /// Stamps the header control fields.
    pub fn set_control(&mut self, ctrl: TControl) {
        self.data[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&ctrl.seq.to_le_bytes());
        self.data[OFF_ACK..OFF_ACK + 2].copy_from_slice(&ctrl.ack.to_le_bytes());
        self.data[OFF_HIST..OFF_HIST + 4].copy_from_slice(&ctrl.hist.to_le_bytes());
    }

    /// Sequence number in the header.
    #[must_use]
    pub fn seq(&self) -> u16 {
        self.control().seq
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..self.len]
    }

    /// Grows the packet so the payload covers at least `len` bytes.
    fn reserve_payload(&mut self, len: usize) {
        debug_assert!(len <= MAX_PAYLOAD, "payload overflow: {len}");
        self.len = self.len.max(HEADER_SIZE + len);
    }

    // -- primitive writers ------------------------------------------------

    fn write_u8(&mut self, off: usize, v: u8) {
        self.reserve_payload(off + 1);
        self.data[HEADER_SIZE + off] = v;
    }

    fn write_i8(&mut self, off: usize, v: i8) {
        self.write_u8(off, v as u8);
    }

    fn write_u16(&mut self, off: usize, v: u16) {
        self.reserve_payload(off + 2);
        self.data[HEADER_SIZE + off..HEADER_SIZE + off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn write_i16(&mut self, off: usize, v: i16) {
        self.write_u16(off, v as u16);
    }

    fn write_u32(&mut self, off: usize, v: u32) {
        self.reserve_payload(off + 4);
        self.data[HEADER_SIZE + off..HEADER_SIZE + off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn write_i32(&mut self, off: usize, v: i32) {
        self.write_u32(off, v as u32);
    }

    fn write_f32(&mut self, off: usize, v: f32) {
        self.write_u32(off, v.to_bits());
    }

    fn write_ivec3(&mut self, off: usize, v: IVec3) {
        self.write_i32(off, v.x);
        self.write_i32(off + 4, v.y);
        self.write_i32(off + 8, v.z);
    }

    fn write_vec3(&mut self, off: usize, v: Vec3) {
        self.write_f32(off, v.x);
        self.write_f32(off + 4, v.y);
        self.write_f32(off + 8, v.z);
    }

    fn write_str(&mut self, off: usize, s: &str, maxlen: usize) {
        self.reserve_payload(off + maxlen);
        let dst = &mut self.data[HEADER_SIZE + off..HEADER_SIZE + off + maxlen];
        dst.fill(0);
        let bytes = s.as_bytes();
        let n = bytes.len().min(maxlen);
        dst[..n].copy_from_slice(&bytes[..n]);
    }

    // -- primitive readers ------------------------------------------------

    fn read_u8(&self, off: usize) -> u8 {
        self.payload().get(off).copied().unwrap_or(0)
    }

    fn read_i8(&self, off: usize) -> i8 {
        self.read_u8(off) as i8
    }

    fn read_u16(&self, off: usize) -> u16 {
        let p = self.payload();
        if off + 2 > p.len() {
            return 0;
        }
        u16::from_le_bytes(p[off..off + 2].try_into().expect("fixed"))
    }

    fn read_i16(&self, off: usize) -> i16 {
        self.read_u16(off) as i16
    }

    fn read_u32(&self, off: usize) -> u32 {
        let p = self.payload();
        if off + 4 > p.len() {
            return 0;
        }
        u32::from_le_bytes(p[off..off + 4].try_into().expect("fixed"))
    }

    fn read_i32(&self, off: usize) -> i32 {
        self.read_u32(off) as i32
    }

    fn read_f32(&self, off: usize) -> f32 {
        f32::from_bits(self.read_u32(off))
    }

    fn read_ivec3(&self, off: usize) -> IVec3 {
        IVec3::new(self.read_i32(off), self.read_i32(off + 4), self.read_i32(off + 8))
    }

    fn read_vec3(&self, off: usize) -> Vec3 {
        Vec3::new(self.read_f32(off), self.read_f32(off + 4), self.read_f32(off + 8))
    }

    fn read_str(&self, off: usize, maxlen: usize) -> String {
        let p = self.payload();
        let end = (off + maxlen).min(p.len());
        if off >= end {
            return String::new();
        }
        let bytes = &p[off..end];
        let n = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..n]).into_owned()
    }

    // -- quantized writers ------------------------------------------------

    /// Normalized float to 16-bit signed.
    fn write_pack_n(&mut self, off: usize, v: f32) {
        let raw = (v * 32767.0).round().clamp(-32767.0, 32767.0) as i16;
        self.write_i16(off, raw);
    }

    fn read_pack_n(&self, off: usize) -> f32 {
        f32::from(self.read_i16(off)) * (1.0 / 32767.0)
    }

    /// Unit-range float to 16-bit unsigned.
    fn write_pack_u(&mut self, off: usize, v: f32) {
        let raw = (v * 65535.0).round().clamp(0.0, 65535.0) as u16;
        self.write_u16(off, raw);
    }

    fn read_pack_u(&self, off: usize) -> f32 {
        f32::from(self.read_u16(off)) * (1.0 / 65535.0)
    }

    fn write_pack_n_vec3(&mut self, off: usize, v: Vec3) {
        self.write_pack_n(off, v.x);
        self.write_pack_n(off + 2, v.y);
        self.write_pack_n(off + 4, v.z);
    }

    fn read_pack_n_vec3(&self, off: usize) -> Vec3 {
        Vec3::new(
            self.read_pack_n(off),
            self.read_pack_n(off + 2),
            self.read_pack_n(off + 4),
        )
    }

    fn write_quat(&mut self, off: usize, q: Quat) {
        self.write_pack_n(off, q.w);
        self.write_pack_n(off + 2, q.x);
        self.write_pack_n(off + 4, q.y);
        self.write_pack_n(off + 6, q.z);
    }

    fn read_quat(&self, off: usize) -> Quat {
        Quat::new(
            self.read_pack_n(off),
            self.read_pack_n(off + 2),
            self.read_pack_n(off + 4),
            self.read_pack_n(off + 6),
        )
        .normalized()
    }

    /// Absolute entity state: 42 bytes.
    fn write_state(&mut self, off: usize, state: &EntityState) {
        self.write_ivec3(off, state.pos.chunk);
        self.write_pack_u(off + 12, state.pos.block.x * (1.0 / CHUNK_FSIZE));
        self.write_pack_u(off + 14, state.pos.block.y * (1.0 / CHUNK_FSIZE));
        self.write_pack_u(off + 16, state.pos.block.z * (1.0 / CHUNK_FSIZE));
        self.write_vec3(off + 18, state.velocity);
        self.write_quat(off + 30, state.orient);
        self.write_pack_n(off + 38, state.pitch * (1.0 / PI_0P5));
        self.write_pack_n(off + 40, state.yaw * (1.0 / PI));
    }

    fn read_state(&self, off: usize) -> EntityState {
        let block = Vec3::new(
            self.read_pack_u(off + 12) * CHUNK_FSIZE,
            self.read_pack_u(off + 14) * CHUNK_FSIZE,
            self.read_pack_u(off + 16) * CHUNK_FSIZE,
        );
        EntityState {
            pos: ExactLocation::new(self.read_ivec3(off), block),
            velocity: self.read_vec3(off + 18),
            orient: self.read_quat(off + 30),
            ang_vel: Vec3::ZERO,
            pitch: self.read_pack_n(off + 38) * PI_0P5,
            yaw: self.read_pack_n(off + 40) * PI,
        }
    }

    /// Base-relative entity state: 33 bytes, chunk delta in one byte per
    /// axis.
    fn write_state_relative(&mut self, off: usize, state: &EntityState, base: IVec3) {
        let delta = state.pos.chunk - base;
        self.write_i8(off, delta.x as i8);
        self.write_i8(off + 1, delta.y as i8);
        self.write_i8(off + 2, delta.z as i8);
        self.write_pack_u(off + 3, state.pos.block.x * (1.0 / CHUNK_FSIZE));
        self.write_pack_u(off + 5, state.pos.block.y * (1.0 / CHUNK_FSIZE));
        self.write_pack_u(off + 7, state.pos.block.z * (1.0 / CHUNK_FSIZE));
        self.write_vec3(off + 9, state.velocity);
        self.write_quat(off + 21, state.orient);
        self.write_pack_n(off + 29, state.pitch * (1.0 / PI_0P5));
        self.write_pack_n(off + 31, state.yaw * (1.0 / PI));
    }

    fn read_state_relative(&self, off: usize, base: IVec3) -> EntityState {
        let delta = IVec3::new(
            i32::from(self.read_i8(off)),
            i32::from(self.read_i8(off + 1)),
            i32::from(self.read_i8(off + 2)),
        );
        let block = Vec3::new(
            self.read_pack_u(off + 3) * CHUNK_FSIZE,
            self.read_pack_u(off + 5) * CHUNK_FSIZE,
            self.read_pack_u(off + 7) * CHUNK_FSIZE,
        );
        EntityState {
            pos: ExactLocation::new(base + delta, block),
            velocity: self.read_vec3(off + 9),
            orient: self.read_quat(off + 21),
            ang_vel: Vec3::ZERO,
            pitch: self.read_pack_n(off + 29) * PI_0P5,
            yaw: self.read_pack_n(off + 31) * PI,
        }
    }
}

// ----------------------------------------------------------------------
// per-type payload accessors

/// `Login`: player name, 32 bytes.
pub mod login {
    use super::Packet;

    /// Writes the player name.
    pub fn write_name(pkt: &mut Packet, name: &str) {
        pkt.write_str(0, name, 32);
    }

    /// Reads the player name.
    #[must_use]
    pub fn read_name(pkt: &Packet) -> String {
        pkt.read_str(0, 32)
    }
}

/// `Join`: assigned player id, state and world name.
pub mod join {
    use super::{EntityState, Packet};

    /// Writes the accepted player's id and state.
    pub fn write_player(pkt: &mut Packet, id: u32, state: &EntityState) {
        pkt.write_u32(0, id);
        pkt.write_state(4, state);
    }

    /// Writes the world name.
    pub fn write_world_name(pkt: &mut Packet, name: &str) {
        pkt.write_str(46, name, 32);
    }

    /// Reads the assigned player id.
    #[must_use]
    pub fn read_player_id(pkt: &Packet) -> u32 {
        pkt.read_u32(0)
    }

    /// Reads the player state.
    #[must_use]
    pub fn read_player_state(pkt: &Packet) -> EntityState {
        pkt.read_state(4)
    }

    /// Reads the world name.
    #[must_use]
    pub fn read_world_name(pkt: &Packet) -> String {
        pkt.read_str(46, 32)
    }
}

/// `PlayerUpdate`: predicted state plus raw input.
pub mod player_update {
    use super::{EntityState, Packet, Vec3};

    /// Writes the client's predicted state.
    pub fn write_predicted_state(pkt: &mut Packet, state: &EntityState) {
        pkt.write_state(0, state);
    }

    /// Writes the movement input, each axis in [-1, 1].
    pub fn write_movement(pkt: &mut Packet, movement: Vec3) {
        pkt.write_pack_n_vec3(42, movement);
    }

    /// Writes the action bits.
    pub fn write_actions(pkt: &mut Packet, actions: u8) {
        pkt.write_u8(48, actions);
    }

    /// Writes the selected inventory slot.
    pub fn write_slot(pkt: &mut Packet, slot: u8) {
        pkt.write_u8(49, slot);
    }

    /// Reads the predicted state.
    #[must_use]
    pub fn read_predicted_state(pkt: &Packet) -> EntityState {
        pkt.read_state(0)
    }

    /// Reads the movement input.
    #[must_use]
    pub fn read_movement(pkt: &Packet) -> Vec3 {
        pkt.read_pack_n_vec3(42)
    }

    /// Reads the action bits.
    #[must_use]
    pub fn read_actions(pkt: &Packet) -> u8 {
        pkt.read_u8(48)
    }

    /// Reads the inventory slot.
    #[must_use]
    pub fn read_slot(pkt: &Packet) -> u8 {
        pkt.read_u8(49)
    }
}

/// `SpawnEntity`: full description of an entity entering visibility.
pub mod spawn_entity {
    use super::{Aabb, EntityState, Packet};

    /// Entity flag: collides with the world.
    pub const FLAG_WORLD_COLLIDABLE: u32 = 1;

    /// Writes id, model, state, bounds, flags and name.
    pub fn write_entity(
        pkt: &mut Packet,
        id: u32,
        model_id: u32,
        state: &EntityState,
        bounds: &Aabb,
        flags: u32,
        name: &str,
    ) {
        pkt.write_u32(0, id);
        pkt.write_u32(4, model_id);
        pkt.write_state(8, state);
        pkt.write_vec3(50, bounds.min);
        pkt.write_vec3(62, bounds.max);
        pkt.write_u32(74, flags);
        pkt.write_str(78, name, 32);
    }

    /// Reads the entity id.
    #[must_use]
    pub fn read_entity_id(pkt: &Packet) -> u32 {
        pkt.read_u32(0)
    }

    /// Reads the model id.
    #[must_use]
    pub fn read_model_id(pkt: &Packet) -> u32 {
        pkt.read_u32(4)
    }

    /// Reads the entity state.
    #[must_use]
    pub fn read_state(pkt: &Packet) -> EntityState {
        pkt.read_state(8)
    }

    /// Reads the collision bounds.
    #[must_use]
    pub fn read_bounds(pkt: &Packet) -> Aabb {
        Aabb::new(pkt.read_vec3(50), pkt.read_vec3(62)).adjusted()
    }

    /// Reads the flag bits.
    #[must_use]
    pub fn read_flags(pkt: &Packet) -> u32 {
        pkt.read_u32(74)
    }

    /// Reads the display name.
    #[must_use]
    pub fn read_name(pkt: &Packet) -> String {
        pkt.read_str(78, 32)
    }
}

/// `DespawnEntity`: just the id.
pub mod despawn_entity {
    use super::Packet;

    /// Writes the entity id.
    pub fn write_entity_id(pkt: &mut Packet, id: u32) {
        pkt.write_u32(0, id);
    }

    /// Reads the entity id.
    #[must_use]
    pub fn read_entity_id(pkt: &Packet) -> u32 {
        pkt.read_u32(0)
    }
}

/// `EntityUpdate`: a batch of base-relative states.
pub mod entity_update {
    use super::{EntityState, IVec3, Packet, STATE_RELATIVE_SIZE};

    /// Bytes per entry: id plus relative state.
    pub const ENTRY_SIZE: usize = 4 + STATE_RELATIVE_SIZE;

    /// Entries start after the count and the chunk base.
    const ENTRIES_OFF: usize = 16;

    /// Largest batch that fits a packet.
    pub const MAX_ENTITIES: usize = (super::MAX_PAYLOAD - ENTRIES_OFF) / ENTRY_SIZE;

    fn entry_off(num: usize) -> usize {
        ENTRIES_OFF + num * ENTRY_SIZE
    }

    /// Writes the number of entries.
    pub fn write_entity_count(pkt: &mut Packet, count: u32) {
        pkt.write_u32(0, count);
    }

    /// Writes the chunk base the entry deltas refer to.
    pub fn write_chunk_base(pkt: &mut Packet, base: IVec3) {
        pkt.write_ivec3(4, base);
    }

    /// Writes entry `num`.
    pub fn write_entity(pkt: &mut Packet, num: usize, id: u32, state: &EntityState, base: IVec3) {
        let off = entry_off(num);
        pkt.write_u32(off, id);
        pkt.write_state_relative(off + 4, state, base);
    }

    /// Reads the number of entries.
    #[must_use]
    pub fn read_entity_count(pkt: &Packet) -> u32 {
        pkt.read_u32(0)
    }

    /// Reads the chunk base.
    #[must_use]
    pub fn read_chunk_base(pkt: &Packet) -> IVec3 {
        pkt.read_ivec3(4)
    }

    /// Reads entry `num`'s entity id.
    #[must_use]
    pub fn read_entity_id(pkt: &Packet, num: usize) -> u32 {
        pkt.read_u32(entry_off(num))
    }

    /// Reads entry `num`'s state.
    #[must_use]
    pub fn read_entity_state(pkt: &Packet, num: usize, base: IVec3) -> EntityState {
        pkt.read_state_relative(entry_off(num) + 4, base)
    }
}

/// `PlayerCorrection`: the input packet it answers plus the truth.
pub mod player_correction {
    use super::{EntityState, Packet};

    /// Writes the acknowledged input packet sequence.
    pub fn write_packet_seq(pkt: &mut Packet, seq: u16) {
        pkt.write_u16(0, seq);
    }

    /// Writes the authoritative state.
    pub fn write_player_state(pkt: &mut Packet, state: &EntityState) {
        pkt.write_state(2, state);
    }

    /// Reads the acknowledged input packet sequence.
    #[must_use]
    pub fn read_packet_seq(pkt: &Packet) -> u16 {
        pkt.read_u16(0)
    }

    /// Reads the authoritative state.
    #[must_use]
    pub fn read_player_state(pkt: &Packet) -> EntityState {
        pkt.read_state(2)
    }
}

/// `ChunkBegin`: transfer header.
pub mod chunk_begin {
    use super::{IVec3, Packet};

    /// Flag bit 0: payload is zlib-compressed.
    pub const FLAG_COMPRESSED: u32 = 1;

    /// Writes the transmission id.
    pub fn write_transmission_id(pkt: &mut Packet, id: u32) {
        pkt.write_u32(0, id);
    }

    /// Writes the flag bits.
    pub fn write_flags(pkt: &mut Packet, flags: u32) {
        pkt.write_u32(4, flags);
    }

    /// Writes the chunk coordinates.
    pub fn write_chunk_coords(pkt: &mut Packet, pos: IVec3) {
        pkt.write_ivec3(8, pos);
    }

    /// Writes the total transfer size in bytes.
    pub fn write_data_size(pkt: &mut Packet, size: u32) {
        pkt.write_u32(20, size);
    }

    /// Reads the transmission id.
    #[must_use]
    pub fn read_transmission_id(pkt: &Packet) -> u32 {
        pkt.read_u32(0)
    }

    /// Reads the flag bits.
    #[must_use]
    pub fn read_flags(pkt: &Packet) -> u32 {
        pkt.read_u32(4)
    }

    /// Reads the chunk coordinates.
    #[must_use]
    pub fn read_chunk_coords(pkt: &Packet) -> IVec3 {
        pkt.read_ivec3(8)
    }

    /// Reads the total transfer size.
    #[must_use]
    pub fn read_data_size(pkt: &Packet) -> u32 {
        pkt.read_u32(20)
    }
}

/// `ChunkData`: one fragment.
pub mod chunk_data {
    use super::{Packet, HEADER_SIZE, MAX_PAYLOAD};

    /// Fragment bytes begin after id, offset and size.
    const DATA_OFF: usize = 12;

    /// Largest fragment payload.
    pub const MAX_DATA_LEN: usize = MAX_PAYLOAD - DATA_OFF;

    /// Writes the transmission id.
    pub fn write_transmission_id(pkt: &mut Packet, id: u32) {
        pkt.write_u32(0, id);
    }

    /// Writes the fragment's offset into the transfer buffer.
    pub fn write_data_offset(pkt: &mut Packet, off: u32) {
        pkt.write_u32(4, off);
    }

    /// Writes the fragment length.
    pub fn write_data_size(pkt: &mut Packet, size: u32) {
        pkt.write_u32(8, size);
    }

    /// Writes the fragment bytes.
    pub fn write_data(pkt: &mut Packet, data: &[u8]) {
        let len = data.len().min(MAX_DATA_LEN);
        pkt.reserve_payload(DATA_OFF + len);
        pkt.data[HEADER_SIZE + DATA_OFF..HEADER_SIZE + DATA_OFF + len]
            .copy_from_slice(&data[..len]);
    }

    /// Reads the transmission id.
    #[must_use]
    pub fn read_transmission_id(pkt: &Packet) -> u32 {
        pkt.read_u32(0)
    }

    /// Reads the fragment offset.
    #[must_use]
    pub fn read_data_offset(pkt: &Packet) -> u32 {
        pkt.read_u32(4)
    }

    /// Reads the fragment length.
    #[must_use]
    pub fn read_data_size(pkt: &Packet) -> u32 {
        pkt.read_u32(8)
    }

    /// Reads the fragment bytes.
    #[must_use]
    pub fn read_data(pkt: &Packet) -> &[u8] {
        let p = pkt.payload();
        let size = read_data_size(pkt) as usize;
        let end = (DATA_OFF + size).min(p.len());
        if DATA_OFF >= end {
            return &[];
        }
        &p[DATA_OFF..end]
    }
}

/// `BlockUpdate`: edits within one chunk.
pub mod block_update {
    use super::{Block, IVec3, Packet};

    /// Bytes per entry: cell index plus block record.
    pub const ENTRY_SIZE: usize = 6;

    /// Entries start after the coordinates and the count.
    const ENTRIES_OFF: usize = 16;

    /// Largest batch that fits a packet.
    pub const MAX_BLOCKS: usize = (super::MAX_PAYLOAD - ENTRIES_OFF) / ENTRY_SIZE;

    fn entry_off(num: usize) -> usize {
        ENTRIES_OFF + num * ENTRY_SIZE
    }

    /// Writes the chunk the edits belong to.
    pub fn write_chunk_coords(pkt: &mut Packet, pos: IVec3) {
        pkt.write_ivec3(0, pos);
    }

    /// Writes the number of entries.
    pub fn write_block_count(pkt: &mut Packet, count: u32) {
        pkt.write_u32(12, count);
    }

    /// Writes entry `num`.
    pub fn write_block(pkt: &mut Packet, num: usize, index: u16, block: Block) {
        let off = entry_off(num);
        pkt.write_u16(off, index);
        pkt.write_u16(off + 2, block.type_id);
        pkt.write_u8(off + 4, block.orient);
        pkt.write_u8(off + 5, 0);
    }

    /// Reads the chunk coordinates.
    #[must_use]
    pub fn read_chunk_coords(pkt: &Packet) -> IVec3 {
        pkt.read_ivec3(0)
    }

    /// Reads the number of entries.
    #[must_use]
    pub fn read_block_count(pkt: &Packet) -> u32 {
        pkt.read_u32(12)
    }

    /// Reads entry `num` as `(cell index, block)`.
    #[must_use]
    pub fn read_block(pkt: &Packet, num: usize) -> (u16, Block) {
        let off = entry_off(num);
        let index = pkt.read_u16(off);
        let mut block = Block::new(pkt.read_u16(off + 2));
        block.orient = pkt.read_u8(off + 4);
        (index, block)
    }
}

/// `Message`: routed text.
pub mod message {
    use super::{Packet, MAX_PAYLOAD};

    /// Longest message text.
    pub const MAX_MESSAGE_LEN: usize = MAX_PAYLOAD - 5;

    /// Writes the message class.
    pub fn write_type(pkt: &mut Packet, ty: u8) {
        pkt.write_u8(0, ty);
    }

    /// Writes the referral (entity id or 0).
    pub fn write_referral(pkt: &mut Packet, referral: u32) {
        pkt.write_u32(1, referral);
    }

    /// Writes the message text, sized to the text plus its terminator.
    pub fn write_message(pkt: &mut Packet, text: &str) {
        let len = (text.len() + 1).min(MAX_MESSAGE_LEN);
        pkt.write_str(5, text, len);
    }

    /// Reads the message class.
    #[must_use]
    pub fn read_type(pkt: &Packet) -> u8 {
        pkt.read_u8(0)
    }

    /// Reads the referral.
    #[must_use]
    pub fn read_referral(pkt: &Packet) -> u32 {
        pkt.read_u32(1)
    }

    /// Reads the message text.
    #[must_use]
    pub fn read_message(pkt: &Packet) -> String {
        pkt.read_str(5, MAX_MESSAGE_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(pkt: Packet) -> Packet {
        Packet::parse(pkt.as_bytes()).expect("self-produced packet must parse")
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Packet::parse(&[]).is_none());
        assert!(Packet::parse(&[0u8; 8]).is_none());
        let mut bad = [0u8; 32];
        bad[0..4].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        assert!(Packet::parse(&bad).is_none(), "wrong tag must be dropped");
    }

    #[test]
    fn test_header_round_trip() {
        let mut pkt = Packet::make(PacketType::Ping);
        pkt.set_control(TControl {
            seq: 7,
            ack: 5,
            hist: 0b1011,
        });
        let back = round_trip(pkt);
        assert_eq!(back.packet_type(), Some(PacketType::Ping));
        let ctrl = back.control();
        assert_eq!(ctrl.seq, 7);
        assert_eq!(ctrl.ack, 5);
        assert_eq!(ctrl.hist, 0b1011);
    }

    #[test]
    fn test_tcontrol_acks() {
        let ctrl = TControl {
            seq: 0,
            ack: 100,
            hist: 0b101,
        };
        assert!(ctrl.acks(100), "the ack itself");
        assert!(ctrl.acks(99), "hist bit 0 is ack-1");
        assert!(!ctrl.acks(98), "hist bit 1 clear");
        assert!(ctrl.acks(97), "hist bit 2 is ack-3");
        assert!(!ctrl.acks(101), "future sequences unacked");
        assert!(!ctrl.acks(100u16.wrapping_sub(40)), "outside the window");
    }

    #[test]
    fn test_tcontrol_acks_wraps() {
        let ctrl = TControl {
            seq: 0,
            ack: 2,
            hist: 0xF,
        };
        assert!(ctrl.acks(2));
        assert!(ctrl.acks(0xFFFF), "window wraps below zero");
    }

    #[test]
    fn test_login_name() {
        let mut pkt = Packet::make(PacketType::Login);
        login::write_name(&mut pkt, "rowan");
        let back = round_trip(pkt);
        assert_eq!(login::read_name(&back), "rowan");
    }

    #[test]
    fn test_login_name_truncated_at_32() {
        let long = "x".repeat(64);
        let mut pkt = Packet::make(PacketType::Login);
        login::write_name(&mut pkt, &long);
        let back = round_trip(pkt);
        assert_eq!(login::read_name(&back).len(), 32);
    }

    fn sample_state() -> EntityState {
        EntityState {
            pos: ExactLocation::new(IVec3::new(5, -3, 12), Vec3::new(1.25, 15.5, 0.75)),
            velocity: Vec3::new(0.5, -1.5, 3.25),
            orient: Quat::from_yaw(0.7).normalized(),
            ang_vel: Vec3::ZERO,
            pitch: 0.4,
            yaw: -2.0,
        }
    }

    #[test]
    fn test_state_round_trip_tolerances() {
        let state = sample_state();
        let mut pkt = Packet::make(PacketType::PlayerUpdate);
        player_update::write_predicted_state(&mut pkt, &state);
        let back = round_trip(pkt);
        let read = player_update::read_predicted_state(&back);

        // positions quantize to 16/65535 of a block
        let pos_tol = 16.0 / 65535.0 + 1e-5;
        assert_eq!(read.pos.chunk, state.pos.chunk);
        let err = (read.pos.block - state.pos.block).abs();
        assert!(err.x < pos_tol && err.y < pos_tol && err.z < pos_tol, "pos error {err:?}");
        // velocity is raw floats
        assert_eq!(read.velocity, state.velocity);
        // angles quantize to their pi range over 32767
        assert!((read.pitch - state.pitch).abs() <= PI_0P5 / 32767.0 + 1e-5);
        assert!((read.yaw - state.yaw).abs() <= PI / 32767.0 + 1e-5);
        // orientation comes back normalized and close
        let dot = read.orient.w * state.orient.w
            + read.orient.x * state.orient.x
            + read.orient.y * state.orient.y
            + read.orient.z * state.orient.z;
        assert!(dot.abs() > 0.9999, "quat drifted: {dot}");
    }

    #[test]
    fn test_join_fields() {
        let state = sample_state();
        let mut pkt = Packet::make(PacketType::Join);
        join::write_player(&mut pkt, 42, &state);
        join::write_world_name(&mut pkt, "overworld");
        let back = round_trip(pkt);
        assert_eq!(join::read_player_id(&back), 42);
        assert_eq!(join::read_world_name(&back), "overworld");
        assert_eq!(join::read_player_state(&back).pos.chunk, state.pos.chunk);
    }

    #[test]
    fn test_entity_update_batch() {
        let base = IVec3::new(10, 0, -10);
        let mut states = Vec::new();
        let mut pkt = Packet::make(PacketType::EntityUpdate);
        entity_update::write_chunk_base(&mut pkt, base);
        for i in 0..3usize {
            let mut state = sample_state();
            state.pos.chunk = base + IVec3::new(i as i32, -(i as i32), 2);
            entity_update::write_entity(&mut pkt, i, 100 + i as u32, &state, base);
            states.push(state);
        }
        entity_update::write_entity_count(&mut pkt, 3);

        let back = round_trip(pkt);
        assert_eq!(entity_update::read_entity_count(&back), 3);
        assert_eq!(entity_update::read_chunk_base(&back), base);
        for (i, state) in states.iter().enumerate() {
            assert_eq!(entity_update::read_entity_id(&back, i), 100 + i as u32);
            let read = entity_update::read_entity_state(&back, i, base);
            assert_eq!(read.pos.chunk, state.pos.chunk, "entry {i}");
            assert_eq!(read.velocity, state.velocity);
        }
    }

    #[test]
    fn test_entity_update_capacity() {
        // a full batch must still fit the packet
        let base = IVec3::ZERO;
        let mut pkt = Packet::make(PacketType::EntityUpdate);
        entity_update::write_chunk_base(&mut pkt, base);
        let state = sample_state();
        for i in 0..entity_update::MAX_ENTITIES {
            entity_update::write_entity(&mut pkt, i, i as u32, &state, base);
        }
        entity_update::write_entity_count(&mut pkt, entity_update::MAX_ENTITIES as u32);
        assert!(pkt.as_bytes().len() <= MAX_PACKET_SIZE);
        assert!(entity_update::MAX_ENTITIES >= 8, "batching should be worthwhile");
    }

    #[test]
    fn test_spawn_entity_fields() {
        let state = sample_state();
        let bounds = Aabb::new(Vec3::new(-0.4, -0.9, -0.4), Vec3::new(0.4, 0.9, 0.4));
        let mut pkt = Packet::make(PacketType::SpawnEntity);
        spawn_entity::write_entity(
            &mut pkt,
            9,
            3,
            &state,
            &bounds,
            spawn_entity::FLAG_WORLD_COLLIDABLE,
            "watcher",
        );
        let back = round_trip(pkt);
        assert_eq!(spawn_entity::read_entity_id(&back), 9);
        assert_eq!(spawn_entity::read_model_id(&back), 3);
        assert_eq!(spawn_entity::read_flags(&back), 1);
        assert_eq!(spawn_entity::read_name(&back), "watcher");
        let b = spawn_entity::read_bounds(&back);
        assert_eq!(b.min, bounds.min);
        assert_eq!(b.max, bounds.max);
    }

    #[test]
    fn test_chunk_transfer_fields() {
        let mut begin = Packet::make(PacketType::ChunkBegin);
        chunk_begin::write_transmission_id(&mut begin, 4);
        chunk_begin::write_flags(&mut begin, chunk_begin::FLAG_COMPRESSED);
        chunk_begin::write_chunk_coords(&mut begin, IVec3::new(1, 2, 3));
        chunk_begin::write_data_size(&mut begin, 999);
        let back = round_trip(begin);
        assert_eq!(chunk_begin::read_transmission_id(&back), 4);
        assert_eq!(chunk_begin::read_flags(&back) & chunk_begin::FLAG_COMPRESSED, 1);
        assert_eq!(chunk_begin::read_chunk_coords(&back), IVec3::new(1, 2, 3));
        assert_eq!(chunk_begin::read_data_size(&back), 999);

        let payload: Vec<u8> = (0..100u8).collect();
        let mut data = Packet::make(PacketType::ChunkData);
        chunk_data::write_transmission_id(&mut data, 4);
        chunk_data::write_data_offset(&mut data, 472);
        chunk_data::write_data_size(&mut data, payload.len() as u32);
        chunk_data::write_data(&mut data, &payload);
        let back = round_trip(data);
        assert_eq!(chunk_data::read_transmission_id(&back), 4);
        assert_eq!(chunk_data::read_data_offset(&back), 472);
        assert_eq!(chunk_data::read_data(&back), payload.as_slice());
    }

    #[test]
    fn test_block_update_entries() {
        use hollow_world::block::{Face, Turn};
        let mut pkt = Packet::make(PacketType::BlockUpdate);
        block_update::write_chunk_coords(&mut pkt, IVec3::new(-1, 0, 4));
        let block = Block::with_orientation(7, Face::Left, Turn::Around);
        block_update::write_block(&mut pkt, 0, 4095, block);
        block_update::write_block(&mut pkt, 1, 0, Block::AIR);
        block_update::write_block_count(&mut pkt, 2);

        let back = round_trip(pkt);
        assert_eq!(block_update::read_chunk_coords(&back), IVec3::new(-1, 0, 4));
        assert_eq!(block_update::read_block_count(&back), 2);
        let (index, read) = block_update::read_block(&back, 0);
        assert_eq!(index, 4095);
        assert_eq!(read.type_id, 7);
        assert_eq!(read.face(), Face::Left);
        assert_eq!(read.turn(), Turn::Around);
    }

    #[test]
    fn test_message_fields() {
        let mut pkt = Packet::make(PacketType::Message);
        message::write_type(&mut pkt, 1);
        message::write_referral(&mut pkt, 77);
        message::write_message(&mut pkt, "hello over there");
        let back = round_trip(pkt);
        assert_eq!(message::read_type(&back), 1);
        assert_eq!(message::read_referral(&back), 77);
        assert_eq!(message::read_message(&back), "hello over there");
    }

    #[test]
    fn test_packet_size_cap() {
        let mut pkt = Packet::make(PacketType::Message);
        message::write_message(&mut pkt, &"y".repeat(2000));
        assert!(pkt.as_bytes().len() <= MAX_PACKET_SIZE);
    }
}
