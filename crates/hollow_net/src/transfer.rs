//! Chunk transfer: fragmenting, ack tracking, compression.
//!
//! The sender compresses a chunk's block array with zlib, slices it into
//! fragments and keeps the sequence number of every outstanding packet.
//! Acks clear fragments; losses retransmit exactly the lost fragment.
//! The chunk itself is pinned in the store with a reference for the whole
//! transfer so eviction cannot pull it out from under the sender.
//!
//! The receiver keeps in-progress transmissions keyed by transmission id
//! and commits a chunk once every advertised byte arrived.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use hollow_shared::math::IVec3;
use hollow_shared::timer::IntervalTimer;
use hollow_world::chunk::BLOCK_DATA_SIZE;
use hollow_world::store::{ChunkHandle, ChunkStore};

use crate::protocol::{chunk_begin, chunk_data, Packet, PacketType};

/// A fragment's bookkeeping slot: unsent/cleared or the seq it went under.
const UNSENT: i32 = -1;

/// Milliseconds a transmission may stall before the receiver drops it.
const RECEIVE_TIMEOUT_MS: i32 = 5_000;

/// Sender half of a chunk transfer, one chunk in flight at a time.
pub struct ChunkTransmitter {
    current: Option<ChunkHandle>,
    coords: IVec3,
    buffer: Vec<u8>,
    packet_len: usize,
    cursor: usize,
    num_packets: usize,
    begin_packet: i32,
    data_packets: Vec<i32>,
    confirm_wait: u32,
    trans_id: u32,
    compressed: bool,
}

impl ChunkTransmitter {
    /// Idle transmitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: None,
            coords: IVec3::ZERO,
            buffer: Vec::with_capacity(BLOCK_DATA_SIZE + 16),
            packet_len: chunk_data::MAX_DATA_LEN,
            cursor: 0,
            num_packets: 0,
            begin_packet: UNSENT,
            data_packets: Vec::new(),
            confirm_wait: 0,
            trans_id: 0,
        compressed: false,
        }
    }

    /// True if nothing is in flight or awaiting acks; the next chunk may
    /// be queued without schmutzing up anything.
    #[must_use]
    pub fn idle(&self) -> bool {
        !self.transmitting() && !self.waiting()
    }

    /// True while fragments still need their first send.
    #[must_use]
    pub const fn transmitting(&self) -> bool {
        self.cursor < self.num_packets
    }

    /// True while any packet of the transfer lacks an ack.
    #[must_use]
    pub const fn waiting(&self) -> bool {
        self.confirm_wait > 0
    }

    /// Starts transmitting a chunk, aborting any previous transfer.
    ///
    /// `send` is called with each prepared packet and returns the
    /// sequence it went out under.
    pub fn send(
        &mut self,
        store: &mut ChunkStore,
        handle: ChunkHandle,
        send: &mut dyn FnMut(&mut Packet) -> u16,
    ) {
        self.abort(store);

        store.ref_chunk(handle);
        self.current = Some(handle);
        self.coords = store.chunk(handle).position();

        // zlib the block array; fall back to raw if it would not shrink
        let raw = store.chunk(handle).block_data();
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 4), Compression::default());
        let compressed = encoder
            .write_all(raw)
            .and_then(|()| encoder.finish())
            .ok()
            .filter(|out| out.len() < raw.len());
        match compressed {
            Some(out) => {
                self.buffer = out;
                self.compressed = true;
            }
            None => {
                self.buffer = raw.to_vec();
                self.compressed = false;
            }
        }

        self.cursor = 0;
        self.num_packets = self.buffer.len().div_ceil(self.packet_len);
        self.data_packets.clear();
        self.data_packets.resize(self.num_packets, UNSENT);
        self.trans_id = self.trans_id.wrapping_add(1);
        self.send_begin(send);
    }

    /// Sends the next pending fragment, if any.
    pub fn transmit(&mut self, send: &mut dyn FnMut(&mut Packet) -> u16) {
        if self.cursor < self.num_packets {
            self.send_data(self.cursor, send);
            self.cursor += 1;
        }
    }

    /// Marks a sequence acknowledged; releases the chunk once everything
    /// is confirmed.
    pub fn ack(&mut self, store: &mut ChunkStore, seq: u16) {
        if !self.waiting() {
            return;
        }
        let seq = i32::from(seq);
        if seq == self.begin_packet {
            self.begin_packet = UNSENT;
            self.confirm_wait -= 1;
            if self.idle() {
                self.release(store);
            }
            return;
        }
        for slot in &mut self.data_packets {
            if *slot == seq {
                *slot = UNSENT;
                self.confirm_wait -= 1;
                if self.idle() {
                    self.release(store);
                }
                return;
            }
        }
    }

    /// Marks a sequence lost; retransmits that specific packet.
    pub fn nack(&mut self, seq: u16, send: &mut dyn FnMut(&mut Packet) -> u16) {
        if !self.waiting() {
            return;
        }
        let seq = i32::from(seq);
        if seq == self.begin_packet {
            self.send_begin(send);
            return;
        }
        for i in 0..self.data_packets.len() {
            if self.data_packets[i] == seq {
                self.send_data(i, send);
                return;
            }
        }
    }

    /// Cancels the transfer and unpins the chunk.
    pub fn abort(&mut self, store: &mut ChunkStore) {
        if self.current.is_none() {
            return;
        }
        self.release(store);
        self.begin_packet = UNSENT;
        self.data_packets.clear();
        self.cursor = 0;
        self.num_packets = 0;
        self.confirm_wait = 0;
    }

    fn send_begin(&mut self, send: &mut dyn FnMut(&mut Packet) -> u16) {
        let mut pkt = Packet::make(PacketType::ChunkBegin);
        chunk_begin::write_transmission_id(&mut pkt, self.trans_id);
        chunk_begin::write_flags(
            &mut pkt,
            if self.compressed {
                chunk_begin::FLAG_COMPRESSED
            } else {
                0
            },
        );
        chunk_begin::write_chunk_coords(&mut pkt, self.coords);
        chunk_begin::write_data_size(&mut pkt, self.buffer.len() as u32);
        if self.begin_packet == UNSENT {
            self.confirm_wait += 1;
        }
        self.begin_packet = i32::from(send(&mut pkt));
    }

    fn send_data(&mut self, i: usize, send: &mut dyn FnMut(&mut Packet) -> u16) {
        let pos = i * self.packet_len;
        let len = self.packet_len.min(self.buffer.len() - pos);

        let mut pkt = Packet::make(PacketType::ChunkData);
        chunk_data::write_transmission_id(&mut pkt, self.trans_id);
        chunk_data::write_data_offset(&mut pkt, pos as u32);
        chunk_data::write_data_size(&mut pkt, len as u32);
        chunk_data::write_data(&mut pkt, &self.buffer[pos..pos + len]);

        if self.data_packets[i] == UNSENT {
            self.confirm_wait += 1;
        }
        self.data_packets[i] = i32::from(send(&mut pkt));
    }

    fn release(&mut self, store: &mut ChunkStore) {
        if let Some(handle) = self.current.take() {
            store.unref_chunk(handle);
        }
    }
}

impl Default for ChunkTransmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// One in-progress inbound transfer.
struct ChunkTransmission {
    id: u32,
    flags: u32,
    coords: IVec3,
    data_size: u32,
    data_received: u32,
    offsets_seen: Vec<u32>,
    last_update: i32,
    header_received: bool,
    active: bool,
    buffer: Vec<u8>,
}

impl ChunkTransmission {
    fn new() -> Self {
        Self {
            id: 0,
            flags: 0,
            coords: IVec3::ZERO,
            data_size: 0,
            data_received: 0,
            offsets_seen: Vec::new(),
            last_update: 0,
            header_received: false,
            active: false,
            buffer: vec![0; BLOCK_DATA_SIZE + 16],
        }
    }

    fn clear(&mut self) {
        self.data_size = 0;
        self.data_received = 0;
        self.offsets_seen.clear();
        self.last_update = 0;
        self.header_received = false;
        self.active = false;
    }

    fn complete(&self) -> bool {
        self.header_received && self.data_received == self.data_size
    }

    fn compressed(&self) -> bool {
        self.flags & chunk_begin::FLAG_COMPRESSED != 0
    }
}

/// Receiver half: reassembles transfers and commits them to the store.
pub struct ChunkReceiver {
    transmissions: Vec<ChunkTransmission>,
    timer: IntervalTimer,
}

impl ChunkReceiver {
    /// Fresh receiver.
    #[must_use]
    pub fn new() -> Self {
        let mut timer = IntervalTimer::new(RECEIVE_TIMEOUT_MS);
        timer.start();
        Self {
            transmissions: Vec::new(),
            timer,
        }
    }

    /// Ages transmissions; stalled ones are dropped, surplus idle slots
    /// pruned.
    pub fn update(&mut self, dt: i32) {
        self.timer.update(dt);
        let now = self.timer.elapsed();
        for trans in &mut self.transmissions {
            if trans.active && now - trans.last_update > RECEIVE_TIMEOUT_MS {
                tracing::warn!("timeout for transmission of chunk {:?}", trans.coords);
                trans.clear();
            }
        }
        if self.transmissions.len() > 3 {
            if let Some(idx) = self.transmissions.iter().position(|t| !t.active) {
                self.transmissions.remove(idx);
            }
        }
    }

    /// Feeds a `ChunkBegin` header.
    pub fn handle_begin(&mut self, pkt: &Packet, store: &mut ChunkStore) {
        let id = chunk_begin::read_transmission_id(pkt);
        let now = self.timer.elapsed();
        let trans = self.transmission(id);
        trans.flags = chunk_begin::read_flags(pkt);
        trans.coords = chunk_begin::read_chunk_coords(pkt);
        trans.data_size = chunk_begin::read_data_size(pkt).min(trans.buffer.len() as u32);
        trans.last_update = now;
        trans.header_received = true;
        self.commit(id, store);
    }

    /// Feeds a `ChunkData` fragment.
    pub fn handle_data(&mut self, pkt: &Packet, store: &mut ChunkStore) {
        let id = chunk_data::read_transmission_id(pkt);
        let offset = chunk_data::read_data_offset(pkt) as usize;
        let now = self.timer.elapsed();
        let trans = self.transmission(id);
        if offset >= trans.buffer.len() {
            tracing::warn!("chunk data offset {offset} outside of buffer");
            return;
        }
        if trans.offsets_seen.contains(&(offset as u32)) {
            // duplicate fragment, already counted
            trans.last_update = now;
            return;
        }
        let data = chunk_data::read_data(pkt);
        let len = data.len().min(trans.buffer.len() - offset);
        trans.buffer[offset..offset + len].copy_from_slice(&data[..len]);
        trans.offsets_seen.push(offset as u32);
        trans.data_received += len as u32;
        trans.last_update = now;
        self.commit(id, store);
    }

    fn transmission(&mut self, id: u32) -> &mut ChunkTransmission {
        if let Some(idx) = self
            .transmissions
            .iter()
            .position(|t| t.active && t.id == id)
        {
            return &mut self.transmissions[idx];
        }
        if let Some(idx) = self.transmissions.iter().position(|t| !t.active) {
            let trans = &mut self.transmissions[idx];
            trans.active = true;
            trans.id = id;
            return &mut self.transmissions[idx];
        }
        let mut trans = ChunkTransmission::new();
        trans.active = true;
        trans.id = id;
        self.transmissions.push(trans);
        self.transmissions.last_mut().expect("just pushed")
    }

    /// Copies a completed transfer into the store.
    fn commit(&mut self, id: u32, store: &mut ChunkStore) {
        let Some(idx) = self
            .transmissions
            .iter()
            .position(|t| t.active && t.id == id)
        else {
            return;
        };
        if !self.transmissions[idx].complete() {
            return;
        }
        let trans = &mut self.transmissions[idx];

        let Some(handle) = store.allocate(trans.coords) else {
            // chunk no longer of interest, drop the data
            trans.clear();
            return;
        };

        let src = &trans.buffer[..trans.data_size as usize];
        let ok = if trans.compressed() {
            let mut decoder = ZlibDecoder::new(src);
            decoder
                .read_exact(store.chunk_mut(handle).block_data_mut())
                .is_ok()
        } else {
            let dst = store.chunk_mut(handle).block_data_mut();
            let len = src.len().min(dst.len());
            dst[..len].copy_from_slice(&src[..len]);
            true
        };
        if ok {
            store.chunk_mut(handle).invalidate();
            store.chunk_mut(handle).mark_save();
            store.scan_lights(handle);
        } else {
            tracing::warn!("got corrupted chunk data for {:?}", trans.coords);
        }
        trans.clear();
    }
}

impl Default for ChunkReceiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hollow_world::block::Block;
    use hollow_world::block_type::default_registry;
    use hollow_world::chunk::Chunk;
    use std::sync::Arc;

    fn store_pair() -> (ChunkStore, ChunkStore) {
        let types = Arc::new(default_registry());
        let mut server = ChunkStore::new(Arc::clone(&types));
        let mut client = ChunkStore::new(types);
        server.make_index(IVec3::ZERO, 1);
        client.make_index(IVec3::ZERO, 1);
        (server, client)
    }

    /// Collects produced packets, handing out ascending sequences.
    struct Collector {
        seq: u16,
        packets: Vec<(u16, Packet)>,
    }

    impl Collector {
        fn new() -> Self {
            Self {
                seq: 100,
                packets: Vec::new(),
            }
        }

        fn send_fn(&mut self) -> impl FnMut(&mut Packet) -> u16 + '_ {
            move |pkt| {
                let seq = self.seq;
                self.seq += 1;
                self.packets.push((seq, pkt.clone()));
                seq
            }
        }
    }

    fn fill_pattern(store: &mut ChunkStore, handle: ChunkHandle) {
        for i in 0..64usize {
            store
                .chunk_mut(handle)
                .write_block(i * 61 % 4096, Block::new((i % 5 + 1) as u16));
        }
        store.chunk_mut(handle).clear_save();
    }

    #[test]
    fn test_transfer_completes() {
        let (mut server, mut client) = store_pair();
        let src = server.allocate(IVec3::ZERO).unwrap();
        fill_pattern(&mut server, src);
        let expected = server.chunk(src).block_data().to_vec();

        let mut tx = ChunkTransmitter::new();
        let mut out = Collector::new();
        {
            let mut send = out.send_fn();
            tx.send(&mut server, src, &mut send);
            while tx.transmitting() {
                tx.transmit(&mut send);
            }
        }
        assert!(tx.waiting());

        let mut rx = ChunkReceiver::new();
        for (_, pkt) in &out.packets {
            match pkt.packet_type().unwrap() {
                PacketType::ChunkBegin => rx.handle_begin(pkt, &mut client),
                PacketType::ChunkData => rx.handle_data(pkt, &mut client),
                other => panic!("unexpected packet {other:?}"),
            }
        }

        let dst = client.get(IVec3::ZERO).expect("chunk committed");
        assert_eq!(client.chunk(dst).block_data(), expected.as_slice());

        // acks settle the sender back to idle and unpin the chunk
        let seqs: Vec<u16> = out.packets.iter().map(|(s, _)| *s).collect();
        for seq in seqs {
            tx.ack(&mut server, seq);
        }
        assert!(tx.idle());
    }

    #[test]
    fn test_lost_fragment_retransmitted_and_recovered() {
        let (mut server, mut client) = store_pair();
        let src = server.allocate(IVec3::ZERO).unwrap();
        fill_pattern(&mut server, src);
        let expected = server.chunk(src).block_data().to_vec();

        let mut tx = ChunkTransmitter::new();
        let mut out = Collector::new();
        {
            let mut send = out.send_fn();
            tx.send(&mut server, src, &mut send);
            while tx.transmitting() {
                tx.transmit(&mut send);
            }
        }
        let first_round = out.packets.len();
        assert!(first_round >= 2, "begin plus at least one fragment");

        // drop the second packet (first data fragment); everything else
        // is acked, the dropped seq is reported lost
        let lost_seq = out.packets[1].0;
        let acked: Vec<u16> = out
            .packets
            .iter()
            .map(|(s, _)| *s)
            .filter(|s| *s != lost_seq)
            .collect();
        for seq in acked {
            tx.ack(&mut server, seq);
        }
        assert!(tx.waiting(), "one fragment still outstanding");
        {
            let mut send = out.send_fn();
            tx.nack(lost_seq, &mut send);
        }
        assert_eq!(out.packets.len(), first_round + 1, "exactly one retransmit");

        // the retransmitted fragment carries the same offset as the lost
        // one under a fresh sequence
        let (new_seq, ref resent) = out.packets[first_round];
        assert_ne!(new_seq, lost_seq);
        assert_eq!(
            chunk_data::read_data_offset(resent),
            chunk_data::read_data_offset(&out.packets[1].1)
        );

        // client gets every packet except the dropped original
        let mut rx = ChunkReceiver::new();
        for (seq, pkt) in &out.packets {
            if *seq == lost_seq {
                continue;
            }
            match pkt.packet_type().unwrap() {
                PacketType::ChunkBegin => rx.handle_begin(pkt, &mut client),
                PacketType::ChunkData => rx.handle_data(pkt, &mut client),
                _ => unreachable!(),
            }
        }
        let dst = client.get(IVec3::ZERO).expect("chunk committed");
        assert_eq!(client.chunk(dst).block_data(), expected.as_slice());

        tx.ack(&mut server, new_seq);
        assert!(tx.idle());
    }

    #[test]
    fn test_transfer_pins_chunk_against_clean() {
        let types = Arc::new(default_registry());
        let mut server = ChunkStore::new(types);
        let index = server.make_index(IVec3::ZERO, 0);
        let src = server.allocate(IVec3::ZERO).unwrap();
        fill_pattern(&mut server, src);

        let mut tx = ChunkTransmitter::new();
        let mut out = Collector::new();
        {
            let mut send = out.send_fn();
            tx.send(&mut server, src, &mut send);
        }

        // the observer walks away mid-transfer; the in-flight reference
        // keeps the chunk alive until the transfer settles
        server.unregister_index(index);
        server.clean();
        assert!(server.get(IVec3::ZERO).is_some(), "transfer holds a reference");

        tx.abort(&mut server);
        server.clean();
        assert!(server.get(IVec3::ZERO).is_none(), "abort released the pin");
    }

    #[test]
    fn test_duplicate_fragment_ignored() {
        let (mut server, mut client) = store_pair();
        let src = server.allocate(IVec3::ZERO).unwrap();
        fill_pattern(&mut server, src);

        let mut tx = ChunkTransmitter::new();
        let mut out = Collector::new();
        {
            let mut send = out.send_fn();
            tx.send(&mut server, src, &mut send);
            while tx.transmitting() {
                tx.transmit(&mut send);
            }
        }

        let mut rx = ChunkReceiver::new();
        // feed the first data fragment twice before the rest
        let dup = out
            .packets
            .iter()
            .find(|(_, p)| p.packet_type() == Some(PacketType::ChunkData))
            .map(|(_, p)| p.clone())
            .unwrap();
        rx.handle_data(&dup, &mut client);
        rx.handle_data(&dup, &mut client);
        for (_, pkt) in &out.packets {
            match pkt.packet_type().unwrap() {
                PacketType::ChunkBegin => rx.handle_begin(pkt, &mut client),
                PacketType::ChunkData => rx.handle_data(pkt, &mut client),
                _ => unreachable!(),
            }
        }
        let dst = client.get(IVec3::ZERO).expect("chunk committed despite duplicate");
        assert_eq!(
            client.chunk(dst).block_data(),
            server.chunk(src).block_data()
        );
    }

    #[test]
    fn test_receiver_timeout_clears_stalled() {
        let (_, mut client) = store_pair();
        let mut rx = ChunkReceiver::new();

        let mut pkt = Packet::make(PacketType::ChunkBegin);
        chunk_begin::write_transmission_id(&mut pkt, 1);
        chunk_begin::write_flags(&mut pkt, 0);
        chunk_begin::write_chunk_coords(&mut pkt, IVec3::ZERO);
        chunk_begin::write_data_size(&mut pkt, 4096);
        rx.handle_begin(&pkt, &mut client);

        // nothing arrives for longer than the timeout
        rx.update(RECEIVE_TIMEOUT_MS + 100);
        assert!(
            client.get(IVec3::ZERO).is_none(),
            "stalled transfer must not commit"
        );
    }
}
