//! Per-peer sequencing, acknowledgment and loss detection.
//!
//! Every outbound packet embeds the connection's outgoing control; every
//! inbound packet updates it and is compared against the remote's view of
//! our traffic. The comparison yields exactly-once `packet_lost` /
//! `packet_received` callbacks that higher layers use for retransmit
//! decisions. Nothing here retransmits by itself.
//!
//! A connection pings after 500 ms of outbound silence and is closed
//! after 10 s without inbound traffic.

use std::net::{SocketAddr, UdpSocket};
use std::time::Instant;

use hollow_shared::timer::IntervalTimer;

use crate::protocol::{Packet, PacketType, TControl};

/// Milliseconds of outbound silence before a keepalive ping.
const PING_INTERVAL_MS: i32 = 500;
/// Milliseconds of inbound silence before the connection dies.
const TIMEOUT_MS: i32 = 10_000;

/// Callbacks a connection reports into.
///
/// `handle` receives every in-order-or-not packet exactly as it arrived;
/// the loss/receipt callbacks fire at most once per sent sequence.
pub trait ConnectionHandler {
    /// A packet of ours was sent with this sequence.
    fn packet_sent(&mut self, _seq: u16) {}
    /// The remote acknowledged this sequence.
    fn packet_received(&mut self, _seq: u16) {}
    /// The remote can no longer acknowledge this sequence.
    fn packet_lost(&mut self, _seq: u16) {}
    /// Nothing has arrived for the timeout span.
    fn on_timeout(&mut self) {}
    /// An inbound packet to dispatch on.
    fn handle(&mut self, pkt: &Packet);
}

/// What a connection reported while processing traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// One of our sequences was acknowledged.
    Received(u16),
    /// One of our sequences is settled lost.
    Lost(u16),
    /// The connection timed out.
    TimedOut,
}

/// Handler that records events in order for later processing.
///
/// Sessions own their connection as a field, so they cannot pass
/// themselves as the live handler while calling into it; they collect
/// the events and replay them with full access to their own state.
#[derive(Default)]
pub struct EventCollector {
    /// Events in the order the connection reported them.
    pub events: Vec<ConnectionEvent>,
    /// Sequences of packets sent while collecting.
    pub sent: Vec<u16>,
}

impl ConnectionHandler for EventCollector {
    fn packet_sent(&mut self, seq: u16) {
        self.sent.push(seq);
    }
    fn packet_received(&mut self, seq: u16) {
        self.events.push(ConnectionEvent::Received(seq));
    }
    fn packet_lost(&mut self, seq: u16) {
        self.events.push(ConnectionEvent::Lost(seq));
    }
    fn on_timeout(&mut self) {
        self.events.push(ConnectionEvent::TimedOut);
    }
    fn handle(&mut self, _pkt: &Packet) {
        // the caller still holds the packet and dispatches it itself
    }
}

/// Reliability state for one remote address.
pub struct Connection {
    addr: SocketAddr,
    ctrl_out: TControl,
    ctrl_in: TControl,
    send_timer: IntervalTimer,
    recv_timer: IntervalTimer,
    closed: bool,
}

impl Connection {
    /// Connection to the given remote.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        let mut send_timer = IntervalTimer::new(PING_INTERVAL_MS);
        let mut recv_timer = IntervalTimer::new(TIMEOUT_MS);
        send_timer.start();
        recv_timer.start();
        Self {
            addr,
            ctrl_out: TControl::new(),
            ctrl_in: TControl::new(),
            send_timer,
            recv_timer,
            closed: false,
        }
    }

    /// The remote address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// True if a datagram source is this connection's remote.
    #[must_use]
    pub fn matches(&self, addr: SocketAddr) -> bool {
        self.addr == addr
    }

    /// Marks the connection closed.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// True once closed (locally or by timeout).
    #[must_use]
    pub const fn closed(&self) -> bool {
        self.closed
    }

    /// True when outbound silence calls for a keepalive.
    #[must_use]
    pub fn should_ping(&self) -> bool {
        !self.closed && self.send_timer.hit_once()
    }

    /// Advances the timers; closes and notifies on timeout.
    pub fn update(&mut self, dt: i32, handler: &mut dyn ConnectionHandler) {
        self.send_timer.update(dt);
        self.recv_timer.update(dt);
        if !self.closed && self.recv_timer.hit_once() {
            self.close();
            handler.on_timeout();
        }
    }

    /// Stamps the control header and sends the packet.
    ///
    /// Returns the sequence number the packet went out under. A failed
    /// socket write still consumes the sequence; the packet will settle
    /// as lost through the ack window and whoever cares retransmits.
    pub fn send(
        &mut self,
        pkt: &mut Packet,
        socket: &UdpSocket,
        handler: &mut dyn ConnectionHandler,
    ) -> u16 {
        pkt.set_control(self.ctrl_out);
        let seq = self.ctrl_out.seq;
        self.ctrl_out.seq = self.ctrl_out.seq.wrapping_add(1);

        if let Err(err) = socket.send_to(pkt.as_bytes(), self.addr) {
            tracing::warn!("send to {} failed: {err}", self.addr);
        }
        handler.packet_sent(seq);
        self.send_timer.reset();
        seq
    }

    /// Sends a bare keepalive.
    pub fn send_ping(&mut self, socket: &UdpSocket, handler: &mut dyn ConnectionHandler) -> u16 {
        let mut pkt = Packet::make(PacketType::Ping);
        self.send(&mut pkt, socket, handler)
    }

    /// Processes an inbound packet: updates our ack state, dispatches the
    /// packet, then settles the fate of our own recent sends.
    pub fn received(&mut self, pkt: &Packet, handler: &mut dyn ConnectionHandler) {
        let ctrl_new = pkt.control();

        // fold the remote's sequence into what we acknowledge
        let diff = i32::from(ctrl_new.seq.wrapping_sub(self.ctrl_out.ack) as i16);
        if diff > 0 {
            if diff >= 32 {
                self.ctrl_out.hist = 0;
            } else {
                self.ctrl_out.hist <<= diff;
                self.ctrl_out.hist |= 1 << (diff - 1);
            }
            self.ctrl_out.ack = ctrl_new.seq;
        } else if diff < 0 && diff >= -32 {
            self.ctrl_out.hist |= 1 << (-diff - 1);
        }
        self.recv_timer.reset();

        handler.handle(pkt);

        if diff <= 0 {
            // stale packet: it told us nothing new about our own sends
            return;
        }

        let ack_diff = i32::from(ctrl_new.ack.wrapping_sub(self.ctrl_in.ack) as i16);
        if ack_diff > 0 {
            // sequences that just left the 32-wide window unacknowledged
            // are lost for good
            for i in 0..ack_diff {
                let in_old_window = i < 32 && (self.ctrl_in.hist & (1 << (31 - i))) != 0;
                if i > 32 || (i < 32 && !in_old_window) {
                    let seq = self.ctrl_in.ack.wrapping_sub(32).wrapping_add(i as u16);
                    handler.packet_lost(seq);
                }
            }
            // sequences newly acknowledged by this control
            let mut s = ctrl_new.ack_begin();
            while s != ctrl_new.ack_end() {
                if ctrl_new.acks(s) && !self.ctrl_in.acks(s) {
                    handler.packet_received(s);
                }
                s = s.wrapping_sub(1);
            }
            self.ctrl_in = ctrl_new;
        }
    }

    /// Outgoing control, for tests and diagnostics.
    #[must_use]
    pub const fn ctrl_out(&self) -> TControl {
        self.ctrl_out
    }

    /// Incoming control, for tests and diagnostics.
    #[must_use]
    pub const fn ctrl_in(&self) -> TControl {
        self.ctrl_in
    }
}

/// Operating mode recommended by congestion control.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum CongestionMode {
    /// Plenty of headroom.
    #[default]
    Good = 0,
    /// Back off a little.
    Bad = 1,
    /// Back off a lot.
    Ugly = 2,
}

/// Round-trip, loss and throughput estimation with a coarse mode hint.
///
/// Every eighth packet is timestamped for RTT sampling; loss is the ratio
/// over each 256 settled packets.
pub struct CongestionControl {
    packets_lost: u32,
    packets_received: u32,
    packet_loss: f32,
    stamps: [Instant; 16],
    stamp_cursor: usize,
    stamp_last: u16,
    rtt_ms: f32,
    tx_bytes: usize,
    rx_bytes: usize,
    tx_kbps: f32,
    rx_kbps: f32,
    window_start: Instant,
    mode: CongestionMode,
    mode_entered: Instant,
}

impl CongestionControl {
    const SAMPLE_SKIP: u16 = 8;
    const BAD_RTT_MS: f32 = 150.0;
    const BAD_LOSS: f32 = 0.05;
    const UGLY_RTT_MS: f32 = 300.0;
    const UGLY_LOSS: f32 = 0.25;
    /// How long conditions must hold before the mode improves.
    const KEEP_SECS: f32 = 2.0;

    /// Fresh estimator.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            packets_lost: 0,
            packets_received: 0,
            packet_loss: 0.0,
            stamps: [now; 16],
            stamp_cursor: 15,
            stamp_last: 0,
            rtt_ms: 64.0,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_kbps: 0.0,
            rx_kbps: 0.0,
            window_start: now,
            mode: CongestionMode::Good,
            mode_entered: now,
        }
    }

    /// Recommended mode of operation.
    #[must_use]
    pub const fn mode(&self) -> CongestionMode {
        self.mode
    }

    /// Unimportant packets to drop per important one in this mode.
    #[must_use]
    pub const fn suggested_packet_skip(&self) -> u32 {
        (1 << self.mode as u32) - 1
    }

    /// Ticks to pause between large uncritical packets in this mode.
    #[must_use]
    pub const fn suggested_packet_hold(&self) -> u32 {
        (1 << (self.mode as u32 + 1)) - 1
    }

    /// Packet loss as a factor.
    #[must_use]
    pub const fn packet_loss(&self) -> f32 {
        self.packet_loss
    }

    /// Smoothed round-trip time in milliseconds.
    #[must_use]
    pub const fn round_trip_time(&self) -> f32 {
        self.rtt_ms
    }

    /// Estimated outbound kilobytes per second.
    #[must_use]
    pub const fn upstream(&self) -> f32 {
        self.tx_kbps
    }

    /// Estimated inbound kilobytes per second.
    #[must_use]
    pub const fn downstream(&self) -> f32 {
        self.rx_kbps
    }

    fn samples(seq: u16) -> bool {
        seq % Self::SAMPLE_SKIP == 0
    }

    /// Records an outbound packet.
    pub fn packet_out(&mut self, seq: u16, bytes: usize) {
        self.tx_bytes += bytes;
        if Self::samples(seq) {
            self.stamp_cursor = (self.stamp_cursor + 1) % 16;
            self.stamps[self.stamp_cursor] = Instant::now();
            self.stamp_last = seq;
        }
        self.update_stats();
    }

    /// Records an inbound packet.
    pub fn packet_in(&mut self, bytes: usize) {
        self.rx_bytes += bytes;
        self.update_stats();
    }

    /// Records a settled-as-lost packet.
    pub fn packet_lost(&mut self, seq: u16) {
        self.packets_lost += 1;
        self.update_packet_loss();
        self.update_rtt(seq);
        self.update_mode();
    }

    /// Records a settled-as-received packet.
    pub fn packet_received(&mut self, seq: u16) {
        self.packets_received += 1;
        self.update_packet_loss();
        self.update_rtt(seq);
        self.update_mode();
    }

    fn update_packet_loss(&mut self) {
        let total = self.packets_lost + self.packets_received;
        if total >= 256 {
            self.packet_loss = self.packets_lost as f32 / total as f32;
            self.packets_lost = 0;
            self.packets_received = 0;
        }
    }

    fn update_rtt(&mut self, seq: u16) {
        if !Self::samples(seq) {
            return;
        }
        let diff = i32::from(seq.wrapping_sub(self.stamp_last) as i16) / i32::from(Self::SAMPLE_SKIP);
        if diff > 0 || diff < -15 {
            // outside the observed time frame
            return;
        }
        let idx = ((self.stamp_cursor as i32 + diff).rem_euclid(16)) as usize;
        let sample = self.stamps[idx].elapsed().as_secs_f32() * 1000.0;
        self.rtt_ms += (sample - self.rtt_ms) * 0.1;
    }

    fn update_stats(&mut self) {
        let elapsed = self.window_start.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            self.tx_kbps = self.tx_bytes as f32 / 1024.0 / elapsed;
            self.rx_kbps = self.rx_bytes as f32 / 1024.0 / elapsed;
            self.tx_bytes = 0;
            self.rx_bytes = 0;
            self.window_start = Instant::now();
        }
    }

    fn conditions(&self) -> CongestionMode {
        if self.rtt_ms > Self::UGLY_RTT_MS || self.packet_loss > Self::UGLY_LOSS {
            CongestionMode::Ugly
        } else if self.rtt_ms > Self::BAD_RTT_MS || self.packet_loss > Self::BAD_LOSS {
            CongestionMode::Bad
        } else {
            CongestionMode::Good
        }
    }

    fn update_mode(&mut self) {
        let conditions = self.conditions();
        if conditions > self.mode {
            // degrade immediately
            self.mode = conditions;
            self.mode_entered = Instant::now();
        } else if conditions < self.mode
            && self.mode_entered.elapsed().as_secs_f32() >= Self::KEEP_SECS
        {
            // improve only after conditions held for a while
            self.mode = conditions;
            self.mode_entered = Instant::now();
        }
    }
}

impl Default for CongestionControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<u16>,
        received: Vec<u16>,
        lost: Vec<u16>,
        timeouts: u32,
        handled: u32,
    }

    impl ConnectionHandler for Recorder {
        fn packet_sent(&mut self, seq: u16) {
            self.sent.push(seq);
        }
        fn packet_received(&mut self, seq: u16) {
            self.received.push(seq);
        }
        fn packet_lost(&mut self, seq: u16) {
            self.lost.push(seq);
        }
        fn on_timeout(&mut self) {
            self.timeouts += 1;
        }
        fn handle(&mut self, _pkt: &Packet) {
            self.handled += 1;
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:12354".parse().unwrap()
    }

    /// Packet as the remote would send it: its own seq plus its view of
    /// our traffic.
    fn remote_packet(seq: u16, ack: u16, hist: u32) -> Packet {
        let mut pkt = Packet::make(PacketType::Ping);
        pkt.set_control(TControl { seq, ack, hist });
        Packet::parse(pkt.as_bytes()).unwrap()
    }

    #[test]
    fn test_receive_updates_outgoing_ack() {
        let mut conn = Connection::new(addr());
        let mut rec = Recorder::default();

        conn.received(&remote_packet(0, 0xFFFF, 0xFFFF_FFFF), &mut rec);
        assert_eq!(conn.ctrl_out().ack, 0);

        conn.received(&remote_packet(1, 0xFFFF, 0xFFFF_FFFF), &mut rec);
        let ctrl = conn.ctrl_out();
        assert_eq!(ctrl.ack, 1);
        assert!(ctrl.hist & 1 != 0, "previous sequence marked received");
        assert_eq!(rec.handled, 2);
    }

    #[test]
    fn test_receive_gap_sets_hist_bits() {
        let mut conn = Connection::new(addr());
        let mut rec = Recorder::default();

        conn.received(&remote_packet(0, 0xFFFF, 0xFFFF_FFFF), &mut rec);
        // 1 and 2 go missing for now
        conn.received(&remote_packet(3, 0xFFFF, 0xFFFF_FFFF), &mut rec);
        let ctrl = conn.ctrl_out();
        assert_eq!(ctrl.ack, 3);
        // bit 2 is seq 0; bits 0 and 1 (seqs 2 and 1) are clear
        assert!(ctrl.hist & 0b100 != 0);
        assert!(ctrl.hist & 0b011 == 0);

        // the stragglers arrive out of order
        conn.received(&remote_packet(1, 0xFFFF, 0xFFFF_FFFF), &mut rec);
        conn.received(&remote_packet(2, 0xFFFF, 0xFFFF_FFFF), &mut rec);
        let ctrl = conn.ctrl_out();
        assert_eq!(ctrl.ack, 3, "old packets do not move the ack");
        assert!(ctrl.hist & 0b011 == 0b011, "stragglers fill their bits");
    }

    #[test]
    fn test_ack_hist_invariant_random_order() {
        // property from the protocol: after processing, hist bit k is set
        // exactly when sequence ack-k-1 was received
        let mut conn = Connection::new(addr());
        let mut rec = Recorder::default();
        let arrival = [5u16, 2, 9, 3, 8, 1, 12, 7];
        for &seq in &arrival {
            conn.received(&remote_packet(seq, 0xFFFF, 0xFFFF_FFFF), &mut rec);
        }
        let ctrl = conn.ctrl_out();
        assert_eq!(ctrl.ack, 12);
        for k in 0..32u16 {
            let seq = ctrl.ack.wrapping_sub(k).wrapping_sub(1);
            let bit = ctrl.hist & (1 << k) != 0;
            let arrived = arrival.contains(&seq);
            // sequences before 0 count as received from the initial state
            if seq < 13 {
                assert_eq!(bit, arrived, "hist bit {k} for seq {seq}");
            }
        }
    }

    #[test]
    fn test_newly_acked_packets_reported_once() {
        let mut conn = Connection::new(addr());
        let mut rec = Recorder::default();

        // remote saw our sequences 0 and 1; its history before sequence 0
        // is the all-received initial state
        conn.received(&remote_packet(0, 1, !0), &mut rec);
        assert_eq!(rec.received, vec![1, 0]);

        // replayed information must not repeat the callbacks
        conn.received(&remote_packet(1, 1, !0), &mut rec);
        assert_eq!(rec.received, vec![1, 0]);

        // one more of ours acked
        conn.received(&remote_packet(2, 2, !0), &mut rec);
        assert_eq!(rec.received, vec![1, 0, 2]);
        assert!(rec.lost.is_empty());
    }

    #[test]
    fn test_lost_packet_reported_once() {
        let mut conn = Connection::new(addr());
        let mut rec = Recorder::default();

        // our seq 0 acked normally
        conn.received(&remote_packet(0, 0, 0), &mut rec);
        rec.received.clear();

        // remote acks far ahead without ever seeing seq 1: once the ack
        // moves more than 32 past it, 1 is settled lost
        conn.received(&remote_packet(1, 40, !0u32 >> 1), &mut rec);
        assert!(
            rec.lost.contains(&1),
            "sequence 1 fell out of the window unacked: {:?}",
            rec.lost
        );
        let count = rec.lost.iter().filter(|s| **s == 1).count();
        assert_eq!(count, 1);

        // later packets must not re-report it
        conn.received(&remote_packet(2, 41, !0u32), &mut rec);
        let count = rec.lost.iter().filter(|s| **s == 1).count();
        assert_eq!(count, 1, "at most once per sent packet");
    }

    #[test]
    fn test_timeout_closes_and_notifies() {
        let mut conn = Connection::new(addr());
        let mut rec = Recorder::default();
        conn.update(9_999, &mut rec);
        assert!(!conn.closed());
        conn.update(2, &mut rec);
        assert!(conn.closed());
        assert_eq!(rec.timeouts, 1);

        // no repeat notification
        conn.update(20_000, &mut rec);
        assert_eq!(rec.timeouts, 1);
    }

    #[test]
    fn test_should_ping_after_silence() {
        let mut conn = Connection::new(addr());
        let mut rec = Recorder::default();
        assert!(!conn.should_ping());
        conn.update(501, &mut rec);
        assert!(conn.should_ping());
    }

    #[test]
    fn test_congestion_mode_degrades_on_loss() {
        let mut cc = CongestionControl::new();
        assert_eq!(cc.mode(), CongestionMode::Good);
        // force a high loss ratio through a full 256-packet window
        for seq in 0..200u16 {
            cc.packet_lost(seq);
        }
        for seq in 200..256u16 {
            cc.packet_received(seq);
        }
        assert!(cc.packet_loss() > 0.5);
        assert_eq!(cc.mode(), CongestionMode::Ugly);
        assert_eq!(cc.suggested_packet_skip(), 3);
        assert_eq!(cc.suggested_packet_hold(), 7);
    }
}
