//! Shared counters, single-writer per field, sampled by the supervisor.
//!
//! Every field here is written by exactly one of C2 (the receiver) or C3
//! (the sender); `Ordering::Relaxed` is sufficient throughout because only
//! deltas over a sampling period are ever reported, not instantaneous
//! cross-field consistency.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    /// Complete messages pushed to the ring (C2).
    amqp_received: AtomicU64,
    /// Partial-delivery (multi-frame) events observed (C2).
    amqp_partial: AtomicU64,
    /// Receive batches completed (C2).
    amqp_total_batches: AtomicU64,
    /// Running sum of link-credit samples, for the period average (C2).
    link_credit_sum: AtomicU64,
    /// Payloads handed to the downstream socket (C3).
    sock_sent: AtomicU64,
    /// Payloads dropped because the non-blocking socket would have blocked (C3).
    sock_would_block: AtomicU64,
    /// Malformed payloads from the AMQP layer (C2).
    amqp_decode_errs: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.amqp_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partial(&self) {
        self.amqp_partial.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.amqp_total_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_link_credit(&self, credit: u32) {
        self.link_credit_sum.fetch_add(u64::from(credit), Ordering::Relaxed);
    }

    pub fn record_sock_sent(&self) {
        self.sock_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sock_would_block(&self) {
        self.sock_would_block.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_err(&self) {
        self.amqp_decode_errs.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot every counter plus the ring's own overrun count.
    pub fn snapshot(&self, rb_overruns: u64) -> Snapshot {
        Snapshot {
            amqp_received: self.amqp_received.load(Ordering::Relaxed),
            amqp_partial: self.amqp_partial.load(Ordering::Relaxed),
            amqp_total_batches: self.amqp_total_batches.load(Ordering::Relaxed),
            link_credit_sum: self.link_credit_sum.load(Ordering::Relaxed),
            rb_overruns,
            sock_sent: self.sock_sent.load(Ordering::Relaxed),
            sock_would_block: self.sock_would_block.load(Ordering::Relaxed),
            amqp_decode_errs: self.amqp_decode_errs.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub amqp_received: u64,
    pub amqp_partial: u64,
    pub amqp_total_batches: u64,
    pub link_credit_sum: u64,
    pub rb_overruns: u64,
    pub sock_sent: u64,
    pub sock_would_block: u64,
    pub amqp_decode_errs: u64,
}

impl Snapshot {
    /// Formats the stdout telemetry line for the interval between `prev`
    /// and `self`. The link-credit average divides by the message-count
    /// delta, defined as 0 when that delta is 0.
    pub fn format_delta(&self, prev: &Snapshot) -> String {
        let d_received = self.amqp_received.saturating_sub(prev.amqp_received);
        let d_overruns = self.rb_overruns.saturating_sub(prev.rb_overruns);
        let d_sent = self.sock_sent.saturating_sub(prev.sock_sent);
        let d_would_block = self.sock_would_block.saturating_sub(prev.sock_would_block);
        let d_credit = self.link_credit_sum.saturating_sub(prev.link_credit_sum);

        let avg = if d_received == 0 {
            0.0
        } else {
            d_credit as f64 / d_received as f64
        };

        format!(
            "in: {}({}), amqp_overrun: {}({}), out: {}({}), sock_overrun: {}({}), link_credit_average: {}",
            self.amqp_received,
            d_received,
            self.rb_overruns,
            d_overruns,
            self.sock_sent,
            d_sent,
            self.sock_would_block,
            d_would_block,
            avg,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_credit_average_is_zero_when_no_messages_arrived() {
        let prev = Snapshot::default();
        let now = Snapshot {
            link_credit_sum: 500,
            ..Snapshot::default()
        };
        assert!(now.format_delta(&prev).ends_with("link_credit_average: 0"));
    }

    #[test]
    fn format_matches_wire_contract() {
        let prev = Snapshot::default();
        let now = Snapshot {
            amqp_received: 10,
            rb_overruns: 2,
            sock_sent: 8,
            sock_would_block: 1,
            link_credit_sum: 100,
            ..Snapshot::default()
        };
        assert_eq!(
            now.format_delta(&prev),
            "in: 10(10), amqp_overrun: 2(2), out: 8(8), sock_overrun: 1(1), link_credit_average: 10"
        );
    }
}
