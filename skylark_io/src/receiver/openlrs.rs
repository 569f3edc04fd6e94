//! In-process OpenLRS-style receiver.
//!
//! No UART framing: the radio stack lives in the same firmware and hands
//! over decoded channel values directly. The only protocol here is the
//! staleness window — a read later than 100 ms after the last update
//! returns the sentinel.

use super::{ChannelBank, RcReceiver, TIMEOUT};

const NUM_CHANNELS: usize = 8;

/// Staleness window [ms].
const STALE_MS: u64 = 100;

pub struct OpenLrsReceiver {
    channels: ChannelBank<NUM_CHANNELS>,
    last_update_ms: Option<u64>,
    now_ms: u64,
}

impl Default for OpenLrsReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenLrsReceiver {
    pub fn new() -> Self {
        Self {
            channels: ChannelBank::new(),
            last_update_ms: None,
            now_ms: 0,
        }
    }

    /// Radio stack delivers a fresh channel set at `now_ms`.
    pub fn update(&mut self, values: &[u16], now_ms: u64) {
        for (ch, &v) in values.iter().enumerate().take(NUM_CHANNELS) {
            self.channels.set(ch, v);
        }
        self.last_update_ms = Some(now_ms);
        self.now_ms = now_ms;
    }

    /// Advance the receiver clock (polled from the scheduler).
    pub fn poll(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    fn stale(&self) -> bool {
        match self.last_update_ms {
            Some(t) => self.now_ms.saturating_sub(t) > STALE_MS,
            None => true,
        }
    }
}

impl RcReceiver for OpenLrsReceiver {
    fn channel_count(&self) -> usize {
        NUM_CHANNELS
    }

    fn read(&self, channel: usize) -> u16 {
        if self.stale() {
            TIMEOUT
        } else {
            self.channels.get(channel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_values_read_back() {
        let mut rx = OpenLrsReceiver::new();
        rx.update(&[1500, 1200], 0);
        assert_eq!(rx.read(0), 1500);
        assert_eq!(rx.read(1), 1200);
    }

    #[test]
    fn reads_are_stale_after_100ms() {
        let mut rx = OpenLrsReceiver::new();
        rx.update(&[1500], 0);
        rx.poll(100);
        assert_eq!(rx.read(0), 1500);
        rx.poll(101);
        assert_eq!(rx.read(0), TIMEOUT);
    }

    #[test]
    fn never_updated_reads_timeout() {
        let rx = OpenLrsReceiver::new();
        assert_eq!(rx.read(0), TIMEOUT);
    }
}
