//! Prometheus counters for the link, command queue and error log.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{PedestalError, PedestalResult};

/// Scheduler loop label values.
pub const RECEIVE_LOOP: &str = "receive";
pub const SEND_LOOP: &str = "send";

#[derive(Clone)]
pub struct LinkMetrics {
    registry: Registry,

    packets_sent: IntCounter,
    packets_received: IntCounter,
    status_frames: IntCounter,
    send_errors: IntCounter,
    decode_errors: IntCounter,
    tick_failures: IntCounterVec,
    slow_ticks: IntCounterVec,

    commands_sent: IntCounterVec,
    command_failures: IntCounterVec,

    error_log_entries: IntCounterVec,

    running: IntGauge,
    healthy: IntGauge,
}

impl LinkMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let packets_sent = IntCounter::new(
            "pedestal_udp_packets_sent_total",
            "Datagrams sent to firmware",
        )?;
        let packets_received = IntCounter::new(
            "pedestal_udp_packets_received_total",
            "Datagrams received from firmware",
        )?;
        let status_frames = IntCounter::new(
            "pedestal_udp_status_frames_total",
            "Status frames decoded",
        )?;
        let send_errors =
            IntCounter::new("pedestal_udp_send_errors_total", "Failed datagram sends")?;
        let decode_errors = IntCounter::new(
            "pedestal_udp_decode_errors_total",
            "Received datagrams dropped because they failed to decode",
        )?;
        let tick_failures = IntCounterVec::new(
            Opts::new(
                "pedestal_scheduler_tick_failures_total",
                "Scheduler ticks that returned an error or panicked",
            ),
            &["loop"],
        )?;
        let slow_ticks = IntCounterVec::new(
            Opts::new(
                "pedestal_scheduler_slow_ticks_total",
                "Scheduler ticks that exceeded their warning threshold",
            ),
            &["loop"],
        )?;
        let commands_sent = IntCounterVec::new(
            Opts::new("pedestal_commands_sent_total", "Commands transmitted"),
            &["kind"],
        )?;
        let command_failures = IntCounterVec::new(
            Opts::new(
                "pedestal_command_failures_total",
                "Commands that failed to build or transmit",
            ),
            &["kind"],
        )?;
        let error_log_entries = IntCounterVec::new(
            Opts::new(
                "pedestal_error_log_entries_total",
                "Error log entries recorded",
            ),
            &["severity"],
        )?;
        let running = IntGauge::new("pedestal_udp_running", "1 while both scheduler loops run")?;
        let healthy = IntGauge::new(
            "pedestal_udp_healthy",
            "1 while running and status frames are arriving",
        )?;

        registry.register(Box::new(packets_sent.clone()))?;
        registry.register(Box::new(packets_received.clone()))?;
        registry.register(Box::new(status_frames.clone()))?;
        registry.register(Box::new(send_errors.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(tick_failures.clone()))?;
        registry.register(Box::new(slow_ticks.clone()))?;
        registry.register(Box::new(commands_sent.clone()))?;
        registry.register(Box::new(command_failures.clone()))?;
        registry.register(Box::new(error_log_entries.clone()))?;
        registry.register(Box::new(running.clone()))?;
        registry.register(Box::new(healthy.clone()))?;

        Ok(Self {
            registry,
            packets_sent,
            packets_received,
            status_frames,
            send_errors,
            decode_errors,
            tick_failures,
            slow_ticks,
            commands_sent,
            command_failures,
            error_log_entries,
            running,
            healthy,
        })
    }

    pub fn packet_sent(&self) {
        self.packets_sent.inc();
    }

    pub fn packet_received(&self) {
        self.packets_received.inc();
    }

    pub fn status_frame(&self) {
        self.status_frames.inc();
    }

    pub fn send_error(&self) {
        self.send_errors.inc();
    }

    pub fn decode_error(&self) {
        self.decode_errors.inc();
    }

    pub fn tick_failure(&self, loop_name: &str) {
        self.tick_failures.with_label_values(&[loop_name]).inc();
    }

    pub fn slow_tick(&self, loop_name: &str) {
        self.slow_ticks.with_label_values(&[loop_name]).inc();
    }

    pub fn command_sent(&self, kind: &str) {
        self.commands_sent.with_label_values(&[kind]).inc();
    }

    pub fn command_failed(&self, kind: &str) {
        self.command_failures.with_label_values(&[kind]).inc();
    }

    pub fn error_logged(&self, severity: &str) {
        self.error_log_entries.with_label_values(&[severity]).inc();
    }

    pub fn set_link_state(&self, running: bool, healthy: bool) {
        self.running.set(running as i64);
        self.healthy.set(healthy as i64);
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.get()
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.get()
    }

    pub fn status_frames(&self) -> u64 {
        self.status_frames.get()
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.get()
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.get()
    }

    pub fn tick_failures(&self) -> u64 {
        [RECEIVE_LOOP, SEND_LOOP]
            .iter()
            .map(|l| self.tick_failures.with_label_values(&[*l]).get())
            .sum()
    }

    pub fn slow_ticks(&self) -> u64 {
        [RECEIVE_LOOP, SEND_LOOP]
            .iter()
            .map(|l| self.slow_ticks.with_label_values(&[*l]).get())
            .sum()
    }

    pub fn commands_sent_of(&self, kind: &str) -> u64 {
        self.commands_sent.with_label_values(&[kind]).get()
    }

    /// Render every metric in the Prometheus text format.
    pub fn render(&self) -> PedestalResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut output = Vec::new();
        encoder.encode(&metric_families, &mut output)?;
        String::from_utf8(output).map_err(|e| {
            PedestalError::Prometheus(prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8: {e}"
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_render() {
        let metrics = LinkMetrics::new().unwrap();
        metrics.packet_sent();
        metrics.packet_sent();
        metrics.tick_failure(RECEIVE_LOOP);
        metrics.tick_failure(SEND_LOOP);
        metrics.command_sent("Stop");
        metrics.set_link_state(true, false);

        assert_eq!(metrics.packets_sent(), 2);
        assert_eq!(metrics.tick_failures(), 2);
        assert_eq!(metrics.commands_sent_of("Stop"), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("pedestal_udp_packets_sent_total 2"));
        assert!(text.contains("pedestal_udp_running 1"));
        assert!(text.contains("pedestal_udp_healthy 0"));
    }
}
