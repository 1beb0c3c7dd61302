//! Heartbeat liveness supervision for a single connection.
//!
//! The transport does not always surface abrupt peer death promptly: a
//! killed client leaves a half-open connection, and a topic would keep the
//! dead member indefinitely while still delivering to live ones. The
//! supervisor probes the peer on a fixed interval and tears the connection
//! down when a probe goes unanswered within the threshold.

use shortwave_protocol::ServerMessage;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, warn};

/// Default probe interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default response deadline after a probe.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(5);

/// Supervision errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeartbeatError {
    /// The response deadline must elapse before the next probe is due.
    #[error("heartbeat threshold must be less than the probe interval")]
    ThresholdNotBelowInterval,
}

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SupervisorState {
    /// Created but not yet started.
    Idle = 0,
    /// Waiting for the next probe tick.
    Armed = 1,
    /// Probe sent; the response deadline is running.
    AwaitingResponse = 2,
    /// Supervision has ended. Terminal.
    Stopped = 3,
}

impl From<SupervisorState> for u8 {
    fn from(state: SupervisorState) -> u8 {
        state as u8
    }
}

impl TryFrom<u8> for SupervisorState {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SupervisorState::Idle),
            1 => Ok(SupervisorState::Armed),
            2 => Ok(SupervisorState::AwaitingResponse),
            3 => Ok(SupervisorState::Stopped),
            _ => Err("Invalid supervisor state"),
        }
    }
}

/// Probe timing for a supervisor.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    interval: Duration,
    threshold: Duration,
}

impl HeartbeatConfig {
    /// Create a config, rejecting a threshold that would still be running
    /// when the next probe fires.
    ///
    /// # Errors
    ///
    /// Returns an error if `threshold >= interval`.
    pub fn new(interval: Duration, threshold: Duration) -> Result<Self, HeartbeatError> {
        if threshold >= interval {
            return Err(HeartbeatError::ThresholdNotBelowInterval);
        }
        Ok(Self {
            interval,
            threshold,
        })
    }

    /// Get the probe interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Get the response deadline.
    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Invoked once when supervision ends, whatever the cause.
pub type StopCallback = Box<dyn FnOnce() + Send + 'static>;

/// State shared between the supervisor handle and its driver task.
struct Shared {
    state: AtomicU8,
    /// Take-once slot; whoever transitions to Stopped runs the callback.
    on_stop: Mutex<Option<StopCallback>>,
}

impl Shared {
    fn set_state(&self, state: SupervisorState) {
        self.state.store(state.into(), Ordering::SeqCst);
    }

    fn state(&self) -> SupervisorState {
        SupervisorState::try_from(self.state.load(Ordering::SeqCst))
            .unwrap_or(SupervisorState::Stopped)
    }

    /// Transition to Stopped and run the callback if nobody has yet.
    fn finish(&self) {
        self.set_state(SupervisorState::Stopped);
        let callback = self.on_stop.lock().ok().and_then(|mut slot| slot.take());
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Probes one connection and enforces the response deadline.
///
/// The race between "response arrived" and "deadline fired" is owned by a
/// single driver task, so exactly one terminal action results; the stop
/// callback slot is take-once, so the callback runs at most once even when
/// [`HeartbeatSupervisor::stop`] races the deadline.
pub struct HeartbeatSupervisor {
    config: HeartbeatConfig,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    shared: Arc<Shared>,
    response_tx: mpsc::UnboundedSender<()>,
    response_rx: Option<mpsc::UnboundedReceiver<()>>,
    stop_tx: mpsc::UnboundedSender<()>,
    stop_rx: Option<mpsc::UnboundedReceiver<()>>,
}

impl HeartbeatSupervisor {
    /// Create an idle supervisor for a connection's outbound queue.
    #[must_use]
    pub fn new(
        config: HeartbeatConfig,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        on_stop: StopCallback,
    ) -> Self {
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();

        Self {
            config,
            outbound,
            shared: Arc::new(Shared {
                state: AtomicU8::new(SupervisorState::Idle.into()),
                on_stop: Mutex::new(Some(on_stop)),
            }),
            response_tx,
            response_rx: Some(response_rx),
            stop_tx,
            stop_rx: Some(stop_rx),
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.shared.state()
    }

    /// Begin probing. Does nothing unless the supervisor is idle.
    pub fn start(&mut self) {
        if self.shared.state() != SupervisorState::Idle {
            return;
        }
        let (Some(response_rx), Some(stop_rx)) = (self.response_rx.take(), self.stop_rx.take())
        else {
            return;
        };

        self.shared.set_state(SupervisorState::Armed);
        let config = self.config;
        let outbound = self.outbound.clone();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(drive(config, outbound, shared, response_rx, stop_rx));
    }

    /// Record a heartbeat response from the peer.
    pub fn pulse(&self) {
        let _ = self.response_tx.send(());
    }

    /// End supervision. Idempotent; the stop callback runs at most once.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
        self.shared.finish();
    }
}

impl Drop for HeartbeatSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Driver loop owning the probe and deadline timers.
async fn drive(
    config: HeartbeatConfig,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    shared: Arc<Shared>,
    mut response_rx: mpsc::UnboundedReceiver<()>,
    mut stop_rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        // Armed: wait out the interval to the next probe
        tokio::select! {
            biased;

            _ = stop_rx.recv() => return,
            () = time::sleep(config.interval()) => {}
        }

        // Responses that arrived while armed answer no outstanding probe
        while response_rx.try_recv().is_ok() {}

        if outbound.send(ServerMessage::Heartbeat).is_err() {
            debug!("Outbound queue closed, ending supervision");
            shared.finish();
            return;
        }
        shared.set_state(SupervisorState::AwaitingResponse);

        tokio::select! {
            biased;

            _ = stop_rx.recv() => return,
            response = response_rx.recv() => match response {
                Some(()) => shared.set_state(SupervisorState::Armed),
                None => return,
            },
            () = time::sleep(config.threshold()) => {
                warn!("Heartbeat response deadline exceeded, ending supervision");
                shared.finish();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fixture(
        interval: Duration,
        threshold: Duration,
    ) -> (
        HeartbeatSupervisor,
        mpsc::UnboundedReceiver<ServerMessage>,
        Arc<AtomicUsize>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let config = HeartbeatConfig::new(interval, threshold).unwrap();
        let supervisor = HeartbeatSupervisor::new(
            config,
            out_tx,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (supervisor, out_rx, stops)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn threshold_must_be_below_interval() {
        assert_eq!(
            HeartbeatConfig::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap_err(),
            HeartbeatError::ThresholdNotBelowInterval
        );
        assert_eq!(
            HeartbeatConfig::new(Duration::from_secs(5), Duration::from_secs(30)).unwrap_err(),
            HeartbeatError::ThresholdNotBelowInterval
        );
        assert!(HeartbeatConfig::new(Duration::from_secs(30), Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn state_conversion() {
        for state in [
            SupervisorState::Idle,
            SupervisorState::Armed,
            SupervisorState::AwaitingResponse,
            SupervisorState::Stopped,
        ] {
            assert_eq!(SupervisorState::try_from(u8::from(state)), Ok(state));
        }
        assert!(SupervisorState::try_from(4).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn responsive_connection_never_stops() {
        let (mut supervisor, mut out_rx, stops) =
            fixture(Duration::from_secs(30), Duration::from_secs(5));
        supervisor.start();
        assert_eq!(supervisor.state(), SupervisorState::Armed);

        for _ in 0..5 {
            time::advance(Duration::from_secs(30)).await;
            assert_eq!(out_rx.recv().await.unwrap(), ServerMessage::Heartbeat);
            supervisor.pulse();
            settle().await;
            assert_eq!(supervisor.state(), SupervisorState::Armed);
        }

        assert_eq!(stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missed_response_stops_exactly_once_at_the_deadline() {
        let (mut supervisor, mut out_rx, stops) =
            fixture(Duration::from_secs(30), Duration::from_secs(5));
        supervisor.start();

        time::advance(Duration::from_secs(30)).await;
        assert_eq!(out_rx.recv().await.unwrap(), ServerMessage::Heartbeat);
        settle().await;
        assert_eq!(supervisor.state(), SupervisorState::AwaitingResponse);

        // One instant before the deadline nothing has happened yet
        time::advance(Duration::from_millis(4_999)).await;
        settle().await;
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        // The deadline itself fires the callback, exactly once
        time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        // No auto-restart
        time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn a_response_while_armed_answers_no_probe() {
        let (mut supervisor, mut out_rx, stops) =
            fixture(Duration::from_secs(30), Duration::from_secs(5));
        supervisor.start();

        // Sent before any probe is outstanding; must not count later
        supervisor.pulse();
        settle().await;

        time::advance(Duration::from_secs(30)).await;
        assert_eq!(out_rx.recv().await.unwrap(), ServerMessage::Heartbeat);
        time::advance(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (mut supervisor, mut out_rx, stops) =
            fixture(Duration::from_secs(30), Duration::from_secs(5));
        supervisor.start();

        supervisor.stop();
        supervisor.stop();
        settle().await;

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        // The driver is gone; no further probes
        time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_still_runs_the_callback_once() {
        let (mut supervisor, mut out_rx, stops) =
            fixture(Duration::from_secs(30), Duration::from_secs(5));

        supervisor.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        // Starting a stopped supervisor does nothing
        supervisor.start();
        time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(out_rx.try_recv().is_err());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_outbound_queue_ends_supervision() {
        let (mut supervisor, out_rx, stops) =
            fixture(Duration::from_secs(30), Duration::from_secs(5));
        supervisor.start();
        drop(out_rx);

        time::advance(Duration::from_secs(30)).await;
        settle().await;

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }
}
