//! Connect/disconnect lifecycle of the sample pipeline
//!
//! The pipeline link is a statum typestate machine. Transport callbacks arrive
//! at runtime, so [`LinkLifecycle`] keeps the current typestate in a tagged
//! enum and routes every event through a single [`LinkLifecycle::apply`].
//!
//! ```text
//!            connect            transport ok
//!   Idle ───────────► Connecting ───────────► Connected
//!    ▲  ▲                 │  │                   │  │
//!    │  │       fail      │  │ disconnect        │  │ transport lost
//!    │  │    ┌────────────┘  ▼                   │  │
//!    │  │    ▼        Disconnecting ◄────────────┘  │
//!    │  └─ Failed            │      disconnect      │
//!    │ retry                 │ confirmed            │
//!    └───────────────────────┴──────────────────────┘
//! ```
//!
//! Entering Connected opens exactly one [`PipelineHandle`]; entering Idle or
//! Failed closes it if one is held.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// Transport sub-channel the pipeline is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SubChannel {
    #[default]
    Uart0,
    Uart1,
}

// Published view of the link state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Failed(String),
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "Idle"),
            LinkState::Connecting => write!(f, "Connecting"),
            LinkState::Connected => write!(f, "Connected"),
            LinkState::Disconnecting => write!(f, "Disconnecting"),
            LinkState::Failed(reason) => write!(f, "Failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectRequested,
    TransportConnected,
    TransportFailed(String),
    TransportDisconnected,
    DisconnectRequested,
    DisconnectConfirmed,
    RetryRequested,
}

impl LinkEvent {
    fn name(&self) -> &'static str {
        match self {
            LinkEvent::ConnectRequested => "connect request",
            LinkEvent::TransportConnected => "transport connected",
            LinkEvent::TransportFailed(_) => "transport failure",
            LinkEvent::TransportDisconnected => "transport disconnected",
            LinkEvent::DisconnectRequested => "disconnect request",
            LinkEvent::DisconnectConfirmed => "disconnect confirmation",
            LinkEvent::RetryRequested => "retry request",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Invalid link transition: {event} while {from}")]
    InvalidTransition { from: LinkState, event: &'static str },
}

// Open communication channel; only ever held by the link
#[derive(Debug)]
pub struct PipelineHandle {
    id: u64,
    sub_channel: SubChannel,
    opened_at: DateTime<Local>,
}

impl PipelineHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sub_channel(&self) -> SubChannel {
        self.sub_channel
    }

    pub fn opened_at(&self) -> DateTime<Local> {
        self.opened_at
    }
}

impl fmt::Display for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline #{} on {:?} (opened {})",
            self.id,
            self.sub_channel,
            self.opened_at.format("%H:%M:%S.%3f")
        )
    }
}

// Counts of pipelines opened and closed over the link's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub opened: u64,
    pub closed: u64,
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkPhase {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Failed(String),
}

#[machine]
#[derive(Debug)]
pub struct PipelineLink<S: LinkPhase> {
    // Sub-channel new pipelines are bound to
    sub_channel: SubChannel,

    // Currently open pipeline, only Some while Connected or Disconnecting
    pipeline: Option<PipelineHandle>,

    stats: PipelineStats,
}

// Methods available in all phases
impl<S: LinkPhase> PipelineLink<S> {
    pub fn pipeline(&self) -> Option<&PipelineHandle> {
        self.pipeline.as_ref()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    fn release_pipeline(&mut self) {
        match self.pipeline.take() {
            Some(handle) => {
                self.stats.closed += 1;
                info!("Closing {}", handle);
            }
            None => debug!("No pipeline held, nothing to close"),
        }
    }
}

impl PipelineLink<Idle> {
    pub fn create(sub_channel: SubChannel) -> Self {
        Self::new(sub_channel, None, PipelineStats::default())
    }

    pub fn start(self) -> PipelineLink<Connecting> {
        info!("Link connecting on {:?}", self.sub_channel);
        self.transition()
    }
}

impl PipelineLink<Connecting> {
    // Opens the pipeline; Connecting is only reachable from Idle so none is held
    pub fn establish(mut self) -> PipelineLink<Connected> {
        let handle = PipelineHandle {
            id: self.stats.opened + 1,
            sub_channel: self.sub_channel,
            opened_at: Local::now(),
        };
        self.stats.opened += 1;
        info!("Link connected, opened {}", handle);
        self.pipeline = Some(handle);
        self.transition()
    }

    pub fn fail(mut self, reason: String) -> PipelineLink<Failed> {
        warn!("Link failed while connecting: {}", reason);
        self.release_pipeline();
        self.transition_with(reason)
    }

    pub fn abort(self) -> PipelineLink<Disconnecting> {
        info!("Aborting pending connect");
        self.transition()
    }

    pub fn lose(mut self) -> PipelineLink<Idle> {
        warn!("Transport dropped while connecting");
        self.release_pipeline();
        self.transition()
    }
}

impl PipelineLink<Connected> {
    pub fn begin_disconnect(self) -> PipelineLink<Disconnecting> {
        info!("Link disconnecting");
        self.transition()
    }

    pub fn lose(mut self) -> PipelineLink<Idle> {
        warn!("Transport disconnected");
        self.release_pipeline();
        self.transition()
    }
}

impl PipelineLink<Disconnecting> {
    pub fn finish(mut self) -> PipelineLink<Idle> {
        self.release_pipeline();
        info!("Link disconnected");
        self.transition()
    }
}

impl PipelineLink<Failed> {
    pub fn reason(&self) -> &str {
        self.get_state_data().map(String::as_str).unwrap_or("unknown error")
    }

    pub fn reset(mut self) -> PipelineLink<Idle> {
        info!("Resetting failed link");
        self.release_pipeline();
        self.transition()
    }
}

#[derive(Debug)]
enum LinkMachine {
    Idle(PipelineLink<Idle>),
    Connecting(PipelineLink<Connecting>),
    Connected(PipelineLink<Connected>),
    Disconnecting(PipelineLink<Disconnecting>),
    Failed(PipelineLink<Failed>),
}

impl LinkMachine {
    fn state(&self) -> LinkState {
        match self {
            LinkMachine::Idle(_) => LinkState::Idle,
            LinkMachine::Connecting(_) => LinkState::Connecting,
            LinkMachine::Connected(_) => LinkState::Connected,
            LinkMachine::Disconnecting(_) => LinkState::Disconnecting,
            LinkMachine::Failed(link) => LinkState::Failed(link.reason().to_string()),
        }
    }

    fn pipeline(&self) -> Option<&PipelineHandle> {
        match self {
            LinkMachine::Idle(link) => link.pipeline(),
            LinkMachine::Connecting(link) => link.pipeline(),
            LinkMachine::Connected(link) => link.pipeline(),
            LinkMachine::Disconnecting(link) => link.pipeline(),
            LinkMachine::Failed(link) => link.pipeline(),
        }
    }

    fn stats(&self) -> PipelineStats {
        match self {
            LinkMachine::Idle(link) => link.stats(),
            LinkMachine::Connecting(link) => link.stats(),
            LinkMachine::Connected(link) => link.stats(),
            LinkMachine::Disconnecting(link) => link.stats(),
            LinkMachine::Failed(link) => link.stats(),
        }
    }

    // Ok carries the next machine, Err hands the unchanged machine back
    fn step(self, event: &LinkEvent) -> Result<LinkMachine, LinkMachine> {
        use LinkMachine as M;

        match (self, event) {
            (M::Idle(link), LinkEvent::ConnectRequested) => Ok(M::Connecting(link.start())),
            (M::Idle(link), LinkEvent::DisconnectRequested)
            | (M::Idle(link), LinkEvent::TransportDisconnected) => Ok(M::Idle(link)),

            (M::Connecting(link), LinkEvent::TransportConnected) => {
                Ok(M::Connected(link.establish()))
            }
            (M::Connecting(link), LinkEvent::TransportFailed(reason)) => {
                Ok(M::Failed(link.fail(reason.clone())))
            }
            (M::Connecting(link), LinkEvent::DisconnectRequested) => {
                Ok(M::Disconnecting(link.abort()))
            }
            (M::Connecting(link), LinkEvent::TransportDisconnected) => Ok(M::Idle(link.lose())),

            (M::Connected(link), LinkEvent::DisconnectRequested) => {
                Ok(M::Disconnecting(link.begin_disconnect()))
            }
            (M::Connected(link), LinkEvent::TransportDisconnected) => Ok(M::Idle(link.lose())),

            (M::Disconnecting(link), LinkEvent::DisconnectConfirmed)
            | (M::Disconnecting(link), LinkEvent::TransportDisconnected) => {
                Ok(M::Idle(link.finish()))
            }
            (M::Disconnecting(link), LinkEvent::DisconnectRequested) => Ok(M::Disconnecting(link)),

            (M::Failed(link), LinkEvent::RetryRequested)
            | (M::Failed(link), LinkEvent::DisconnectRequested) => Ok(M::Idle(link.reset())),
            (M::Failed(link), LinkEvent::TransportDisconnected) => Ok(M::Failed(link)),

            (machine, _) => Err(machine),
        }
    }
}

/// Owner of the link state and the pipeline handle.
#[derive(Debug)]
pub struct LinkLifecycle {
    machine: LinkMachine,
    sub_channel: SubChannel,
    state_sender: watch::Sender<LinkState>,
}

impl LinkLifecycle {
    pub fn new(sub_channel: SubChannel) -> Self {
        info!("Creating link lifecycle on {:?}", sub_channel);
        let (state_sender, _) = watch::channel(LinkState::Idle);

        Self {
            machine: LinkMachine::Idle(PipelineLink::create(sub_channel)),
            sub_channel,
            state_sender,
        }
    }

    /// Applies one event. Events that are meaningless in the current state are
    /// rejected and leave the state untouched.
    pub fn apply(&mut self, event: LinkEvent) -> Result<LinkState, LinkError> {
        let placeholder = LinkMachine::Idle(PipelineLink::create(self.sub_channel));
        let current = std::mem::replace(&mut self.machine, placeholder);
        let from = current.state();

        match current.step(&event) {
            Ok(next) => {
                self.machine = next;
                let to = self.machine.state();
                if from != to {
                    debug!("Link transition on {}: {} -> {}", event.name(), from, to);
                    self.publish(to.clone());
                } else {
                    debug!("{} is a no-op while {}", event.name(), from);
                }
                Ok(to)
            }
            Err(unchanged) => {
                self.machine = unchanged;
                warn!("Rejected {} while {}", event.name(), from);
                Err(LinkError::InvalidTransition {
                    from,
                    event: event.name(),
                })
            }
        }
    }

    pub fn request_connect(&mut self) -> Result<LinkState, LinkError> {
        self.apply(LinkEvent::ConnectRequested)
    }

    pub fn on_connected(&mut self) -> Result<LinkState, LinkError> {
        self.apply(LinkEvent::TransportConnected)
    }

    pub fn on_connect_failed(&mut self, reason: impl Into<String>) -> Result<LinkState, LinkError> {
        self.apply(LinkEvent::TransportFailed(reason.into()))
    }

    pub fn on_transport_disconnected(&mut self) -> Result<LinkState, LinkError> {
        self.apply(LinkEvent::TransportDisconnected)
    }

    pub fn request_disconnect(&mut self) -> Result<LinkState, LinkError> {
        self.apply(LinkEvent::DisconnectRequested)
    }

    pub fn confirm_disconnect(&mut self) -> Result<LinkState, LinkError> {
        self.apply(LinkEvent::DisconnectConfirmed)
    }

    pub fn retry(&mut self) -> Result<LinkState, LinkError> {
        self.apply(LinkEvent::RetryRequested)
    }

    pub fn state(&self) -> LinkState {
        self.machine.state()
    }

    pub fn pipeline(&self) -> Option<&PipelineHandle> {
        self.machine.pipeline()
    }

    pub fn stats(&self) -> PipelineStats {
        self.machine.stats()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_sender.subscribe()
    }

    fn publish(&self, state: LinkState) {
        self.state_sender.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> LinkLifecycle {
        let mut lifecycle = LinkLifecycle::new(SubChannel::Uart0);
        lifecycle.request_connect().unwrap();
        lifecycle.on_connected().unwrap();
        lifecycle
    }

    #[test]
    fn disconnect_from_idle_is_a_no_op() {
        let mut lifecycle = LinkLifecycle::new(SubChannel::Uart0);

        assert_eq!(lifecycle.request_disconnect(), Ok(LinkState::Idle));
        assert_eq!(lifecycle.stats(), PipelineStats::default());
        assert!(lifecycle.pipeline().is_none());
    }

    #[test]
    fn connect_opens_exactly_one_pipeline() {
        let lifecycle = connected();

        assert_eq!(lifecycle.state(), LinkState::Connected);
        let pipeline = lifecycle.pipeline().unwrap();
        assert_eq!(pipeline.id(), 1);
        assert_eq!(pipeline.sub_channel(), SubChannel::Uart0);
        assert_eq!(lifecycle.stats(), PipelineStats { opened: 1, closed: 0 });
    }

    #[test]
    fn transport_disconnect_closes_the_pipeline() {
        let mut lifecycle = connected();

        assert_eq!(lifecycle.on_transport_disconnected(), Ok(LinkState::Idle));
        assert!(lifecycle.pipeline().is_none());
        assert_eq!(lifecycle.stats(), PipelineStats { opened: 1, closed: 1 });

        // A second callback has nothing left to close
        assert_eq!(lifecycle.on_transport_disconnected(), Ok(LinkState::Idle));
        assert_eq!(lifecycle.stats().closed, 1);
    }

    #[test]
    fn second_pipeline_is_refused() {
        let mut lifecycle = connected();

        assert!(matches!(
            lifecycle.request_connect(),
            Err(LinkError::InvalidTransition {
                from: LinkState::Connected,
                ..
            })
        ));
        assert!(lifecycle.on_connected().is_err());
        assert_eq!(lifecycle.stats().opened, 1);
    }

    #[test]
    fn explicit_disconnect_goes_through_disconnecting() {
        let mut lifecycle = connected();

        assert_eq!(lifecycle.request_disconnect(), Ok(LinkState::Disconnecting));
        assert!(lifecycle.pipeline().is_some());
        assert_eq!(lifecycle.request_disconnect(), Ok(LinkState::Disconnecting));

        assert_eq!(lifecycle.confirm_disconnect(), Ok(LinkState::Idle));
        assert_eq!(lifecycle.stats(), PipelineStats { opened: 1, closed: 1 });
    }

    #[test]
    fn failure_requires_external_retry() {
        let mut lifecycle = LinkLifecycle::new(SubChannel::Uart1);
        lifecycle.request_connect().unwrap();

        assert_eq!(
            lifecycle.on_connect_failed("no transmitter"),
            Ok(LinkState::Failed("no transmitter".to_string()))
        );
        assert!(lifecycle.request_connect().is_err());
        assert_eq!(lifecycle.stats(), PipelineStats::default());

        assert_eq!(lifecycle.retry(), Ok(LinkState::Idle));
        assert_eq!(lifecycle.request_connect(), Ok(LinkState::Connecting));
        assert_eq!(lifecycle.on_connected(), Ok(LinkState::Connected));
        assert_eq!(lifecycle.pipeline().unwrap().sub_channel(), SubChannel::Uart1);
    }

    #[test]
    fn pipeline_ids_increase_across_sessions() {
        let mut lifecycle = connected();
        lifecycle.on_transport_disconnected().unwrap();
        lifecycle.request_connect().unwrap();
        lifecycle.on_connected().unwrap();

        assert_eq!(lifecycle.pipeline().unwrap().id(), 2);
        assert_eq!(lifecycle.stats(), PipelineStats { opened: 2, closed: 1 });
    }

    #[test]
    fn subscribers_see_every_change() {
        let mut lifecycle = LinkLifecycle::new(SubChannel::Uart0);
        let mut receiver = lifecycle.subscribe();
        assert_eq!(*receiver.borrow_and_update(), LinkState::Idle);

        lifecycle.request_connect().unwrap();
        assert!(receiver.has_changed().unwrap());
        assert_eq!(*receiver.borrow_and_update(), LinkState::Connecting);

        // Rejected events publish nothing
        assert!(lifecycle.retry().is_err());
        assert!(!receiver.has_changed().unwrap());
    }
}
