use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ControllerSettings;
use crate::controller::link_lifecycle::{LinkLifecycle, LinkState, PipelineStats};
use crate::controller::sampling_loop::{SamplingLoop, SamplingSettings};
use crate::sink::EventSink;
use crate::transport::{ConnectError, Transport, TransportEvent};

/// Errors reported by the controller handle
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),
}

// Requests from the host
#[derive(Debug)]
enum ControllerCommand {
    Connect,
    Disconnect,
    Retry,
    Stats(oneshot::Sender<PipelineStats>),
    Shutdown(oneshot::Sender<()>),
}

// Results of work the manager spawned, posted back to its own queue
#[derive(Debug)]
enum InternalEvent {
    ConnectFinished {
        attempt: u64,
        result: Result<(), ConnectError>,
    },
    DisconnectFinished,
}

/// Controller-manager actor. Owns the link lifecycle and the sampling loop;
/// every state change happens on its task.
///
/// At most one connect attempt is in flight, and only while the link is
/// Connecting. Every way out of Connecting other than the attempt's own
/// result cancels the attempt before the transport is touched again, so a
/// late connect can never land on top of a disconnect or a newer attempt.
struct ControllerManager {
    lifecycle: LinkLifecycle,
    sampling: SamplingLoop,
    transport: Arc<dyn Transport>,
    internal_tx: mpsc::Sender<InternalEvent>,
    connect_attempt: u64,
    connect_task: Option<JoinHandle<()>>,
}

impl ControllerManager {
    fn new(
        settings: &ControllerSettings,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        internal_tx: mpsc::Sender<InternalEvent>,
    ) -> Self {
        let lifecycle = LinkLifecycle::new(settings.sub_channel);
        let sampling = SamplingLoop::new(
            SamplingSettings {
                interval: settings.polling_interval(),
            },
            transport.clone(),
            sink,
            lifecycle.subscribe(),
        );

        Self {
            lifecycle,
            sampling,
            transport,
            internal_tx,
            connect_attempt: 0,
            connect_task: None,
        }
    }

    async fn handle_command(&mut self, command: ControllerCommand) -> Option<oneshot::Sender<()>> {
        match command {
            ControllerCommand::Connect => self.connect(),
            ControllerCommand::Disconnect => {
                self.sampling.stop().await;
                self.cancel_pending_connect().await;
                self.begin_disconnect();
            }
            ControllerCommand::Retry => {
                if let Err(e) = self.lifecycle.retry() {
                    warn!("Retry ignored: {}", e);
                }
            }
            ControllerCommand::Stats(reply) => {
                let _ = reply.send(self.lifecycle.stats());
            }
            ControllerCommand::Shutdown(reply) => return Some(reply),
        }
        None
    }

    fn connect(&mut self) {
        if let Err(e) = self.lifecycle.request_connect() {
            warn!("Connect ignored: {}", e);
            return;
        }

        self.connect_attempt += 1;
        let attempt = self.connect_attempt;
        let transport = self.transport.clone();
        let internal_tx = self.internal_tx.clone();
        info!("Connecting to transmitter (attempt {})", attempt);

        self.connect_task = Some(tokio::spawn(async move {
            let result = transport.connect().await;
            if internal_tx
                .send(InternalEvent::ConnectFinished { attempt, result })
                .await
                .is_err()
            {
                debug!("Controller gone before connect attempt {} finished", attempt);
            }
        }));
    }

    // Aborts the in-flight connect attempt and waits until it can no longer
    // touch the transport
    async fn cancel_pending_connect(&mut self) {
        let Some(task) = self.connect_task.take() else {
            return;
        };

        if !task.is_finished() {
            info!("Cancelling connect attempt {}", self.connect_attempt);
        }
        task.abort();
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                error!("Connect task panicked: {}", e);
            }
        }
    }

    fn begin_disconnect(&mut self) {
        match self.lifecycle.request_disconnect() {
            Ok(LinkState::Disconnecting) => {
                let transport = self.transport.clone();
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    transport.disconnect().await;
                    let _ = internal_tx.send(InternalEvent::DisconnectFinished).await;
                });
            }
            Ok(state) => debug!("Disconnect requested while {}, nothing to release", state),
            Err(e) => warn!("Disconnect ignored: {}", e),
        }
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::ConnectFinished { attempt, result } => {
                let state = self.lifecycle.state();
                if attempt != self.connect_attempt || state != LinkState::Connecting {
                    warn!(
                        "Discarding stale connect result for attempt {} while {}",
                        attempt, state
                    );
                    // Connecting and Connected own a live session and
                    // Disconnecting is already releasing one
                    if result.is_ok()
                        && matches!(state, LinkState::Idle | LinkState::Failed(_))
                    {
                        self.release_stale_connection().await;
                    }
                    return;
                }

                self.connect_task = None;
                match result {
                    Ok(()) => self.handle_transport(TransportEvent::Connected).await,
                    Err(e) => self.handle_transport(TransportEvent::ConnectFailed(e)).await,
                }
            }
            InternalEvent::DisconnectFinished => {
                if let Err(e) = self.lifecycle.confirm_disconnect() {
                    debug!("Disconnect confirmation not needed: {}", e);
                }
            }
        }
    }

    // Applies a transport callback on the manager's task
    async fn handle_transport(&mut self, event: TransportEvent) {
        debug!("Transport event: {:?}", event);
        match event {
            TransportEvent::Connected => match self.lifecycle.on_connected() {
                Ok(_) => self.sampling.start().await,
                Err(e) => warn!("Connected callback ignored: {}", e),
            },
            TransportEvent::ConnectFailed(e) => {
                error!("Transmitter connection failed: {}", e);
                self.cancel_pending_connect().await;
                if let Err(e) = self.lifecycle.on_connect_failed(e.to_string()) {
                    warn!("Connect failure callback ignored: {}", e);
                }
            }
            TransportEvent::Disconnected => {
                self.sampling.stop().await;
                self.cancel_pending_connect().await;
                if let Err(e) = self.lifecycle.on_transport_disconnected() {
                    warn!("Disconnect callback ignored: {}", e);
                }
            }
        }
    }

    // Runs inline so no later connect can start before the release is done
    async fn release_stale_connection(&self) {
        info!("Releasing transport session opened by a stale connect attempt");
        self.transport.disconnect().await;
    }

    async fn shutdown(&mut self) {
        info!("Shutting down controller");
        self.sampling.stop().await;
        self.cancel_pending_connect().await;

        // Safe while not connected, and covers a connect that finished
        // right before it was cancelled
        self.transport.disconnect().await;
        if self.lifecycle.state() != LinkState::Idle {
            let _ = self.lifecycle.request_disconnect();
            let _ = self.lifecycle.confirm_disconnect();
        }
        info!(
            "Controller shut down in state {} ({:?})",
            self.lifecycle.state(),
            self.lifecycle.stats()
        );
    }
}

async fn run_manager(
    mut manager: ControllerManager,
    mut command_rx: mpsc::Receiver<ControllerCommand>,
    mut callback_rx: mpsc::Receiver<TransportEvent>,
    mut internal_rx: mpsc::Receiver<InternalEvent>,
) {
    info!("Controller task started");
    let shutdown_reply = loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(command) => {
                    if let Some(reply) = manager.handle_command(command).await {
                        break Some(reply);
                    }
                }
                None => {
                    info!("All controller handles dropped");
                    break None;
                }
            },
            Some(event) = callback_rx.recv() => manager.handle_transport(event).await,
            Some(event) = internal_rx.recv() => manager.handle_internal(event).await,
        }
    };

    manager.shutdown().await;
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

/// Public handle for the controller system
///
/// Spawning starts the manager task; all methods only queue requests to it.
/// Link state changes are observed through [`ControllerHandle::subscribe`],
/// and a transport that reports its own lifecycle sends
/// [`TransportEvent`]s through [`ControllerHandle::transport_callbacks`].
///
/// Dropping every handle shuts the manager down the same way
/// [`ControllerHandle::shutdown`] does, without waiting for it.
pub struct ControllerHandle {
    command_tx: mpsc::Sender<ControllerCommand>,
    callback_tx: mpsc::Sender<TransportEvent>,
    state_receiver: watch::Receiver<LinkState>,
    task: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    /// Spawns the controller task. Must be called from within a tokio runtime.
    pub fn spawn(
        settings: Option<ControllerSettings>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ControllerError> {
        let settings = settings.unwrap_or_default();
        info!("Initializing controller with settings: {:?}", settings);

        if settings.event_buffer == 0 {
            return Err(ControllerError::InitializationError(
                "event buffer must not be empty".to_string(),
            ));
        }

        let (command_tx, command_rx) = mpsc::channel(settings.event_buffer);
        let (callback_tx, callback_rx) = mpsc::channel(settings.event_buffer);
        let (internal_tx, internal_rx) = mpsc::channel(settings.event_buffer);
        debug!(
            "Created controller channels with capacity {}",
            settings.event_buffer
        );

        let manager = ControllerManager::new(&settings, transport, sink, internal_tx);
        let state_receiver = manager.lifecycle.subscribe();

        let task = tokio::spawn(run_manager(manager, command_rx, callback_rx, internal_rx));
        info!("Controller system initialized successfully");

        Ok(Self {
            command_tx,
            callback_tx,
            state_receiver,
            task: Some(task),
        })
    }

    async fn send(&self, command: ControllerCommand) -> Result<(), ControllerError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|e| ControllerError::ChannelError(format!("Controller task gone: {}", e)))
    }

    pub async fn connect(&self) -> Result<(), ControllerError> {
        self.send(ControllerCommand::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        self.send(ControllerCommand::Disconnect).await
    }

    pub async fn retry(&self) -> Result<(), ControllerError> {
        self.send(ControllerCommand::Retry).await
    }

    pub async fn pipeline_stats(&self) -> Result<PipelineStats, ControllerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ControllerCommand::Stats(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|e| ControllerError::ChannelError(format!("No stats reply: {}", e)))
    }

    // Sender the transport uses to report lifecycle callbacks
    pub fn transport_callbacks(&self) -> mpsc::Sender<TransportEvent> {
        self.callback_tx.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_receiver.clone()
    }

    pub fn state(&self) -> LinkState {
        self.state_receiver.borrow().clone()
    }

    /// Stops sampling, releases the transport and waits for the task to end.
    pub async fn shutdown(mut self) -> Result<(), ControllerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ControllerCommand::Shutdown(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|e| ControllerError::ChannelError(format!("No shutdown reply: {}", e)))?;

        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                ControllerError::ChannelError(format!("Controller task panicked: {}", e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::edge_detector::Side;
    use crate::controller::input_decoder::{DecodedFrame, DiscreteEvent};
    use crate::transport::ReplayTransport;
    use std::time::Duration;

    async fn wait_for(handle: &ControllerHandle, expected: LinkState) {
        let mut receiver = handle.subscribe();
        tokio::time::timeout(
            Duration::from_secs(10),
            receiver.wait_for(|state| *state == expected),
        )
        .await
        .expect("timed out waiting for link state")
        .expect("controller dropped");
    }

    fn spawn(transport: Arc<ReplayTransport>) -> (ControllerHandle, mpsc::Receiver<DecodedFrame>) {
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let handle = ControllerHandle::spawn(None, transport, Arc::new(frame_tx)).unwrap();
        (handle, frame_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_samples_and_disconnects() {
        let transport = Arc::new(ReplayTransport::new(vec![vec![
            1500, 1500, 1500, 1500, 0, 0, 0, 0, 1950, 0, 0, 0,
        ]]));
        let (handle, mut frames) = spawn(transport.clone());

        handle.connect().await.unwrap();
        wait_for(&handle, LinkState::Connected).await;

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.events, vec![DiscreteEvent::ButtonPressed(Side::Left)]);

        handle.disconnect().await.unwrap();
        wait_for(&handle, LinkState::Idle).await;
        assert!(!transport.is_connected().await);
        assert_eq!(
            handle.pipeline_stats().await.unwrap(),
            PipelineStats {
                opened: 1,
                closed: 1
            }
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_waits_for_retry() {
        let transport = Arc::new(ReplayTransport::new(vec![]));
        transport
            .fail_connect_with(Some(ConnectError::Unreachable("no rc".to_string())))
            .await;
        let (handle, _frames) = spawn(transport.clone());

        handle.connect().await.unwrap();
        wait_for(
            &handle,
            LinkState::Failed(ConnectError::Unreachable("no rc".to_string()).to_string()),
        )
        .await;

        // No automatic retry
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.connect_calls().await, 1);

        transport.fail_connect_with(None).await;
        handle.retry().await.unwrap();
        wait_for(&handle, LinkState::Idle).await;
        handle.connect().await.unwrap();
        wait_for(&handle, LinkState::Connected).await;

        handle.shutdown().await.unwrap();
        assert!(!transport.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_callback_stops_sampling() {
        let transport = Arc::new(
            ReplayTransport::new(vec![vec![1500; 12]]).repeat(true),
        );
        let (handle, mut frames) = spawn(transport.clone());

        handle.connect().await.unwrap();
        wait_for(&handle, LinkState::Connected).await;
        assert!(frames.recv().await.is_some());

        handle
            .transport_callbacks()
            .send(TransportEvent::Disconnected)
            .await
            .unwrap();
        wait_for(&handle, LinkState::Idle).await;
        assert_eq!(handle.pipeline_stats().await.unwrap().closed, 1);

        // Drain anything delivered before the callback landed
        while frames.try_recv().is_ok() {}
        let fetches = transport.fetch_calls().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.fetch_calls().await, fetches);
        assert!(frames.try_recv().is_err());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_idle_is_harmless() {
        let transport = Arc::new(ReplayTransport::new(vec![]));
        let (handle, _frames) = spawn(transport.clone());

        handle.disconnect().await.unwrap();
        assert_eq!(handle.pipeline_stats().await.unwrap(), PipelineStats::default());
        assert_eq!(handle.state(), LinkState::Idle);
        assert_eq!(transport.disconnect_calls().await, 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_connecting_releases_transport() {
        let transport = Arc::new(
            ReplayTransport::new(vec![vec![1500; 12]]).connect_delay(Duration::from_secs(1)),
        );
        let (handle, _frames) = spawn(transport.clone());

        handle.connect().await.unwrap();
        wait_for(&handle, LinkState::Connecting).await;
        handle.shutdown().await.unwrap();

        // Long enough for the abandoned attempt to have finished
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!transport.is_connected().await);
        assert_eq!(transport.connect_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_connected_releases_transport() {
        let transport = Arc::new(ReplayTransport::new(vec![vec![1500; 12]]).repeat(true));
        let (handle, _frames) = spawn(transport.clone());

        handle.connect().await.unwrap();
        wait_for(&handle, LinkState::Connected).await;
        let states = handle.subscribe();
        handle.shutdown().await.unwrap();

        assert!(!transport.is_connected().await);
        assert_eq!(transport.disconnect_calls().await, 1);
        assert_eq!(*states.borrow(), LinkState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_connecting_cancels_the_attempt() {
        let transport = Arc::new(
            ReplayTransport::new(vec![vec![1500; 12]])
                .repeat(true)
                .connect_delay(Duration::from_secs(1)),
        );
        let (handle, _frames) = spawn(transport.clone());

        handle.connect().await.unwrap();
        wait_for(&handle, LinkState::Connecting).await;
        handle.disconnect().await.unwrap();
        wait_for(&handle, LinkState::Idle).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!transport.is_connected().await);
        assert_eq!(transport.connect_calls().await, 0);
        // Released through Disconnecting
        assert_eq!(transport.disconnect_calls().await, 1);
        assert_eq!(handle.pipeline_stats().await.unwrap(), PipelineStats::default());

        // A fresh attempt is not disturbed by the cancelled one
        handle.connect().await.unwrap();
        wait_for(&handle, LinkState::Connected).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(transport.is_connected().await);
        assert_eq!(handle.state(), LinkState::Connected);
        assert_eq!(transport.disconnect_calls().await, 1);

        handle.shutdown().await.unwrap();
    }

    fn manager(
        transport: Arc<ReplayTransport>,
    ) -> (
        ControllerManager,
        mpsc::Receiver<InternalEvent>,
        mpsc::Receiver<DecodedFrame>,
    ) {
        let (internal_tx, internal_rx) = mpsc::channel(8);
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let manager = ControllerManager::new(
            &ControllerSettings::default(),
            transport,
            Arc::new(frame_tx),
            internal_tx,
        );
        (manager, internal_rx, frame_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn stale_success_while_idle_is_released() {
        let transport = Arc::new(ReplayTransport::new(vec![]));
        transport.connect().await.unwrap();
        let (mut manager, _internal, _frames) = manager(transport.clone());
        manager.connect_attempt = 2;

        manager
            .handle_internal(InternalEvent::ConnectFinished {
                attempt: 1,
                result: Ok(()),
            })
            .await;

        assert!(!transport.is_connected().await);
        assert_eq!(transport.disconnect_calls().await, 1);
        assert_eq!(manager.lifecycle.state(), LinkState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_success_leaves_newer_attempt_alone() {
        let transport = Arc::new(ReplayTransport::new(vec![vec![1500; 12]]).repeat(true));
        let (mut manager, _internal, _frames) = manager(transport.clone());
        manager.lifecycle.request_connect().unwrap();
        manager.connect_attempt = 2;
        transport.connect().await.unwrap();

        manager
            .handle_internal(InternalEvent::ConnectFinished {
                attempt: 1,
                result: Ok(()),
            })
            .await;
        assert!(transport.is_connected().await);
        assert_eq!(transport.disconnect_calls().await, 0);
        assert_eq!(manager.lifecycle.state(), LinkState::Connecting);

        manager
            .handle_internal(InternalEvent::ConnectFinished {
                attempt: 2,
                result: Ok(()),
            })
            .await;
        assert_eq!(manager.lifecycle.state(), LinkState::Connected);
        assert!(manager.sampling.is_running());

        manager.shutdown().await;
        assert!(!transport.is_connected().await);
        assert_eq!(manager.lifecycle.state(), LinkState::Idle);
    }
}
