use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ReplaySettings;
use crate::controller::channel_sample::ChannelSample;
use crate::transport::{ConnectError, FetchError, Transport};

// Scripted step played back by the replay transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStep {
    Sample(Vec<i32>),
    Fail(FetchError),
}

#[derive(Debug, Default)]
struct ReplayState {
    connected: bool,
    script: VecDeque<ReplayStep>,
    // Most recent step, replayed once the script runs out
    last: Option<ReplayStep>,
    connect_error: Option<ConnectError>,
    connect_calls: usize,
    disconnect_calls: usize,
    fetch_calls: usize,
}

/// In-process transport that plays back a scripted list of channel frames.
///
/// Once the script runs out the last sample is repeated when `repeat` is set,
/// otherwise fetches fail with [`FetchError::Unavailable`].
#[derive(Debug)]
pub struct ReplayTransport {
    state: Mutex<ReplayState>,
    repeat: bool,
    connect_delay: Duration,
    fetch_delay: Duration,
}

impl ReplayTransport {
    pub fn new(frames: Vec<Vec<i32>>) -> Self {
        Self::with_script(frames.into_iter().map(ReplayStep::Sample).collect())
    }

    pub fn with_script(script: Vec<ReplayStep>) -> Self {
        Self {
            state: Mutex::new(ReplayState {
                script: script.into(),
                ..Default::default()
            }),
            repeat: false,
            connect_delay: Duration::ZERO,
            fetch_delay: Duration::ZERO,
        }
    }

    pub fn from_settings(settings: &ReplaySettings) -> Self {
        info!(
            "Creating replay transport with {} frames (repeat: {})",
            settings.frames.len(),
            settings.repeat
        );
        Self::new(settings.frames.clone())
            .repeat(settings.repeat)
            .connect_delay(Duration::from_millis(settings.connect_delay_ms))
            .fetch_delay(Duration::from_millis(settings.fetch_delay_ms))
    }

    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub async fn fail_connect_with(&self, error: Option<ConnectError>) {
        self.state.lock().await.connect_error = error;
    }

    pub async fn push(&self, step: ReplayStep) {
        self.state.lock().await.script.push_back(step);
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    pub async fn connect_calls(&self) -> usize {
        self.state.lock().await.connect_calls
    }

    pub async fn disconnect_calls(&self) -> usize {
        self.state.lock().await.disconnect_calls
    }

    pub async fn fetch_calls(&self) -> usize {
        self.state.lock().await.fetch_calls
    }

    pub async fn remaining(&self) -> usize {
        self.state.lock().await.script.len()
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn connect(&self) -> Result<(), ConnectError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let mut state = self.state.lock().await;
        state.connect_calls += 1;
        if let Some(error) = state.connect_error.clone() {
            warn!("Replay connect failing: {}", error);
            return Err(error);
        }

        state.connected = true;
        info!("Replay transport connected ({} steps queued)", state.script.len());
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.disconnect_calls += 1;
        if state.connected {
            info!("Replay transport disconnected");
        }
        state.connected = false;
    }

    async fn fetch_sample(&self) -> Result<ChannelSample, FetchError> {
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        let mut state = self.state.lock().await;
        state.fetch_calls += 1;
        if !state.connected {
            return Err(FetchError::NotConnected);
        }

        let step = match state.script.pop_front() {
            Some(step) => step,
            None if self.repeat => match &state.last {
                Some(step) => step.clone(),
                None => return Err(FetchError::Unavailable("empty script".to_string())),
            },
            None => return Err(FetchError::Unavailable("script exhausted".to_string())),
        };

        debug!("Replaying {:?}", step);
        state.last = Some(step.clone());
        match step {
            ReplayStep::Sample(channels) => Ok(ChannelSample::new(channels)),
            ReplayStep::Fail(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_requires_connection() {
        let transport = ReplayTransport::new(vec![vec![1500; 12]]);

        assert_eq!(
            transport.fetch_sample().await,
            Err(FetchError::NotConnected)
        );
        transport.connect().await.unwrap();
        assert_eq!(
            transport.fetch_sample().await,
            Ok(ChannelSample::new(vec![1500; 12]))
        );
        assert_eq!(transport.fetch_calls().await, 2);
    }

    #[tokio::test]
    async fn script_plays_in_order_then_runs_out() {
        let transport = ReplayTransport::with_script(vec![
            ReplayStep::Sample(vec![1; 12]),
            ReplayStep::Fail(FetchError::Failed("crc".to_string())),
            ReplayStep::Sample(vec![2; 12]),
        ]);
        transport.connect().await.unwrap();

        assert_eq!(transport.fetch_sample().await.unwrap().channels()[0], 1);
        assert_eq!(
            transport.fetch_sample().await,
            Err(FetchError::Failed("crc".to_string()))
        );
        assert_eq!(transport.fetch_sample().await.unwrap().channels()[0], 2);
        assert!(matches!(
            transport.fetch_sample().await,
            Err(FetchError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn repeat_replays_last_step() {
        let transport = ReplayTransport::new(vec![vec![7; 12]]).repeat(true);
        transport.connect().await.unwrap();

        for _ in 0..3 {
            assert_eq!(transport.fetch_sample().await.unwrap().channels()[0], 7);
        }
        assert_eq!(transport.remaining().await, 0);
    }

    #[tokio::test]
    async fn pushed_steps_extend_the_script() {
        let transport = ReplayTransport::new(vec![vec![1; 12]]);
        transport.connect().await.unwrap();
        transport.push(ReplayStep::Sample(vec![2; 12])).await;
        assert_eq!(transport.remaining().await, 2);

        assert_eq!(transport.fetch_sample().await.unwrap().channels()[0], 1);
        assert_eq!(transport.fetch_sample().await.unwrap().channels()[0], 2);
        assert!(transport.fetch_sample().await.is_err());

        // Pushing after the script ran out resumes playback
        transport.push(ReplayStep::Sample(vec![3; 12])).await;
        assert_eq!(transport.fetch_sample().await.unwrap().channels()[0], 3);
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let transport = ReplayTransport::new(vec![]);
        transport
            .fail_connect_with(Some(ConnectError::Unreachable("no rc".to_string())))
            .await;

        assert_eq!(
            transport.connect().await,
            Err(ConnectError::Unreachable("no rc".to_string()))
        );
        assert!(!transport.is_connected().await);

        transport.disconnect().await;
        assert_eq!(transport.disconnect_calls().await, 1);

        transport
            .fail_connect_with(Some(ConnectError::Rejected("bound to uart1".to_string())))
            .await;
        assert!(matches!(
            transport.connect().await,
            Err(ConnectError::Rejected(_))
        ));
        assert_eq!(transport.connect_calls().await, 2);
    }
}
