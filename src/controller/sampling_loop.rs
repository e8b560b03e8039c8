use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::input_decoder::InputDecoder;
use crate::controller::link_lifecycle::LinkState;
use crate::sink::EventSink;
use crate::transport::Transport;

/// Sampling loop settings
#[derive(Clone, Debug)]
pub struct SamplingSettings {
    /// Time between two sample requests. Ticks that fall behind are delayed,
    /// never bunched up.
    pub interval: Duration,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
        }
    }
}

/// Counters for one run of the loop, from `start` to `stop`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SamplingStats {
    /// Samples decoded and handed to the sink
    pub cycles: u64,
    /// Discrete events across all decoded frames
    pub events: u64,
    /// Fetches the transport answered with an error
    pub fetch_failures: u64,
    /// Samples too short to decode
    pub skipped_samples: u64,
    /// Fetch results that arrived after the link left Connected
    pub discarded_results: u64,
    /// Frames the sink refused
    pub delivery_failures: u64,
}

struct RunningLoop {
    cancel: CancellationToken,
    task: JoinHandle<(InputDecoder, SamplingStats)>,
}

/// Periodic sampler. While running it owns the decoder; stopping hands the
/// decoder back so edge state carries over into the next run.
pub struct SamplingLoop {
    settings: SamplingSettings,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    link_state: watch::Receiver<LinkState>,
    decoder: Option<InputDecoder>,
    running: Option<RunningLoop>,
    last_stats: SamplingStats,
}

impl SamplingLoop {
    pub fn new(
        settings: SamplingSettings,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        link_state: watch::Receiver<LinkState>,
    ) -> Self {
        info!("Creating sampling loop with settings: {:?}", settings);
        Self {
            settings,
            transport,
            sink,
            link_state,
            decoder: Some(InputDecoder::new()),
            running: None,
            last_stats: SamplingStats::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    // Stats of the most recently stopped run
    pub fn last_stats(&self) -> &SamplingStats {
        &self.last_stats
    }

    /// Starts polling. A loop that is already running is stopped first, so
    /// there is never more than one polling task.
    pub async fn start(&mut self) {
        if self.running.is_some() {
            info!("Sampling loop already running, replacing it");
            self.stop().await;
        }

        let decoder = self.decoder.take().unwrap_or_default();
        let cancel = CancellationToken::new();
        let context = LoopContext {
            interval: self.settings.interval,
            transport: self.transport.clone(),
            sink: self.sink.clone(),
            link_state: self.link_state.clone(),
            cancel: cancel.clone(),
        };

        info!(
            "Starting sampling loop with {}ms interval",
            self.settings.interval.as_millis()
        );
        let task = tokio::spawn(run_sampling(context, decoder));
        self.running = Some(RunningLoop { cancel, task });
    }

    /// Stops polling and waits for the task to hand the decoder back. Calling
    /// this while stopped does nothing.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            debug!("Sampling loop not running");
            return;
        };

        running.cancel.cancel();
        match running.task.await {
            Ok((decoder, stats)) => {
                info!("Sampling loop stopped: {:?}", stats);
                self.decoder = Some(decoder);
                self.last_stats = stats;
            }
            Err(e) => {
                error!("Sampling task panicked, resetting decoder: {}", e);
                self.decoder = Some(InputDecoder::new());
            }
        }
    }
}

struct LoopContext {
    interval: Duration,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    link_state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
}

impl LoopContext {
    fn is_connected(&self) -> bool {
        *self.link_state.borrow() == LinkState::Connected
    }
}

async fn run_sampling(
    context: LoopContext,
    mut decoder: InputDecoder,
) -> (InputDecoder, SamplingStats) {
    let mut ticker = tokio::time::interval(context.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut stats = SamplingStats::default();
    let mut window_cycles = 0u64;
    let mut window_events = 0u64;
    let mut last_stats_time = Local::now();
    let stats_interval = chrono::Duration::seconds(30);

    loop {
        tokio::select! {
            biased;
            _ = context.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !context.is_connected() {
            debug!("Link not connected, skipping tick");
            continue;
        }

        let fetched = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => {
                debug!("Stopped while fetching, dropping in-flight request");
                break;
            }
            result = context.transport.fetch_sample() => result,
        };

        // Results that arrive after the link left Connected belong to a
        // session that is already over
        if context.cancel.is_cancelled() || !context.is_connected() {
            stats.discarded_results += 1;
            debug!("Discarding late fetch result");
            continue;
        }

        let sample = match fetched {
            Ok(sample) => sample,
            Err(e) => {
                stats.fetch_failures += 1;
                warn!("Channel fetch failed: {}", e);
                continue;
            }
        };

        let frame = match decoder.decode(&sample) {
            Ok(frame) => frame,
            Err(e) => {
                stats.skipped_samples += 1;
                warn!("Skipping cycle: {}", e);
                continue;
            }
        };

        stats.cycles += 1;
        stats.events += frame.events.len() as u64;
        window_cycles += 1;
        window_events += frame.events.len() as u64;

        // Delivery completes before the next sample is looked at
        let delivered = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => {
                warn!("Stopped while delivering, frame dropped");
                break;
            }
            result = context.sink.deliver(frame) => result,
        };
        if let Err(e) = delivered {
            stats.delivery_failures += 1;
            error!("Failed to deliver frame: {}", e);
        }

        let now = Local::now();
        if now - last_stats_time > stats_interval {
            let elapsed_seconds = (now - last_stats_time).num_seconds();
            info!(
                "Sampling stats: {} cycles, {} events in {} seconds",
                window_cycles, window_events, elapsed_seconds
            );
            window_cycles = 0;
            window_events = 0;
            last_stats_time = now;
        }
    }

    (decoder, stats)
}
