//! Session coordinator
//!
//! One session per client connection:
//!
//! ```text
//! AWAIT_CONFIG -> CONNECTING | TUTORIAL -> STREAMING -> CLOSED
//! ```
//!
//! The first text frame is the [`SessionDocument`]. Setup then opens the
//! clusters (or starts the tutorial script), and streaming runs three tasks
//! under one cancellation token: the dispatcher, which owns playback and the
//! rule engine; the heartbeat reader; and, when the client supplied a token,
//! the heartbeat watchdog. Whatever ends the session, clusters are closed
//! before the client connection.

pub mod document;
pub mod heartbeat;
pub mod transport;
pub mod tutorial;

pub use document::{ConsumerEntry, SessionDocument, SessionPlan, Source};
pub use transport::{
    deliver, send_events, send_notice, shared_sink, ChannelClient, ChannelSink, ChannelStream,
    ClientStream, EventSink, SharedSink,
};

use std::future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointClient, FsmCheckpoint};
use crate::cluster::{join_messages, BrokerConnector, ClusterPool};
use crate::config::{PlaybackConfig, ServerConfig};
use crate::error::{FlowError, Result};
use crate::model::{Event, Message};
use crate::playback::Playback;
use crate::rules::RuleEngine;

/// Everything a session needs from the server
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ServerConfig>,
    pub connector: Arc<dyn BrokerConnector>,
    pub checkpoint: Option<CheckpointClient>,
}

impl SessionContext {
    pub fn new(config: Arc<ServerConfig>, connector: Arc<dyn BrokerConnector>) -> Result<Self> {
        let checkpoint = config
            .checkpoint
            .as_ref()
            .map(CheckpointClient::new)
            .transpose()?;
        Ok(Self {
            config,
            connector,
            checkpoint,
        })
    }
}

/// Run one session to completion.
///
/// Returns the error that ended the session, if any. Errors have already
/// been reported to the client as `"log"` events where possible.
pub async fn run_session(
    ctx: &SessionContext,
    sink: Box<dyn EventSink>,
    stream: Box<dyn ClientStream>,
    cancel: CancellationToken,
) -> Result<()> {
    let sink = shared_sink(sink);
    let result = drive(ctx, &sink, stream, &cancel).await;
    cancel.cancel();

    match tokio::time::timeout(transport::NOTICE_TIMEOUT, async {
        sink.lock().await.close().await
    })
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "failed to close client connection"),
        Err(_) => warn!("timed out closing client connection"),
    }
    match &result {
        Ok(()) => info!("session closed"),
        Err(e) => info!(error = %e, "session closed with error"),
    }
    result
}

async fn report(sink: &SharedSink, err: &FlowError) {
    let event = Event::error(format!("{}: {}", err.classifier(), err));
    send_notice(sink, &[event]).await;
}

async fn await_document(
    stream: &mut dyn ClientStream,
    cancel: &CancellationToken,
) -> Result<Option<SessionDocument>> {
    let frame = tokio::select! {
        _ = cancel.cancelled() => return Ok(None),
        frame = stream.next_text() => frame?,
    };
    match frame {
        Some(text) => SessionDocument::from_json(&text).map(Some),
        None => Ok(None),
    }
}

async fn fetch_checkpoint(ctx: &SessionContext, fsm_id: Option<&str>) -> Option<FsmCheckpoint> {
    let (client, fsm_id) = (ctx.checkpoint.as_ref()?, fsm_id?);
    match client.fsm(fsm_id).await {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            warn!(fsm_id, url = client.base_url(), error = %e, "failed to fetch checkpoint");
            None
        }
    }
}

/// Notices about count-only topics
fn count_notices(plan: &SessionPlan, checkpoint: Option<&FsmCheckpoint>) -> Vec<Event> {
    plan.count_only
        .iter()
        .map(|topic| match (plan.fsm_id.as_deref(), checkpoint.and_then(|c| c.count(topic))) {
            (None, _) => Event::error(format!(
                "fsmId is not set, so no events will be shown for topic {}",
                topic
            )),
            (Some(fsm_id), Some(count)) => Event::happy(format!(
                "Checkpoint Service counted {} messages on topic {} for fsmId {}",
                count, topic, fsm_id
            )),
            (Some(fsm_id), None) => Event::error(format!(
                "No message count for topic {} for fsmId {} on the Checkpoint Service",
                topic, fsm_id
            )),
        })
        .collect()
}

async fn drive(
    ctx: &SessionContext,
    sink: &SharedSink,
    mut stream: Box<dyn ClientStream>,
    cancel: &CancellationToken,
) -> Result<()> {
    let document = match await_document(stream.as_mut(), cancel).await {
        Ok(Some(document)) => document,
        Ok(None) => {
            debug!("client left before sending a configuration");
            return Ok(());
        }
        Err(e) => {
            report(sink, &e).await;
            return Err(e);
        }
    };

    let plan = match document.resolve(ctx.config.default_brokers.as_deref()) {
        Ok(plan) => plan,
        Err(e) => {
            let e = FlowError::from(e);
            report(sink, &e).await;
            return Err(e);
        }
    };

    let checkpoint = fetch_checkpoint(ctx, plan.fsm_id.as_deref()).await;
    let capacity = ctx.config.channel_capacity;

    let mut opening = Vec::new();
    let (input, mut pool) = match &plan.source {
        Source::Tutorial => {
            info!("starting tutorial session");
            opening.push(Event::happy(tutorial::TUTORIAL_NOTICE));
            (tutorial::spawn_tutorial(capacity, cancel.clone()), None)
        }
        Source::Brokers(specs) => {
            let mut pool = ClusterPool::new(ctx.connector.clone(), capacity);
            let setup = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                setup = pool.setup(specs, checkpoint.clone().map(Arc::new)) => Some(setup),
            };
            match setup {
                None => {
                    info!("session cancelled during setup");
                    pool.close().await;
                    return Ok(());
                }
                Some(Ok(channels)) => (join_messages(channels, capacity), Some(pool)),
                Some(Err(e)) => {
                    warn!(error = %e, "session setup failed");
                    report(sink, &e).await;
                    return Err(e);
                }
            }
        }
    };

    opening.extend(count_notices(&plan, checkpoint.as_ref()));
    let result = stream_events(ctx, sink, stream, cancel, &plan, opening, input).await;

    cancel.cancel();
    if let Some(pool) = pool.as_mut() {
        pool.close().await;
    }
    result
}

async fn stream_events(
    ctx: &SessionContext,
    sink: &SharedSink,
    stream: Box<dyn ClientStream>,
    cancel: &CancellationToken,
    plan: &SessionPlan,
    opening: Vec<Event>,
    input: mpsc::Receiver<Message>,
) -> Result<()> {
    let (ping_tx, ping_rx) = mpsc::channel(1);
    let reader = tokio::spawn(heartbeat::read_heartbeats(
        stream,
        plan.heartbeat_token.clone(),
        ping_tx,
        cancel.clone(),
    ));
    let watchdog = plan.heartbeat_token.as_ref().map(|_| {
        tokio::spawn(heartbeat::watchdog(
            ctx.config.heartbeat_timeout,
            ping_rx,
            sink.clone(),
            cancel.clone(),
        ))
    });

    let result = match deliver(sink, &opening, cancel).await {
        Ok(true) => {
            let engine = RuleEngine::new(&plan.rules, plan.fsm_id.clone());
            dispatch(input, engine, &ctx.config.playback, sink, cancel).await
        }
        Ok(false) => Ok(()),
        Err(e) => Err(e),
    };

    cancel.cancel();
    if let Err(e) = reader.await {
        warn!(error = %e, "heartbeat reader ended abnormally");
    }
    if let Some(watchdog) = watchdog {
        if let Err(e) = watchdog.await {
            warn!(error = %e, "heartbeat watchdog ended abnormally");
        }
    }
    result
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}

/// Buffer incoming messages and, once primed, run one rule pass per tick.
///
/// Ends on cancellation or when a batch cannot be delivered.
pub async fn dispatch(
    mut input: mpsc::Receiver<Message>,
    mut engine: RuleEngine,
    config: &PlaybackConfig,
    sink: &SharedSink,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut playback = Playback::new(config);
    let priming = tokio::time::sleep(config.priming);
    tokio::pin!(priming);
    let mut ticker: Option<Interval> = None;
    let mut input_open = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = &mut priming, if ticker.is_none() => {
                playback.start(Utc::now());
                debug!(buffered = playback.buffered(), "priming complete");
                let mut interval = tokio::time::interval(config.tick);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker = Some(interval);
            }
            _ = next_tick(&mut ticker) => {
                let due = playback.tick();
                if due.is_empty() {
                    continue;
                }
                let events = engine.process_tick(due);
                match deliver(sink, &events, cancel).await {
                    Ok(true) => {}
                    Ok(false) => return Ok(()),
                    Err(e) => {
                        warn!(error = %e, "failed to deliver events");
                        cancel.cancel();
                        return Err(e);
                    }
                }
            }
            msg = input.recv(), if input_open => match msg {
                Some(msg) => playback.insert(msg, Utc::now()),
                None => {
                    debug!("message input closed");
                    input_open = false;
                }
            },
        }
    }
}
