//! Update dispatcher
//!
//! One task per inbound event. Each task passes the conversation gate, runs
//! the handler under its own deadline, and sends the reply through the global
//! API gate. Every task context is a child of the shutdown token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use slotbot_core::ratelimit::BotLimiters;
use slotbot_core::{DomainError, RequestContext};
use slotbot_shared::Metrics;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::handlers::UpdateHandler;
use crate::transport::{InboundEvent, Reply, Transport};

pub const GENERIC_FAILURE_REPLY: &str = "Something went wrong on our side. Please try again.";
pub const TIMEOUT_REPLY: &str = "That took too long. Please try again.";

#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub handler_timeout: Duration,
    pub sweep_interval: Duration,
}

pub struct Dispatcher {
    handler: Arc<dyn UpdateHandler>,
    transport: Arc<dyn Transport>,
    limiters: Arc<BotLimiters>,
    metrics: Arc<Metrics>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        handler: Arc<dyn UpdateHandler>,
        transport: Arc<dyn Transport>,
        limiters: Arc<BotLimiters>,
        metrics: Arc<Metrics>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            handler,
            transport,
            limiters,
            metrics,
            settings,
        }
    }

    /// Consumes `events` until the channel closes or `shutdown` fires, then
    /// waits for in-flight tasks. Shutdown cancels them; a closed channel lets
    /// them finish.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<InboundEvent>, shutdown: CancellationToken) {
        let sweeper_stop = shutdown.child_token();
        let sweeper = spawn_sweeper(
            Arc::clone(&self.limiters),
            self.settings.sweep_interval,
            sweeper_stop.clone(),
        );
        let mut tasks = JoinSet::new();

        info!("🎯 Dispatcher started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Dispatcher received shutdown signal");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Update task failed: {}", e);
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Inbound channel closed");
                        break;
                    };
                    let this = Arc::clone(&self);
                    let ctx = RequestContext::from_token(shutdown.child_token());
                    let span = tracing::info_span!("update", chat_id = event.chat_id, requester_id = event.requester_id);
                    tasks.spawn(async move { this.process(ctx, event).await }.instrument(span));
                }
            }
        }

        events.close();
        info!(in_flight = tasks.len(), "Draining update tasks");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Update task failed: {}", e);
            }
        }

        sweeper_stop.cancel();
        if let Err(e) = sweeper.await {
            error!("Bucket sweeper failed: {}", e);
        }
        info!("Dispatcher stopped");
    }

    /// Handles one event end to end. Never fails: errors become replies.
    pub async fn process(&self, ctx: RequestContext, event: InboundEvent) {
        self.metrics.inc_messages_received();
        let start = Instant::now();

        if let Err(e) = self.limiters.conversations.admit(&ctx, &event.chat_id).await {
            debug!(kind = e.kind(), "Update dropped before admission");
            self.metrics.inc_messages_errors();
            return;
        }

        let handler_ctx = ctx.child_with_timeout(self.settings.handler_timeout);
        let text = match self.handler.handle(&handler_ctx, &event).await {
            Ok(text) => {
                self.metrics.inc_messages_processed();
                text
            }
            Err(e) => {
                self.metrics.inc_messages_errors();
                if ctx.is_cancelled() {
                    debug!("Update cancelled by shutdown");
                    return;
                }
                warn!(kind = e.kind(), error = %e, "Update handler failed");
                failure_reply(&e).to_string()
            }
        };

        let reply = Reply {
            chat_id: event.chat_id,
            text,
        };
        match self.limiters.api.run(&ctx, self.transport.send(reply)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to send reply: {}", e),
            Err(e) => debug!(kind = e.kind(), "Reply dropped"),
        }

        self.metrics.observe_message_duration(start.elapsed().as_secs_f64());
    }
}

fn failure_reply(e: &DomainError) -> &'static str {
    match e {
        DomainError::Timeout => TIMEOUT_REPLY,
        _ => GENERIC_FAILURE_REPLY,
    }
}

fn spawn_sweeper(limiters: Arc<BotLimiters>, every: Duration, stop: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = limiters.conversations.evict_idle();
                    if evicted > 0 {
                        debug!(evicted, "Evicted idle conversation buckets");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use slotbot_shared::config::RateLimitSettings;
    use std::sync::Mutex;

    use crate::transport::TransportError;

    mock! {
        Handler {}

        #[async_trait]
        impl UpdateHandler for Handler {
            async fn handle(&self, ctx: &RequestContext, event: &InboundEvent) -> Result<String, DomainError>;
        }
    }

    /// Records replies in arrival order.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Reply>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, reply: Reply) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(reply);
            Ok(())
        }
    }

    fn limiters(message_rps: f64) -> Arc<BotLimiters> {
        let settings = RateLimitSettings {
            global_rps: 1000.0,
            global_burst: 100,
            message_rps,
            message_burst: 1,
            idle_eviction_secs: 600,
            sweep_interval_secs: 60,
        };
        Arc::new(BotLimiters::from_settings(&settings, None).unwrap())
    }

    fn dispatcher(
        handler: MockHandler,
        transport: Arc<RecordingTransport>,
        limiters: Arc<BotLimiters>,
    ) -> (Arc<Dispatcher>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new("test", "local").unwrap());
        let d = Dispatcher::new(
            Arc::new(handler),
            transport,
            limiters,
            Arc::clone(&metrics),
            DispatcherSettings {
                handler_timeout: Duration::from_secs(5),
                sweep_interval: Duration::from_secs(60),
            },
        );
        (Arc::new(d), metrics)
    }

    fn event(chat_id: i64, text: &str) -> InboundEvent {
        InboundEvent {
            requester_id: chat_id,
            chat_id,
            username: None,
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn test_events_are_answered_until_channel_closes() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .times(3)
            .returning(|_, e| Ok(format!("echo {}", e.text)));
        let transport = Arc::new(RecordingTransport::default());
        let (d, metrics) = dispatcher(handler, Arc::clone(&transport), limiters(1000.0));

        let (tx, rx) = mpsc::channel(8);
        for chat in 1..=3 {
            tx.send(event(chat, "hi")).await.unwrap();
        }
        drop(tx);
        d.run(rx, CancellationToken::new()).await;

        let mut sent = transport.sent.lock().unwrap().clone();
        sent.sort_by_key(|r| r.chat_id);
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], Reply { chat_id: 1, text: "echo hi".into() });
        assert_eq!(metrics.messages_received(), 3);
        assert_eq!(metrics.messages_processed(), 3);
        assert_eq!(metrics.messages_errors(), 0);
    }

    #[tokio::test]
    async fn test_handler_errors_become_distinct_replies() {
        let mut handler = MockHandler::new();
        handler.expect_handle().returning(|_, e| match e.text.as_str() {
            "slow" => Err(DomainError::Timeout),
            _ => Err(DomainError::storage("create_booking", "boom")),
        });
        let transport = Arc::new(RecordingTransport::default());
        let (d, metrics) = dispatcher(handler, Arc::clone(&transport), limiters(1000.0));

        d.process(RequestContext::new(), event(1, "slow")).await;
        d.process(RequestContext::new(), event(2, "other")).await;

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent[0].text, TIMEOUT_REPLY);
        assert_eq!(sent[1].text, GENERIC_FAILURE_REPLY);
        assert_eq!(metrics.messages_errors(), 2);
    }

    #[tokio::test]
    async fn test_conversation_gate_spaces_messages() {
        let mut handler = MockHandler::new();
        handler.expect_handle().times(3).returning(|_, _| Ok("ok".into()));
        let transport = Arc::new(RecordingTransport::default());
        let (d, _) = dispatcher(handler, Arc::clone(&transport), limiters(20.0));

        let start = Instant::now();
        for _ in 0..3 {
            d.process(RequestContext::new(), event(9, "hi")).await;
        }
        assert!(start.elapsed() >= Duration::from_millis(80), "took {:?}", start.elapsed());
        assert_eq!(transport.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_work() {
        let mut handler = MockHandler::new();
        handler.expect_handle().never();
        let transport = Arc::new(RecordingTransport::default());
        let (d, metrics) = dispatcher(handler, Arc::clone(&transport), limiters(1000.0));

        let ctx = RequestContext::new();
        ctx.cancel();
        d.process(ctx, event(1, "hi")).await;

        assert!(transport.sent.lock().unwrap().is_empty());
        assert_eq!(metrics.messages_errors(), 1);
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown() {
        let handler = MockHandler::new();
        let transport = Arc::new(RecordingTransport::default());
        let (d, _) = dispatcher(handler, transport, limiters(1000.0));

        let (_tx, rx) = mpsc::channel::<InboundEvent>(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), d.run(rx, shutdown))
            .await
            .unwrap();
    }
}
