//! Test doubles shared by the unit and pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use ordermail_core::{Order, OrderId};

use crate::delivery::{MailSender, OrderStore};

#[derive(Debug)]
struct Script {
    steps: VecDeque<Result<bool, String>>,
    fallback: Result<bool, String>,
    sent: Vec<Option<OrderId>>,
}

/// Mail sender that replays a fixed script, then repeats a fallback answer.
#[derive(Debug, Clone)]
pub struct ScriptedMailSender {
    script: Arc<Mutex<Script>>,
}

impl ScriptedMailSender {
    /// Plays `steps` in order, then succeeds forever.
    pub fn script<'a>(steps: impl IntoIterator<Item = Result<bool, &'a str>>) -> Self {
        Self::with_fallback(steps, Ok(true))
    }

    pub fn always(accept: bool) -> Self {
        Self::with_fallback(std::iter::empty(), Ok(accept))
    }

    fn with_fallback<'a>(
        steps: impl IntoIterator<Item = Result<bool, &'a str>>,
        fallback: Result<bool, String>,
    ) -> Self {
        let steps = steps
            .into_iter()
            .map(|step| step.map_err(str::to_string))
            .collect();

        Self {
            script: Arc::new(Mutex::new(Script {
                steps,
                fallback,
                sent: Vec::new(),
            })),
        }
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().sent.len()
    }
}

impl MailSender for ScriptedMailSender {
    fn send(&self, order: &Order) -> anyhow::Result<bool> {
        let mut script = self.script.lock().unwrap();
        script.sent.push(order.entity_id);
        let step = script
            .steps
            .pop_front()
            .unwrap_or_else(|| script.fallback.clone());
        step.map_err(|e| anyhow::anyhow!(e))
    }
}

/// Order store whose backend is always down.
#[derive(Debug, Clone, Copy)]
pub struct FailingOrderStore;

impl OrderStore for FailingOrderStore {
    fn get(&self, _order_id: OrderId) -> anyhow::Result<Option<Order>> {
        anyhow::bail!("connection refused")
    }
}

/// One recorded log event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Tracing layer that records every event's level, message and fields.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn count(&self, level: Level) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == level)
            .count()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }

    /// Events whose message contains `needle`, oldest first.
    pub fn matching(&self, needle: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.message.contains(needle))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let value = format!("{:?}", value);
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Run `f` with a thread-local subscriber that captures its log events.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, LogCapture) {
    use tracing_subscriber::layer::SubscriberExt;

    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, capture)
}
