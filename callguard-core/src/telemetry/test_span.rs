#![cfg(test)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{span, Event, Subscriber};
use tracing_core::field::{Field, Visit};
use tracing_subscriber::registry;
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

pub type Fields = HashMap<String, String>;

#[derive(Default, Debug)]
pub struct CaptureStore {
    spans: Mutex<HashMap<span::Id, (String, Fields)>>,
    closed: Mutex<Vec<(String, Fields)>>,
    events: Mutex<Vec<(String, Fields)>>,
}

impl CaptureStore {
    /// Fields of every event emitted with the given target, in order.
    pub fn events_for(&self, target: &str) -> Vec<Fields> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Fields of every span with the given name, open or closed.
    pub fn spans_named(&self, name: &str) -> Vec<Fields> {
        let mut out: Vec<Fields> = self
            .closed
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, f)| f.clone())
            .collect();
        out.extend(
            self.spans
                .lock()
                .unwrap()
                .values()
                .filter(|(n, _)| n == name)
                .map(|(_, f)| f.clone()),
        );
        out
    }
}

struct MapVisitor<'a> {
    map: &'a mut Fields,
}

impl Visit for MapVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
        self.map.insert(field.name().to_string(), format!("{value:?}"));
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_str(&mut self, field: &Field, value: &str) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
}

#[derive(Clone)]
pub struct CaptureLayer {
    store: Arc<CaptureStore>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, _ctx: Context<'_, S>) {
        let mut fields = Fields::new();
        attrs.record(&mut MapVisitor { map: &mut fields });
        self.store
            .spans
            .lock()
            .unwrap()
            .insert(id.clone(), (attrs.metadata().name().to_string(), fields));
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
        if let Some((_, fields)) = self.store.spans.lock().unwrap().get_mut(id) {
            values.record(&mut MapVisitor { map: fields });
        }
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::new();
        event.record(&mut MapVisitor { map: &mut fields });
        self.store
            .events
            .lock()
            .unwrap()
            .push((event.metadata().target().to_string(), fields));
    }

    fn on_close(&self, id: span::Id, _ctx: Context<'_, S>) {
        if let Some(entry) = self.store.spans.lock().unwrap().remove(&id) {
            self.store.closed.lock().unwrap().push(entry);
        }
    }
}

thread_local! {
    static GUARDS: RefCell<Vec<tracing::subscriber::DefaultGuard>> = const { RefCell::new(Vec::new()) };
}

/// Installs a capturing subscriber as the default for the current thread.
/// `#[tokio::test]` runs on a current-thread runtime, so spans and events
/// from the test body land in the returned store.
pub fn install_capture() -> Arc<CaptureStore> {
    use tracing_subscriber::prelude::*;
    let store = Arc::new(CaptureStore::default());
    let layer = CaptureLayer {
        store: store.clone(),
    };
    let subscriber = registry::Registry::default().with(layer);
    let guard = tracing::subscriber::set_default(subscriber);
    GUARDS.with(|g| g.borrow_mut().push(guard));
    store
}
