use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, OrderUpdatedEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub order_update_producer: Vec<EventProducer<OrderUpdatedEvent>>,
}

pub struct EventHandlers {
    pub on_order_update: Option<EventHandler<OrderUpdatedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_order_update = hooks.on_order_update.map(|f| EventHandler::new(buffer_size, f));
        Self { on_order_update }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_order_update {
            result.order_update_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_order_update {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_update: Option<Handler<OrderUpdatedEvent>>,
}

impl EventHooks {
    pub fn on_order_update<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderUpdatedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_update = Some(Arc::new(f));
        self
    }
}
