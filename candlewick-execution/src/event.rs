use crate::order::OrderId;
use rust_decimal::Decimal;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// An order-lifecycle transition published by the broker.
///
/// Mirrors `spec.md` #4.6's four event kinds; `FILLED_ORDER` and
/// `CASH_SETTLED` carry the same `(price, filled_quantity)` payload shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    NewOrder {
        order_id: OrderId,
    },
    FilledOrder {
        order_id: OrderId,
        price: Decimal,
        filled_quantity: u64,
    },
    CanceledOrder {
        order_id: OrderId,
    },
    CashSettled {
        order_id: OrderId,
        price: Decimal,
        filled_quantity: u64,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EventKind {
    New,
    Filled,
    Canceled,
    CashSettled,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewOrder { .. } => EventKind::New,
            Event::FilledOrder { .. } => EventKind::Filled,
            Event::CanceledOrder { .. } => EventKind::Canceled,
            Event::CashSettled { .. } => EventKind::CashSettled,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            Event::NewOrder { order_id }
            | Event::FilledOrder { order_id, .. }
            | Event::CanceledOrder { order_id }
            | Event::CashSettled { order_id, .. } => *order_id,
        }
    }
}

type Handler = Box<dyn FnMut(&Event)>;

/// In-process dispatcher mapping order-lifecycle events to handlers.
///
/// A statically typed bucket per [`EventKind`] stands in for the
/// teacher's monkey-patched `submit_order` interception (`spec.md` #9):
/// `add_action` registers a closure against one event kind, and
/// `dispatch` calls every registered handler for an event synchronously,
/// in registration order. A handler that panics is caught and logged —
/// it never aborts the simulation (`spec.md` #4.6, #7).
#[derive(Default)]
pub struct EventStream {
    new_order: Vec<Handler>,
    filled_order: Vec<Handler>,
    canceled_order: Vec<Handler>,
    cash_settled: Vec<Handler>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&mut self, kind: EventKind, handler: impl FnMut(&Event) + 'static) {
        let bucket = self.bucket_mut(kind);
        bucket.push(Box::new(handler));
    }

    pub fn dispatch(&mut self, event: Event) {
        let bucket = self.bucket_mut(event.kind());
        for handler in bucket.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::error!(order_id = %event.order_id(), kind = ?event.kind(), "event handler panicked; simulation continues");
            }
        }
    }

    fn bucket_mut(&mut self, kind: EventKind) -> &mut Vec<Handler> {
        match kind {
            EventKind::New => &mut self.new_order,
            EventKind::Filled => &mut self.filled_order,
            EventKind::Canceled => &mut self.canceled_order,
            EventKind::CashSettled => &mut self.cash_settled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn dispatch_calls_only_matching_kind_handlers() {
        let mut stream = EventStream::new();
        let filled_seen = Rc::new(RefCell::new(0));
        let canceled_seen = Rc::new(RefCell::new(0));

        let filled_clone = Rc::clone(&filled_seen);
        stream.add_action(EventKind::Filled, move |_event| {
            *filled_clone.borrow_mut() += 1;
        });
        let canceled_clone = Rc::clone(&canceled_seen);
        stream.add_action(EventKind::Canceled, move |_event| {
            *canceled_clone.borrow_mut() += 1;
        });

        stream.dispatch(Event::FilledOrder {
            order_id: OrderId(1),
            price: Decimal::ONE,
            filled_quantity: 1,
        });

        assert_eq!(*filled_seen.borrow(), 1);
        assert_eq!(*canceled_seen.borrow(), 0);
    }

    #[test]
    fn a_panicking_handler_does_not_stop_dispatch() {
        let mut stream = EventStream::new();
        let seen = Rc::new(RefCell::new(0));

        stream.add_action(EventKind::New, |_event| panic!("boom"));
        let seen_clone = Rc::clone(&seen);
        stream.add_action(EventKind::New, move |_event| {
            *seen_clone.borrow_mut() += 1;
        });

        stream.dispatch(Event::NewOrder { order_id: OrderId(1) });
        assert_eq!(*seen.borrow(), 1);
    }
}
