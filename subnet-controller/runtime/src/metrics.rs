use ovs_subnet_controller_core::EventType;
use ovs_subnet_controller_registry::Kind;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    events: Family<EventLabels, Counter>,
    event_errors: Family<EventLabels, Counter>,
    subnets: Gauge,
    net_ids: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    kind: String,
    event: String,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(prom: &mut Registry) -> Self {
        let events = Family::default();
        prom.register(
            "events",
            "Count of registry events handled by reconciliation loops",
            events.clone(),
        );

        let event_errors = Family::default();
        prom.register(
            "event_errors",
            "Count of registry events that could not be applied",
            event_errors.clone(),
        );

        let subnets = Gauge::default();
        prom.register(
            "subnets_allocated",
            "Number of node subnets allocated from the cluster network",
            subnets.clone(),
        );

        let net_ids = Gauge::default();
        prom.register(
            "netids_allocated",
            "Number of namespace network identifiers allocated",
            net_ids.clone(),
        );

        Self {
            events,
            event_errors,
            subnets,
            net_ids,
        }
    }

    pub(crate) fn observe(&self, kind: Kind, event: EventType, ok: bool) {
        let labels = EventLabels {
            kind: kind.to_string(),
            event: event.to_string(),
        };
        self.events.get_or_create(&labels).inc();
        if !ok {
            self.event_errors.get_or_create(&labels).inc();
        }
    }

    pub(crate) fn set_subnets(&self, allocated: usize) {
        self.subnets.set(allocated as i64);
    }

    pub(crate) fn set_net_ids(&self, allocated: usize) {
        self.net_ids.set(allocated as i64);
    }
}
