use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::models::events::DomainEvent;
use crate::models::session::TableId;

struct Placement {
    table_id: TableId,
    seen_at: DateTime<Utc>,
}

/// Which table each known order belongs to.
///
/// Filled from order events as they pass through the router. Payment
/// callbacks only carry an order id, so this is how a settlement finds its
/// table channel. Orders placed before a restart are unknown afterwards.
/// Entries not refreshed by an order event within the retention period are
/// pruned by the session janitor.
#[derive(Default)]
pub struct OrderTableIndex {
    tables: DashMap<String, Placement>,
}

impl OrderTableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the order→table pairing carried by `event`, if any.
    pub fn observe(&self, event: &DomainEvent) {
        self.observe_at(event, Utc::now());
    }

    pub fn observe_at(&self, event: &DomainEvent, at: DateTime<Utc>) {
        match event {
            DomainEvent::OrderPlaced { order_id, table_id }
            | DomainEvent::OrderStatusChanged {
                order_id, table_id, ..
            } => {
                self.tables.insert(
                    order_id.clone(),
                    Placement {
                        table_id: table_id.clone(),
                        seen_at: at,
                    },
                );
            }
            _ => {}
        }
    }

    pub fn table_for(&self, order_id: &str) -> Option<TableId> {
        self.tables
            .get(order_id)
            .map(|entry| entry.value().table_id.clone())
    }

    /// Forgets orders last seen before `cutoff`. Returns how many went.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.tables.len();
        self.tables.retain(|_, placement| placement.seen_at >= cutoff);
        before.saturating_sub(self.tables.len())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::events::{OrderStatus, TableStatus};

    #[test]
    fn remembers_tables_from_order_events_only() {
        let index = OrderTableIndex::new();
        index.observe(&DomainEvent::OrderPlaced {
            order_id: "o-1".into(),
            table_id: TableId::from("T07"),
        });
        index.observe(&DomainEvent::TableStatusChanged {
            table_id: TableId::from("T09"),
            status: TableStatus::Cleaning,
        });

        assert_eq!(index.table_for("o-1"), Some(TableId::from("T07")));
        assert_eq!(index.table_for("o-2"), None);
    }

    #[test]
    fn prune_drops_only_stale_orders() {
        let index = OrderTableIndex::new();
        let now = Utc::now();

        index.observe_at(
            &DomainEvent::OrderPlaced {
                order_id: "old".into(),
                table_id: TableId::from("T01"),
            },
            now - Duration::hours(30),
        );
        index.observe_at(
            &DomainEvent::OrderPlaced {
                order_id: "refreshed".into(),
                table_id: TableId::from("T02"),
            },
            now - Duration::hours(30),
        );
        index.observe_at(
            &DomainEvent::OrderStatusChanged {
                order_id: "refreshed".into(),
                table_id: TableId::from("T02"),
                status: OrderStatus::Served,
            },
            now - Duration::hours(1),
        );

        assert_eq!(index.prune_before(now - Duration::hours(24)), 1);
        assert_eq!(index.table_for("old"), None);
        assert_eq!(index.table_for("refreshed"), Some(TableId::from("T02")));
        assert_eq!(index.len(), 1);
    }
}
