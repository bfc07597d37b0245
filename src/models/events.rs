use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::webhook::Gateway;
use crate::models::session::{SessionId, SessionStatus, TableId};
use crate::models::staff::StaffRole;

/// A broadcast scope. Table channels carry one table's events only; role
/// channels carry cross-table events for a dashboard role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Channel {
    Table(TableId),
    Role(StaffRole),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Table(table_id) => write!(f, "table:{}", table_id),
            Channel::Role(role) => write!(f, "role:{}", role),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Served,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    pub fn message(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Your order has been received",
            OrderStatus::Confirmed => "Your order has been confirmed",
            OrderStatus::Preparing => "The kitchen is preparing your order",
            OrderStatus::Ready => "Your order is ready",
            OrderStatus::Served => "Your order has been served. Enjoy your meal!",
            OrderStatus::Completed => "Your order is complete. Thank you!",
            OrderStatus::Cancelled => "Your order has been cancelled",
            OrderStatus::Unknown => "Your order status has been updated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Available,
    Occupied,
    Reserved,
    Cleaning,
    #[serde(other)]
    Unknown,
}

impl TableStatus {
    pub fn message(&self) -> &'static str {
        match self {
            TableStatus::Available => "Table is now available",
            TableStatus::Occupied => "Table is now occupied",
            TableStatus::Reserved => "Table has been reserved",
            TableStatus::Cleaning => "Table is being cleaned",
            TableStatus::Unknown => "Table status has been updated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Failed,
    Refunded,
    #[serde(other)]
    Unknown,
}

impl PaymentStatus {
    pub fn message(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "Payment received. Thank you!",
            PaymentStatus::Pending => "Payment is being processed",
            PaymentStatus::Failed => "Payment failed. Please try again or ask staff for help",
            PaymentStatus::Refunded => "Payment has been refunded",
            PaymentStatus::Unknown => "Payment status has been updated",
        }
    }
}

/// A domain mutation worth pushing to live clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderPlaced {
        order_id: String,
        table_id: TableId,
    },
    OrderStatusChanged {
        order_id: String,
        table_id: TableId,
        status: OrderStatus,
    },
    TableStatusChanged {
        table_id: TableId,
        status: TableStatus,
    },
    PaymentSettled {
        order_id: String,
        /// `None` when the order could not be correlated to a table.
        table_id: Option<TableId>,
        gateway: Gateway,
        transaction_id: String,
        status: PaymentStatus,
    },
    SessionEnded {
        session_id: SessionId,
        table_id: TableId,
        status: SessionStatus,
    },
}

impl DomainEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::OrderPlaced { .. } => "order:placed",
            DomainEvent::OrderStatusChanged { .. } => "order:status",
            DomainEvent::TableStatusChanged { .. } => "table:status",
            DomainEvent::PaymentSettled { .. } => "payment:settled",
            DomainEvent::SessionEnded { .. } => "session:ended",
        }
    }

    /// Human-readable line shown to whoever receives the event.
    pub fn message(&self) -> &'static str {
        match self {
            DomainEvent::OrderPlaced { .. } => "New order placed",
            DomainEvent::OrderStatusChanged { status, .. } => status.message(),
            DomainEvent::TableStatusChanged { status, .. } => status.message(),
            DomainEvent::PaymentSettled { status, .. } => status.message(),
            DomainEvent::SessionEnded { status: SessionStatus::Expired, .. } => {
                "Your session has expired. Please scan the table QR code again"
            }
            DomainEvent::SessionEnded { .. } => "Your session has ended",
        }
    }

    /// Every channel this event is delivered to, and no other.
    pub fn channels(&self) -> Vec<Channel> {
        match self {
            DomainEvent::OrderPlaced { table_id, .. }
            | DomainEvent::OrderStatusChanged { table_id, .. } => vec![
                Channel::Table(table_id.clone()),
                Channel::Role(StaffRole::Kitchen),
                Channel::Role(StaffRole::Admin),
            ],
            DomainEvent::TableStatusChanged { table_id, .. } => vec![
                Channel::Table(table_id.clone()),
                Channel::Role(StaffRole::Receptionist),
                Channel::Role(StaffRole::Admin),
            ],
            DomainEvent::PaymentSettled { table_id, .. } => {
                let mut channels = vec![
                    Channel::Role(StaffRole::Receptionist),
                    Channel::Role(StaffRole::Admin),
                ];
                if let Some(table_id) = table_id {
                    channels.insert(0, Channel::Table(table_id.clone()));
                }
                channels
            }
            // The ended session's own connections are told directly on eviction.
            DomainEvent::SessionEnded { .. } => vec![
                Channel::Role(StaffRole::Receptionist),
                Channel::Role(StaffRole::Admin),
            ],
        }
    }
}
