//! Display metadata for every status enum, kept in one place so customer and
//! admin views render the same label, badge color and icon.

use crate::entities::{
    order::{OrderStatus, PaymentStatus},
    payment_transaction::TransactionStatus,
    return_request::ReturnStatus,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StatusDisplay {
    /// Wire value of the status
    #[schema(example = "ready_to_ship")]
    pub code: String,
    #[schema(example = "Ready to ship")]
    pub label: &'static str,
    /// Badge color token understood by the storefront theme
    #[schema(example = "indigo")]
    pub color: &'static str,
    #[schema(example = "package-check")]
    pub icon: &'static str,
    pub terminal: bool,
}

/// Implemented by every status enum that is shown to a person.
pub trait StatusMeta: Copy + ToString {
    fn meta(self) -> (&'static str, &'static str, &'static str, bool);

    fn display(self) -> StatusDisplay {
        let (label, color, icon, terminal) = self.meta();
        StatusDisplay {
            code: self.to_string(),
            label,
            color,
            icon,
            terminal,
        }
    }
}

impl StatusMeta for OrderStatus {
    fn meta(self) -> (&'static str, &'static str, &'static str, bool) {
        match self {
            OrderStatus::Pending => ("Awaiting payment", "amber", "clock", false),
            OrderStatus::Preparing => ("Preparing", "blue", "box", false),
            OrderStatus::ReadyToShip => ("Ready to ship", "indigo", "package-check", false),
            OrderStatus::Shipped => ("Shipped", "violet", "truck", false),
            OrderStatus::InTransit => ("In transit", "cyan", "route", false),
            OrderStatus::Delivered => ("Delivered", "green", "circle-check", true),
            OrderStatus::Cancelled => ("Cancelled", "red", "circle-x", true),
        }
    }
}

impl StatusMeta for PaymentStatus {
    fn meta(self) -> (&'static str, &'static str, &'static str, bool) {
        match self {
            PaymentStatus::Pending => ("Payment pending", "amber", "hourglass", false),
            PaymentStatus::Completed => ("Paid", "green", "credit-card", true),
            PaymentStatus::Failed => ("Payment failed", "red", "alert-triangle", false),
        }
    }
}

impl StatusMeta for TransactionStatus {
    fn meta(self) -> (&'static str, &'static str, &'static str, bool) {
        match self {
            TransactionStatus::Pending => ("Pending", "amber", "hourglass", false),
            TransactionStatus::Success => ("Succeeded", "green", "circle-check", true),
            TransactionStatus::Failed => ("Failed", "red", "circle-x", true),
            TransactionStatus::Cancelled => ("Cancelled", "gray", "ban", true),
        }
    }
}

impl StatusMeta for ReturnStatus {
    fn meta(self) -> (&'static str, &'static str, &'static str, bool) {
        match self {
            ReturnStatus::Pending => ("Under review", "amber", "clock", false),
            ReturnStatus::Approved => ("Approved", "green", "circle-check", true),
            ReturnStatus::Rejected => ("Rejected", "red", "circle-x", true),
        }
    }
}

/// Display rows for every order status, in lifecycle order.
pub fn order_status_catalog() -> Vec<StatusDisplay> {
    OrderStatus::SEQUENCE
        .iter()
        .copied()
        .chain(std::iter::once(OrderStatus::Cancelled))
        .map(StatusMeta::display)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn terminal_flag_matches_the_state_machine() {
        for status in OrderStatus::iter() {
            assert_eq!(status.display().terminal, status.is_terminal(), "{status}");
        }
    }

    #[test]
    fn catalog_lists_every_order_status_once() {
        let catalog = order_status_catalog();
        assert_eq!(catalog.len(), OrderStatus::iter().count());
        assert_eq!(catalog[0].code, "pending");
        assert_eq!(catalog.last().map(|d| d.code.as_str()), Some("cancelled"));
    }

    #[test]
    fn return_status_display_uses_wire_code() {
        let display = ReturnStatus::Approved.display();
        assert_eq!(display.code, "approved");
        assert_eq!(display.label, "Approved");
    }
}
