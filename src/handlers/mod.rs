pub mod admin_orders;
pub mod catalog;
pub mod common;
pub mod coupons;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod returns;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        coupons::CouponService,
        notifications::{NotificationHub, NotificationService},
        order_status::{OrderStatusService, TransitionPolicy, TransitionTable},
        orders::OrderService,
        payment_channels::PaymentChannelService,
        payment_gateway::PaymentGateway,
        payments::PaymentService,
        pricing::PricingService,
        returns::ReturnService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub pricing: Arc<PricingService>,
    pub coupons: Arc<CouponService>,
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub payments: Arc<PaymentService>,
    pub payment_channels: Arc<PaymentChannelService>,
    pub returns: Arc<ReturnService>,
    pub notifications: Arc<NotificationService>,
}

impl AppServices {
    /// Wires every service against one pool and one event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        hub: NotificationHub,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, ServiceError> {
        let policy: TransitionPolicy = config.order_transition_policy.parse().map_err(|_| {
            ServiceError::InternalError(format!(
                "unknown order transition policy '{}'",
                config.order_transition_policy
            ))
        })?;
        let table = Arc::new(TransitionTable::from_policy(policy));

        let payments = PaymentService::new(db_pool.clone(), gateway, event_sender.clone());
        let orders = OrderService::new(
            db_pool.clone(),
            payments.clone(),
            event_sender.clone(),
            config.default_currency.clone(),
            config.order_number_prefix.clone(),
        );

        Ok(Self {
            pricing: Arc::new(PricingService::new()),
            coupons: Arc::new(CouponService::new(db_pool.clone(), event_sender.clone())),
            orders: Arc::new(orders),
            order_status: Arc::new(OrderStatusService::new(
                db_pool.clone(),
                table,
                event_sender.clone(),
            )),
            payments: Arc::new(payments),
            payment_channels: Arc::new(PaymentChannelService::new(db_pool.clone())),
            returns: Arc::new(ReturnService::new(db_pool, event_sender.clone())),
            notifications: Arc::new(NotificationService::new(event_sender, hub)),
        })
    }
}
