// Checkout
pub mod coupons;
pub mod pricing;

// Order lifecycle
pub mod order_status;
pub mod orders;

// Payments
pub mod payment_channels;
pub mod payment_gateway;
pub mod payments;

// After-sales
pub mod returns;

// Admin fan-out
pub mod notifications;
