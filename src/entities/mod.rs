//! sea-orm entities for every table created by the embedded migrator.

pub mod coupon;
pub mod extended_warranty_category;
pub mod order;
pub mod order_item;
pub mod payment_channel;
pub mod payment_transaction;
pub mod product;
pub mod return_request;
