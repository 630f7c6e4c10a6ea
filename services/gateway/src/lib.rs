//! Quota enforcement and stream admission for per-tenant topics.
//!
//! Publish traffic is charged inbound against the tenant and global daily
//! quotas before it reaches the broker. Stream delivery is charged outbound,
//! batch by batch, and every stream holds one of a bounded number of
//! per-tenant slots for as long as it is open.

pub mod api;
pub mod broker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod ledger;
pub mod ratelimit;
pub mod storage;
pub mod stream;
pub mod tenant;
pub mod tracker;

pub use error::GatewayError;
pub use gateway::{Gateway, GatewayOptions, PublishMessage, PublishReceipt};
pub use tenant::TenantId;
