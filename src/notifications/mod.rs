//! Thin client for the notification microservice.
pub mod client;

pub use client::{
    Channel, NotificationClient, NotificationConfig, NotificationError, NotificationRequest,
};
