//! Meshlimit - Per-Tenant Admission Control
//!
//! This crate limits how much work each tenant may submit, keeping all
//! per-tenant state in a fixed-size LRU cache. Two algorithms are provided:
//! a discrete sliding window and a continuous leaky bucket. Leaky bucket
//! replicas exchange spent capacity with their peers over gRPC so a tenant
//! cannot multiply its limit by spreading traffic across the fleet.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod grpc;
pub mod mesh;
pub mod ratelimit;
