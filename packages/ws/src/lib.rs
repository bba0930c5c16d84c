//! WebSocket message models for `UserManager`.
//!
//! This crate defines the JSON envelope exchanged between `UserManager`
//! clients and the backend over the `/ws` endpoint. Messages are tagged by a
//! `type` field; client-to-server payloads carry their fields beside the tag,
//! while server pushes nest theirs under a `data` field.
//!
//! # Main Components
//!
//! * [`models::InboundPayload`] - Messages a client sends to the backend
//! * [`models::OutboundPayload`] - Messages the backend pushes to clients
//! * [`models::ServerMode`] - The backend-wide operating mode

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod models;
