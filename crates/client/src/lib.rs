//! # Paneflow Client Library
//!
//! This crate provides the consumer-side backend for Paneflow: the
//! flow-control layer that sits between the boundary transport and the
//! display renderer.
//!
//! ## Overview
//!
//! The client crate keeps the display side honest about memory:
//!
//! - **Flow Control**: Per-session watermark accounting over undelivered
//!   output bytes, with pause/resume commands issued back to the host
//!   registry when the consumer falls behind
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Display Renderer                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   events ──▶ FlowController::accept ──▶ render ──▶ confirm      │
//! │                     │                                 │          │
//! │                     └── pause / resume commands ◀─────┘          │
//! │                                                                  │
//! ├──────────────────────── process boundary ───────────────────────┤
//! │                     Session Core (host)                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every host event is fed through [`FlowController::accept`] before it
//! reaches the renderer; the renderer calls
//! [`FlowController::confirm`] once a chunk is fully processed. The
//! controller issues at most one pause per excursion above the high
//! watermark and one resume per drain below the low watermark.
//!
//! ## Modules
//!
//! - [`flow`]: Watermark-based flow control

pub mod flow;

// Re-export protocol for convenience
pub use protocol;

pub use flow::{FlowController, HIGH_WATERMARK, LOW_WATERMARK};
