//! Integration tests for mdsync-app.
//!
//! These tests verify the interaction between components:
//! - Feed connection lifecycle and authentication
//! - Subscription multiplexing over a real transport
//! - Reconnection and automatic resubscription

pub mod common;
