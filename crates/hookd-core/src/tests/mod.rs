//! Test module for hookd-core
//!
//! This module contains tests for:
//! - Handler discovery and loading across path templates
//! - Registration isolation
//! - Connection lifecycle (connect, auto-connect, timeout, stop, restart)
//! - The dispatch wait loop and its remote control handle

mod server_tests;
