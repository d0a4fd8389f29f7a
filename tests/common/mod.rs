//! Common test utilities and fixtures for the asherah-bridge test suite.
//!
//! Shared configuration, payloads and bridge constructors used by the
//! integration, stress and property tests.

pub mod fixtures;
