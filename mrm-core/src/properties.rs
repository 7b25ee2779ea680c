//! Property-based tests using proptest.
//!
//! These tests check the invariants that hold across the whole bridge:
//!
//! - beautification is idempotent under every formatting configuration
//! - malformed host arguments always come back as a failure envelope
//! - the three generation modes deliver the same questions in the same order
