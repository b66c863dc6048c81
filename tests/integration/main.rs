//! Integration tests for pgmon-agent
//!
//! These tests require a live PostgreSQL server and are skipped unless the
//! target is configured through the environment.
//!
//! # Running Integration Tests
//!
//! ```bash
//! docker run --rm -d \
//!     --name pgmon-test-pg \
//!     -e POSTGRES_PASSWORD=testpass \
//!     -p 5432:5432 \
//!     postgres:16-alpine
//!
//! PGMON_TEST_HOSTNAME=localhost \
//! PGMON_TEST_USERNAME=postgres \
//! PGMON_TEST_PASSWORD=testpass \
//!     cargo test --test integration
//!
//! docker stop pgmon-test-pg
//! ```

mod postgres_test;
