//! Integration tests for openpan-client
//!
//! Uses wiremock to simulate the provider's open API and verifies
//! end-to-end behavior of authentication, pacing, directory resolution,
//! uploads, and the store contract.

mod common;

mod test_auth;
mod test_rate_limit;
mod test_store_operations;
mod test_upload;
