//! Integration tests for mirrordrive-graph
//!
//! Uses wiremock to simulate the Microsoft Graph API and verifies
//! end-to-end behavior of listing, delta queries, uploads, downloads and
//! deletions through the `IRemoteDrive` port.

mod common;

mod test_delta;
mod test_listing;
mod test_transfers;
