//! Integration tests: full cycles against an in-memory venue.

mod cycle;
mod mock_venue;
