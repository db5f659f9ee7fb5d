// Integration tests for fetch coordination and signal aggregation
//
// Coordinators and aggregators are driven with in-process fetchers so
// ordering, cancellation and cache behavior can be checked without a
// backend.

mod coordinator_flow;
mod durable_tier;
mod signal_bundle;
