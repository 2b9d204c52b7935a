/// Shared building blocks for the Gofer system.
///
/// `config` holds the immutable env-derived configuration structs,
/// `errors` the fetch error taxonomy, and `fetcher` the
/// download-and-serve core both binaries build on.
pub mod config;
pub mod errors;
pub mod fetcher;
