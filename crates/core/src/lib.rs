pub mod api;
pub mod config;
pub mod query_executor;
pub mod results;
pub mod schema;
pub mod suggestions;
pub mod uploads;
pub mod workbench;

#[must_use]
pub fn domain_name() -> &'static str {
    "quarry-core"
}
