pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod poller;
pub mod report;
pub mod review;

#[cfg(test)]
pub(crate) mod test_helpers;
