pub mod batch;
pub mod cache;
pub mod cli;
pub mod geocode;
pub mod images;
pub mod maintenance;
pub mod merge;
pub mod models;
pub mod open_now;
pub mod pipeline;
pub mod scrape;
pub mod signals;
pub mod store;
pub mod util;
