pub mod config;
pub mod content;
pub mod generation;
pub mod ledger;
pub mod orchestration;
pub mod platform;
pub mod reply_logic;
pub mod runtime;
pub mod screening;
pub mod tagging;
