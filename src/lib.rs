pub mod config;
pub mod crossref;
pub mod domain;
pub mod error;
pub mod insights;
pub mod ledger;
pub mod llm;
pub mod maintenance;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod source;
