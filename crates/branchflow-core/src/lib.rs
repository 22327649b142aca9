pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod extract;
pub mod frame;
pub mod ident;
pub mod load;
pub mod pipeline;
pub mod retry;
pub mod template;
pub mod transform;
pub mod watermark;
