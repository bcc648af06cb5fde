#![deny(dead_code)]
#![deny(unused_imports)]

pub mod analyze;
pub mod config;
pub mod data;
pub mod estimate;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod scaler;
pub mod split;
pub mod table;
