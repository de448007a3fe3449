pub mod dashboard;
pub mod data;
pub mod logging;
pub mod panel;
pub mod risk;
pub mod scoring;
pub mod state;
pub mod views;
