pub mod chart;
pub mod mirror;
pub mod playlist;
