pub mod deauth;
pub mod lifecycle;
