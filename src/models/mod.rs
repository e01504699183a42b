pub mod acceptance;
pub mod event;
pub mod opportunity;
pub mod order;
pub mod picker;
