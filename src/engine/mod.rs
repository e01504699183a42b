pub mod arbiter;
pub mod assignment;
pub mod delivery;
pub mod queue;
pub mod release;
pub mod selection;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;
