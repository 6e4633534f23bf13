pub mod job;
pub mod lookup;
pub mod process;
pub mod record;
