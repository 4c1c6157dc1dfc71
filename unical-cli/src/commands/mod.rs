pub mod events;
pub mod resync;
pub mod status;
pub mod sync;
pub mod watch;
