//! The three backend adapters.

pub mod google;
pub mod ics_dir;
pub mod outlook;

pub use google::GoogleCalendarSource;
pub use ics_dir::IcsDirSource;
pub use outlook::OutlookCalendarSource;
