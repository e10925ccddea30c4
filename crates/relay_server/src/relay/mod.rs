#![forbid(unsafe_code)]

pub mod destinations;
pub mod event_relay;
pub mod normalize;
pub mod shorten;
pub mod state;

pub use destinations::Destinations;
pub use event_relay::{EventRelay, NOW_PLAYING_PREFIX};
pub use shorten::UrlShortener;
pub use state::AnnouncementState;
