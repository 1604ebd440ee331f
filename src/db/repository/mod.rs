pub mod schedule;
pub mod streamer;
pub mod tracking;
pub mod user;

pub use schedule::ScheduleRepository;
pub use streamer::StreamerRepository;
pub use tracking::TrackingRepository;
pub use user::UserRepository;
