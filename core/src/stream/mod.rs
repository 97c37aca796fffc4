mod broadcast;
mod chaos;
mod event;
mod tracker;
mod view;

pub use broadcast::BroadcastChannel;
pub use broadcast::DEFAULT_SUBSCRIBER_CAPACITY;
pub use broadcast::LocalBroadcast;
pub use broadcast::Subscription;
pub use chaos::ChaosBroadcast;
pub use chaos::ChaosConfig;
pub use event::Discontinuity;
pub use event::LogEntry;
pub use event::OutputSequencer;
pub use event::SequencedEvent;
pub use tracker::IngestOutcome;
pub use tracker::StreamTracker;
pub use tracker::format_discontinuity_label;
pub use view::DEGRADED_DETAIL;
pub use view::DEGRADED_TITLE;
pub use view::DegradedAlert;
pub use view::SessionView;
pub use view::ViewSnapshot;
pub use view::ViewTask;
