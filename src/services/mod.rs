pub mod events;
pub mod listing_service;
pub mod storage;
pub mod tag_service;
pub mod validation;

pub use events::{EventPublisher, LoggingPublisher, NoopPublisher};
pub use listing_service::ListingService;
pub use storage::{ByteStream, FileInfo, LocalStorage, MemoryStorage, Storage};
pub use tag_service::TagService;
pub use validation::{DefaultValidator, Validator};
