pub mod blob_store;
pub mod dialogue_gateway;
pub mod rate_limit;
pub mod reading_gateway;
pub mod result_parser;
pub mod retry;
pub mod scoring;
pub mod test_service;
pub mod worker;

pub use blob_store::{BlobStore, HttpBlobStore};
pub use dialogue_gateway::{DialogueGateway, DialogueOutcome, OmniDialogueGateway};
pub use rate_limit::RateGate;
pub use reading_gateway::{IseReadingGateway, ReadingGateway};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use test_service::TestService;
pub use worker::{Part1Worker, Part2Worker};
