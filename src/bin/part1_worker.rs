use std::sync::Arc;
use std::time::Duration;

use viva_server::{
    config::Config,
    db::Database,
    models::domain::Part1Task,
    repositories::{MongoTaskQueue, MongoTestRepository, PART1_LANE},
    services::{HttpBlobStore, IseReadingGateway, Part1Worker, RetryPolicy},
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    config.validate_for_production();

    let db = Database::connect(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to database: {}", e));

    let tests = Arc::new(MongoTestRepository::new(&db));
    let queue = Arc::new(MongoTaskQueue::<Part1Task>::new(&db, PART1_LANE));
    if let Err(e) = queue.ensure_indexes().await {
        log::error!("Index creation failed: {}", e);
    }

    let gateway = Arc::new(IseReadingGateway::new(&config));
    let blobs = Arc::new(HttpBlobStore::new());
    let poll_interval = Duration::from_secs(config.queue_poll_interval_secs);

    let worker = Part1Worker::new(
        tests,
        queue,
        gateway,
        blobs,
        RetryPolicy::default(),
        poll_interval,
    );
    worker.run().await;
}
