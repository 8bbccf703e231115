use std::sync::Arc;

use crate::{
    config::Config,
    db::Database,
    errors::AppResult,
    models::domain::{Part1Task, Part2Task},
    repositories::{MongoTaskQueue, MongoTestRepository, PART1_LANE, PART2_LANE},
    services::TestService,
};

#[derive(Clone)]
pub struct AppState {
    pub test_service: Arc<TestService>,
    pub db: Arc<Database>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> AppResult<Self> {
        let db = Database::connect(&config).await?;

        let test_repository = Arc::new(MongoTestRepository::new(&db));
        test_repository.ensure_indexes().await?;

        let part1_queue = Arc::new(MongoTaskQueue::<Part1Task>::new(&db, PART1_LANE));
        part1_queue.ensure_indexes().await?;
        let part2_queue = Arc::new(MongoTaskQueue::<Part2Task>::new(&db, PART2_LANE));
        part2_queue.ensure_indexes().await?;

        let test_service = Arc::new(TestService::new(test_repository, part1_queue, part2_queue));

        Ok(Self {
            test_service,
            db: Arc::new(db),
            config: Arc::new(config),
        })
    }
}
