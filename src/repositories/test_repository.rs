use async_trait::async_trait;
use mongodb::{bson::doc, options::IndexOptions, Collection, IndexModel};

use crate::{
    db::Database,
    errors::AppResult,
    models::domain::{Test, TestItem},
};

#[async_trait]
pub trait TestRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Test>>;
    async fn create(&self, test: Test) -> AppResult<Test>;
    async fn save(&self, test: &Test) -> AppResult<()>;
    /// Replace any previously stored items for the owning test, then insert
    /// the batch. Replacing keeps redelivered Part-2 tasks idempotent.
    async fn save_items(&self, test_id: &str, items: &[TestItem]) -> AppResult<()>;
}

pub struct MongoTestRepository {
    tests: Collection<Test>,
    items: Collection<TestItem>,
}

impl MongoTestRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            tests: db.get_collection("tests"),
            items: db.get_collection("test_items"),
        }
    }

    pub async fn ensure_indexes(&self) -> AppResult<()> {
        log::info!("Creating indexes for tests and test_items collections");

        let id_index = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("id_unique".to_string())
                    .build(),
            )
            .build();
        self.tests.create_index(id_index).await?;

        let status_index = IndexModel::builder().keys(doc! { "status": 1 }).build();
        self.tests.create_index(status_index).await?;

        let item_index = IndexModel::builder()
            .keys(doc! { "test_id": 1, "question_no": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("test_question_unique".to_string())
                    .build(),
            )
            .build();
        self.items.create_index(item_index).await?;

        Ok(())
    }
}

#[async_trait]
impl TestRepository for MongoTestRepository {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Test>> {
        let test = self.tests.find_one(doc! { "id": id }).await?;
        Ok(test)
    }

    async fn create(&self, test: Test) -> AppResult<Test> {
        self.tests.insert_one(&test).await?;
        Ok(test)
    }

    async fn save(&self, test: &Test) -> AppResult<()> {
        self.tests
            .replace_one(doc! { "id": &test.id }, test)
            .await?;
        Ok(())
    }

    async fn save_items(&self, test_id: &str, items: &[TestItem]) -> AppResult<()> {
        self.items.delete_many(doc! { "test_id": test_id }).await?;
        if !items.is_empty() {
            self.items.insert_many(items).await?;
        }
        Ok(())
    }
}
