use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument},
    Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::Database,
    errors::{AppError, AppResult},
};

pub const PART1_LANE: &str = "part1_evaluation_tasks";
pub const PART2_LANE: &str = "part2_evaluation_tasks";

/// A claimed message. Holds the broker identity needed to ack or nack.
#[derive(Clone, Debug)]
pub struct Delivery<T> {
    pub message_id: String,
    pub delivery_count: i32,
    pub task: T,
}

/// Durable at-least-once message lane. Consumers hold at most one
/// unacknowledged message at a time (the claim/ack cycle is prefetch = 1 by
/// construction); `nack` returns the message for redelivery.
#[async_trait]
pub trait TaskQueue<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn publish(&self, task: &T) -> AppResult<()>;
    async fn claim(&self) -> AppResult<Option<Delivery<T>>>;
    async fn ack(&self, message_id: &str) -> AppResult<()>;
    async fn nack(&self, message_id: &str) -> AppResult<()>;
    /// Return in-flight messages older than the visibility timeout to the
    /// lane. Run at consumer startup for crash recovery.
    async fn requeue_stale(&self, visibility_timeout: Duration) -> AppResult<u64>;
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct QueueMessage<T> {
    message_id: String,
    state: String,
    delivery_count: i32,
    created_at: i64,
    claimed_at: Option<i64>,
    #[serde(flatten)]
    task: T,
}

const STATE_QUEUED: &str = "queued";
const STATE_INFLIGHT: &str = "inflight";

/// Mongo-backed lane. One collection per lane; a message is claimed with an
/// atomic queued -> inflight transition so concurrent workers never share a
/// delivery.
pub struct MongoTaskQueue<T: Send + Sync> {
    collection: Collection<QueueMessage<T>>,
    lane: String,
}

impl<T> MongoTaskQueue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(db: &Database, lane: &str) -> Self {
        Self {
            collection: db.get_collection(lane),
            lane: lane.to_string(),
        }
    }

    pub async fn ensure_indexes(&self) -> AppResult<()> {
        let claim_index = IndexModel::builder()
            .keys(doc! { "state": 1, "created_at": 1 })
            .build();
        self.collection.create_index(claim_index).await?;

        let id_index = IndexModel::builder()
            .keys(doc! { "message_id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("message_id_unique".to_string())
                    .build(),
            )
            .build();
        self.collection.create_index(id_index).await?;

        Ok(())
    }
}

#[async_trait]
impl<T> TaskQueue<T> for MongoTaskQueue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn publish(&self, task: &T) -> AppResult<()> {
        let message = QueueMessage {
            message_id: Uuid::new_v4().to_string(),
            state: STATE_QUEUED.to_string(),
            delivery_count: 0,
            created_at: Utc::now().timestamp_millis(),
            claimed_at: None,
            task: task.clone(),
        };

        self.collection.insert_one(&message).await.map_err(|e| {
            AppError::EnqueueError(format!("lane {} unreachable: {}", self.lane, e))
        })?;

        log::info!("Published message {} to {}", message.message_id, self.lane);
        Ok(())
    }

    async fn claim(&self) -> AppResult<Option<Delivery<T>>> {
        let options = FindOneAndUpdateOptions::builder()
            .sort(doc! { "created_at": 1 })
            .return_document(ReturnDocument::After)
            .build();

        let claimed = self
            .collection
            .find_one_and_update(
                doc! { "state": STATE_QUEUED },
                doc! {
                    "$set": {
                        "state": STATE_INFLIGHT,
                        "claimed_at": Utc::now().timestamp_millis(),
                    },
                    "$inc": { "delivery_count": 1 },
                },
            )
            .with_options(options)
            .await?;

        Ok(claimed.map(|message| Delivery {
            message_id: message.message_id,
            delivery_count: message.delivery_count,
            task: message.task,
        }))
    }

    async fn ack(&self, message_id: &str) -> AppResult<()> {
        self.collection
            .delete_one(doc! { "message_id": message_id, "state": STATE_INFLIGHT })
            .await?;
        Ok(())
    }

    async fn nack(&self, message_id: &str) -> AppResult<()> {
        self.collection
            .update_one(
                doc! { "message_id": message_id, "state": STATE_INFLIGHT },
                doc! { "$set": { "state": STATE_QUEUED, "claimed_at": null } },
            )
            .await?;
        log::warn!("Message {} returned to {} for redelivery", message_id, self.lane);
        Ok(())
    }

    async fn requeue_stale(&self, visibility_timeout: Duration) -> AppResult<u64> {
        let cutoff = Utc::now().timestamp_millis() - visibility_timeout.as_millis() as i64;

        let result = self
            .collection
            .update_many(
                doc! { "state": STATE_INFLIGHT, "claimed_at": { "$lt": cutoff } },
                doc! { "$set": { "state": STATE_QUEUED, "claimed_at": null } },
            )
            .await?;

        if result.modified_count > 0 {
            log::warn!(
                "Requeued {} stale in-flight message(s) on {}",
                result.modified_count,
                self.lane
            );
        }
        Ok(result.modified_count)
    }
}
