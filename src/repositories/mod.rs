pub mod task_queue;
pub mod test_repository;

pub use task_queue::{Delivery, MongoTaskQueue, TaskQueue, PART1_LANE, PART2_LANE};
pub use test_repository::{MongoTestRepository, TestRepository};
