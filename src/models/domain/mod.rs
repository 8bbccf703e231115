pub mod evaluation;
pub mod task;
pub mod test_item;

pub use evaluation::{DialogueEvaluation, ItemResult, ReadingEvaluation, TokenUsage, WordDetail};
pub use task::{Part1Task, Part2Task, Question};
pub use test::{PartUsage, Test, TestStatus, TokenLedger};
pub use test_item::TestItem;
