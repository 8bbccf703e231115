pub mod test_handler;

pub use test_handler::{create_test, get_test_status, health_check, submit_part1, submit_part2};
