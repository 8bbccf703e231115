pub mod request;
pub mod response;

pub use request::{CreateTestRequest, SubmitPart1Request, SubmitPart2Request};
pub use response::{SubmitResponse, TestStatusResponse};
