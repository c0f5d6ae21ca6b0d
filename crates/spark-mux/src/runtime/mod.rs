//! 驱动选择器的运行时设施：取消令牌、时钟与工作线程宿主。

mod cancellation;
mod clock;
mod driver;

pub use cancellation::Cancellation;
pub use clock::{Clock, SystemClock};
pub use driver::{SelectorDriver, WorkerId, WorkerReport};
