//! 日志模块
//!
//! 统一从这里引入日志宏，底层由 rat_logger 提供。
//! 库本身不负责初始化日志系统，由宿主程序决定输出方式。

pub use rat_logger::{trace, debug, info, warn, error};
