//! Lumen 工具集
//!
//! 目前只提供日志初始化，供各个可执行程序共享同一种日志格式。

pub mod init_log;
