//! # Execution Module / 执行模块
//!
//! Everything that spans the isolation boundary: the isolated context and its
//! wire protocol, the execution proxy living inside it, the result bus that
//! relays events back to the host, and the environment that owns the lifecycle.
//!
//! 跨越隔离边界的一切：隔离上下文及其传输协议、位于其中的执行代理、
//! 将事件中继回宿主的结果总线，以及管理生命周期的执行环境。

pub mod bus;
pub mod context;
pub mod environment;
pub mod proxy;
