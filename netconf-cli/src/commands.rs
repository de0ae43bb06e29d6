pub mod builtin;
pub mod hello;
pub mod notification;
pub mod rpc;
