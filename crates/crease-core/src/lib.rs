// Library root: configuration, wire protocol, and the two transports
// (real-time STOMP channels and the request/response data service).

pub mod api;
pub mod config;
pub mod protocol;
pub mod stomp;
pub mod ws_client;
