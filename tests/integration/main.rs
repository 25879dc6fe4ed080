//! Integration tests for the channel engine, in local and distributed
//! mode. Distributed scenarios run two lobbies against a shared
//! in-memory cluster fake with synchronous delivery.

mod channel_test;
mod distributed_test;
mod helpers;
mod presence_test;
