//! WebSocket chat relay: every frame a client sends is forwarded to every
//! other connected client.
//!
//! A connection's first frame is its identity; each later frame is relayed
//! verbatim. Modules, leaves first:
//!
//! - [`registry`] maps identities to live connections and hands out
//!   point-in-time snapshots.
//! - [`dispatch`] fans a message out to everyone in a snapshot but the sender.
//! - [`session`] drives one connection through registration, relaying and
//!   guaranteed cleanup.
//! - [`server`] accepts TCP connections and spawns a session for each.
//! - [`client`] logs in, announces the identity and multiplexes user input
//!   with inbound frames.
//! - [`frame`] reads and writes one text frame per message.
//! - [`auth`] and [`display`] are the credential check and output sink the
//!   client relies on; [`cli`] and [`config`] hold the command line and the
//!   settings derived from it.

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod frame;
pub mod registry;
pub mod server;
pub mod session;
