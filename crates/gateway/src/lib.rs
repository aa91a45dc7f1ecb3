//! Reconnecting Socket.IO v4 client for the Mew server gateway.
//!
//! The wire layer is Engine.IO over a single WebSocket: a text message may
//! carry several frames separated by the `0x1E` record separator, each frame
//! starting with an Engine.IO packet type digit. The client handles the auth
//! handshake, keepalive, and reconnect policy; everything above the
//! `42[event, payload]` envelope belongs to the caller.

pub mod client;
pub mod frame;
pub mod mention;
pub mod reconnect;

pub use client::{
    run_gateway, run_gateway_once, EmitHandle, EventSink, GatewayEvent, GatewayOptions, TokenSource,
};
pub use frame::{emit_frame, split_frames, Frame};
pub use mention::MentionStripper;
pub use reconnect::ReconnectBackoff;
