//! Frontend listener.
//!
//! Binds the balancer's listen address and runs the accept loop, handing
//! each accepted connection to the protocol-specific handler.

mod listener;

pub(crate) use listener::FrontendListener;
