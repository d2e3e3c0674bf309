//! Enabling fetch on an event loop.

use rquickjs::{CatchResultExt, Value};

use crate::bridge::{self, FetchBridge};
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::polyfill::{Polyfill, BINDING};

/// Register the native binding on `event_loop` and run `polyfill` there, so
/// that `fetch` is callable by every script evaluated afterwards.
///
/// Must not be called from the loop thread. On error the environment should
/// be discarded: the binding may already be defined.
pub fn enable(event_loop: &EventLoop, bridge: &FetchBridge, polyfill: &Polyfill) -> Result<()> {
    let bridge = bridge.clone();
    let handle = event_loop.handle();
    let polyfill = polyfill.clone();

    event_loop.call(move |ctx| -> Result<()> {
        bridge::register(&ctx, bridge, handle)
            .catch(&ctx)
            .map_err(|e| Error::Bootstrap(format!("register {BINDING}: {e}")))?;

        ctx.eval::<Value, _>(polyfill.source())
            .catch(&ctx)
            .map_err(|e| Error::Bootstrap(format!("{}: {e}", polyfill.name())))?;

        tracing::debug!(polyfill = polyfill.name(), "fetch polyfill loaded");
        Ok(())
    })?
}

impl FetchBridge {
    /// See [`enable`].
    pub fn enable(&self, event_loop: &EventLoop, polyfill: &Polyfill) -> Result<()> {
        enable(event_loop, self, polyfill)
    }
}
