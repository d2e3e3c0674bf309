//! The `__fetch__` native binding.
//!
//! A call records the script's callback, copies its arguments out of the
//! engine and hands them to a dispatch thread of its own. The thread runs
//! the handler off the loop and posts the result back with
//! [`LoopHandle::run_on_loop`]; the callback is only ever invoked on the
//! loop thread. Calls are independent and may complete in any order.
//!
//! Callbacks of in-flight calls are kept on the Rust side, in a table local
//! to the loop thread, so scripts cannot reach or replace them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rquickjs::prelude::Rest;
use rquickjs::{CatchResultExt, Ctx, Function, IntoJs, Object, Persistent, Value};
use url::Url;

use crate::context::AmbientProvider;
use crate::decode::{self, RawCall};
use crate::dispatch::{self, BridgeResult};
use crate::error::{Error, Result};
use crate::event_loop::LoopHandle;
use crate::handler::Handler;
use crate::polyfill::BINDING;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Callbacks awaiting a result, keyed by call id. Only touched on a loop
    /// thread, and emptied by [`PendingRelease`] before its engine goes away.
    static PENDING: RefCell<HashMap<u64, Persistent<Function<'static>>>> = RefCell::new(HashMap::new());
}

struct BridgeInner {
    handler: Arc<dyn Handler>,
    ambient: Option<Arc<dyn AmbientProvider>>,
    base_url: Option<Url>,
}

/// Configured bridge: the handler, the ambient provider and the base URL.
/// Cheap to clone; one bridge can be enabled on many environments.
#[derive(Clone)]
pub struct FetchBridge {
    inner: Arc<BridgeInner>,
}

impl std::fmt::Debug for FetchBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchBridge")
            .field("ambient", &self.inner.ambient.is_some())
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

impl FetchBridge {
    pub fn builder() -> FetchBridgeBuilder {
        FetchBridgeBuilder::default()
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.inner.base_url.as_ref()
    }

    /// Handle one `__fetch__(url, options, callback)` invocation. Never
    /// throws into the script for a bad request.
    fn call<'js>(&self, ctx: &Ctx<'js>, handle: &LoopHandle, args: &[Value<'js>]) {
        let Some(callback) = args.get(2).and_then(|v| v.as_function()).cloned() else {
            tracing::warn!("{BINDING} called without a callback; ignoring");
            return;
        };

        let raw = RawCall::from_args(ctx, args);
        let ambient = self.inner.ambient.as_ref().and_then(|p| p.ambient());

        let id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        PENDING.with(|pending| {
            pending.borrow_mut().insert(id, Persistent::save(ctx, callback));
        });

        let fallback = raw.clone();
        let inner = Arc::clone(&self.inner);
        let loop_handle = handle.clone();
        let spawned = std::thread::Builder::new()
            .name("fetch-bridge-dispatch".into())
            .spawn(move || {
                let mut guard = DispatchGuard {
                    id,
                    handle: loop_handle,
                    done: false,
                };
                let draft = decode::decode(raw);
                let result = dispatch::dispatch(
                    inner.handler.as_ref(),
                    draft,
                    inner.base_url.as_ref(),
                    ambient.as_ref(),
                );
                guard.done = true;
                if !guard.handle.run_on_loop(move |ctx| deliver(&ctx, id, result)) {
                    tracing::warn!(call = id, "event loop stopped; dropping fetch result");
                }
            });

        if let Err(e) = spawned {
            tracing::warn!(call = id, error = %e, "failed to spawn fetch dispatch thread");
            let draft = decode::decode(fallback);
            let result = BridgeResult::internal_error(
                draft.method,
                draft.url,
                format!("failed to spawn dispatch thread: {e}"),
            );
            handle.run_on_loop(move |ctx| deliver(&ctx, id, result));
        }
    }
}

/// Forgets the call's callback if its dispatch thread unwinds before a
/// result was produced.
struct DispatchGuard {
    id: u64,
    handle: LoopHandle,
    done: bool,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let id = self.id;
        tracing::error!(call = id, "fetch handler panicked; its callback will not be invoked");
        self.handle.run_on_loop(move |_ctx| {
            PENDING.with(|pending| pending.borrow_mut().remove(&id));
        });
    }
}

/// Builder for [`FetchBridge`]. A handler is required.
#[derive(Default)]
pub struct FetchBridgeBuilder {
    handler: Option<Arc<dyn Handler>>,
    ambient: Option<Arc<dyn AmbientProvider>>,
    base_url: Option<Url>,
}

impl FetchBridgeBuilder {
    pub fn handler(self, handler: impl Handler + 'static) -> Self {
        self.shared_handler(Arc::new(handler))
    }

    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Source of the outer request, read on every call.
    pub fn ambient(mut self, provider: impl AmbientProvider + 'static) -> Self {
        self.ambient = Some(Arc::new(provider));
        self
    }

    /// Base for resolving relative fetch URLs.
    pub fn base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    pub fn build(self) -> Result<FetchBridge> {
        let handler = self.handler.ok_or(Error::MissingHandler)?;

        Ok(FetchBridge {
            inner: Arc::new(BridgeInner {
                handler,
                ambient: self.ambient,
                base_url: self.base_url,
            }),
        })
    }
}

/// Define `__fetch__` in `ctx`'s globals.
pub(crate) fn register<'js>(ctx: &Ctx<'js>, bridge: FetchBridge, handle: LoopHandle) -> rquickjs::Result<()> {
    let binding = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        bridge.call(&ctx, &handle, &args.0)
    })?
    .with_name(BINDING)?;
    ctx.globals().set(BINDING, binding)?;

    tracing::info!(binding = BINDING, "fetch bridge registered");
    Ok(())
}

/// Drops every pending callback of the current loop thread when it goes
/// out of scope. Must be dropped before the thread's runtime.
pub(crate) struct PendingRelease;

impl Drop for PendingRelease {
    fn drop(&mut self) {
        let released = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
        if !released.is_empty() {
            tracing::debug!(calls = released.len(), "dropping callbacks of unfinished fetch calls");
        }
    }
}

/// Number of calls on the current loop thread still awaiting a result.
pub(crate) fn pending_calls() -> usize {
    PENDING.with(|pending| pending.borrow().len())
}

/// Invoke the callback for call `id` with `(null, result)`. Runs on the loop.
fn deliver(ctx: &Ctx<'_>, id: u64, result: BridgeResult) {
    if let Err(e) = invoke_callback(ctx, id, result).catch(ctx) {
        tracing::warn!(call = id, error = %e, "fetch callback threw");
    }
}

fn invoke_callback<'js>(ctx: &Ctx<'js>, id: u64, result: BridgeResult) -> rquickjs::Result<()> {
    let saved = PENDING.with(|pending| pending.borrow_mut().remove(&id));
    let Some(saved) = saved else {
        tracing::debug!(call = id, "no pending callback for fetch result");
        return Ok(());
    };

    let callback = saved.restore(ctx)?;
    callback.call((Value::new_null(ctx.clone()), result))
}

impl<'js> IntoJs<'js> for BridgeResult {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let headers = Object::new(ctx.clone())?;
        for (name, values) in self.headers {
            headers.set(name, values)?;
        }

        let result = Object::new(ctx.clone())?;
        result.set("body", self.body)?;
        result.set("headers", headers)?;
        result.set("status", i32::from(self.status))?;
        result.set("method", self.method)?;
        result.set("url", self.url)?;
        Ok(result.into_value())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::event_loop::EventLoop;
    use crate::handler::SyntheticRequest;
    use crate::recorder::ResponseRecorder;

    fn noop(_req: SyntheticRequest, _res: &mut ResponseRecorder) {}

    fn enabled(handler: impl Handler + 'static) -> EventLoop {
        let event_loop = EventLoop::start().unwrap();
        let bridge = FetchBridge::builder().handler(handler).build().unwrap();
        let handle = event_loop.handle();
        event_loop
            .call(move |ctx| register(&ctx, bridge, handle).unwrap())
            .unwrap();
        event_loop
    }

    fn wait_for_no_pending(event_loop: &EventLoop) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while event_loop.call(|_ctx| pending_calls()).unwrap() > 0 {
            assert!(Instant::now() < deadline, "fetch calls still pending");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_build_requires_handler() {
        let err = FetchBridge::builder().build().unwrap_err();
        assert!(matches!(err, Error::MissingHandler));
    }

    #[test]
    fn test_build_outside_runtime() {
        let base = Url::parse("http://localhost/").unwrap();
        let bridge = FetchBridge::builder()
            .handler(noop)
            .base_url(base.clone())
            .build()
            .unwrap();
        assert_eq!(bridge.base_url(), Some(&base));
    }

    #[test]
    fn test_pending_table_not_visible_to_scripts() {
        let event_loop = enabled(|_req: SyntheticRequest, res: &mut ResponseRecorder| res.write_body(b"ok"));
        let names = event_loop
            .call(|ctx| {
                ctx.eval::<(), _>("__fetch__('http://localhost/', {}, (err, res) => { globalThis.body = res.body; });")
                    .unwrap();
                ctx.eval::<String, _>("Object.getOwnPropertyNames(globalThis).filter(n => n.startsWith('__fetch')).join(',')")
                    .unwrap()
            })
            .unwrap();
        assert_eq!(names, BINDING);

        wait_for_no_pending(&event_loop);
        let body = event_loop
            .call(|ctx| ctx.eval::<String, _>("globalThis.body").unwrap())
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[test]
    fn test_handler_panic_releases_pending_call() {
        let event_loop = enabled(|req: SyntheticRequest, res: &mut ResponseRecorder| {
            if req.uri().path() == "/boom" {
                panic!("handler failure");
            }
            res.write_body(b"ok");
        });
        event_loop
            .call(|ctx| {
                ctx.eval::<(), _>(
                    "__fetch__('http://localhost/boom', {}, () => { globalThis.boom = true; });
                     __fetch__('http://localhost/fine', {}, (err, res) => { globalThis.fine = res.body; });",
                )
                .unwrap();
            })
            .unwrap();

        wait_for_no_pending(&event_loop);
        let (boom, fine) = event_loop
            .call(|ctx| {
                (
                    ctx.eval::<bool, _>("globalThis.boom === true").unwrap(),
                    ctx.eval::<String, _>("globalThis.fine").unwrap(),
                )
            })
            .unwrap();
        assert!(!boom);
        assert_eq!(fine, "ok");
    }

    #[test]
    fn test_stop_with_call_in_flight() {
        let mut event_loop = enabled(|_req: SyntheticRequest, res: &mut ResponseRecorder| {
            std::thread::sleep(Duration::from_millis(200));
            res.write_body(b"late");
        });
        let pending = event_loop
            .call(|ctx| {
                ctx.eval::<(), _>("__fetch__('http://localhost/', {}, () => {});").unwrap();
                pending_calls()
            })
            .unwrap();
        assert_eq!(pending, 1);
        event_loop.stop();
    }
}
