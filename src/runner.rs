//! Running whole scripts in a fetch-enabled environment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rquickjs::{CatchResultExt, Function, Value};
use tokio::sync::oneshot;

use crate::bootstrap;
use crate::bridge::FetchBridge;
use crate::error::{Error, Result};
use crate::event_loop::{EventLoop, LoopHandle};
use crate::polyfill::Polyfill;

const SETTLE: &str = "__settle__";

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

type Outcome = std::result::Result<String, String>;
type Settled = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;

/// One script engine with fetch enabled.
///
/// Construction blocks on the loop thread; call it from a blocking context
/// when inside an async runtime. Dropping the environment stops its loop.
pub struct Environment {
    event_loop: EventLoop,
    settled: Settled,
}

impl Environment {
    pub fn new(bridge: &FetchBridge) -> Result<Self> {
        Self::with_polyfill(bridge, &Polyfill::embedded())
    }

    pub fn with_polyfill(bridge: &FetchBridge, polyfill: &Polyfill) -> Result<Self> {
        let event_loop = EventLoop::start()?;
        bootstrap::enable(&event_loop, bridge, polyfill)?;

        let settled = Settled::default();
        let table = Arc::clone(&settled);
        event_loop.call(move |ctx| {
            let settle = Function::new(ctx.clone(), move |id: String, ok: bool, payload: String| {
                let Ok(id) = id.parse::<u64>() else {
                    return;
                };
                let outcome = if ok { Ok(payload) } else { Err(payload) };
                if let Some(tx) = lock(&table).remove(&id) {
                    let _ = tx.send(outcome);
                }
            })
            .and_then(|f| f.with_name(SETTLE))
            .and_then(|f| ctx.globals().set(SETTLE, f));
            settle.catch(&ctx).map_err(|e| Error::Engine(e.to_string()))
        })??;

        Ok(Self { event_loop, settled })
    }

    pub fn handle(&self) -> LoopHandle {
        self.event_loop.handle()
    }

    /// Evaluate `source` as the body of an async function and wait for it
    /// to settle. The resolved value comes back as JSON, `undefined` as
    /// `null`.
    pub async fn run(&self, source: &str, timeout: Option<Duration>) -> Result<serde_json::Value> {
        let id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.settled).insert(id, tx);

        let wrapped = wrap_script(id, source);
        let started = self
            .event_loop
            .call_async(move |ctx| {
                ctx.eval::<Value, _>(wrapped)
                    .catch(&ctx)
                    .map(drop)
                    .map_err(|e| e.to_string())
            })
            .await?;
        if let Err(message) = started {
            lock(&self.settled).remove(&id);
            return Err(Error::Script(message));
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    lock(&self.settled).remove(&id);
                    tracing::debug!(run = id, "script timed out");
                    return Err(Error::Timeout(limit));
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(Ok(json)) => Ok(serde_json::from_str(&json)?),
            Ok(Err(message)) => Err(Error::Script(message)),
            Err(_) => Err(Error::LoopStopped),
        }
    }
}

fn lock(settled: &Settled) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
    settled.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wrap_script(id: u64, source: &str) -> String {
    format!(
        r#"(async function () {{
{source}
}})().then(
  function (value) {{
    var json;
    try {{
      json = JSON.stringify(value === undefined ? null : value);
    }} catch (e) {{
      {SETTLE}("{id}", false, String(e));
      return;
    }}
    {SETTLE}("{id}", true, json === undefined ? "null" : json);
  }},
  function (error) {{
    {SETTLE}("{id}", false, String(error));
  }}
);"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_script_embeds_source_and_id() {
        let wrapped = wrap_script(7, "return 1;");
        assert!(wrapped.contains("\nreturn 1;\n"));
        assert!(wrapped.contains(r#"__settle__("7", true"#));
        assert!(wrapped.contains(r#"__settle__("7", false"#));
    }
}
