//! In-process `fetch` for embedded QuickJS scripts.
//!
//! Scripts running on an [`EventLoop`] call `fetch`; each call is turned into
//! an [`http::Request`] and served by a host [`Handler`] on a dispatch thread,
//! without touching the network. The response comes back to the script on
//! its own loop thread.
//!
//! ```no_run
//! # async fn demo() -> fetch_bridge::Result<()> {
//! use fetch_bridge::{Environment, FetchBridge, ResponseRecorder, SyntheticRequest};
//!
//! let bridge = FetchBridge::builder()
//!     .handler(|_req: SyntheticRequest, res: &mut ResponseRecorder| {
//!         res.write_body(b"hello");
//!     })
//!     .build()?;
//! let env = tokio::task::spawn_blocking(move || Environment::new(&bridge))
//!     .await
//!     .expect("environment task")?;
//! let text = env
//!     .run("return (await fetch('http://app/greeting')).text();", None)
//!     .await?;
//! assert_eq!(text, "hello");
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod bridge;
pub mod compose;
pub mod config;
pub mod context;
pub mod cookie;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod handler;
pub mod headers;
pub mod polyfill;
pub mod protocol;
pub mod recorder;
pub mod routes;
pub mod runner;

pub use bootstrap::enable;
pub use bridge::{FetchBridge, FetchBridgeBuilder};
pub use context::{AmbientContext, AmbientProvider, AmbientSlot, OuterRequest, RequestContext};
pub use cookie::Cookie;
pub use dispatch::BridgeResult;
pub use error::{Error, Result};
pub use event_loop::{EventLoop, LoopHandle};
pub use handler::{Handler, SyntheticRequest};
pub use polyfill::Polyfill;
pub use recorder::ResponseRecorder;
pub use routes::RouteTable;
pub use runner::Environment;
