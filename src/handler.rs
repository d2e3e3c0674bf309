//! The host-supplied request processor.

use bytes::Bytes;

use crate::recorder::ResponseRecorder;

/// The in-memory request the bridge builds for each fetch call. The body is
/// `None` when the script sent none. Its extensions always hold one
/// [`RequestContext`](crate::context::RequestContext).
pub type SyntheticRequest = http::Request<Option<Bytes>>;

/// A synchronous, fully buffering request handler.
///
/// `serve` runs on a dispatch thread, never on the script's loop. It is
/// called exactly once per fetch call and must have written its entire
/// response into `res` when it returns. A panic is logged and that call's
/// callback is never invoked; other calls are unaffected.
pub trait Handler: Send + Sync {
    fn serve(&self, req: SyntheticRequest, res: &mut ResponseRecorder);
}

impl<F> Handler for F
where
    F: Fn(SyntheticRequest, &mut ResponseRecorder) + Send + Sync,
{
    fn serve(&self, req: SyntheticRequest, res: &mut ResponseRecorder) {
        self(req, res)
    }
}
