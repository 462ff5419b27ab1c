//! The caller's after-callback.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use sp_core::{Error, Result};

use crate::session::PlaybackSession;

type Plain = Box<dyn FnOnce() + Send>;
type WithSession = Box<dyn FnOnce(&PlaybackSession) + Send>;

/// Invoked exactly once when a session settles.
///
/// Both forms are `FnOnce`, so a second invocation cannot be expressed.
pub enum AfterCallback {
    /// Takes no arguments.
    Plain(Plain),
    /// Receives the settled session.
    WithSession(WithSession),
}

impl AfterCallback {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        AfterCallback::Plain(Box::new(f))
    }

    pub fn with_session(f: impl FnOnce(&PlaybackSession) + Send + 'static) -> Self {
        AfterCallback::WithSession(Box::new(f))
    }

    /// Run the callback, turning a panic into [`Error::Callback`].
    pub(crate) fn invoke(self, session: &PlaybackSession) -> Result<()> {
        catch_unwind(AssertUnwindSafe(|| match self {
            AfterCallback::Plain(f) => f(),
            AfterCallback::WithSession(f) => f(session),
        }))
        .map_err(|payload| Error::Callback(panic_message(payload.as_ref())))
    }
}

impl fmt::Debug for AfterCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AfterCallback::Plain(_) => f.write_str("AfterCallback::Plain"),
            AfterCallback::WithSession(_) => f.write_str("AfterCallback::WithSession"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
