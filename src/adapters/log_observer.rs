//! Log-based envelope observer.
//!
//! Writes one structured line per envelope a channel receives or posts.
//! Plugs into [`ChannelHooks`] as the `got_message` / `post_message`
//! observers; a metrics or capture adapter would hook the same slots.

use std::rc::Rc;

use log::info;

use crate::ports::EnvelopeObserver;
use crate::rpc::channel::ChannelHooks;
use crate::rpc::envelope::Envelope;

/// Adapter that logs every envelope through the `log` facade.
#[derive(Debug, Clone)]
pub struct LogObserver {
    label: Rc<str>,
}

impl LogObserver {
    pub fn new(label: &str) -> Self {
        Self {
            label: Rc::from(label),
        }
    }

    /// Install both observers, replacing any already set.
    pub fn install(&self, hooks: ChannelHooks) -> ChannelHooks {
        ChannelHooks {
            got_message: Some(self.observer("RECV")),
            post_message: Some(self.observer("POST")),
            ..hooks
        }
    }

    fn observer(&self, direction: &'static str) -> EnvelopeObserver {
        let label = self.label.clone();
        Rc::new(move |origin: &str, envelope: &Envelope| {
            info!("{} | {} | {} | {}", direction, label, origin, describe(envelope));
        })
    }
}

/// One-line summary of an envelope.  Params and results are omitted.
pub fn describe(envelope: &Envelope) -> String {
    match envelope {
        Envelope::Request {
            id,
            method,
            callbacks,
            ..
        } => {
            if callbacks.is_empty() {
                format!("request id={id} method={method}")
            } else {
                format!(
                    "request id={id} method={method} callbacks=[{}]",
                    callbacks.join(",")
                )
            }
        }
        Envelope::Notification { method, .. } => format!("notification method={method}"),
        Envelope::CallbackInvoke { id, callback, .. } => {
            format!("callback id={id} name={callback}")
        }
        Envelope::ResponseSuccess { id, .. } => format!("result id={id}"),
        Envelope::ResponseError { id, error, message } => {
            format!("error id={id} kind={error} message={message:?}")
        }
    }
}
