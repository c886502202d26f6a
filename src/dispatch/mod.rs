//! Deliver assembled messages: relay them over SMTP or write them to disk.
//!
//! The router renders each message exactly once and hands the same bytes to
//! whichever sink it was built with.

pub mod render;
pub mod simulate;
pub mod smtp;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::Result;
use crate::model::message::OutboundMessage;

pub use render::{render, RenderedMessage};
pub use simulate::{SimulationBundle, SimulationWriter};
pub use smtp::SmtpRelay;

/// Where dispatched messages go. Fixed for the lifetime of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Relay,
    Simulate,
}

/// Sends a rendered message onward.
pub trait RelayTransport {
    /// `rendered` is the exact byte stream to deliver; `message` is for logging.
    fn send(&self, message: &OutboundMessage, rendered: &RenderedMessage) -> Result<()>;
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Relayed { bytes: usize },
    Simulated(SimulationBundle),
}

enum Sink {
    Relay(Box<dyn RelayTransport>),
    Simulate(SimulationWriter),
}

pub struct DispatchRouter {
    sink: Sink,
}

impl DispatchRouter {
    pub fn relay(transport: Box<dyn RelayTransport>) -> Self {
        Self {
            sink: Sink::Relay(transport),
        }
    }

    pub fn simulate(writer: SimulationWriter) -> Self {
        Self {
            sink: Sink::Simulate(writer),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        match self.sink {
            Sink::Relay(_) => DispatchMode::Relay,
            Sink::Simulate(_) => DispatchMode::Simulate,
        }
    }

    /// Render `message` and deliver it. `timestamp` names simulation folders.
    pub fn dispatch(
        &mut self,
        message: &OutboundMessage,
        timestamp: DateTime<Local>,
    ) -> Result<DispatchResult> {
        let rendered = render(message)?;
        match &mut self.sink {
            Sink::Relay(transport) => {
                transport.send(message, &rendered)?;
                Ok(DispatchResult::Relayed {
                    bytes: rendered.len(),
                })
            }
            Sink::Simulate(writer) => writer
                .write(message, &rendered, timestamp)
                .map(DispatchResult::Simulated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::model::address::EmailAddress;
    use crate::model::attachment::Attachment;
    use crate::model::message::Body;
    use chrono::{TimeZone, Utc};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder(Rc<RefCell<Vec<Vec<u8>>>>);

    impl RelayTransport for Recorder {
        fn send(&self, _: &OutboundMessage, rendered: &RenderedMessage) -> Result<()> {
            self.0.borrow_mut().push(rendered.bytes.clone());
            Ok(())
        }
    }

    struct Refusing;

    impl RelayTransport for Refusing {
        fn send(&self, _: &OutboundMessage, _: &RenderedMessage) -> Result<()> {
            Err(RelayError::Transport("550 relay denied".into()))
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            subject: "Invoice 7".into(),
            sender: EmailAddress::bare("billing@vendor.test"),
            recipients: vec![EmailAddress::bare("ap@acme.test")],
            headers: vec![],
            date: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
            body: Body::plain("Attached."),
            attachments: vec![Attachment::new("a.csv", "text/csv", b"1,2".to_vec())],
        }
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_relay_and_simulate_send_identical_bytes() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut relay = DispatchRouter::relay(Box::new(Recorder(Rc::clone(&sent))));
        assert_eq!(relay.mode(), DispatchMode::Relay);
        let relayed = relay.dispatch(&message(), at()).unwrap();
        assert!(matches!(relayed, DispatchResult::Relayed { .. }));

        let dir = tempfile::tempdir().unwrap();
        let mut sim = DispatchRouter::simulate(SimulationWriter::new(dir.path()));
        let bundle = match sim.dispatch(&message(), at()).unwrap() {
            DispatchResult::Simulated(bundle) => bundle,
            other => panic!("expected a bundle, got {other:?}"),
        };

        assert_eq!(sent.borrow().len(), 1);
        assert_eq!(std::fs::read(bundle.eml_path).unwrap(), sent.borrow()[0]);
    }

    #[test]
    fn test_transport_error_surfaces() {
        let mut router = DispatchRouter::relay(Box::new(Refusing));
        let err = router.dispatch(&message(), at()).unwrap_err();
        assert_eq!(err.kind(), "transport_error");
    }
}
