//! Pipeline bus message handling.

use gstreamer::{prelude::*, MessageRef, MessageView, ResourceError, StreamStatusType};

/// What a bus watcher should do after a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Keep watching.
    Continue,
    /// The pipeline reached end of stream.
    Stop,
    /// The source could not be opened; rebuild the pipeline once it is
    /// reachable again.
    Restart,
}

/// Classifies a message for the relay bus thread, logging errors and
/// warnings.
pub fn classify(message: &MessageRef) -> Verdict {
    match message.view() {
        MessageView::Error(err) => {
            tracing::error!(
                "Error received from element {}: {} ({:?})",
                source_name(message),
                err.error(),
                err.debug()
            );
            if err.error().matches(ResourceError::OpenReadWrite) {
                Verdict::Restart
            } else {
                Verdict::Continue
            }
        }
        MessageView::Warning(warning) => {
            tracing::warn!(
                "Warning received from element {}: {} ({:?})",
                source_name(message),
                warning.error(),
                warning.debug()
            );
            Verdict::Continue
        }
        MessageView::Eos(_) => {
            tracing::info!("End-Of-Stream reached");
            Verdict::Stop
        }
        _ => Verdict::Continue,
    }
}

/// Upper-case name of a stream status type.
#[must_use]
pub fn stream_status_name(kind: StreamStatusType) -> &'static str {
    match kind {
        StreamStatusType::Create => "CREATE",
        StreamStatusType::Enter => "ENTER",
        StreamStatusType::Leave => "LEAVE",
        StreamStatusType::Destroy => "DESTROY",
        StreamStatusType::Start => "START",
        StreamStatusType::Pause => "PAUSE",
        StreamStatusType::Stop => "STOP",
        _ => "UNKNOWN",
    }
}

/// Logs every message of the pipeline `pipeline_name` in detail.
pub fn log_message(pipeline_name: &str, message: &MessageRef) {
    let source = source_name(message);
    match message.view() {
        MessageView::Error(err) => tracing::error!(
            "[{pipeline_name}] error from {source}: {} ({:?})",
            err.error(),
            err.debug()
        ),
        MessageView::Warning(warning) => tracing::warn!(
            "[{pipeline_name}] warning from {source}: {} ({:?})",
            warning.error(),
            warning.debug()
        ),
        MessageView::Eos(_) => tracing::info!("[{pipeline_name}] end of stream from {source}"),
        MessageView::StateChanged(change) => tracing::debug!(
            "[{pipeline_name}] {source} state changed from {:?} to {:?}",
            change.old(),
            change.current()
        ),
        MessageView::StreamStatus(status) => {
            let (kind, owner) = status.get();
            tracing::debug!(
                "[{pipeline_name}] stream status {} of {}",
                stream_status_name(kind),
                owner.name()
            );
        }
        _ => tracing::trace!("[{pipeline_name}] {:?} from {source}", message.type_()),
    }
}

fn source_name(message: &MessageRef) -> String {
    message.src().map_or_else(|| String::from("<none>"), |src| src.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gstreamer::{message, CoreError};

    #[test]
    fn unreachable_source_restarts() {
        gstreamer::init().unwrap();
        let message =
            message::Error::builder(ResourceError::OpenReadWrite, "Could not open resource").build();
        assert_eq!(classify(&message), Verdict::Restart);
        let message = message::Error::builder(ResourceError::NotFound, "Not found").build();
        assert_eq!(classify(&message), Verdict::Continue);
        let message = message::Error::builder(CoreError::Failed, "Failed").build();
        assert_eq!(classify(&message), Verdict::Continue);
        assert_eq!(classify(&message::Eos::new()), Verdict::Stop);
    }

    #[test]
    fn stream_status_names() {
        assert_eq!(stream_status_name(StreamStatusType::Create), "CREATE");
        assert_eq!(stream_status_name(StreamStatusType::Enter), "ENTER");
        assert_eq!(stream_status_name(StreamStatusType::Leave), "LEAVE");
        assert_eq!(stream_status_name(StreamStatusType::Destroy), "DESTROY");
        assert_eq!(stream_status_name(StreamStatusType::Start), "START");
        assert_eq!(stream_status_name(StreamStatusType::Pause), "PAUSE");
        assert_eq!(stream_status_name(StreamStatusType::Stop), "STOP");
    }
}
