use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Records callback invocations into a stream the test can assert on.
#[derive(Debug)]
pub struct Recorder<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> Recorder<T> {
    /// Records `item`. Items recorded after the stream was dropped are discarded.
    pub fn record(&self, item: T) {
        let _ = self.tx.send(item);
    }
}

/// Creates a [`Recorder`] and the stream of everything recorded through it.
#[must_use]
pub fn recorder<T>() -> (Recorder<T>, UnboundedReceiverStream<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recorder { tx }, UnboundedReceiverStream::new(rx))
}

/// Asserts the next recorded item equals `$expected`.
#[macro_export]
macro_rules! assert_next {
    ($stream: expr, $expected: expr) => {
        $crate::assert_next!($stream, $expected, timeout = 5)
    };
    ($stream: expr, $expected: expr, timeout = $secs: expr) => {
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .expect("timed out");
        let expected = $expected;
        match message {
            std::option::Option::Some(msg) => {
                assert_eq!(msg, expected, "Expected {:?}, got {:?}", expected, msg);
            }
            std::option::Option::None => {
                panic!("Expected {:?}, but channel was closed", expected);
            }
        }
    };
}

/// Asserts the stream ends, i.e. every [`Recorder`] feeding it was dropped.
#[macro_export]
macro_rules! assert_closed {
    ($stream: expr) => {
        $crate::assert_closed!($stream, timeout = 5)
    };
    ($stream: expr, timeout = $secs: expr) => {
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .expect("timed out");
        assert!(message.is_none(), "Expected closed stream, got {:?}", message)
    };
}

/// Asserts nothing is waiting in the stream right now and hands the stream back.
#[macro_export]
macro_rules! assert_empty {
    ($stream: expr) => {{
        let inner = $stream.into_inner();
        assert!(inner.is_empty(), "Stream should have no pending messages");
        tokio_stream::wrappers::UnboundedReceiverStream::new(inner)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorded_items_arrive_in_order() {
        let (recorder, mut stream) = recorder();

        recorder.record(1);
        recorder.clone().record(2);

        assert_next!(stream, 1);
        assert_next!(stream, 2);
        let mut stream = assert_empty!(stream);
        drop(recorder);
        assert_closed!(stream);
    }

    #[tokio::test]
    #[should_panic = "Stream should have no pending messages"]
    async fn assert_empty_rejects_pending_items() {
        let (recorder, stream) = recorder();
        recorder.record("left over");

        let _ = assert_empty!(stream);
    }
}
