use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::info;

use crate::types::GenericBoxedStream;

enum Next<T> {
    Item(T),
    Ended,
    Shutdown,
}

/// Await the next item from a stream or a shutdown signal.
async fn next_or_shutdown<T>(
    mut stream: Pin<&mut (dyn Stream<Item = T> + Send)>,
    shutdown: Pin<&mut Notified<'_>>,
) -> Next<T> {
    tokio::select! {
        item = stream.next() => match item {
            Some(item) => Next::Item(item),
            None => Next::Ended,
        },
        _ = shutdown => Next::Shutdown,
    }
}

/// Feed every stream item to `handler` until the stream ends or shutdown
/// is requested.
pub async fn serve_stream<T>(
    mut stream: GenericBoxedStream<T>,
    shutdown_notify: Arc<Notify>,
    mut handler: impl FnMut(T) + Send,
) {
    let shutdown = shutdown_notify.notified();
    tokio::pin!(shutdown);
    shutdown.as_mut().enable();

    loop {
        match next_or_shutdown(stream.as_mut(), shutdown.as_mut()).await {
            Next::Item(item) => handler(item),
            Next::Ended => {
                info!("Stream ended");
                break;
            }
            Next::Shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }
}
