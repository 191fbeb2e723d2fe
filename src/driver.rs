//! Feeding a stream of entries through a transformer.

use std::{future::poll_fn, pin::pin};

use futures::{Stream, StreamExt};
use log::{debug, warn};

use crate::{entry::TarEntry, sink::EntrySink, transformer::TarEntryTransformer};

/// Drives `transformer` over every entry of `input`, emitting into `sink`.
///
/// The sink is bound first.  Entries are handled strictly one after the other, and before each
/// one the driver waits until the sink reports room, so a slow consumer throttles reading.  When
/// the input is exhausted the end hook runs and the sink is finished.
///
/// The first failure (reading input, a hook, or the transformer itself) stops the run: nothing
/// else is handled, the sink is aborted so its consumer sees the error, and the error is returned
/// unchanged.
pub async fn drive<T, S, I, E>(
    transformer: &mut TarEntryTransformer<T, S>,
    input: I,
    sink: S,
) -> anyhow::Result<()>
where
    S: EntrySink,
    I: Stream<Item = Result<TarEntry, E>>,
    E: Into<anyhow::Error>,
{
    transformer.bind_sink(sink)?;

    let result = run(transformer, input).await;

    let sink = transformer.sink_mut()?;
    match result {
        Ok(()) => {
            debug!("transformation finished");
            sink.finish();
            Ok(())
        }
        Err(err) => {
            warn!("transformation failed: {err:#}");
            sink.abort(&format!("{err:#}"));
            Err(err)
        }
    }
}

async fn run<T, S, I, E>(transformer: &mut TarEntryTransformer<T, S>, input: I) -> anyhow::Result<()>
where
    S: EntrySink,
    I: Stream<Item = Result<TarEntry, E>>,
    E: Into<anyhow::Error>,
{
    let mut input = pin!(input);

    while let Some(entry) = input.next().await {
        let entry = entry.map_err(Into::<anyhow::Error>::into)?;

        let sink = transformer.sink_mut()?;
        poll_fn(|cx| sink.poll_ready(cx)).await;

        transformer.handle_entry(entry).await?;
    }

    transformer.handle_end().await
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use futures::stream;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{
        error::TransformError,
        sink::channel,
        transformer::{Phase, TransformerOptions},
    };

    fn entries(names: &[&str]) -> Vec<anyhow::Result<TarEntry>> {
        names
            .iter()
            .map(|name| Ok(TarEntry::from_bytes(name, name.as_bytes().to_vec())?))
            .collect()
    }

    fn passthrough() -> TarEntryTransformer<()> {
        TarEntryTransformer::new(TransformerOptions::<()>::new().on_entry_sync(
            |transformer, entry| {
                transformer.push(entry)?;
                Ok(())
            },
        ))
    }

    #[tokio::test]
    async fn test_drive_finishes_sink() {
        let (tx, rx) = channel(16);
        let mut transformer = passthrough();

        drive(&mut transformer, stream::iter(entries(&["a", "b"])), tx)
            .await
            .unwrap();
        assert_eq!(transformer.phase(), Phase::Ended);

        let paths: Vec<String> = rx.map(|entry| entry.unwrap().path()).collect().await;
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_drive_input_error_aborts() {
        let (tx, rx) = channel(16);
        let mut transformer = passthrough();

        let mut input = entries(&["a"]);
        input.push(Err(TransformError::UnexpectedEof.into()));
        input.extend(entries(&["never"]));

        let err = drive(&mut transformer, stream::iter(input), tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransformError>(),
            Some(TransformError::UnexpectedEof)
        ));
        assert_eq!(transformer.entries_handled(), 1);
        // end hook never ran
        assert_eq!(transformer.phase(), Phase::Processing);

        let items: Vec<_> = rx.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().path(), "a");
        assert!(matches!(items[1], Err(TransformError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_drive_rejects_prebound_transformer() {
        let (tx, _rx) = channel(16);
        let (tx2, _rx2) = channel(16);
        let mut transformer = passthrough();
        transformer.bind_sink(tx).unwrap();

        let err = drive(&mut transformer, stream::iter(entries(&["a"])), tx2)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransformError>(),
            Some(TransformError::AlreadyBound)
        ));
        assert_eq!(transformer.entries_handled(), 0);
    }

    #[tokio::test]
    async fn test_drive_waits_for_room() {
        // with a high-water mark of one, the driver may never get more than one
        // entry ahead of the consumer
        let (tx, mut rx) = channel(1);
        let handled = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&handled);
        let mut transformer = TarEntryTransformer::new(
            TransformerOptions::<()>::new().on_entry_sync(move |transformer, entry| {
                counter.fetch_add(1, Ordering::SeqCst);
                transformer.push(entry)?;
                Ok(())
            }),
        );

        let names = ["a", "b", "c", "d"];
        let produce = drive(&mut transformer, stream::iter(entries(&names)), tx);
        let consume = async {
            let mut seen = vec![];
            while let Some(entry) = rx.next().await {
                let handled_now = handled.load(Ordering::SeqCst);
                assert!(
                    handled_now <= seen.len() + 2,
                    "driver ran ahead: {handled_now} handled, {} received",
                    seen.len()
                );
                seen.push(entry.unwrap().path());
                tokio::task::yield_now().await;
            }
            seen
        };

        let (result, seen) = tokio::join!(produce, consume);
        result.unwrap();
        assert_eq!(seen, names);
    }
}
