//! The per-entry transformation core.
//!
//! A [`TarEntryTransformer`] owns three things: a set of hooks, a user-defined context value, and
//! (once bound) the sink that receives transformed entries.  A driver feeds it entries one at a
//! time through [`handle_entry`] and finally calls [`handle_end`]; the hooks emit output through
//! [`push`].
//!
//! # Driver contract
//!
//! The transformer does not schedule anything itself.  Whoever drives it must:
//!
//!  - bind the sink exactly once before handling entries that push,
//!  - await each [`handle_entry`] before issuing the next one, in input order,
//!  - respect the sink's backpressure before supplying further input,
//!  - call [`handle_end`] once after the last entry, then finish the sink,
//!  - stop and abort the sink as soon as any call fails.
//!
//! Because calls never overlap, hooks may mutate the context through `&mut` without any locking.
//! [`crate::driver::drive`] implements this contract.
//!
//! [`handle_entry`]: TarEntryTransformer::handle_entry
//! [`handle_end`]: TarEntryTransformer::handle_end
//! [`push`]: TarEntryTransformer::push

use std::{fmt, future::Future, sync::Arc};

use futures::future::{self, BoxFuture};
use log::{debug, trace};
use once_cell::unsync::OnceCell;
use tar::Header;
use tokio::io::AsyncRead;

use crate::{
    content::{self, Encoding},
    entry::TarEntry,
    error::{Result, TransformError},
    headers::{self, HeaderOverrides},
    sink::{EntrySender, EntrySink},
};

/// The future returned by a hook.  It may borrow the transformer for its whole duration.
pub type HookFuture<'a> = BoxFuture<'a, anyhow::Result<()>>;

type EntryHook<T, S> = Arc<
    dyn for<'a> Fn(&'a mut TarEntryTransformer<T, S>, TarEntry) -> HookFuture<'a> + Send + Sync,
>;

type EndHook<T, S> =
    Arc<dyn for<'a> Fn(&'a mut TarEntryTransformer<T, S>) -> HookFuture<'a> + Send + Sync>;

/// Where a transformer is in its run.  Transitions only go forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No entry has been handled yet.
    Idle,
    /// At least one entry has been handled.
    Processing,
    /// [`TarEntryTransformer::handle_end`] has been called.
    Ended,
}

/// Construction options for a [`TarEntryTransformer`]: the hooks and the initial context.
pub struct TransformerOptions<T, S = EntrySender> {
    on_entry: Option<EntryHook<T, S>>,
    on_end: Option<EndHook<T, S>>,
    ctx: T,
}

impl<T: Default, S> TransformerOptions<T, S> {
    /// Options with no hooks and a default context.
    pub fn new() -> Self {
        Self::with_ctx(T::default())
    }
}

impl<T: Default, S> Default for TransformerOptions<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> TransformerOptions<T, S> {
    /// Options with no hooks and the given initial context.
    pub fn with_ctx(ctx: T) -> Self {
        Self {
            on_entry: None,
            on_end: None,
            ctx,
        }
    }

    /// Sets the hook run for every incoming entry.
    ///
    /// The hook gets the transformer itself, so it can read and modify the context and push
    /// output.  Pushing zero entries drops the input; pushing several fans it out.
    pub fn on_entry<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut TarEntryTransformer<T, S>, TarEntry) -> HookFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.on_entry = Some(Arc::new(hook));
        self
    }

    /// Sets a per-entry hook that never needs to suspend.
    pub fn on_entry_sync<F>(self, hook: F) -> Self
    where
        F: Fn(&mut TarEntryTransformer<T, S>, TarEntry) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.on_entry(move |transformer, entry| Box::pin(future::ready(hook(transformer, entry))))
    }

    /// Sets the hook run once after the last entry, typically to flush output accumulated in
    /// the context.
    pub fn on_end<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut TarEntryTransformer<T, S>) -> HookFuture<'a> + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(hook));
        self
    }

    /// Sets an end-of-stream hook that never needs to suspend.
    pub fn on_end_sync<F>(self, hook: F) -> Self
    where
        F: Fn(&mut TarEntryTransformer<T, S>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_end(move |transformer| Box::pin(future::ready(hook(transformer))))
    }
}

/// Routes archive entries through user hooks into a bound [`EntrySink`].
///
/// `T` is the user's context, kept for the whole run.  `S` is the sink type; by default the
/// sending half of [`crate::sink::channel`].
pub struct TarEntryTransformer<T, S = EntrySender> {
    sink: OnceCell<S>,
    on_entry: Option<EntryHook<T, S>>,
    on_end: Option<EndHook<T, S>>,
    ctx: T,
    phase: Phase,
    entries_handled: u64,
    entries_pushed: u64,
}

impl<T: Default, S> Default for TarEntryTransformer<T, S> {
    fn default() -> Self {
        Self::new(TransformerOptions::new())
    }
}

impl<T, S> fmt::Debug for TarEntryTransformer<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TarEntryTransformer")
            .field("bound", &self.is_bound())
            .field("phase", &self.phase)
            .field("has_on_entry", &self.on_entry.is_some())
            .field("has_on_end", &self.on_end.is_some())
            .field("entries_handled", &self.entries_handled)
            .field("entries_pushed", &self.entries_pushed)
            .finish_non_exhaustive()
    }
}

impl<T, S> TarEntryTransformer<T, S> {
    /// Creates an unbound transformer.  No I/O happens here.
    pub fn new(options: TransformerOptions<T, S>) -> Self {
        Self {
            sink: OnceCell::new(),
            on_entry: options.on_entry,
            on_end: options.on_end,
            ctx: options.ctx,
            phase: Phase::Idle,
            entries_handled: 0,
            entries_pushed: 0,
        }
    }

    /// Attaches the output sink.  This can only be done once.
    pub fn bind_sink(&mut self, sink: S) -> Result<()> {
        self.sink
            .set(sink)
            .map_err(|_| TransformError::AlreadyBound)?;
        debug!("transformer bound to sink");
        Ok(())
    }

    /// Whether a sink has been bound.
    pub fn is_bound(&self) -> bool {
        self.sink.get().is_some()
    }

    /// Returns the bound sink.
    pub fn sink(&self) -> Result<&S> {
        self.sink.get().ok_or(TransformError::UnboundSink)
    }

    /// Returns the bound sink for direct manipulation.
    pub fn sink_mut(&mut self) -> Result<&mut S> {
        self.sink.get_mut().ok_or(TransformError::UnboundSink)
    }

    /// The user context.
    pub fn ctx(&self) -> &T {
        &self.ctx
    }

    /// The user context, for hooks that update it.
    pub fn ctx_mut(&mut self) -> &mut T {
        &mut self.ctx
    }

    /// Consumes the transformer, returning the final context.
    pub fn into_ctx(self) -> T {
        self.ctx
    }

    /// Where the transformer is in its run.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of entries passed to [`handle_entry`](Self::handle_entry) so far.
    pub fn entries_handled(&self) -> u64 {
        self.entries_handled
    }

    /// Number of entries successfully pushed into the sink so far.
    pub fn entries_pushed(&self) -> u64 {
        self.entries_pushed
    }

    /// Returns a copy of `header` renamed to `name`.  See [`headers::with_new_name`].
    pub fn with_new_name(&self, header: &Header, name: &str) -> Result<Header> {
        headers::with_new_name(header, name)
    }

    /// Returns a copy of `header` with `overrides` applied.  See [`headers::with_overrides`].
    pub fn with_overrides(&self, header: &Header, overrides: &HeaderOverrides) -> Result<Header> {
        headers::with_overrides(header, overrides)
    }

    // The returned futures don't borrow `self`, so hooks can hold them across awaits without
    // requiring the transformer to be Sync.

    /// Reads an entry's content fully.  See [`content::drain_to_buffer`].
    pub fn drain_to_buffer<R: AsyncRead + Unpin>(
        &self,
        content: R,
    ) -> impl Future<Output = Result<Vec<u8>>> {
        content::drain_to_buffer(content)
    }

    /// Reads an entry's content fully as text.  See [`content::drain_to_string`].
    pub fn drain_to_string<R: AsyncRead + Unpin>(
        &self,
        content: R,
        encoding: Encoding,
    ) -> impl Future<Output = Result<String>> {
        content::drain_to_string(content, encoding)
    }
}

impl<T, S: EntrySink> TarEntryTransformer<T, S> {
    /// Runs the per-entry hook on `entry`.
    ///
    /// Resolves when the hook (including any asynchronous work it started) completes.  Errors
    /// raised by the hook are returned as-is.  Fails with [`TransformError::HookNotImplemented`]
    /// if no hook was configured, or [`TransformError::AlreadyEnded`] after
    /// [`handle_end`](Self::handle_end).
    pub async fn handle_entry(&mut self, entry: TarEntry) -> anyhow::Result<()> {
        if self.phase == Phase::Ended {
            return Err(TransformError::AlreadyEnded.into());
        }
        let hook = self
            .on_entry
            .clone()
            .ok_or(TransformError::HookNotImplemented)?;

        self.phase = Phase::Processing;
        self.entries_handled += 1;
        trace!("handling entry #{}: {}", self.entries_handled, entry.path());

        hook(self, entry).await
    }

    /// Runs the end-of-stream hook, if there is one.  Without a hook this completes immediately
    /// and emits nothing.
    pub async fn handle_end(&mut self) -> anyhow::Result<()> {
        if self.phase == Phase::Ended {
            return Err(TransformError::AlreadyEnded.into());
        }
        self.phase = Phase::Ended;
        debug!(
            "end of input after {} entries ({} pushed)",
            self.entries_handled, self.entries_pushed
        );

        match self.on_end.clone() {
            Some(hook) => hook(self).await,
            None => Ok(()),
        }
    }

    /// Emits one entry into the bound sink.  Meant to be called from hooks, any number of times
    /// per input entry.
    ///
    /// Returns the sink's "can accept more" signal.  The push itself never waits; a `false` is
    /// for the driver, which must let the sink drain before supplying more input.
    pub fn push(&mut self, entry: TarEntry) -> Result<bool> {
        let sink = self.sink_mut()?;
        let ready = sink.push(entry)?;
        self.entries_pushed += 1;
        Ok(ready)
    }
}
