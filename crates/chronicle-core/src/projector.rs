//! Projector base: dispatches ordered envelopes to per-event-type handlers
//! that maintain a read model.
//!
//! Handlers must be idempotent with respect to `(stream_id, version)`: the
//! feeder delivers at least once, and catch-up replays overlap live
//! batches. The canonical guard reads the current row and skips the
//! mutation unless [`EventEnvelope::supersedes`] its stored version;
//! creations skip when the row already exists.

use std::collections::{HashMap, HashSet};
use std::fmt;

use futures::future::{self, BoxFuture};
use futures::{FutureExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::aggregate::HandlerError;
use crate::error::{BoxError, DomainError};
use crate::event::{DomainEvent, EventEnvelope};
use crate::store::{EventLog, EventStream};

/// Future returned by asynchronous projector handlers.
pub type HandlerFuture<'a> = BoxFuture<'a, Result<(), BoxError>>;

type SyncHandler<S> = Box<dyn Fn(&S, &EventEnvelope) -> Result<(), BoxError> + Send + Sync>;

type AsyncHandler<S> = Box<
    dyn for<'a> Fn(&'a S, &'a EventEnvelope, &'a CancellationToken) -> HandlerFuture<'a>
        + Send
        + Sync,
>;

enum Handler<S> {
    Sync(SyncHandler<S>),
    Async(AsyncHandler<S>),
}

fn payload_mismatch<E: DomainEvent>() -> BoxError {
    Box::new(HandlerError::PayloadMismatch {
        event_type: E::EVENT_TYPE.to_owned(),
        expected: std::any::type_name::<E>(),
    })
}

fn erase_sync<S, F>(handler: F) -> F
where
    F: Fn(&S, &EventEnvelope) -> Result<(), BoxError> + Send + Sync + 'static,
{
    handler
}

fn erase_async<S, F>(handler: F) -> F
where
    F: for<'a> Fn(&'a S, &'a EventEnvelope, &'a CancellationToken) -> HandlerFuture<'a>
        + Send
        + Sync
        + 'static,
{
    handler
}

/// Applies envelopes to a read model held in `state`.
///
/// `state` is shared by reference with every handler, so read models use
/// interior mutability. A projector processes one batch at a time; each
/// feeder owns its own projector.
pub struct Projector<S> {
    name: String,
    state: S,
    event_types: HashSet<&'static str>,
    handlers: HashMap<&'static str, Handler<S>>,
}

impl<S: Send + Sync + 'static> Projector<S> {
    /// Creates a projector with no registered types.
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state,
            event_types: HashSet::new(),
            handlers: HashMap::new(),
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The read model.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Declares interest in `E` without a handler.
    pub fn register_type<E: DomainEvent>(&mut self) -> &mut Self {
        self.event_types.insert(E::EVENT_TYPE);
        self
    }

    /// Registers a synchronous handler for `E`, replacing any earlier one.
    pub fn register_handler<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: DomainEvent,
        F: Fn(&S, &E, &EventEnvelope) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let erased = erase_sync(move |state: &S, envelope: &EventEnvelope| {
            let event = envelope.payload_as::<E>().ok_or_else(payload_mismatch::<E>)?;
            handler(state, event, envelope)
        });
        self.event_types.insert(E::EVENT_TYPE);
        self.handlers
            .insert(E::EVENT_TYPE, Handler::Sync(Box::new(erased)));
        self
    }

    /// Registers an asynchronous handler for `E`, replacing any earlier one.
    pub fn register_async_handler<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: DomainEvent,
        F: for<'a> Fn(&'a S, &'a E, &'a EventEnvelope, &'a CancellationToken) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        let erased = erase_async(move |state, envelope, cancel| match envelope.payload_as::<E>() {
            Some(event) => handler(state, event, envelope, cancel),
            None => future::ready(Err(payload_mismatch::<E>())).boxed(),
        });
        self.event_types.insert(E::EVENT_TYPE);
        self.handlers
            .insert(E::EVENT_TYPE, Handler::Async(Box::new(erased)));
        self
    }

    /// Returns `true` if `event_type` is in the registered set.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.event_types.contains(event_type)
    }

    /// Applies `batch` in order and returns how many envelopes were handled.
    ///
    /// Envelopes outside the registered set are ignored.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerFailure` for the first envelope whose
    /// handler fails; later envelopes are not processed. Returns
    /// `DomainError::Cancelled` if the token fires between envelopes.
    #[instrument(skip_all, fields(processor = %self.name, batch = batch.len()))]
    pub async fn process(
        &self,
        batch: &[EventEnvelope],
        cancel: &CancellationToken,
    ) -> Result<usize, DomainError> {
        let mut handled = 0;
        for envelope in batch {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            if self.dispatch(envelope, cancel).await? {
                handled += 1;
            }
        }
        Ok(handled)
    }

    /// Applies every envelope of `events`, such as a full-log catch-up.
    ///
    /// # Errors
    ///
    /// See [`process`](Self::process); stream errors are returned as-is.
    #[instrument(skip_all, fields(processor = %self.name))]
    pub async fn process_stream(
        &self,
        mut events: EventStream<'_>,
        cancel: &CancellationToken,
    ) -> Result<usize, DomainError> {
        let mut handled = 0;
        while let Some(envelope) = events.next().await {
            let envelope = envelope?;
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            if self.dispatch(&envelope, cancel).await? {
                handled += 1;
            }
        }
        Ok(handled)
    }

    /// Catches up from `log`, then applies envelopes from `live` until
    /// `cancel` fires or the feed closes.
    ///
    /// Subscribe to `live` before calling, so nothing committed during the
    /// catch-up is missed. Envelopes seen by both are applied twice; the
    /// handlers' version guard absorbs that. On lag the catch-up is repeated.
    ///
    /// # Errors
    ///
    /// Returns the first handler or store failure. Cancellation is a normal
    /// stop and returns `Ok(())`.
    pub async fn follow(
        &self,
        log: &dyn EventLog,
        mut live: broadcast::Receiver<EventEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        loop {
            match self.process_stream(log.load_all(cancel), cancel).await {
                Ok(handled) => info!(processor = %self.name, handled, "catch-up complete"),
                Err(DomainError::Cancelled) => return Ok(()),
                Err(err) => return Err(err),
            }

            loop {
                let received = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(()),
                    received = live.recv() => received,
                };
                match received {
                    Ok(envelope) => {
                        let batch = std::slice::from_ref(&envelope);
                        match self.process(batch, cancel).await {
                            Ok(_) => {}
                            Err(DomainError::Cancelled) => return Ok(()),
                            Err(err) => return Err(err),
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(processor = %self.name, skipped, "live feed lagged; catching up again");
                        break;
                    }
                    Err(RecvError::Closed) => {
                        debug!(processor = %self.name, "live feed closed");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        envelope: &EventEnvelope,
        cancel: &CancellationToken,
    ) -> Result<bool, DomainError> {
        let event_type = envelope.event_type.as_str();
        if !self.event_types.contains(event_type) {
            trace!(processor = %self.name, event_type, "ignoring unregistered event type");
            return Ok(false);
        }

        let outcome = match self.handlers.get(event_type) {
            Some(Handler::Sync(handler)) => handler(&self.state, envelope),
            Some(Handler::Async(handler)) => handler(&self.state, envelope, cancel).await,
            None => {
                warn!(
                    processor = %self.name,
                    stream_id = %envelope.stream_id,
                    version = envelope.version,
                    event_type,
                    "event type registered without a handler"
                );
                return Ok(false);
            }
        };

        outcome.map(|()| true).map_err(|source| {
            error!(
                processor = %self.name,
                stream_id = %envelope.stream_id,
                version = envelope.version,
                event_type,
                error = %source,
                "projector handler failed"
            );
            DomainError::HandlerFailure {
                stream_id: envelope.stream_id.clone(),
                version: envelope.version,
                event_type: envelope.event_type.clone(),
                source,
            }
        })
    }
}

impl<S> fmt::Debug for Projector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.event_types.iter().collect();
        types.sort_unstable();
        f.debug_struct("Projector")
            .field("name", &self.name)
            .field("event_types", &types)
            .finish_non_exhaustive()
    }
}
