use crate::core::errors::{AseError, CloseReason, ConnectError};
use crate::core::kernel::codec::Decoder;
use crate::core::kernel::ws::ConnectionManager;
use crate::core::types::{FrameStatus, Request, Resp};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument, warn};

/// Callback invoked once per decoded response, in arrival order.
///
/// Returning an error aborts the stream. Plain closures
/// `FnMut(Resp<P>) -> anyhow::Result<()>` implement this trait.
#[async_trait]
pub trait ResponseHandler<P: Send + 'static>: Send + 'static {
    async fn handle(&mut self, resp: Resp<P>) -> anyhow::Result<()>;
}

#[async_trait]
impl<P, F> ResponseHandler<P> for F
where
    P: Send + 'static,
    F: FnMut(Resp<P>) -> anyhow::Result<()> + Send + 'static,
{
    async fn handle(&mut self, resp: Resp<P>) -> anyhow::Result<()> {
        self(resp)
    }
}

/// Handle to a running duplex stream.
///
/// `errors` yields the first failure from either loop, `done` fires once both
/// loops have exited. On clean completion `errors` resolves to a closed
/// channel and `done` fires.
#[derive(Debug)]
pub struct StreamHandle {
    errors: oneshot::Receiver<AseError>,
    done: oneshot::Receiver<()>,
}

impl StreamHandle {
    /// Wait for the stream to finish. Returns the first error, or `Ok` once
    /// both loops have exited cleanly.
    pub async fn wait(self) -> Result<(), AseError> {
        let Self {
            mut errors,
            mut done,
        } = self;

        tokio::select! {
            biased;
            Ok(err) = &mut errors => Err(err),
            _ = &mut done => match errors.try_recv() {
                Ok(err) => Err(err),
                Err(_) => Ok(()),
            },
        }
    }

    pub fn into_parts(self) -> (oneshot::Receiver<AseError>, oneshot::Receiver<()>) {
        (self.errors, self.done)
    }
}

/// Delivers at most one error; everything after the first is logged.
///
/// Errors that merely echo a close made elsewhere (`ConnectionClosed`, or a
/// connect attempt on an already closed manager) are held back until both
/// loops exit, so that the failure which caused the close is the one
/// reported.
#[derive(Clone)]
struct FirstError(Arc<Mutex<ErrorSlot>>);

struct ErrorSlot {
    tx: Option<oneshot::Sender<AseError>>,
    deferred: Option<AseError>,
}

impl FirstError {
    fn new(tx: oneshot::Sender<AseError>) -> Self {
        Self(Arc::new(Mutex::new(ErrorSlot {
            tx: Some(tx),
            deferred: None,
        })))
    }

    fn report(&self, side: &'static str, err: AseError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.tx.is_none() {
            debug!(side, error = %err, "suppressed secondary stream error");
            return;
        }

        if is_consequence(&err) {
            if slot.deferred.is_none() {
                slot.deferred = Some(err);
            }
            return;
        }

        if let Some(tx) = slot.tx.take() {
            error!(side, error = %err, "stream failed");
            let _ = tx.send(err);
        }
    }

    /// Deliver a held-back error if nothing else was reported.
    fn finish(&self) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let (Some(tx), Some(err)) = (slot.tx.take(), slot.deferred.take()) {
            warn!(error = %err, "stream ended by connection close");
            let _ = tx.send(err);
        }
    }
}

fn is_consequence(err: &AseError) -> bool {
    matches!(
        err,
        AseError::ConnectionClosed(_) | AseError::Connect(ConnectError::Closed)
    )
}

/// Drive a full-duplex exchange over `conn`.
///
/// A send loop writes frames from `frames` until it has written a
/// `LastFrame`; a receive loop decodes every message and feeds it to
/// `handler` until a response carries `LastFrame`. Both loops run as tasks
/// and share the connection. Any failure closes the connection and is
/// reported once on the returned handle.
pub fn spawn_stream<D, H>(
    conn: Arc<ConnectionManager>,
    decoder: Arc<D>,
    frames: mpsc::Receiver<Request>,
    handler: H,
) -> StreamHandle
where
    D: Decoder,
    H: ResponseHandler<D::Payload>,
{
    let (error_tx, errors) = oneshot::channel();
    let (done_tx, done) = oneshot::channel();
    let first_error = FirstError::new(error_tx);

    let receiver = tokio::spawn(run_side(
        "receive",
        conn.clone(),
        first_error.clone(),
        receive_loop(conn.clone(), decoder, handler),
    ));
    let sender = tokio::spawn(run_side(
        "send",
        conn.clone(),
        first_error.clone(),
        send_loop(conn.clone(), frames),
    ));

    tokio::spawn(async move {
        let joined = [("receive", receiver.await), ("send", sender.await)];
        for (side, outcome) in joined {
            if let Err(e) = outcome {
                let cause = e.to_string();
                conn.close_with(CloseReason::Failed(cause.clone())).await;
                first_error.report(side, AseError::Task(cause));
            }
        }
        first_error.finish();
        drop(first_error);
        let _ = done_tx.send(());
    });

    StreamHandle { errors, done }
}

async fn run_side(
    side: &'static str,
    conn: Arc<ConnectionManager>,
    first_error: FirstError,
    body: impl Future<Output = Result<(), AseError>>,
) {
    match body.await {
        Ok(()) => debug!(side, "stream loop finished"),
        Err(err) => {
            conn.close_with(CloseReason::Failed(err.to_string())).await;
            first_error.report(side, err);
        }
    }
}

#[instrument(skip_all)]
async fn send_loop(
    conn: Arc<ConnectionManager>,
    mut frames: mpsc::Receiver<Request>,
) -> Result<(), AseError> {
    loop {
        let next = tokio::select! {
            biased;
            frame = frames.recv() => frame,
            reason = conn.closed() => return idle_close(reason),
        };

        let Some(frame) = next else {
            warn!("frame source ended without a LastFrame");
            return Ok(());
        };

        let status = frame.status().ok_or(AseError::MissingStatus)?;
        conn.write_json(&frame).await?;

        if status == FrameStatus::LastFrame {
            debug!("last frame written");
            return Ok(());
        }
    }
}

/// Outcome for a send loop that was waiting on its source when the
/// connection went away.
fn idle_close(reason: CloseReason) -> Result<(), AseError> {
    match reason {
        CloseReason::Completed | CloseReason::Requested => Ok(()),
        CloseReason::Deadlined => Err(AseError::ConnectionDeadlined),
        failed @ CloseReason::Failed(_) => Err(AseError::ConnectionClosed(failed)),
    }
}

#[instrument(skip_all)]
async fn receive_loop<D, H>(
    conn: Arc<ConnectionManager>,
    decoder: Arc<D>,
    mut handler: H,
) -> Result<(), AseError>
where
    D: Decoder,
    H: ResponseHandler<D::Payload>,
{
    let mut received = 0usize;
    loop {
        let raw = conn.read().await?;
        let resp = decoder.decode(&raw)?;
        let last = resp.header.is_last();
        received += 1;

        handler.handle(resp).await.map_err(AseError::Handler)?;

        if last {
            debug!(received, "last response received");
            conn.close_with(CloseReason::Completed).await;
            return Ok(());
        }
    }
}
