use std::process::{Child, ExitStatus};
use std::time::Duration;

use crate::error::Result;
use crate::execution::cancellable::{CancellablePoller, CancellableResult};
use crate::http::InferenceClient;

/// Outcome of waiting for a freshly spawned runner to answer its first probe.
#[derive(Debug)]
pub(crate) enum StartupProbe {
    Ready,
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Probe `client` on the poller's cadence until it answers, the child exits on its own or
/// `timeout` elapses.
pub(crate) fn wait_for_runner(
    child: &mut Child,
    client: &InferenceClient,
    poller: &CancellablePoller,
    timeout: Duration,
) -> Result<StartupProbe> {
    let outcome = poller.poll_until(timeout, || {
        match child.try_wait() {
            Ok(Some(status)) => return Some(Ok(StartupProbe::Exited(status))),
            Ok(None) => {}
            Err(e) => return Some(Err(e.into())),
        }

        match client.ping() {
            Ok(()) => Some(Ok(StartupProbe::Ready)),
            Err(e) => {
                log::trace!("runner on port {} not ready yet: {e}", client.port());
                None
            }
        }
    });

    match outcome {
        CancellableResult::Completed(probe) => probe,
        CancellableResult::Cancelled => Ok(StartupProbe::Cancelled),
        CancellableResult::TimedOut => Ok(StartupProbe::TimedOut),
    }
}

/// Kill `child` unless it already exited, then reap it.
pub(crate) fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }
    if let Err(e) = child.kill() {
        // Exited between the two calls.
        log::debug!("kill runner {}: {e}", child.id());
    }
    child.wait()
}
