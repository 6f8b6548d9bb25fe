use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{self, Instant};

use crate::{
    cfg::Config,
    error::SessionError,
    pacer::Pace,
    resolve::EndpointSet,
    stat::{ActiveGuard, Stat},
    transport::Transport,
};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    /// Waiting for the startup delay.
    Jitter,
    Connecting,
    /// TLS handshake, secure transports only.
    Handshaking,
    Connected,
    Requesting,
    /// Waiting for the linger delay before closing.
    Draining,
    Closing,
    Terminated(Outcome),
}

/// Terminal session outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

/// A single logical client session.
///
/// Connects, performs a bounded number of paced requests over one connection
/// and closes it gracefully. The session is accounted as active from its
/// construction until it is dropped.
#[derive(Debug)]
pub struct Session<T, P> {
    id: usize,
    cfg: Arc<Config>,
    endpoints: EndpointSet,
    stat: Arc<Stat>,
    /// Serialized request, sent unmodified on every iteration.
    request: Bytes,
    transport: T,
    pacer: P,
    state: State,
    _active: ActiveGuard,
}

impl<T, P> Session<T, P>
where
    T: Transport,
    P: Pace,
{
    pub fn new(
        id: usize,
        cfg: Arc<Config>,
        endpoints: EndpointSet,
        stat: Arc<Stat>,
        request: Bytes,
        transport: T,
        pacer: P,
    ) -> Self {
        let active = stat.on_session_start();

        Self {
            id,
            cfg,
            endpoints,
            stat,
            request,
            transport,
            pacer,
            state: State::Created,
            _active: active,
        }
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Drives this session until it reaches a terminal state.
    ///
    /// Errors never escape: they are logged and accounted in [`Stat`]. The
    /// transport is released when this function returns.
    pub async fn run(mut self) -> Outcome {
        let outcome = match self.execute().await {
            Ok(()) => {
                self.stat.on_session_success();
                Outcome::Success
            }
            Err(err) => {
                if err.is_timeout() {
                    log::error!("session {}: {} timed out after {:?}", self.id, err.op(), self.cfg.op_timeout);
                } else {
                    log::error!("session {}: {err}", self.id);
                }
                self.stat.on_session_failed();
                Outcome::Failed
            }
        };
        self.enter(State::Terminated(outcome));

        outcome
    }

    async fn execute(&mut self) -> Result<(), SessionError> {
        self.enter(State::Jitter);
        time::sleep(self.pacer.jitter()).await;

        self.enter(State::Connecting);
        let deadline = self.deadline();
        self.transport
            .connect(&self.endpoints, deadline)
            .await
            .map_err(SessionError::Connect)?;

        if T::SECURE {
            self.enter(State::Handshaking);
            let deadline = self.deadline();
            self.transport
                .handshake(deadline)
                .await
                .map_err(SessionError::Handshake)?;
        }

        self.enter(State::Connected);
        let _connected = self.stat.on_session_connected();

        self.enter(State::Requesting);
        let num_requests = self.cfg.requests_per_session;
        for idx in 0..num_requests {
            self.perform_request().await?;

            if idx + 1 < num_requests {
                time::sleep(self.pacer.inter_request()).await;
            }
        }

        self.enter(State::Draining);
        time::sleep(self.pacer.linger()).await;

        self.enter(State::Closing);
        let deadline = self.deadline();
        match self.transport.shutdown(deadline).await {
            Ok(()) => Ok(()),
            Err(err) if T::is_benign_shutdown(&err) => {
                log::debug!("session {}: shutdown: {err}, ignored", self.id);
                Ok(())
            }
            Err(err) => Err(SessionError::Shutdown(err)),
        }
    }

    async fn perform_request(&mut self) -> Result<(), SessionError> {
        let deadline = self.deadline();

        if let Err(err) = self.transport.send(&self.request, deadline).await {
            self.stat.on_request_failed();
            return Err(SessionError::Write(err));
        }

        match self.transport.receive(deadline).await {
            Ok(resp) => {
                log::trace!("session {}: {} ({} bytes)", self.id, resp.status, resp.len);
                self.stat.on_request_success();
                Ok(())
            }
            Err(err) => {
                self.stat.on_request_failed();
                Err(SessionError::Read(err))
            }
        }
    }

    #[inline]
    fn deadline(&self) -> Instant {
        Instant::now() + self.cfg.op_timeout
    }

    #[inline]
    fn enter(&mut self, state: State) {
        log::trace!("session {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }
}
