use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use silo_protocol::{Message, Multiplexer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult};
use crate::message::{AgentFacts, ControlMessage, Packet};

/// Fixed delay between reconnect attempts after a failed session.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Interval between liveness probes within a session.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// A probe that takes longer than this is treated as connection-fatal.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Restart policy for the supervised session loop: transient failures are
/// retried after `delay`, up to `max_attempts` (`None` = forever); fatal
/// failures abort immediately.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

/// Asynchronous client for the control-plane: any number of probes may be
/// in flight at once, each waiting only on its own correlation slot.
pub struct ControlClient<S> {
    mux: Multiplexer<S, Packet>,
}

impl<S> ControlClient<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            mux: Multiplexer::new(stream),
        }
    }

    /// Send a liveness probe; returns the round-trip time.
    pub async fn ping(&self) -> AgentResult<Duration> {
        let started = Instant::now();
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        let reply = self.mux.call(Packet::ping(stamp)).await?;
        match reply.body {
            ControlMessage::Ping { .. } => Ok(started.elapsed()),
            _ => Err(AgentError::UnexpectedReply {
                expected: "Ping",
                actual: reply.type_name(),
            }),
        }
    }

    /// Ask the agent to identify itself.
    pub async fn identify(&self, public_key: Vec<u8>) -> AgentResult<AgentFacts> {
        let reply = self.mux.call(Packet::identify(public_key)).await?;
        match reply.body {
            ControlMessage::IdentifyReply(facts) => Ok(facts),
            _ => Err(AgentError::UnexpectedReply {
                expected: "IdentifyReply",
                actual: reply.type_name(),
            }),
        }
    }
}

/// Supervised monitoring loop for one agent.
///
/// Each session identifies the agent, then probes liveness on a fixed
/// interval. A session failure discards all in-flight state; transient
/// failures trigger a reconnect after the policy's delay, fatal ones
/// propagate. Probes run through the multiplexer, so a slow concurrent
/// exchange never delays them.
pub struct Monitor {
    addr: String,
    public_key: Vec<u8>,
    policy: RetryPolicy,
    probe_interval: Duration,
    probe_timeout: Duration,
}

impl Monitor {
    pub fn new(addr: impl Into<String>, public_key: Vec<u8>) -> Self {
        Self {
            addr: addr.into(),
            public_key,
            policy: RetryPolicy::default(),
            probe_interval: PROBE_INTERVAL,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Run sessions until a fatal error or the retry budget runs out.
    pub async fn run(&self) -> AgentResult<()> {
        let mut attempts: u32 = 0;
        loop {
            let error = match self.session().await {
                Err(e) if e.is_transient() => e,
                outcome => return outcome,
            };
            attempts += 1;
            if let Some(max) = self.policy.max_attempts {
                if attempts >= max {
                    return Err(error);
                }
            }
            warn!(
                attempts,
                "control session failed: {error}; reconnecting in {:?}", self.policy.delay
            );
            tokio::time::sleep(self.policy.delay).await;
        }
    }

    async fn session(&self) -> AgentResult<()> {
        let stream = TcpStream::connect(&self.addr).await?;
        let client = ControlClient::new(stream);

        let facts = tokio::time::timeout(
            self.probe_timeout,
            client.identify(self.public_key.clone()),
        )
        .await
        .map_err(|_| AgentError::ProbeTimeout)??;
        info!(
            hostname = %facts.hostname,
            os = %facts.os,
            arch = %facts.arch,
            cpus = facts.cpu_count,
            "agent identified"
        );

        let mut probe = tokio::time::interval(self.probe_interval);
        probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        probe.tick().await;
        loop {
            probe.tick().await;
            let rtt = tokio::time::timeout(self.probe_timeout, client.ping())
                .await
                .map_err(|_| AgentError::ProbeTimeout)??;
            debug!(?rtt, "liveness probe answered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::respond;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_pings_resolve_to_their_own_callers() {
        let (near, far) = tokio::io::duplex(4096);
        tokio::spawn(respond(far, AgentFacts::gather(vec![])));
        let client = Arc::new(ControlClient::new(near));

        let mut probes = Vec::new();
        for _ in 0..4 {
            let client = Arc::clone(&client);
            probes.push(tokio::spawn(async move { client.ping().await }));
        }
        for probe in probes {
            probe.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn identify_through_the_multiplexer() {
        let (near, far) = tokio::io::duplex(4096);
        tokio::spawn(respond(far, AgentFacts::gather(b"key".to_vec())));
        let client = ControlClient::new(near);

        let facts = client.identify(b"prober".to_vec()).await.unwrap();
        assert_eq!(facts.public_key, b"key");
        assert!(facts.cpu_count >= 1);
    }

    #[tokio::test]
    async fn ping_fails_once_the_agent_is_gone() {
        let (near, far) = tokio::io::duplex(4096);
        let client = ControlClient::new(near);
        drop(far);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = client.ping().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn retry_budget_is_honored() {
        // Nothing listens on this port; every connect attempt fails fast.
        let monitor = Monitor::new("127.0.0.1:1", vec![]).with_policy(RetryPolicy {
            delay: Duration::from_millis(5),
            max_attempts: Some(3),
        });
        let err = monitor.run().await.unwrap_err();
        assert!(err.is_transient());
    }
}
