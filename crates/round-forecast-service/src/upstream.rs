use std::time::Duration;

use anyhow::{anyhow, Result};
use round_forecast_core::UpstreamSession;

/// Source of the most recently settled session.
pub trait UpstreamFeed: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns an error whose message starts with `upstream` when the feed
    /// cannot be reached or its payload cannot be decoded.
    fn fetch_latest(&self) -> Result<UpstreamSession>;
}

/// Polls a JSON endpoint that returns one session object per request.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    agent: ureq::Agent,
    url: String,
}

impl HttpUpstream {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            url: url.into(),
        }
    }
}

impl UpstreamFeed for HttpUpstream {
    fn fetch_latest(&self) -> Result<UpstreamSession> {
        match self.agent.get(&self.url).call() {
            Ok(response) => response
                .into_json::<UpstreamSession>()
                .map_err(|err| anyhow!("upstream payload is not a session: {err}")),
            Err(ureq::Error::Status(code, _)) => Err(anyhow!("upstream http status {code}")),
            Err(ureq::Error::Transport(err)) => Err(anyhow!("upstream transport failure: {err}")),
        }
    }
}
