//! Credential pool coordinated over the log.
//!
//! Tokens live on two retained topics: `free_token` for credentials believed
//! to have quota, `standby_token` for ones parked after a rate-limit
//! rejection. Every token is always on exactly one of the two topics or held
//! by exactly one worker; every path through this module re-publishes what it
//! consumed so a credential can never be silently lost.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::api::QuotaProbe;
use crate::error::Result;
use crate::log::{publish_with_retry, MessageLog};
use crate::topics;

const FREE_SUBSCRIPTION: &str = "free_token_sub";
const STANDBY_SUBSCRIPTION: &str = "standby_token_sub";

/// An API credential. Redacted from `Debug` output so it cannot leak into
/// logs.
#[derive(Clone)]
pub struct Token(SecretString);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Token(SecretString::new(value.into()))
    }

    pub fn reveal(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.reveal() == other.reveal()
    }
}

impl Eq for Token {}

impl std::hash::Hash for Token {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.reveal().hash(state);
    }
}

/// Parses a token file: one token per line, `#` starts a comment, blank
/// lines are skipped.
pub fn parse_token_file(contents: &str) -> Vec<Token> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                None
            } else {
                Some(Token::new(line))
            }
        })
        .collect()
}

pub struct TokenPool<L, P> {
    log: Arc<L>,
    probe: Arc<P>,
    backoff: Duration,
    receive_timeout: Duration,
}

impl<L: MessageLog, P: QuotaProbe> TokenPool<L, P> {
    pub fn new(log: Arc<L>, probe: Arc<P>, backoff: Duration, receive_timeout: Duration) -> Self {
        TokenPool {
            log,
            probe,
            backoff,
            receive_timeout,
        }
    }

    /// Replaces whatever the pool currently holds with the given tokens, all
    /// marked free. Run once, behind the startup barrier.
    pub async fn load(&self, tokens: &[Token]) -> Result<()> {
        self.drain(&topics::free_token(), FREE_SUBSCRIPTION).await?;
        self.drain(&topics::standby_token(), STANDBY_SUBSCRIPTION).await?;
        info!("loading {} tokens into the pool", tokens.len());
        for token in tokens {
            self.log
                .publish(&topics::free_token(), token.reveal().as_bytes())
                .await?;
        }
        Ok(())
    }

    /// Takes a free token, blocking until one is available. When the free
    /// topic runs dry, standby tokens are probed for recovered quota.
    pub async fn acquire(&self) -> Result<Token> {
        let topic = topics::free_token();
        loop {
            if let Some(delivery) = self
                .log
                .receive(&topic, FREE_SUBSCRIPTION, self.receive_timeout)
                .await?
            {
                self.log.ack(&topic, FREE_SUBSCRIPTION, delivery.id).await?;
                return Ok(Token::new(String::from_utf8_lossy(&delivery.payload).into_owned()));
            }
            let reclaimed = self.reclaim().await?;
            if reclaimed == 0 {
                debug!("no tokens available, backing off {}s", self.backoff.as_secs());
                tokio::time::sleep(self.backoff).await;
            }
        }
    }

    /// Returns a token to the pool. An exhausted token goes to standby,
    /// otherwise back to free. The publish retries forever so the token is
    /// never dropped.
    pub async fn release(&self, token: Token, exhausted: bool) {
        let topic = if exhausted {
            info!("token exhausted, parking on standby");
            topics::standby_token()
        } else {
            topics::free_token()
        };
        publish_with_retry(self.log.as_ref(), &topic, token.reveal().as_bytes()).await;
    }

    /// Probes every standby token and moves the recovered ones back to free.
    /// Returns how many recovered. On a probe failure every unresolved token
    /// is pushed back to standby before the error propagates.
    pub async fn reclaim(&self) -> Result<usize> {
        let standby = topics::standby_token();
        let mut parked: VecDeque<Token> = VecDeque::new();
        while let Some(delivery) = self
            .log
            .receive(&standby, STANDBY_SUBSCRIPTION, self.receive_timeout)
            .await?
        {
            self.log.ack(&standby, STANDBY_SUBSCRIPTION, delivery.id).await?;
            parked.push_back(Token::new(String::from_utf8_lossy(&delivery.payload).into_owned()));
        }

        let mut recovered = 0;
        while let Some(token) = parked.pop_front() {
            match self.probe.remaining_quota(token.reveal()).await {
                Ok(true) => {
                    publish_with_retry(self.log.as_ref(), &topics::free_token(), token.reveal().as_bytes())
                        .await;
                    recovered += 1;
                }
                Ok(false) => {
                    publish_with_retry(self.log.as_ref(), &standby, token.reveal().as_bytes()).await;
                }
                Err(err) => {
                    warn!("quota probe failed, returning tokens to standby: {}", err);
                    publish_with_retry(self.log.as_ref(), &standby, token.reveal().as_bytes()).await;
                    while let Some(rest) = parked.pop_front() {
                        publish_with_retry(self.log.as_ref(), &standby, rest.reveal().as_bytes()).await;
                    }
                    return Err(err.into());
                }
            }
        }
        if recovered > 0 {
            info!("reclaimed {} tokens from standby", recovered);
        }
        Ok(recovered)
    }

    async fn drain(&self, topic: &crate::log::TopicAddr, subscription: &str) -> Result<()> {
        while let Some(delivery) = self.log.receive(topic, subscription, self.receive_timeout).await? {
            self.log.ack(topic, subscription, delivery.id).await?;
        }
        Ok(())
    }
}
