//! Clients for the downstream statistics and inventory services
//!
//! Gameplay outcomes are relayed to two stateful backend services over
//! HTTP/JSON: a statistics service (win/loss counters) and an inventory
//! service (virtual currency). The [`Downstream`] trait is the seam the
//! dispatcher calls through, so tests can substitute counting fakes.
//!
//! Every call carries the fixed `gateway: internal` routing header so the
//! backends can tell server-originated traffic from external gateway
//! traffic and apply different trust rules. Calls are not retried; a
//! failure surfaces immediately and the dispatcher decides the
//! user-visible outcome.

use async_trait::async_trait;
use log::warn;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Routing header attached to every downstream call, marking it as
/// originating from the game server itself.
pub const GATEWAY_HEADER: &str = "gateway";
pub const GATEWAY_INTERNAL: &str = "internal";

/// Upper bound on a single downstream call, so a stalled dependency cannot
/// block the sequential read loop indefinitely.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A failed downstream call.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The service had no configured endpoint at startup; the call fails
    /// fast without touching the network.
    #[error("{service} client is not configured")]
    NotConfigured { service: &'static str },
    /// The request could not be sent or timed out.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("downstream returned status {code}")]
    Status { code: u16 },
}

/// Uniform interface to the downstream services.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Adds `delta` to the named statistic of a user.
    async fn increment_statistic(
        &self,
        user_id: &str,
        key: &str,
        delta: i64,
    ) -> Result<(), RpcError>;

    /// Adjusts a user's virtual currency balance by `amount`.
    async fn update_virtual_currency(
        &self,
        user_id: &str,
        currency_name: &str,
        amount: i64,
    ) -> Result<(), RpcError>;
}

#[derive(Serialize)]
struct IncrementStatisticRequest<'a> {
    user_id: &'a str,
    key: &'a str,
    delta: i64,
}

#[derive(Serialize)]
struct UpdateVirtualCurrencyRequest<'a> {
    user_id: &'a str,
    currency_name: &'a str,
    amount: i64,
}

/// HTTP implementation of [`Downstream`].
///
/// Service endpoints are resolved once at construction. A service whose
/// URL was absent is functionally absent for the lifetime of the process;
/// calls into it fail with [`RpcError::NotConfigured`].
pub struct HttpDownstream {
    http: reqwest::Client,
    statistics_url: Option<String>,
    inventory_url: Option<String>,
}

impl HttpDownstream {
    pub fn new(
        statistics_url: Option<String>,
        inventory_url: Option<String>,
    ) -> Result<Self, RpcError> {
        if statistics_url.is_none() {
            warn!("Statistics URL not set, statistics client disabled");
        }
        if inventory_url.is_none() {
            warn!("Inventory URL not set, inventory client disabled");
        }
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;
        Ok(Self {
            http,
            statistics_url,
            inventory_url,
        })
    }

    async fn post<T: Serialize>(&self, base: &str, path: &str, body: &T) -> Result<(), RpcError> {
        let url = format!("{}/{}", base.trim_end_matches('/'), path);
        let response = self
            .http
            .post(url)
            .header(GATEWAY_HEADER, GATEWAY_INTERNAL)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RpcError::Status {
                code: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn increment_statistic(
        &self,
        user_id: &str,
        key: &str,
        delta: i64,
    ) -> Result<(), RpcError> {
        let base = self
            .statistics_url
            .as_deref()
            .ok_or(RpcError::NotConfigured {
                service: "statistics",
            })?;
        self.post(
            base,
            "v1/statistics/increment",
            &IncrementStatisticRequest { user_id, key, delta },
        )
        .await
    }

    async fn update_virtual_currency(
        &self,
        user_id: &str,
        currency_name: &str,
        amount: i64,
    ) -> Result<(), RpcError> {
        let base = self
            .inventory_url
            .as_deref()
            .ok_or(RpcError::NotConfigured {
                service: "inventory",
            })?;
        self.post(
            base,
            "v1/inventory/currency",
            &UpdateVirtualCurrencyRequest {
                user_id,
                currency_name,
                amount,
            },
        )
        .await
    }
}
