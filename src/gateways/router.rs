use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::adapters::{IyzicoAdapter, MockAdapter, PaypalAdapter, StripeAdapter};
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{GatewayName, GatewayVerdict, IntentRequest, Money};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub default_gateway: GatewayName,
}

impl RouterConfig {
    /// Unrecognized gateway names fall back to the mock adapter rather
    /// than failing closed.
    pub fn from_env() -> Self {
        let raw = std::env::var("DEFAULT_PAYMENT_GATEWAY").unwrap_or_else(|_| "mock".to_string());
        let default_gateway = GatewayName::from_str(&raw).unwrap_or_else(|_| {
            warn!(configured = %raw, "unrecognized default gateway, falling back to mock");
            GatewayName::Mock
        });
        Self { default_gateway }
    }
}

/// Single entry point for all processor traffic.
///
/// The orchestrator only ever talks to the router; which concrete adapter
/// served a request never surfaces in its results or errors. Routing is
/// deterministic: a payer country in a processor's home market wins over
/// the configured default (a hard business rule, not a tie-break), the
/// configured default otherwise.
pub struct GatewayRouter {
    adapters: HashMap<GatewayName, Arc<dyn GatewayAdapter>>,
    default_gateway: GatewayName,
}

impl GatewayRouter {
    pub fn new(default_gateway: GatewayName, adapters: Vec<Arc<dyn GatewayAdapter>>) -> Self {
        let mut map: HashMap<GatewayName, Arc<dyn GatewayAdapter>> = HashMap::new();
        for adapter in adapters {
            map.insert(adapter.name(), adapter);
        }
        map.entry(GatewayName::Mock)
            .or_insert_with(|| Arc::new(MockAdapter::new()));

        let default_gateway = if map.contains_key(&default_gateway) {
            default_gateway
        } else {
            warn!(
                configured = %default_gateway,
                "configured default gateway has no adapter, falling back to mock"
            );
            GatewayName::Mock
        };

        Self {
            adapters: map,
            default_gateway,
        }
    }

    /// Build the router from environment configuration.
    ///
    /// Missing credentials for the configured default are fatal; optional
    /// adapters that cannot be constructed are skipped with a warning.
    pub fn from_env() -> GatewayResult<Self> {
        let config = RouterConfig::from_env();
        let mut adapters: Vec<Arc<dyn GatewayAdapter>> = vec![Arc::new(MockAdapter::new())];

        let constructors: [(GatewayName, fn() -> GatewayResult<Arc<dyn GatewayAdapter>>); 3] = [
            (GatewayName::Stripe, || {
                Ok(Arc::new(StripeAdapter::from_env()?))
            }),
            (GatewayName::Paypal, || {
                Ok(Arc::new(PaypalAdapter::from_env()?))
            }),
            (GatewayName::Iyzico, || {
                Ok(Arc::new(IyzicoAdapter::from_env()?))
            }),
        ];

        for (name, build) in constructors {
            match build() {
                Ok(adapter) => {
                    info!(gateway = %name, "gateway adapter initialized");
                    adapters.push(adapter);
                }
                Err(e) if name == config.default_gateway => {
                    return Err(GatewayError::Validation {
                        message: format!("default gateway {} unavailable: {}", name, e),
                        field: Some("DEFAULT_PAYMENT_GATEWAY".to_string()),
                    });
                }
                Err(e) => {
                    warn!(gateway = %name, error = %e, "gateway adapter skipped");
                }
            }
        }

        Ok(Self::new(config.default_gateway, adapters))
    }

    /// Resolve the gateway a payer country routes to
    pub fn route_for_country(&self, payer_country: Option<&str>) -> GatewayName {
        if let Some(country) = payer_country {
            let normalized = country.trim().to_uppercase();
            if !normalized.is_empty() {
                for (name, adapter) in &self.adapters {
                    if adapter.home_countries().contains(&normalized.as_str()) {
                        return *name;
                    }
                }
            }
        }
        self.default_gateway
    }

    fn select(&self, payer_country: Option<&str>) -> &Arc<dyn GatewayAdapter> {
        let name = self.route_for_country(payer_country);
        let name = if self.adapters.contains_key(&name) {
            name
        } else {
            GatewayName::Mock
        };
        debug!(gateway = %name, "gateway selected");
        self.adapters
            .get(&name)
            .expect("mock adapter is always registered")
    }

    pub async fn create_payment_intent(&self, request: IntentRequest) -> GatewayVerdict {
        let adapter = self.select(request.payer_country.as_deref());
        adapter.create_intent(request).await
    }

    pub async fn confirm_payment(
        &self,
        intent_id: &str,
        payment_method_ref: Option<&str>,
        payer_country: Option<&str>,
    ) -> GatewayVerdict {
        let adapter = self.select(payer_country);
        adapter.confirm(intent_id, payment_method_ref).await
    }

    pub async fn verify_payment(&self, reference: &str, payer_country: Option<&str>) -> GatewayVerdict {
        let adapter = self.select(payer_country);
        adapter.verify(reference).await
    }

    pub async fn refund_payment(
        &self,
        charge_id: &str,
        amount: Option<Money>,
        payer_country: Option<&str>,
    ) -> GatewayVerdict {
        let adapter = self.select(payer_country);
        adapter.refund(charge_id, amount).await
    }

    /// Adapter lookup for webhook verification/parsing
    pub fn adapter(&self, name: GatewayName) -> Option<&Arc<dyn GatewayAdapter>> {
        self.adapters.get(&name)
    }
}
