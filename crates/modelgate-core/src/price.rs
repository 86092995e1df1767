use modelgate_common::{ModelRatio, RelayConfig};

use crate::error::RelayError;

/// Pricing resolution for one request.
#[derive(Debug, Clone, Default)]
pub struct PriceData {
    pub model_ratio: f64,
    pub completion_ratio: f64,
    pub group_ratio: f64,
    pub per_call_price: Option<f64>,
    pub free_model: bool,
    pub quota_to_pre_consume: i64,
}

impl PriceData {
    /// Final cost from observed usage, in quota units.
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> i64 {
        if self.free_model {
            return 0;
        }
        if let Some(per_call) = self.per_call_price {
            return (per_call * self.group_ratio).ceil() as i64;
        }
        let prompt = prompt_tokens as f64 * self.model_ratio;
        let completion =
            completion_tokens as f64 * self.model_ratio * self.completion_ratio;
        ((prompt + completion) * self.group_ratio).ceil() as i64
    }
}

/// Resolve pricing for (group, model) and compute the pre-consume amount.
pub fn resolve_price(
    config: &RelayConfig,
    group: &str,
    model: &str,
    estimated_prompt_tokens: u64,
    output_cap: Option<u32>,
) -> Result<PriceData, RelayError> {
    let group_ratio = config.group_ratio.get(group).copied().unwrap_or(1.0);
    if group_ratio < 0.0 {
        return Err(RelayError::model_price_error(format!(
            "negative group ratio for group {group}"
        )));
    }
    let ratio = config
        .model_ratio
        .get(model)
        .copied()
        .unwrap_or(ModelRatio {
            model_ratio: 1.0,
            completion_ratio: 1.0,
            per_call_price: None,
        });

    let free_model = ratio.per_call_price.is_none() && ratio.model_ratio == 0.0;
    let mut price = PriceData {
        model_ratio: ratio.model_ratio,
        completion_ratio: ratio.completion_ratio,
        group_ratio,
        per_call_price: ratio.per_call_price,
        free_model,
        quota_to_pre_consume: 0,
    };
    if free_model {
        return Ok(price);
    }

    price.quota_to_pre_consume = if let Some(per_call) = ratio.per_call_price {
        (per_call * group_ratio).ceil() as i64
    } else {
        // Reserve for the prompt plus the declared output cap; settlement
        // reconciles against observed usage.
        let reserved_completion = u64::from(output_cap.unwrap_or(0));
        price.cost(estimated_prompt_tokens, reserved_completion)
    };
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(model_ratio: f64, completion_ratio: f64, group_ratio: f64) -> RelayConfig {
        let mut config = RelayConfig::default();
        config.model_ratio.insert(
            "m".to_string(),
            ModelRatio {
                model_ratio,
                completion_ratio,
                per_call_price: None,
            },
        );
        config.group_ratio = HashMap::from([("vip".to_string(), group_ratio)]);
        config
    }

    #[test]
    fn pre_consume_covers_prompt_plus_cap() {
        let price = resolve_price(&config(1.0, 1.0, 1.0), "default", "m", 10, Some(90)).unwrap();
        assert_eq!(price.quota_to_pre_consume, 100);
    }

    #[test]
    fn group_ratio_scales_cost() {
        let price = resolve_price(&config(2.0, 1.0, 0.5), "vip", "m", 10, None).unwrap();
        assert_eq!(price.cost(10, 0), 10);
    }

    #[test]
    fn zero_ratio_means_free() {
        let price = resolve_price(&config(0.0, 1.0, 1.0), "default", "m", 10, Some(50)).unwrap();
        assert!(price.free_model);
        assert_eq!(price.quota_to_pre_consume, 0);
        assert_eq!(price.cost(1000, 1000), 0);
    }

    #[test]
    fn per_call_price_ignores_tokens() {
        let mut config = RelayConfig::default();
        config.model_ratio.insert(
            "m".to_string(),
            ModelRatio {
                model_ratio: 1.0,
                completion_ratio: 1.0,
                per_call_price: Some(50.0),
            },
        );
        let price = resolve_price(&config, "default", "m", 999, Some(999)).unwrap();
        assert_eq!(price.quota_to_pre_consume, 50);
        assert_eq!(price.cost(123, 456), 50);
    }

    #[test]
    fn unknown_model_uses_unit_ratios() {
        let price =
            resolve_price(&RelayConfig::default(), "default", "unknown", 8, None).unwrap();
        assert_eq!(price.cost(3, 5), 8);
    }
}
